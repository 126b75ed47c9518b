//! Conversion between typed rows and the JSON objects the gateway exchanges.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::gateway::{Row, Table};
use crate::error::TransportError;

/// Mapper between shared row types and gateway rows
pub struct RowMapper;

impl RowMapper {
    pub fn to_row<T: Serialize>(table: Table, value: &T) -> Result<Row, TransportError> {
        serde_json::to_value(value).map_err(|e| TransportError::Malformed {
            table: table.name().to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_row<T: DeserializeOwned>(table: Table, row: Row) -> Result<T, TransportError> {
        serde_json::from_value(row).map_err(|e| TransportError::Malformed {
            table: table.name().to_string(),
            message: e.to_string(),
        })
    }

    /// Fails on the first row that does not decode; a half-read list is never returned
    pub fn from_rows<T: DeserializeOwned>(table: Table, rows: Vec<Row>) -> Result<Vec<T>, TransportError> {
        rows.into_iter().map(|row| Self::from_row(table, row)).collect()
    }
}
