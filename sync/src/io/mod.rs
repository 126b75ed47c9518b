//! # IO Module
//!
//! The boundary to the hosted backend. [`RemoteGateway`] is the only way the
//! sync layer reaches the relational store or the identity provider;
//! [`RowMapper`] converts between its JSON rows and the shared row types.
//!
//! [`InMemoryGateway`] implements the full gateway contract in process memory
//! for tests, demos and offline development.

pub mod gateway;
pub mod memory_gateway;
pub mod row_mapper;

pub use gateway::{Filter, OrderBy, RemoteGateway, Row, SessionChangeHandler, SubscriptionId, Table};
pub use memory_gateway::{InMemoryGateway, QueryHold};
pub use row_mapper::RowMapper;
