//! # Remote Gateway
//!
//! The interface to the hosted backend: table queries and inserts against the
//! relational store, plus the identity provider's session API.
//!
//! Implementations talk to whatever backend they like; the sync layer only
//! depends on this trait.

use async_trait::async_trait;
use serde_json::Value;
use shared::Session;
use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

/// A row as exchanged with the backend (a JSON object)
pub type Row = Value;

/// Callback invoked by the identity provider on every auth state change
pub type SessionChangeHandler = Arc<dyn Fn(Option<Session>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Children,
    Medications,
    Documents,
    Appointments,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Children => "children",
            Table::Medications => "medications",
            Table::Documents => "documents",
            Table::Appointments => "appointments",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality filter on one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: &'static str,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<String>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Opaque handle for a registered session-change handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Rows of `table` matching `filter`, in the requested order
    async fn query(&self, table: Table, filter: &Filter, order_by: &OrderBy) -> Result<Vec<Row>, TransportError>;

    /// Insert one row; returns it with the server-assigned id and created_at
    async fn insert(&self, table: Table, row: Row) -> Result<Row, TransportError>;

    /// The identity provider's view of the current session
    async fn current_session(&self) -> Result<Option<Session>, TransportError>;

    /// Register for sign-in, sign-out and expiry notifications
    fn on_session_change(&self, handler: SessionChangeHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    async fn sign_out(&self) -> Result<(), TransportError>;
}
