//! # Error Types
//!
//! Every failure the sync layer can report. Nothing here is fatal to the
//! process: the worst outcome is a screen showing stale or empty data with a
//! retry affordance.

use crate::domain::view_model::EntityKind;

/// A form was rejected before any network call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Child name cannot be empty")]
    EmptyChildName,
    #[error("Medication name cannot be empty")]
    EmptyMedicationName,
    #[error("Document title cannot be empty")]
    EmptyDocumentTitle,
    #[error("Appointment title cannot be empty")]
    EmptyAppointmentTitle,
    #[error("Unknown document category: {0}")]
    UnknownDocumentCategory(String),
}

/// A remote call failed, timed out, or returned something we could not read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{operation} on {table} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        table: String,
        after_ms: u64,
    },
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend rejected request: {0}")]
    Remote(String),
    #[error("malformed row for {table}: {message}")]
    Malformed { table: String, message: String },
}

impl TransportError {
    /// Timeouts and connectivity failures may succeed on a second attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout { .. } | TransportError::Unreachable(_))
    }
}

/// Local cache invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("child {0} is not in the children collection")]
    UnknownChild(String),
    #[error("child {child_id} belongs to {child_owner}, not {store_owner}")]
    OwnerMismatch {
        child_id: String,
        child_owner: String,
        store_owner: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The response belongs to a session or selection that is no longer current
    #[error("result is no longer current: {0}")]
    StaleResult(String),
    #[error("backend credentials are not configured")]
    Configuration,
    #[error("no active session")]
    NoSession,
    #[error("no child is selected")]
    NoChildSelected,
    #[error("child {0} is not the selected child")]
    NotSelected(String),
    #[error("a {0} submission is already in progress")]
    SubmissionInFlight(EntityKind),
}

impl SyncError {
    /// Stale results are dropped silently; everything else is shown to the user
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SyncError::StaleResult(_))
    }
}
