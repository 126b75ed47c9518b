//! # AzulCare Sync
//!
//! Client-side entity sync layer for the AzulCare family health tracker.
//!
//! A signed-in parent owns children; each child has medications, documents
//! and appointments. This crate keeps an in-memory copy of that graph in step
//! with the hosted backend:
//!
//! - [`session::SessionContext`] tracks who is signed in
//! - [`storage::EntityStore`] caches the entity graph and its orderings
//! - [`domain::SyncEngine`] sequences remote calls and store mutations so the
//!   UI only ever observes consistent states
//! - [`io::RemoteGateway`] is the boundary to the backend
//!
//! ```text
//! UI ──> SyncEngine ──> RemoteGateway ──> backend
//!            │
//!            ├──> EntityStore + DashboardViewModel
//!            └──> SessionContext
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod logging;
pub mod session;
pub mod storage;

pub use config::{BackendConfig, SyncConfig};
pub use domain::{
    ChildDataReport, ChildrenLoad, CollectionOutcome, CreateAppointmentCommand, CreateChildCommand,
    CreateDocumentCommand, CreateMedicationCommand, DashboardViewModel, Route, SignOut, SyncEngine,
};
pub use error::{StoreError, SyncError, TransportError, ValidationError};
pub use io::{InMemoryGateway, RemoteGateway};
pub use session::{SessionContext, SessionState};
pub use storage::{EntityStore, StoreSnapshot};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
