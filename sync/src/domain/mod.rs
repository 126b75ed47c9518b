//! # Domain Module
//!
//! Business logic of the sync layer: validating create commands, sequencing
//! remote calls against the entity store, and deriving what the dashboard
//! shows.

pub mod commands;
pub mod formatting;
pub mod sync_engine;
pub mod view_model;

pub use commands::{CreateAppointmentCommand, CreateChildCommand, CreateDocumentCommand, CreateMedicationCommand};
pub use sync_engine::{ChildDataReport, ChildrenLoad, CollectionOutcome, SignOut, SyncEngine};
pub use view_model::{CollectionKind, DashboardViewModel, EntityKind, LoadStatus, Route, ScreenState, ViewEvent};
