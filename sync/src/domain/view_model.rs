//! # Dashboard View Model
//!
//! One typed value describing what the dashboard screen shows, changed only by
//! [`DashboardViewModel::apply`]. The screen state machine is
//!
//! ```text
//! Unauthenticated -> Loading -> NoChildren
//!                            -> WithChildren(selected child, 3 collection statuses)
//! ```
//!
//! Collection events name the child they belong to and are ignored when that
//! child is not the selected one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::session::SessionState;

/// Entities the user can create from the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Child,
    Medication,
    Document,
    Appointment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Child => "child",
            EntityKind::Medication => "medication",
            EntityKind::Document => "document",
            EntityKind::Appointment => "appointment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    Medications,
    Documents,
    Appointments,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 3] = [
        CollectionKind::Medications,
        CollectionKind::Documents,
        CollectionKind::Appointments,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    LoadFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub child_id: String,
    pub medications: LoadStatus,
    pub documents: LoadStatus,
    pub appointments: LoadStatus,
}

impl SelectionState {
    pub fn new(child_id: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            medications: LoadStatus::NotLoaded,
            documents: LoadStatus::NotLoaded,
            appointments: LoadStatus::NotLoaded,
        }
    }

    /// A freshly created child has nothing to load
    pub fn empty_loaded(child_id: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            medications: LoadStatus::Loaded,
            documents: LoadStatus::Loaded,
            appointments: LoadStatus::Loaded,
        }
    }

    pub fn status(&self, kind: CollectionKind) -> &LoadStatus {
        match kind {
            CollectionKind::Medications => &self.medications,
            CollectionKind::Documents => &self.documents,
            CollectionKind::Appointments => &self.appointments,
        }
    }

    fn status_mut(&mut self, kind: CollectionKind) -> &mut LoadStatus {
        match kind {
            CollectionKind::Medications => &mut self.medications,
            CollectionKind::Documents => &mut self.documents,
            CollectionKind::Appointments => &mut self.appointments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenState {
    #[default]
    Unauthenticated,
    Loading,
    /// The first children load failed; nothing cached to show
    LoadFailed,
    NoChildren,
    WithChildren(SelectionState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    SessionStarted,
    SessionEnded,
    ChildrenLoading,
    ChildrenLoaded { selected: Option<String> },
    ChildrenLoadFailed(String),
    ChildSelected(String),
    ChildCreated(String),
    CollectionLoading { child_id: String, kind: CollectionKind },
    CollectionLoaded { child_id: String, kind: CollectionKind },
    CollectionFailed { child_id: String, kind: CollectionKind, message: String },
    SubmissionStarted(EntityKind),
    SubmissionSettled(EntityKind),
    SubmissionFailed { kind: EntityKind, message: String },
    Degraded(bool),
    ErrorDismissed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardViewModel {
    pub screen: ScreenState,
    /// Create forms waiting for the backend; their submit controls stay disabled
    pub pending: BTreeSet<EntityKind>,
    pub degraded: bool,
    /// Last user-visible failure, shown with a retry affordance
    pub last_error: Option<String>,
}

impl DashboardViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> Option<&SelectionState> {
        match &self.screen {
            ScreenState::WithChildren(selection) => Some(selection),
            _ => None,
        }
    }

    pub fn selected_child(&self) -> Option<&str> {
        self.selection().map(|s| s.child_id.as_str())
    }

    pub fn is_submitting(&self, kind: EntityKind) -> bool {
        self.pending.contains(&kind)
    }

    pub fn apply(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::SessionStarted => {
                if self.screen == ScreenState::Unauthenticated {
                    self.screen = ScreenState::Loading;
                }
            }
            ViewEvent::SessionEnded => {
                *self = Self {
                    degraded: self.degraded,
                    ..Self::default()
                };
            }
            ViewEvent::ChildrenLoading => {
                // A reload keeps showing what is already on screen
                if matches!(self.screen, ScreenState::Unauthenticated | ScreenState::LoadFailed) {
                    self.screen = ScreenState::Loading;
                }
            }
            ViewEvent::ChildrenLoaded { selected } => {
                self.last_error = None;
                self.screen = match selected {
                    None => ScreenState::NoChildren,
                    Some(child_id) => match &self.screen {
                        ScreenState::WithChildren(current) if current.child_id == child_id => {
                            ScreenState::WithChildren(current.clone())
                        }
                        _ => ScreenState::WithChildren(SelectionState::new(child_id)),
                    },
                };
            }
            ViewEvent::ChildrenLoadFailed(message) => {
                if self.screen == ScreenState::Loading {
                    self.screen = ScreenState::LoadFailed;
                }
                self.last_error = Some(message);
            }
            ViewEvent::ChildSelected(child_id) => {
                if self.selected_child() != Some(child_id.as_str()) {
                    self.screen = ScreenState::WithChildren(SelectionState::new(child_id));
                }
            }
            ViewEvent::ChildCreated(child_id) => {
                self.screen = ScreenState::WithChildren(SelectionState::empty_loaded(child_id));
            }
            ViewEvent::CollectionLoading { child_id, kind } => {
                self.set_collection(&child_id, kind, LoadStatus::Loading);
            }
            ViewEvent::CollectionLoaded { child_id, kind } => {
                self.set_collection(&child_id, kind, LoadStatus::Loaded);
            }
            ViewEvent::CollectionFailed { child_id, kind, message } => {
                if self.set_collection(&child_id, kind, LoadStatus::LoadFailed(message.clone())) {
                    self.last_error = Some(message);
                }
            }
            ViewEvent::SubmissionStarted(kind) => {
                self.pending.insert(kind);
            }
            ViewEvent::SubmissionSettled(kind) => {
                self.pending.remove(&kind);
            }
            ViewEvent::SubmissionFailed { kind, message } => {
                self.pending.remove(&kind);
                self.last_error = Some(message);
            }
            ViewEvent::Degraded(degraded) => {
                self.degraded = degraded;
            }
            ViewEvent::ErrorDismissed => {
                self.last_error = None;
            }
        }
    }

    fn set_collection(&mut self, child_id: &str, kind: CollectionKind, status: LoadStatus) -> bool {
        match &mut self.screen {
            ScreenState::WithChildren(selection) if selection.child_id == child_id => {
                *selection.status_mut(kind) = status;
                true
            }
            _ => false,
        }
    }
}

/// Which screen applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// Backend credentials are missing; show the setup notice
    SetupRequired,
    Login,
    Dashboard,
}

impl Route {
    pub fn resolve(configured: bool, session: &SessionState) -> Route {
        if !configured {
            Route::SetupRequired
        } else if session.is_authenticated() {
            Route::Dashboard
        } else {
            Route::Login
        }
    }
}
