//! # Sync Engine
//!
//! Sequences remote calls and entity store mutations so the dashboard only
//! observes consistent states.
//!
//! ## Rules
//!
//! - **Confirm-then-reflect**: a create changes the store only after the
//!   backend returned the created row, and the stored entity is that row
//! - **Stale responses are dropped**: every load carries a ticket (session
//!   epoch, child id, load generation) and is applied only if the ticket is
//!   still current when the response lands
//! - **Bounded calls**: every remote call has a timeout; queries are retried on
//!   timeouts and connectivity failures, inserts never are
//! - **One submission per form**: a second create of the same kind while one is
//!   in flight is rejected
//! - **Fail-closed sign-out**: local state is cleared even when the backend
//!   cannot be told
//!
//! ## Locking
//!
//! Store and view model share one mutex, never held across an await. The
//! session context has its own; its handlers take the engine mutex, so the
//! engine never asks the session context for a transition while holding it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{Appointment, Child, Document, Medication, Session};
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::domain::commands::{
    CreateAppointmentCommand, CreateChildCommand, CreateDocumentCommand, CreateMedicationCommand,
};
use crate::domain::view_model::{CollectionKind, DashboardViewModel, EntityKind, Route, ViewEvent};
use crate::error::{StoreError, SyncError, TransportError, ValidationError};
use crate::io::{Filter, OrderBy, RemoteGateway, Row, RowMapper, SubscriptionId, Table};
use crate::lock;
use crate::session::{HandlerId, SessionContext, SessionState, SessionTransition};
use crate::storage::{EntityStore, StoreSnapshot};

/// Outcome of [`SyncEngine::load_children`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChildrenLoad {
    /// The user has no children; nothing is selected and no child data was fetched
    Empty,
    Loaded { selected: String, report: ChildDataReport },
    /// The session changed while the query was in flight
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    /// Replaced the cached collection with this many rows
    Applied(usize),
    Failed(SyncError),
    Discarded,
}

/// How each of the three child collections settled
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDataReport {
    pub medications: CollectionOutcome,
    pub documents: CollectionOutcome,
    pub appointments: CollectionOutcome,
}

impl ChildDataReport {
    pub fn outcome(&self, kind: CollectionKind) -> &CollectionOutcome {
        match kind {
            CollectionKind::Medications => &self.medications,
            CollectionKind::Documents => &self.documents,
            CollectionKind::Appointments => &self.appointments,
        }
    }

    pub fn all_applied(&self) -> bool {
        CollectionKind::ALL
            .iter()
            .all(|kind| matches!(self.outcome(*kind), CollectionOutcome::Applied(_)))
    }

    pub fn failures(&self) -> Vec<(CollectionKind, &SyncError)> {
        CollectionKind::ALL
            .iter()
            .filter_map(|kind| match self.outcome(*kind) {
                CollectionOutcome::Failed(e) => Some((*kind, e)),
                _ => None,
            })
            .collect()
    }
}

/// Outcome of [`SyncEngine::end_session`]; local state is cleared either way
#[derive(Debug, Clone, PartialEq)]
pub enum SignOut {
    Confirmed,
    /// The backend could not be told; the session was dropped locally only
    LocalOnly(TransportError),
}

#[derive(Debug, Default)]
struct EngineState {
    store: EntityStore,
    view: DashboardViewModel,
    /// Bumped on every selection and every child-data load
    load_generation: u64,
}

#[derive(Debug, Clone)]
struct LoadTicket {
    epoch: u64,
    child_id: String,
    generation: u64,
}

/// Row types of the three per-child collections
trait CollectionRow: DeserializeOwned + Send + 'static {
    const TABLE: Table;
    const KIND: CollectionKind;

    fn order() -> OrderBy;

    fn replace(store: &mut EntityStore, child_id: &str, rows: Vec<Self>) -> Result<(), StoreError>;
}

impl CollectionRow for Medication {
    const TABLE: Table = Table::Medications;
    const KIND: CollectionKind = CollectionKind::Medications;

    fn order() -> OrderBy {
        OrderBy::desc("created_at")
    }

    fn replace(store: &mut EntityStore, child_id: &str, rows: Vec<Self>) -> Result<(), StoreError> {
        store.replace_medications(child_id, rows)
    }
}

impl CollectionRow for Document {
    const TABLE: Table = Table::Documents;
    const KIND: CollectionKind = CollectionKind::Documents;

    fn order() -> OrderBy {
        OrderBy::desc("date")
    }

    fn replace(store: &mut EntityStore, child_id: &str, rows: Vec<Self>) -> Result<(), StoreError> {
        store.replace_documents(child_id, rows)
    }
}

impl CollectionRow for Appointment {
    const TABLE: Table = Table::Appointments;
    const KIND: CollectionKind = CollectionKind::Appointments;

    fn order() -> OrderBy {
        OrderBy::asc("date")
    }

    fn replace(store: &mut EntityStore, child_id: &str, rows: Vec<Self>) -> Result<(), StoreError> {
        store.replace_appointments(child_id, rows)
    }
}

/// Marks a create as in flight until dropped
struct Submission<'a> {
    state: &'a Mutex<EngineState>,
    kind: EntityKind,
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        lock(self.state).view.apply(ViewEvent::SubmissionSettled(self.kind));
    }
}

pub struct SyncEngine<G: RemoteGateway> {
    /// `None` when backend credentials are missing; the engine is then inert
    gateway: Option<Arc<G>>,
    config: SyncConfig,
    session: SessionContext,
    state: Arc<Mutex<EngineState>>,
    subscription: Option<SubscriptionId>,
    eviction_handler: HandlerId,
}

impl<G: RemoteGateway> Clone for SyncEngine<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            config: self.config.clone(),
            session: self.session.clone(),
            state: self.state.clone(),
            subscription: self.subscription,
            eviction_handler: self.eviction_handler,
        }
    }
}

impl<G: RemoteGateway> SyncEngine<G> {
    /// Build an engine over `gateway`. Without configured credentials the
    /// gateway is never called and every operation fails with
    /// [`SyncError::Configuration`].
    pub fn new(gateway: Arc<G>, config: SyncConfig) -> Self {
        let gateway = if config.backend.is_configured() {
            Some(gateway)
        } else {
            warn!("Backend credentials missing; sync engine is inert");
            None
        };

        let session = SessionContext::new();
        let state = Arc::new(Mutex::new(EngineState::default()));

        let handler_state = state.clone();
        let eviction_handler = session.on_change(Arc::new(move |transition: &SessionTransition| {
            let mut state = lock(&handler_state);
            state.view.apply(ViewEvent::Degraded(false));
            if !transition.identity_changed() {
                return;
            }
            info!(
                "Identity changed ({:?}); evicting cached entities",
                transition.event
            );
            state.store.clear();
            state.load_generation += 1;
            state.view.apply(ViewEvent::SessionEnded);
            if transition.current.is_some() {
                state.view.apply(ViewEvent::SessionStarted);
            }
        }));

        let subscription = gateway.as_deref().map(|gateway| {
            let context = session.clone();
            gateway.on_session_change(Arc::new(move |reported: Option<Session>| {
                context.set_session(reported);
            }))
        });

        Self {
            gateway,
            config,
            session,
            state,
            subscription,
            eviction_handler,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.session
    }

    /// Stop following the identity provider and stop evicting on session changes
    pub fn detach(&self) {
        if let (Some(gateway), Some(subscription)) = (&self.gateway, self.subscription) {
            gateway.unsubscribe(subscription);
        }
        self.session.remove_handler(self.eviction_handler);
    }

    pub fn store_snapshot(&self) -> StoreSnapshot {
        lock(&self.state).store.snapshot()
    }

    pub fn view(&self) -> DashboardViewModel {
        lock(&self.state).view.clone()
    }

    pub fn session(&self) -> SessionState {
        // Ends a session that expired since the last look
        self.session.current_session();
        self.session.state()
    }

    pub fn route(&self) -> Route {
        Route::resolve(self.is_configured(), &self.session())
    }

    pub fn dismiss_error(&self) {
        lock(&self.state).view.apply(ViewEvent::ErrorDismissed);
    }

    /// Ask the identity provider who is signed in. An unreachable provider
    /// leaves the last known session in place, flagged as degraded.
    pub async fn restore_session(&self) -> Result<SessionState, SyncError> {
        let gateway = self.gateway()?;
        info!("Restoring session");

        let state = match timeout(self.config.request_timeout(), self.session.refresh(gateway)).await {
            Ok(state) => state,
            Err(_) => {
                warn!(
                    "Identity provider did not answer within {}ms",
                    self.config.request_timeout_ms
                );
                self.session.mark_degraded();
                self.session.state()
            }
        };

        {
            let mut engine = lock(&self.state);
            engine.view.apply(ViewEvent::Degraded(state.degraded));
            if state.is_authenticated() {
                engine.view.apply(ViewEvent::SessionStarted);
            }
        }

        info!(
            "Session restored (authenticated: {}, degraded: {})",
            state.is_authenticated(),
            state.degraded
        );
        Ok(state)
    }

    /// Fetch the signed-in user's children, newest first, select the newest
    /// one and load its data. Every successful load resets the selection.
    pub async fn load_children(&self) -> Result<ChildrenLoad, SyncError> {
        let gateway = self.gateway()?;
        let session = self.require_session()?;
        let epoch = self.session.epoch();

        lock(&self.state).view.apply(ViewEvent::ChildrenLoading);
        info!("Loading children for user {}", session.user_id);

        let result: Result<Vec<Child>, TransportError> = self
            .query_rows(
                gateway,
                Table::Children,
                Filter::eq("user_id", session.user_id.as_str()),
                OrderBy::desc("created_at"),
            )
            .await;

        let selected = {
            let mut state = lock(&self.state);
            if self.session.epoch() != epoch {
                debug!("Discarding children of user {}; session changed", session.user_id);
                return Ok(ChildrenLoad::Discarded);
            }

            let children = match result {
                Ok(children) => children,
                Err(e) => {
                    error!("Failed to load children: {}", e);
                    state.view.apply(ViewEvent::ChildrenLoadFailed(e.to_string()));
                    return Err(e.into());
                }
            };

            let count = children.len();
            state.store.replace_children(&session.user_id, children);
            let selected = state.store.children().first().map(|child| child.id.clone());
            if let Some(child_id) = &selected {
                state.store.select(child_id)?;
            }
            state.view.apply(ViewEvent::ChildrenLoaded {
                selected: selected.clone(),
            });

            info!("Loaded {} children for user {}", count, session.user_id);
            selected
        };

        match selected {
            None => Ok(ChildrenLoad::Empty),
            Some(child_id) => {
                let report = self.load_child_data(&child_id).await?;
                Ok(ChildrenLoad::Loaded {
                    selected: child_id,
                    report,
                })
            }
        }
    }

    /// Fetch the three collections of the selected child concurrently. Each
    /// one is applied as soon as it lands, unless this load was superseded.
    pub async fn load_child_data(&self, child_id: &str) -> Result<ChildDataReport, SyncError> {
        let gateway = self.gateway()?;
        self.require_session()?;
        let epoch = self.session.epoch();

        let ticket = {
            let mut state = lock(&self.state);
            if state.store.selected() != Some(child_id) {
                return Err(SyncError::NotSelected(child_id.to_string()));
            }
            state.load_generation += 1;
            for kind in CollectionKind::ALL {
                state.view.apply(ViewEvent::CollectionLoading {
                    child_id: child_id.to_string(),
                    kind,
                });
            }
            LoadTicket {
                epoch,
                child_id: child_id.to_string(),
                generation: state.load_generation,
            }
        };

        info!("Loading data for child {} (load {})", child_id, ticket.generation);
        let (medications, documents, appointments) = tokio::join!(
            self.load_collection::<Medication>(gateway, &ticket),
            self.load_collection::<Document>(gateway, &ticket),
            self.load_collection::<Appointment>(gateway, &ticket),
        );

        Ok(ChildDataReport {
            medications,
            documents,
            appointments,
        })
    }

    /// Make `child_id` the active child and load its data
    pub async fn select_child(&self, child_id: &str) -> Result<ChildDataReport, SyncError> {
        self.gateway()?;
        self.require_session()?;

        {
            let mut state = lock(&self.state);
            state.store.select(child_id)?;
            state.load_generation += 1;
            state.view.apply(ViewEvent::ChildSelected(child_id.to_string()));
        }
        info!("Selected child {}", child_id);

        self.load_child_data(child_id).await
    }

    /// Register a child under the signed-in user. The new child becomes the
    /// selected one, with nothing to load.
    pub async fn create_child(&self, command: CreateChildCommand) -> Result<Child, SyncError> {
        command.validate()?;
        let gateway = self.gateway()?;
        let session = self.require_session()?;
        let epoch = self.session.epoch();

        let new_child = command.into_new_child(&session.user_id)?;
        let _submission = self.begin_submission(EntityKind::Child)?;
        info!("Creating child {} for user {}", new_child.name, session.user_id);

        let child: Child = match self.insert_row(gateway, Table::Children, &new_child).await {
            Ok(child) => child,
            Err(e) => return Err(self.submission_failed(EntityKind::Child, e.into())),
        };

        let mut state = lock(&self.state);
        self.ensure_epoch(epoch, EntityKind::Child)?;
        state.store.insert_child(child.clone())?;
        state.store.select(&child.id)?;
        state.store.replace_child_data(&child.id, Vec::new(), Vec::new(), Vec::new())?;
        state.load_generation += 1;
        state.view.apply(ViewEvent::ChildCreated(child.id.clone()));

        info!("Created child {}", child.id);
        Ok(child)
    }

    pub async fn create_medication(&self, command: CreateMedicationCommand) -> Result<Medication, SyncError> {
        command.validate()?;
        self.create_for_selected_child(
            EntityKind::Medication,
            Table::Medications,
            |child_id| command.into_new_medication(child_id),
            |store, medication| store.insert_medication(medication),
        )
        .await
    }

    /// Record a document; without an uploaded file it points at the
    /// configured placeholder
    pub async fn create_document(&self, command: CreateDocumentCommand) -> Result<Document, SyncError> {
        command.validate()?;
        let placeholder = self.config.document_placeholder_url.clone();
        self.create_for_selected_child(
            EntityKind::Document,
            Table::Documents,
            move |child_id| command.into_new_document(child_id, &placeholder),
            |store, document| store.insert_document(document),
        )
        .await
    }

    pub async fn create_appointment(&self, command: CreateAppointmentCommand) -> Result<Appointment, SyncError> {
        command.validate()?;
        self.create_for_selected_child(
            EntityKind::Appointment,
            Table::Appointments,
            |child_id| command.into_new_appointment(child_id),
            |store, appointment| store.insert_appointment(appointment),
        )
        .await
    }

    /// Sign out remotely, then clear the session and every cached entity
    /// regardless of how the remote call went.
    pub async fn end_session(&self) -> Result<SignOut, SyncError> {
        let Some(gateway) = self.gateway.as_deref() else {
            self.clear_local();
            return Err(SyncError::Configuration);
        };
        info!("Ending session");

        let outcome = match timeout(self.config.request_timeout(), gateway.sign_out()).await {
            Ok(Ok(())) => SignOut::Confirmed,
            Ok(Err(e)) => {
                warn!("Remote sign-out failed, clearing local session anyway: {}", e);
                SignOut::LocalOnly(e)
            }
            Err(_) => {
                let e = TransportError::Timeout {
                    operation: "sign_out",
                    table: "auth".to_string(),
                    after_ms: self.config.request_timeout_ms,
                };
                warn!("Remote sign-out failed, clearing local session anyway: {}", e);
                SignOut::LocalOnly(e)
            }
        };

        self.clear_local();
        info!("Session ended");
        Ok(outcome)
    }

    fn clear_local(&self) {
        self.session.clear();
        let mut state = lock(&self.state);
        state.store.clear();
        state.load_generation += 1;
        state.view.apply(ViewEvent::SessionEnded);
    }

    fn gateway(&self) -> Result<&G, SyncError> {
        self.gateway.as_deref().ok_or(SyncError::Configuration)
    }

    fn require_session(&self) -> Result<Session, SyncError> {
        self.session.current_session().ok_or(SyncError::NoSession)
    }

    fn ensure_epoch(&self, epoch: u64, kind: EntityKind) -> Result<(), SyncError> {
        if self.session.epoch() == epoch {
            Ok(())
        } else {
            warn!("Created {} belongs to a session that has ended; not cached", kind);
            Err(SyncError::StaleResult(format!("{} created under a previous session", kind)))
        }
    }

    fn is_current(&self, state: &EngineState, ticket: &LoadTicket) -> bool {
        state.load_generation == ticket.generation
            && state.store.selected() == Some(ticket.child_id.as_str())
            && self.session.epoch() == ticket.epoch
    }

    fn begin_submission(&self, kind: EntityKind) -> Result<Submission<'_>, SyncError> {
        let mut state = lock(&self.state);
        if state.view.is_submitting(kind) {
            warn!("Rejected {} create: one is already in flight", kind);
            return Err(SyncError::SubmissionInFlight(kind));
        }
        state.view.apply(ViewEvent::SubmissionStarted(kind));
        Ok(Submission {
            state: &self.state,
            kind,
        })
    }

    fn submission_failed(&self, kind: EntityKind, e: SyncError) -> SyncError {
        error!("Failed to create {}: {}", kind, e);
        lock(&self.state).view.apply(ViewEvent::SubmissionFailed {
            kind,
            message: e.to_string(),
        });
        e
    }

    async fn create_for_selected_child<N, T>(
        &self,
        kind: EntityKind,
        table: Table,
        build: impl FnOnce(&str) -> Result<N, ValidationError> + Send,
        reflect: impl FnOnce(&mut EntityStore, T) -> Result<usize, StoreError> + Send,
    ) -> Result<T, SyncError>
    where
        N: Serialize + Send + Sync,
        T: DeserializeOwned + Clone + Send,
    {
        let gateway = self.gateway()?;
        self.require_session()?;
        let epoch = self.session.epoch();

        let child_id = lock(&self.state)
            .store
            .selected()
            .map(str::to_string)
            .ok_or(SyncError::NoChildSelected)?;
        let new_row = build(&child_id)?;
        let _submission = self.begin_submission(kind)?;
        info!("Creating {} for child {}", kind, child_id);

        let created: T = match self.insert_row(gateway, table, &new_row).await {
            Ok(created) => created,
            Err(e) => return Err(self.submission_failed(kind, e.into())),
        };

        let mut state = lock(&self.state);
        self.ensure_epoch(epoch, kind)?;
        let index = reflect(&mut state.store, created.clone())?;

        info!("Created {} for child {} at position {}", kind, child_id, index);
        Ok(created)
    }

    async fn load_collection<R: CollectionRow>(&self, gateway: &G, ticket: &LoadTicket) -> CollectionOutcome {
        let result: Result<Vec<R>, TransportError> = self
            .query_rows(
                gateway,
                R::TABLE,
                Filter::eq("child_id", ticket.child_id.as_str()),
                R::order(),
            )
            .await;

        let mut state = lock(&self.state);
        if !self.is_current(&state, ticket) {
            debug!(
                "Discarding {} of child {} from superseded load {}",
                R::TABLE,
                ticket.child_id,
                ticket.generation
            );
            return CollectionOutcome::Discarded;
        }

        let applied = result
            .map_err(SyncError::from)
            .and_then(|rows| {
                let count = rows.len();
                R::replace(&mut state.store, &ticket.child_id, rows)?;
                Ok(count)
            });

        match applied {
            Ok(count) => {
                state.view.apply(ViewEvent::CollectionLoaded {
                    child_id: ticket.child_id.clone(),
                    kind: R::KIND,
                });
                debug!("Applied {} {} for child {}", count, R::TABLE, ticket.child_id);
                CollectionOutcome::Applied(count)
            }
            Err(e) => {
                error!("Failed to load {} for child {}: {}", R::TABLE, ticket.child_id, e);
                state.view.apply(ViewEvent::CollectionFailed {
                    child_id: ticket.child_id.clone(),
                    kind: R::KIND,
                    message: e.to_string(),
                });
                CollectionOutcome::Failed(e)
            }
        }
    }

    async fn query_rows<T: DeserializeOwned>(
        &self,
        gateway: &G,
        table: Table,
        filter: Filter,
        order_by: OrderBy,
    ) -> Result<Vec<T>, TransportError> {
        let rows = self.query_with_retry(gateway, table, &filter, &order_by).await?;
        RowMapper::from_rows(table, rows)
    }

    /// Retry timeouts and connectivity failures with linear backoff
    async fn query_with_retry(
        &self,
        gateway: &G,
        table: Table,
        filter: &Filter,
        order_by: &OrderBy,
    ) -> Result<Vec<Row>, TransportError> {
        let mut attempt: u32 = 0;
        loop {
            let error = match timeout(self.config.request_timeout(), gateway.query(table, filter, order_by)).await {
                Ok(Ok(rows)) => return Ok(rows),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout {
                    operation: "query",
                    table: table.name().to_string(),
                    after_ms: self.config.request_timeout_ms,
                },
            };

            if !error.is_retryable() || attempt >= self.config.query_retries {
                return Err(error);
            }
            attempt += 1;
            warn!(
                "Query on {} failed ({}); retry {} of {}",
                table, error, attempt, self.config.query_retries
            );
            tokio::time::sleep(self.config.retry_backoff() * attempt).await;
        }
    }

    /// Inserts are not idempotent and run exactly once
    async fn insert_row<N: Serialize + Sync, T: DeserializeOwned>(
        &self,
        gateway: &G,
        table: Table,
        new_row: &N,
    ) -> Result<T, TransportError> {
        let row = RowMapper::to_row(table, new_row)?;
        let created = match timeout(self.config.request_timeout(), gateway.insert(table, row)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    operation: "insert",
                    table: table.name().to_string(),
                    after_ms: self.config.request_timeout_ms,
                })
            }
        };
        RowMapper::from_row(table, created)
    }
}
