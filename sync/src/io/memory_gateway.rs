//! # In-Memory Gateway
//!
//! A complete [`RemoteGateway`] living in process memory. It behaves like the
//! hosted backend in the ways the sync layer depends on:
//!
//! - equality filters and single-column ordering (stable on ties)
//! - server-assigned UUID ids and strictly increasing `created_at`
//! - row-level security: a user only sees and writes rows under their own
//!   children
//! - an identity provider with sign-in, expiry and sign-out notifications
//!
//! It also exposes fault injection (offline mode, failing tables, stalled
//! inserts, held queries) and call counters so tests can script races and
//! outages deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Map, Value};
use shared::Session;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::gateway::{Filter, OrderBy, RemoteGateway, Row, SessionChangeHandler, SubscriptionId, Table};
use crate::error::TransportError;
use crate::lock;

/// Keeps queries filtered on one value suspended until released or dropped
pub struct QueryHold {
    release: watch::Sender<bool>,
}

impl QueryHold {
    pub fn release(self) {
        let _ = self.release.send(true);
    }
}

pub struct InMemoryGateway {
    tables: Mutex<HashMap<Table, Vec<Row>>>,
    session: Mutex<Option<Session>>,
    handlers: Mutex<Vec<(SubscriptionId, SessionChangeHandler)>>,
    next_subscription: AtomicU64,
    last_created_at: Mutex<Option<DateTime<Utc>>>,
    offline: AtomicBool,
    stall_inserts: AtomicBool,
    failing_tables: Mutex<HashSet<Table>>,
    holds: Mutex<HashMap<String, watch::Receiver<bool>>>,
    query_count: AtomicUsize,
    insert_count: AtomicUsize,
    sign_out_count: AtomicUsize,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            handlers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            last_created_at: Mutex::new(None),
            offline: AtomicBool::new(false),
            stall_inserts: AtomicBool::new(false),
            failing_tables: Mutex::new(HashSet::new()),
            holds: Mutex::new(HashMap::new()),
            query_count: AtomicUsize::new(0),
            insert_count: AtomicUsize::new(0),
            sign_out_count: AtomicUsize::new(0),
        }
    }

    /// Store a row verbatim, bypassing id assignment and security checks
    pub fn seed(&self, table: Table, row: Row) {
        lock(&self.tables).entry(table).or_default().push(row);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        lock(&self.tables).get(&table).cloned().unwrap_or_default()
    }

    /// Simulate a successful sign-in; subscribers are notified
    pub fn sign_in(&self, session: Session) {
        *lock(&self.session) = Some(session.clone());
        self.notify(Some(session));
    }

    /// Simulate the provider expiring the session; subscribers are notified
    pub fn expire_session(&self) {
        *lock(&self.session) = None;
        self.notify(None);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    pub fn fail_table(&self, table: Table) {
        lock(&self.failing_tables).insert(table);
    }

    pub fn heal_table(&self, table: Table) {
        lock(&self.failing_tables).remove(&table);
    }

    /// Inserts never resolve while stalled
    pub fn stall_inserts(&self, stall: bool) {
        self.stall_inserts.store(stall, AtomicOrdering::SeqCst);
    }

    /// Suspend every query whose filter value equals `value`
    pub fn hold_queries_for(&self, value: &str) -> QueryHold {
        let (release, waiter) = watch::channel(false);
        lock(&self.holds).insert(value.to_string(), waiter);
        QueryHold { release }
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(AtomicOrdering::SeqCst)
    }

    pub fn insert_count(&self) -> usize {
        self.insert_count.load(AtomicOrdering::SeqCst)
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_out_count.load(AtomicOrdering::SeqCst)
    }

    fn notify(&self, session: Option<Session>) {
        let handlers: Vec<SessionChangeHandler> = lock(&self.handlers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(session.clone());
        }
    }

    fn check_available(&self, table: Table) -> Result<(), TransportError> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(TransportError::Unreachable("gateway is offline".to_string()));
        }
        if lock(&self.failing_tables).contains(&table) {
            return Err(TransportError::Remote(format!("relation \"{}\" is unavailable", table)));
        }
        Ok(())
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.user_id.clone())
            .ok_or_else(|| TransportError::Remote("JWT required".to_string()))
    }

    async fn wait_for_hold(&self, value: &str) {
        let waiter = lock(&self.holds).get(value).cloned();
        if let Some(mut waiter) = waiter {
            debug!("query for {} held", value);
            // A dropped hold closes the channel, which also releases waiters
            let _ = waiter.wait_for(|released| *released).await;
        }
    }

    fn owned_child_ids(tables: &HashMap<Table, Vec<Row>>, user_id: &str) -> HashSet<String> {
        tables
            .get(&Table::Children)
            .into_iter()
            .flatten()
            .filter(|row| column_str(row, "user_id") == Some(user_id))
            .filter_map(|row| column_str(row, "id").map(str::to_string))
            .collect()
    }

    fn visible_to(tables: &HashMap<Table, Vec<Row>>, table: Table, user_id: &str, row: &Row) -> bool {
        match table {
            Table::Children => column_str(row, "user_id") == Some(user_id),
            _ => column_str(row, "child_id")
                .is_some_and(|child_id| Self::owned_child_ids(tables, user_id).contains(child_id)),
        }
    }

    fn next_created_at(&self) -> String {
        let mut last = lock(&self.last_created_at);
        let now = Utc::now();
        let stamp = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

#[async_trait]
impl RemoteGateway for InMemoryGateway {
    async fn query(&self, table: Table, filter: &Filter, order_by: &OrderBy) -> Result<Vec<Row>, TransportError> {
        self.query_count.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available(table)?;
        let user_id = self.authenticated_user()?;

        self.wait_for_hold(&filter.value).await;

        let tables = lock(&self.tables);
        let mut rows: Vec<Row> = tables
            .get(&table)
            .into_iter()
            .flatten()
            .filter(|row| column_str(row, filter.column) == Some(filter.value.as_str()))
            .filter(|row| Self::visible_to(&tables, table, &user_id, row))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ordering = compare_values(a.get(order_by.column), b.get(order_by.column));
            if order_by.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        debug!("query {} where {} = {} -> {} rows", table, filter.column, filter.value, rows.len());
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, TransportError> {
        self.insert_count.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available(table)?;

        if self.stall_inserts.load(AtomicOrdering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let user_id = self.authenticated_user()?;
        let mut object: Map<String, Value> = match row {
            Value::Object(object) => object,
            _ => return Err(TransportError::Remote("row must be a JSON object".to_string())),
        };

        let mut tables = lock(&self.tables);
        if !Self::visible_to(&tables, table, &user_id, &Value::Object(object.clone())) {
            return Err(TransportError::Remote(format!(
                "new row violates row-level security policy for table \"{}\"",
                table
            )));
        }

        object.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        object.insert("created_at".to_string(), Value::String(self.next_created_at()));
        for column in nullable_columns(table) {
            object.entry(column.to_string()).or_insert(Value::Null);
        }
        if table == Table::Appointments {
            object.entry("reminder_sent".to_string()).or_insert(Value::Bool(false));
        }

        let created = Value::Object(object);
        tables.entry(table).or_default().push(created.clone());
        debug!("inserted into {}", table);
        Ok(created)
    }

    async fn current_session(&self) -> Result<Option<Session>, TransportError> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(TransportError::Unreachable("identity provider is offline".to_string()));
        }
        Ok(lock(&self.session).clone())
    }

    fn on_session_change(&self, handler: SessionChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, AtomicOrdering::SeqCst));
        lock(&self.handlers).push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.handlers).retain(|(existing, _)| *existing != id);
    }

    async fn sign_out(&self) -> Result<(), TransportError> {
        self.sign_out_count.fetch_add(1, AtomicOrdering::SeqCst);
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(TransportError::Unreachable("identity provider is offline".to_string()));
        }
        *lock(&self.session) = None;
        self.notify(None);
        Ok(())
    }
}

fn column_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn nullable_columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Children => &["photo_url", "notes"],
        Table::Medications | Table::Documents => &["notes"],
        Table::Appointments => &["location", "notes"],
    }
}

/// Nulls and missing values sort first
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
