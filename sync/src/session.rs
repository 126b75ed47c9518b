//! # Session Context
//!
//! Holds the current authenticated identity for the process, or none.
//!
//! Every change of identity (sign-in, sign-out, expiry, switching users) bumps
//! an `epoch`. Work started under an older epoch belongs to a session that is
//! gone, and its results must be dropped. Registered handlers are told about
//! every transition; the sync engine uses one to evict cached data.
//!
//! When the identity provider cannot be reached, [`SessionContext::refresh`]
//! keeps the last known state and raises a degraded flag instead of guessing.

use chrono::Utc;
use shared::Session;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::io::RemoteGateway;
use crate::lock;

pub type SessionHandler = Arc<dyn Fn(&SessionTransition) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    Expired,
    /// A different user signed in without an intervening sign-out
    UserChanged,
    /// Same user, new token
    Refreshed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionTransition {
    pub event: SessionEvent,
    pub previous_user: Option<String>,
    pub current: Option<Session>,
    pub epoch: u64,
}

impl SessionTransition {
    pub fn identity_changed(&self) -> bool {
        self.previous_user.as_deref() != self.current.as_ref().map(|s| s.user_id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub session: Option<Session>,
    /// The identity provider was unreachable on the last refresh
    pub degraded: bool,
    pub epoch: u64,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Inner {
    session: Option<Session>,
    degraded: bool,
    epoch: u64,
    handlers: Vec<(HandlerId, SessionHandler)>,
    next_handler: u64,
}

#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<Mutex<Inner>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active session. A session found expired is ended on the spot.
    pub fn current_session(&self) -> Option<Session> {
        let session = lock(&self.inner).session.clone()?;
        if session.is_valid_at(Utc::now()) {
            Some(session)
        } else {
            self.expire();
            None
        }
    }

    pub fn state(&self) -> SessionState {
        let inner = lock(&self.inner);
        SessionState {
            session: inner.session.clone(),
            degraded: inner.degraded,
            epoch: inner.epoch,
        }
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.inner).epoch
    }

    pub fn is_degraded(&self) -> bool {
        lock(&self.inner).degraded
    }

    /// Handlers run outside the context's lock, on the thread applying the transition
    pub fn on_change(&self, handler: SessionHandler) -> HandlerId {
        let mut inner = lock(&self.inner);
        inner.next_handler += 1;
        let id = HandlerId(inner.next_handler);
        inner.handlers.push((id, handler));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) {
        lock(&self.inner).handlers.retain(|(existing, _)| *existing != id);
    }

    /// Apply what the identity provider reports. Returns the transition, if any.
    pub fn set_session(&self, session: Option<Session>) -> Option<SessionTransition> {
        match session {
            Some(session) if !session.is_valid_at(Utc::now()) => self.transition(None, true),
            other => self.transition(other, false),
        }
    }

    pub fn expire(&self) -> Option<SessionTransition> {
        self.transition(None, true)
    }

    /// Drop the session locally, whatever the provider thinks
    pub fn clear(&self) -> Option<SessionTransition> {
        self.transition(None, false)
    }

    /// Ask the identity provider for the current session. On failure the last
    /// known state is kept and marked degraded.
    pub async fn refresh<G: RemoteGateway + ?Sized>(&self, gateway: &G) -> SessionState {
        match gateway.current_session().await {
            Ok(session) => {
                self.set_session(session);
            }
            Err(e) => {
                warn!("Identity provider unreachable, keeping last known session: {}", e);
                self.mark_degraded();
            }
        }
        self.state()
    }

    /// Keep the current session but flag that it could not be confirmed
    pub fn mark_degraded(&self) {
        lock(&self.inner).degraded = true;
    }

    fn transition(&self, next: Option<Session>, expired: bool) -> Option<SessionTransition> {
        let (transition, handlers) = {
            let mut inner = lock(&self.inner);
            inner.degraded = false;
            if inner.session == next {
                return None;
            }

            let previous_user = inner.session.as_ref().map(|s| s.user_id.clone());
            let event = match (&previous_user, &next) {
                (None, None) => return None,
                (None, Some(_)) => SessionEvent::SignedIn,
                (Some(_), None) if expired => SessionEvent::Expired,
                (Some(_), None) => SessionEvent::SignedOut,
                (Some(previous), Some(session)) if previous != &session.user_id => SessionEvent::UserChanged,
                (Some(_), Some(_)) => SessionEvent::Refreshed,
            };

            if event != SessionEvent::Refreshed {
                inner.epoch += 1;
            }
            inner.session = next.clone();

            let transition = SessionTransition {
                event,
                previous_user,
                current: next,
                epoch: inner.epoch,
            };
            let handlers: Vec<SessionHandler> = inner.handlers.iter().map(|(_, h)| h.clone()).collect();
            (transition, handlers)
        };

        info!("Session transition: {:?} (epoch {})", transition.event, transition.epoch);
        for handler in handlers {
            handler(&transition);
        }
        Some(transition)
    }
}
