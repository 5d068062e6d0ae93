use crate::core::error::StateError;
use crate::core::state::{CharacterAttributes, Session, SessionEvent, SessionId};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Result of routing an event to a specific session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    /// The session the event belonged to has been replaced; nothing changed.
    Stale,
}

/// Owns the current session and serializes every mutation of it.
///
/// Readers get immutable snapshots, either on demand or by subscribing to the
/// watch channel. A snapshot is published while the lock is still held, so the
/// published sequence matches the order in which events were applied.
pub struct SessionStore {
    session: Mutex<Session>,
    updates: watch::Sender<Arc<Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_session(Session::default())
    }

    pub fn with_session(session: Session) -> Self {
        let (updates, _) = watch::channel(Arc::new(session.clone()));
        Self {
            session: Mutex::new(session),
            updates,
        }
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Session>> {
        self.updates.subscribe()
    }

    /// Starts a fresh session and returns its id.
    pub fn start(&self, attributes: CharacterAttributes) -> Result<SessionId, StateError> {
        let mut session = self.lock();
        session.apply(SessionEvent::Start(attributes))?;
        self.publish(&session);
        Ok(session.id())
    }

    pub fn edit_attributes(&self, attributes: CharacterAttributes) -> Result<(), StateError> {
        self.dispatch(SessionEvent::EditAttributes(attributes))
    }

    /// Discards the current session; results still in flight for it become stale.
    pub fn reset(&self) -> SessionId {
        let mut session = self.lock();
        let old_id = session.id();
        *session = Session::idle(session.attributes().clone());
        debug!("Session {} reset, new session {}", old_id, session.id());
        self.publish(&session);
        session.id()
    }

    /// Applies an event to whatever session is current.
    pub fn dispatch(&self, event: SessionEvent) -> Result<(), StateError> {
        let mut session = self.lock();
        session.apply(event)?;
        self.publish(&session);
        Ok(())
    }

    /// Applies an event only if `session_id` is still the current session.
    pub fn dispatch_for(
        &self,
        session_id: SessionId,
        event: SessionEvent,
    ) -> Result<Dispatch, StateError> {
        let mut session = self.lock();
        if session.id() != session_id {
            debug!(
                "Dropping {:?} for stale session {}",
                event_name(&event),
                session_id
            );
            return Ok(Dispatch::Stale);
        }
        session.apply(event)?;
        self.publish(&session);
        Ok(Dispatch::Applied)
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, session: &Session) {
        self.updates.send_replace(Arc::new(session.clone()));
    }
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Start(_) => "start",
        SessionEvent::EditAttributes(_) => "edit_attributes",
        SessionEvent::ReferenceReady(_) => "reference_ready",
        SessionEvent::ReferenceFailed(_) => "reference_failed",
        SessionEvent::TaskStarted(_) => "task_started",
        SessionEvent::TaskGenerated(..) => "task_generated",
        SessionEvent::TaskProcessed(..) => "task_processed",
        SessionEvent::TaskFailed(..) => "task_failed",
        SessionEvent::Retry(_) => "retry",
        SessionEvent::Reset => "reset",
    }
}
