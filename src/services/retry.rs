use crate::core::catalog::TaskKey;
use crate::core::error::{StateError, WorkflowError};
use crate::core::state::SessionEvent;
use crate::core::store::{Dispatch, SessionStore};
use crate::services::scheduler::{SessionReporter, TaskOutcome, TaskScheduler};
use log::info;

/// Re-runs a single failed task against the current session's reference sheet.
pub struct RetryController<'a> {
    store: &'a SessionStore,
    scheduler: &'a TaskScheduler,
}

impl<'a> RetryController<'a> {
    pub fn new(store: &'a SessionStore, scheduler: &'a TaskScheduler) -> Self {
        Self { store, scheduler }
    }

    pub async fn retry(&self, key: TaskKey) -> Result<TaskOutcome, WorkflowError> {
        let snapshot = self.store.snapshot();
        let session_id = snapshot.id();
        let reference = snapshot
            .reference_sheet()
            .cloned()
            .ok_or(StateError::MissingReference(session_id))?;

        if self
            .store
            .dispatch_for(session_id, SessionEvent::Retry(key))?
            == Dispatch::Stale
        {
            return Err(StateError::StaleSession(session_id).into());
        }

        info!("Retrying part {}", key);
        let reporter = SessionReporter::new(self.store, session_id);
        let outcome = self
            .scheduler
            .run_task(snapshot.attributes(), &reference, key, &reporter)
            .await?;
        Ok(outcome)
    }
}
