use crate::core::catalog::{all_task_keys, TaskKey};
use crate::core::error::{StateError, WorkflowError};
use crate::core::state::{CharacterAttributes, Session, SessionEvent, SessionId};
use crate::core::store::{Dispatch, SessionStore};
use crate::services::generation::ImageGenerator;
use crate::services::postprocess::BackgroundRemover;
use crate::services::retry::RetryController;
use crate::services::scheduler::{SessionReporter, TaskOutcome, TaskScheduler};
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

/// Entry point for the presentation layer: start, retry, reset and observe.
pub struct GenerationWorkflow {
    store: Arc<SessionStore>,
    generator: Arc<dyn ImageGenerator>,
    scheduler: TaskScheduler,
}

impl GenerationWorkflow {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        remover: Arc<dyn BackgroundRemover>,
        concurrency: usize,
    ) -> Self {
        Self {
            store: Arc::new(SessionStore::new()),
            scheduler: TaskScheduler::new(generator.clone(), remover).with_concurrency(concurrency),
            generator,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Session>> {
        self.store.subscribe()
    }

    pub fn edit_attributes(&self, attributes: CharacterAttributes) -> Result<(), StateError> {
        self.store.edit_attributes(attributes)
    }

    /// Generates the reference sheet, then every part, and returns the final snapshot.
    ///
    /// Part failures are recorded on their tasks and do not make this fail.
    pub async fn start(
        &self,
        attributes: CharacterAttributes,
    ) -> Result<Arc<Session>, WorkflowError> {
        let session_id = self.store.start(attributes.clone())?;
        info!("Session {} started, generating reference sheet", session_id);

        let reference = match self.generator.generate_reference(&attributes).await {
            Ok(sheet) => sheet,
            Err(e) => {
                error!("Reference sheet generation failed: {}", e);
                self.store
                    .dispatch_for(session_id, SessionEvent::ReferenceFailed(e.to_string()))?;
                return Err(WorkflowError::Reference(e));
            }
        };

        if self
            .store
            .dispatch_for(session_id, SessionEvent::ReferenceReady(reference.clone()))?
            == Dispatch::Stale
        {
            info!("Session {} was reset before parts started", session_id);
            return Ok(self.snapshot());
        }

        let reporter = SessionReporter::new(&self.store, session_id);
        self.scheduler
            .run_all(&attributes, &reference, &all_task_keys(), &reporter)
            .await?;

        Ok(self.snapshot())
    }

    pub async fn retry_task(&self, key: TaskKey) -> Result<TaskOutcome, WorkflowError> {
        RetryController::new(&self.store, &self.scheduler)
            .retry(key)
            .await
    }

    /// Drops the current session. Work still in flight finishes but is discarded.
    pub fn reset(&self) -> SessionId {
        self.store.reset()
    }
}
