use crate::core::catalog::TaskKey;
use crate::core::error::{GenerationError, StateError};
use crate::core::media::ImageData;
use crate::core::state::{CharacterAttributes, ReferenceSheet, SessionEvent, SessionId};
use crate::core::store::SessionStore;
use crate::services::generation::ImageGenerator;
use crate::services::postprocess::BackgroundRemover;
use futures_util::StreamExt;
use log::{info, warn};
use std::sync::Arc;

pub const DEFAULT_CONCURRENCY: usize = 2;

/// Receives lifecycle notifications for every task the scheduler runs.
pub trait TaskReporter: Send + Sync {
    fn task_started(&self, key: TaskKey) -> Result<(), StateError>;
    fn task_generated(&self, key: TaskKey, raw: &ImageData) -> Result<(), StateError>;
    fn task_processed(&self, key: TaskKey, image: ImageData) -> Result<(), StateError>;
    fn task_failed(&self, key: TaskKey, error: &GenerationError) -> Result<(), StateError>;
}

/// Routes task notifications into a [`SessionStore`], bound to one session.
///
/// Notifications for a session that has since been replaced are dropped.
pub struct SessionReporter<'a> {
    store: &'a SessionStore,
    session_id: SessionId,
}

impl<'a> SessionReporter<'a> {
    pub fn new(store: &'a SessionStore, session_id: SessionId) -> Self {
        Self { store, session_id }
    }

    fn send(&self, event: SessionEvent) -> Result<(), StateError> {
        self.store.dispatch_for(self.session_id, event).map(|_| ())
    }
}

impl TaskReporter for SessionReporter<'_> {
    fn task_started(&self, key: TaskKey) -> Result<(), StateError> {
        self.send(SessionEvent::TaskStarted(key))
    }

    fn task_generated(&self, key: TaskKey, raw: &ImageData) -> Result<(), StateError> {
        self.send(SessionEvent::TaskGenerated(key, raw.clone()))
    }

    fn task_processed(&self, key: TaskKey, image: ImageData) -> Result<(), StateError> {
        self.send(SessionEvent::TaskProcessed(key, image))
    }

    fn task_failed(&self, key: TaskKey, error: &GenerationError) -> Result<(), StateError> {
        self.send(SessionEvent::TaskFailed(key, error.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Background removal failed; the raw image was kept as the final image.
    Degraded,
    Failed,
}

/// Tally of a batch. `completed` includes degraded tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Degraded => {
                self.completed += 1;
                self.degraded += 1;
            }
            TaskOutcome::Failed => self.failed += 1,
        }
    }
}

/// Runs part generation and background removal with bounded concurrency.
pub struct TaskScheduler {
    generator: Arc<dyn ImageGenerator>,
    remover: Arc<dyn BackgroundRemover>,
    concurrency: usize,
}

impl TaskScheduler {
    pub fn new(generator: Arc<dyn ImageGenerator>, remover: Arc<dyn BackgroundRemover>) -> Self {
        Self {
            generator,
            remover,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every key to a terminal state, starting them in the given order.
    ///
    /// A failing task never stops the others. If the reporter rejects a
    /// notification, the first such error is returned once all tasks settled.
    pub async fn run_all(
        &self,
        attributes: &CharacterAttributes,
        reference: &ReferenceSheet,
        keys: &[TaskKey],
        reporter: &dyn TaskReporter,
    ) -> Result<BatchSummary, StateError> {
        if keys.is_empty() {
            return Err(StateError::EmptyCatalog);
        }
        if self.concurrency == 0 {
            return Err(StateError::ZeroConcurrency);
        }

        info!(
            "Generating {} parts with concurrency {}",
            keys.len(),
            self.concurrency
        );

        let results: Vec<Result<TaskOutcome, StateError>> = futures_util::stream::iter(keys)
            .map(|&key| self.run_task(attributes, reference, key, reporter))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Batch finished: {} completed ({} without background removal), {} failed",
            summary.completed, summary.degraded, summary.failed
        );
        Ok(summary)
    }

    /// Drives one task from pending to a terminal state.
    pub async fn run_task(
        &self,
        attributes: &CharacterAttributes,
        reference: &ReferenceSheet,
        key: TaskKey,
        reporter: &dyn TaskReporter,
    ) -> Result<TaskOutcome, StateError> {
        reporter.task_started(key)?;

        let raw = match self.generator.generate_part(attributes, key, reference).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Part {} failed: {}", key, e);
                reporter.task_failed(key, &e)?;
                return Ok(TaskOutcome::Failed);
            }
        };
        reporter.task_generated(key, &raw)?;

        match self.remover.remove_background(&raw).await {
            Ok(image) => {
                reporter.task_processed(key, image)?;
                Ok(TaskOutcome::Completed)
            }
            Err(e) => {
                warn!(
                    "Background removal failed for {} ({}), keeping the raw image",
                    key, e
                );
                reporter.task_processed(key, raw)?;
                Ok(TaskOutcome::Degraded)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::catalog::all_task_keys;
    use crate::core::error::ProcessingError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sleeps briefly per call and fails for the configured keys.
    pub(crate) struct MockGenerator {
        pub part_calls: AtomicUsize,
        pub reference_calls: AtomicUsize,
        pub fail_reference: bool,
        pub fail_parts: Mutex<HashSet<TaskKey>>,
        pub delay: Duration,
    }

    impl MockGenerator {
        pub(crate) fn new() -> Self {
            Self {
                part_calls: AtomicUsize::new(0),
                reference_calls: AtomicUsize::new(0),
                fail_reference: false,
                fail_parts: Mutex::new(HashSet::new()),
                delay: Duration::from_millis(5),
            }
        }

        pub(crate) fn failing_parts(keys: impl IntoIterator<Item = TaskKey>) -> Self {
            let mock = Self::new();
            mock.fail_parts.lock().unwrap().extend(keys);
            mock
        }
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        async fn generate_reference(
            &self,
            _attributes: &CharacterAttributes,
        ) -> Result<ReferenceSheet, GenerationError> {
            self.reference_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_reference {
                return Err(GenerationError::Api("reference refused".to_string()));
            }
            Ok(sheet())
        }

        async fn generate_part(
            &self,
            _attributes: &CharacterAttributes,
            key: TaskKey,
            _reference: &ReferenceSheet,
        ) -> Result<ImageData, GenerationError> {
            self.part_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_parts.lock().unwrap().contains(&key) {
                return Err(GenerationError::NoImage("SAFETY".to_string()));
            }
            Ok(ImageData::new("image/png", key.to_string().into_bytes()))
        }
    }

    /// Returns a marker image, or fails for every other call when `flaky`.
    pub(crate) struct MockRemover {
        pub calls: AtomicUsize,
        pub flaky: bool,
    }

    impl MockRemover {
        pub(crate) fn new(flaky: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                flaky,
            }
        }
    }

    #[async_trait]
    impl BackgroundRemover for MockRemover {
        async fn remove_background(&self, raw: &ImageData) -> Result<ImageData, ProcessingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.flaky && n % 2 == 0 {
                return Err(ProcessingError::Decode("bad pixels".to_string()));
            }
            let mut bytes = raw.bytes().to_vec();
            bytes.extend_from_slice(b"+alpha");
            Ok(ImageData::new("image/png", bytes))
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        started: Mutex<Vec<TaskKey>>,
        processed: Mutex<Vec<(TaskKey, ImageData)>>,
        failed: Mutex<Vec<TaskKey>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        reject_processed: bool,
    }

    impl RecordingReporter {
        fn finish(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl TaskReporter for RecordingReporter {
        fn task_started(&self, key: TaskKey) -> Result<(), StateError> {
            self.started.lock().unwrap().push(key);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            Ok(())
        }

        fn task_generated(&self, _key: TaskKey, _raw: &ImageData) -> Result<(), StateError> {
            Ok(())
        }

        fn task_processed(&self, key: TaskKey, image: ImageData) -> Result<(), StateError> {
            self.finish();
            if self.reject_processed {
                return Err(StateError::UnknownTask(key));
            }
            self.processed.lock().unwrap().push((key, image));
            Ok(())
        }

        fn task_failed(&self, key: TaskKey, _error: &GenerationError) -> Result<(), StateError> {
            self.finish();
            self.failed.lock().unwrap().push(key);
            Ok(())
        }
    }

    pub(crate) fn sheet() -> ReferenceSheet {
        ReferenceSheet {
            image: ImageData::new("image/png", vec![9u8]),
            generated_at: Utc::now(),
        }
    }

    fn scheduler(generator: MockGenerator, remover: MockRemover) -> TaskScheduler {
        TaskScheduler::new(Arc::new(generator), Arc::new(remover))
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let reporter = RecordingReporter::default();
        let summary = scheduler(MockGenerator::new(), MockRemover::new(false))
            .run_all(
                &CharacterAttributes::default(),
                &sheet(),
                &all_task_keys(),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(summary.completed, 24);
        assert_eq!(reporter.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_concurrency() {
        let reporter = RecordingReporter::default();
        scheduler(MockGenerator::new(), MockRemover::new(false))
            .with_concurrency(5)
            .run_all(
                &CharacterAttributes::default(),
                &sheet(),
                &all_task_keys(),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(reporter.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_tasks_start_in_catalog_order() {
        let reporter = RecordingReporter::default();
        scheduler(MockGenerator::new(), MockRemover::new(false))
            .run_all(
                &CharacterAttributes::default(),
                &sheet(),
                &all_task_keys(),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(*reporter.started.lock().unwrap(), all_task_keys());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let keys = all_task_keys();
        let failing: Vec<TaskKey> = keys.iter().copied().step_by(3).collect();
        let reporter = RecordingReporter::default();

        let summary = scheduler(
            MockGenerator::failing_parts(failing.clone()),
            MockRemover::new(false),
        )
        .run_all(&CharacterAttributes::default(), &sheet(), &keys, &reporter)
        .await
        .unwrap();

        assert_eq!(summary.failed, failing.len());
        assert_eq!(summary.completed, keys.len() - failing.len());

        let mut failed = reporter.failed.lock().unwrap().clone();
        failed.sort();
        assert_eq!(failed, failing);
    }

    #[tokio::test]
    async fn test_degraded_tasks_keep_raw_image() {
        let key = TaskKey::new(
            crate::core::catalog::BodyPart::Head,
            crate::core::catalog::ViewAngle::Front,
        );
        let reporter = RecordingReporter::default();
        let outcome = scheduler(MockGenerator::new(), MockRemover::new(true))
            .run_task(&CharacterAttributes::default(), &sheet(), key, &reporter)
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Degraded);
        let processed = reporter.processed.lock().unwrap();
        assert_eq!(processed[0].1.bytes(), key.to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_degraded_count_in_summary() {
        let reporter = RecordingReporter::default();
        let summary = scheduler(MockGenerator::new(), MockRemover::new(true))
            .run_all(
                &CharacterAttributes::default(),
                &sheet(),
                &all_task_keys(),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(summary.completed, 24);
        assert_eq!(summary.degraded, 12);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_reporter_errors_surface_after_all_tasks_settle() {
        let reporter = RecordingReporter {
            reject_processed: true,
            ..Default::default()
        };
        let generator = Arc::new(MockGenerator::new());
        let scheduler = TaskScheduler::new(generator.clone(), Arc::new(MockRemover::new(false)));

        let err = scheduler
            .run_all(
                &CharacterAttributes::default(),
                &sheet(),
                &all_task_keys(),
                &reporter,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StateError::UnknownTask(_)));
        assert_eq!(generator.part_calls.load(Ordering::SeqCst), 24);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let reporter = RecordingReporter::default();
        let err = scheduler(MockGenerator::new(), MockRemover::new(false))
            .run_all(&CharacterAttributes::default(), &sheet(), &[], &reporter)
            .await
            .unwrap_err();
        assert_eq!(err, StateError::EmptyCatalog);

        let err = scheduler(MockGenerator::new(), MockRemover::new(false))
            .with_concurrency(0)
            .run_all(
                &CharacterAttributes::default(),
                &sheet(),
                &all_task_keys(),
                &reporter,
            )
            .await
            .unwrap_err();
        assert_eq!(err, StateError::ZeroConcurrency);
        assert!(reporter.started.lock().unwrap().is_empty());
    }
}
