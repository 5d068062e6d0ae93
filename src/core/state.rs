use crate::core::catalog::{all_task_keys, TaskKey, TASK_COUNT};
use crate::core::error::StateError;
use crate::core::media::ImageData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Slim,
    #[default]
    Average,
    Athletic,
    Heavy,
}

impl BodyType {
    pub const ALL: [BodyType; 4] = [
        BodyType::Slim,
        BodyType::Average,
        BodyType::Athletic,
        BodyType::Heavy,
    ];
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BodyType::Slim => "slim",
            BodyType::Average => "average",
            BodyType::Athletic => "athletic",
            BodyType::Heavy => "heavy",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CharacterAttributes {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub clothing: String,
    #[serde(default)]
    pub accessories: String,
    #[serde(default)]
    pub art_style: String,
    #[serde(default)]
    pub skin_tone: String,
    #[serde(default)]
    pub hair_color: String,
    #[serde(default)]
    pub hair_style: String,
    #[serde(default)]
    pub body_type: BodyType,
}

impl CharacterAttributes {
    /// Short stable digest of every attribute, used to key cached parts.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(json.as_bytes()));
        digest[..16].to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSheet {
    pub image: ImageData,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Generating,
    Processing,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Generating => "generating",
            TaskStatus::Processing => "processing",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub key: TaskKey,
    pub status: TaskStatus,
    pub raw_image: Option<ImageData>,
    pub transparent_image: Option<ImageData>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    fn pending(key: TaskKey) -> Self {
        Self {
            key,
            status: TaskStatus::Pending,
            raw_image: None,
            transparent_image: None,
            error_message: None,
            completed_at: None,
        }
    }

    /// The best available image: transparent if post-processing ran, raw otherwise.
    pub fn output_image(&self) -> Option<&ImageData> {
        self.transparent_image.as_ref().or(self.raw_image.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Idle,
    GeneratingReference,
    GeneratingParts,
    Complete,
    Error,
}

impl OverallStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            OverallStatus::GeneratingReference | OverallStatus::GeneratingParts
        )
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverallStatus::Idle => "idle",
            OverallStatus::GeneratingReference => "generating_reference",
            OverallStatus::GeneratingParts => "generating_parts",
            OverallStatus::Complete => "complete",
            OverallStatus::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }
}

/// Everything that can happen to a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start(CharacterAttributes),
    EditAttributes(CharacterAttributes),
    ReferenceReady(ReferenceSheet),
    ReferenceFailed(String),
    TaskStarted(TaskKey),
    TaskGenerated(TaskKey, ImageData),
    TaskProcessed(TaskKey, ImageData),
    TaskFailed(TaskKey, String),
    Retry(TaskKey),
    Reset,
}

/// One character generation run.
///
/// Fields are only reachable through accessors; every change goes through
/// [`Session::apply`], which validates an event before touching any state.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: SessionId,
    attributes: CharacterAttributes,
    reference_sheet: Option<ReferenceSheet>,
    tasks: BTreeMap<TaskKey, Task>,
    overall_status: OverallStatus,
    progress: Progress,
    created_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::idle(CharacterAttributes::default())
    }
}

fn pending_tasks() -> BTreeMap<TaskKey, Task> {
    all_task_keys()
        .into_iter()
        .map(|key| (key, Task::pending(key)))
        .collect()
}

impl Session {
    pub fn idle(attributes: CharacterAttributes) -> Self {
        Self {
            id: Uuid::new_v4(),
            attributes,
            reference_sheet: None,
            tasks: pending_tasks(),
            overall_status: OverallStatus::Idle,
            progress: Progress {
                total: TASK_COUNT,
                completed: 0,
                failed: 0,
            },
            created_at: None,
            error_message: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn attributes(&self) -> &CharacterAttributes {
        &self.attributes
    }

    pub fn reference_sheet(&self) -> Option<&ReferenceSheet> {
        self.reference_sheet.as_ref()
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.overall_status
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn task(&self, key: TaskKey) -> Option<&Task> {
        self.tasks.get(&key)
    }

    /// Tasks in catalog order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn failed_keys(&self) -> Vec<TaskKey> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Error)
            .map(|t| t.key)
            .collect()
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<(), StateError> {
        match event {
            SessionEvent::Start(attributes) => self.start(attributes),
            SessionEvent::EditAttributes(attributes) => self.edit_attributes(attributes),
            SessionEvent::ReferenceReady(sheet) => self.reference_ready(sheet),
            SessionEvent::ReferenceFailed(message) => self.reference_failed(message),
            SessionEvent::TaskStarted(key) => self.task_started(key),
            SessionEvent::TaskGenerated(key, raw) => self.task_generated(key, raw),
            SessionEvent::TaskProcessed(key, image) => self.task_processed(key, image),
            SessionEvent::TaskFailed(key, message) => self.task_failed(key, message),
            SessionEvent::Retry(key) => self.retry(key),
            SessionEvent::Reset => {
                self.reset();
                Ok(())
            }
        }
    }

    fn start(&mut self, attributes: CharacterAttributes) -> Result<(), StateError> {
        if self.overall_status.is_running() {
            return Err(self.status_error("idle, complete or error"));
        }
        *self = Session {
            overall_status: OverallStatus::GeneratingReference,
            created_at: Some(Utc::now()),
            ..Session::idle(attributes)
        };
        Ok(())
    }

    fn edit_attributes(&mut self, attributes: CharacterAttributes) -> Result<(), StateError> {
        if self.overall_status != OverallStatus::Idle {
            return Err(StateError::AttributesLocked);
        }
        self.attributes = attributes;
        Ok(())
    }

    fn reference_ready(&mut self, sheet: ReferenceSheet) -> Result<(), StateError> {
        if self.reference_sheet.is_some() {
            return Err(StateError::ReferenceAlreadySet(self.id));
        }
        self.expect_status(OverallStatus::GeneratingReference, "generating_reference")?;
        self.reference_sheet = Some(sheet);
        self.overall_status = OverallStatus::GeneratingParts;
        Ok(())
    }

    fn reference_failed(&mut self, message: String) -> Result<(), StateError> {
        self.expect_status(OverallStatus::GeneratingReference, "generating_reference")?;
        self.error_message = Some(message);
        self.overall_status = OverallStatus::Error;
        Ok(())
    }

    fn task_started(&mut self, key: TaskKey) -> Result<(), StateError> {
        self.expect_status(OverallStatus::GeneratingParts, "generating_parts")?;
        let task = self.task_mut(key)?;
        match task.status {
            TaskStatus::Complete | TaskStatus::Error => Ok(()),
            TaskStatus::Pending | TaskStatus::Generating => {
                task.status = TaskStatus::Generating;
                Ok(())
            }
            TaskStatus::Processing => Err(StateError::InvalidTaskTransition {
                key,
                from: task.status,
                to: TaskStatus::Generating,
            }),
        }
    }

    fn task_generated(&mut self, key: TaskKey, raw: ImageData) -> Result<(), StateError> {
        self.expect_status(OverallStatus::GeneratingParts, "generating_parts")?;
        let task = self.task_mut(key)?;
        expect_task(task, &[TaskStatus::Generating], TaskStatus::Processing)?;
        task.status = TaskStatus::Processing;
        task.raw_image = Some(raw);
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    fn task_processed(&mut self, key: TaskKey, image: ImageData) -> Result<(), StateError> {
        self.expect_status(OverallStatus::GeneratingParts, "generating_parts")?;
        let task = self.task_mut(key)?;
        expect_task(task, &[TaskStatus::Processing], TaskStatus::Complete)?;
        task.status = TaskStatus::Complete;
        task.transparent_image = Some(image);
        self.settle();
        Ok(())
    }

    fn task_failed(&mut self, key: TaskKey, message: String) -> Result<(), StateError> {
        self.expect_status(OverallStatus::GeneratingParts, "generating_parts")?;
        let task = self.task_mut(key)?;
        expect_task(
            task,
            &[
                TaskStatus::Pending,
                TaskStatus::Generating,
                TaskStatus::Processing,
            ],
            TaskStatus::Error,
        )?;
        task.status = TaskStatus::Error;
        task.error_message = Some(message);
        self.settle();
        Ok(())
    }

    fn retry(&mut self, key: TaskKey) -> Result<(), StateError> {
        let task = self.task_mut(key)?;
        if task.status != TaskStatus::Error {
            return Err(StateError::NotRetryable {
                key,
                status: task.status,
            });
        }
        *task = Task::pending(key);
        self.settle();
        self.overall_status = OverallStatus::GeneratingParts;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Session::idle(self.attributes.clone());
    }

    /// Recounts terminal tasks and flips the session to complete once all have settled.
    fn settle(&mut self) {
        let completed = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Complete)
            .count();
        let failed = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Error)
            .count();
        self.progress.completed = completed;
        self.progress.failed = failed;

        if self.progress.settled() == self.progress.total {
            self.overall_status = OverallStatus::Complete;
        } else if self.overall_status == OverallStatus::Complete {
            self.overall_status = OverallStatus::GeneratingParts;
        }
    }

    fn task_mut(&mut self, key: TaskKey) -> Result<&mut Task, StateError> {
        self.tasks.get_mut(&key).ok_or(StateError::UnknownTask(key))
    }

    fn expect_status(
        &self,
        status: OverallStatus,
        expected: &'static str,
    ) -> Result<(), StateError> {
        if self.overall_status == status {
            Ok(())
        } else {
            Err(self.status_error(expected))
        }
    }

    fn status_error(&self, expected: &'static str) -> StateError {
        StateError::InvalidSessionStatus {
            id: self.id,
            status: self.overall_status,
            expected,
        }
    }
}

fn expect_task(task: &Task, allowed: &[TaskStatus], to: TaskStatus) -> Result<(), StateError> {
    if allowed.contains(&task.status) {
        Ok(())
    } else {
        Err(StateError::InvalidTaskTransition {
            key: task.key,
            from: task.status,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{BodyPart, ViewAngle};

    fn image(tag: u8) -> ImageData {
        ImageData::new("image/png", vec![tag; 4])
    }

    fn sheet() -> ReferenceSheet {
        ReferenceSheet {
            image: image(0),
            generated_at: Utc::now(),
        }
    }

    fn running_session() -> Session {
        let mut session = Session::default();
        session
            .apply(SessionEvent::Start(CharacterAttributes {
                role: "Knight".to_string(),
                ..Default::default()
            }))
            .unwrap();
        session.apply(SessionEvent::ReferenceReady(sheet())).unwrap();
        session
    }

    fn complete_task(session: &mut Session, key: TaskKey) {
        session.apply(SessionEvent::TaskStarted(key)).unwrap();
        session
            .apply(SessionEvent::TaskGenerated(key, image(1)))
            .unwrap();
        session
            .apply(SessionEvent::TaskProcessed(key, image(2)))
            .unwrap();
    }

    fn fail_task(session: &mut Session, key: TaskKey) {
        session.apply(SessionEvent::TaskStarted(key)).unwrap();
        session
            .apply(SessionEvent::TaskFailed(key, "boom".to_string()))
            .unwrap();
    }

    fn assert_progress_invariant(session: &Session) {
        let p = session.progress();
        assert_eq!(p.total, TASK_COUNT);
        assert!(p.settled() <= p.total);
        assert_eq!(
            p.settled() == p.total,
            session.overall_status() == OverallStatus::Complete
        );
    }

    #[test]
    fn test_start_populates_pending_catalog() {
        let before = Session::default();
        let mut session = before.clone();
        session
            .apply(SessionEvent::Start(CharacterAttributes::default()))
            .unwrap();

        assert_ne!(session.id(), before.id());
        assert_eq!(session.overall_status(), OverallStatus::GeneratingReference);
        assert!(session.created_at().is_some());
        assert_eq!(session.tasks().count(), TASK_COUNT);
        assert!(session.tasks().all(|t| t.status == TaskStatus::Pending));
        assert_progress_invariant(&session);
    }

    #[test]
    fn test_start_rejected_while_running() {
        let mut session = running_session();
        let err = session
            .apply(SessionEvent::Start(CharacterAttributes::default()))
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidSessionStatus { .. }));
    }

    #[test]
    fn test_reference_ready_twice_fails() {
        let mut session = running_session();
        let err = session
            .apply(SessionEvent::ReferenceReady(sheet()))
            .unwrap_err();
        assert_eq!(err, StateError::ReferenceAlreadySet(session.id()));
    }

    #[test]
    fn test_reference_failed_moves_to_error() {
        let mut session = Session::default();
        session
            .apply(SessionEvent::Start(CharacterAttributes::default()))
            .unwrap();
        session
            .apply(SessionEvent::ReferenceFailed("quota".to_string()))
            .unwrap();

        assert_eq!(session.overall_status(), OverallStatus::Error);
        assert_eq!(session.error_message(), Some("quota"));

        let key = TaskKey::new(BodyPart::Head, ViewAngle::Front);
        assert!(session.apply(SessionEvent::TaskStarted(key)).is_err());
    }

    #[test]
    fn test_task_lifecycle_updates_progress() {
        let mut session = running_session();
        let key = TaskKey::new(BodyPart::Torso, ViewAngle::Side);

        session.apply(SessionEvent::TaskStarted(key)).unwrap();
        assert_eq!(session.task(key).unwrap().status, TaskStatus::Generating);

        session
            .apply(SessionEvent::TaskGenerated(key, image(1)))
            .unwrap();
        let task = session.task(key).unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(task.completed_at.is_some());

        session
            .apply(SessionEvent::TaskProcessed(key, image(2)))
            .unwrap();
        let task = session.task(key).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.output_image(), Some(&image(2)));
        assert_eq!(session.progress().completed, 1);
        assert_eq!(session.overall_status(), OverallStatus::GeneratingParts);
        assert_progress_invariant(&session);
    }

    #[test]
    fn test_task_started_is_noop_on_terminal_task() {
        let mut session = running_session();
        let key = TaskKey::new(BodyPart::Head, ViewAngle::Back);
        complete_task(&mut session, key);

        let before = session.clone();
        session.apply(SessionEvent::TaskStarted(key)).unwrap();
        assert_eq!(session, before);
    }

    #[test]
    fn test_task_cannot_move_backwards() {
        let mut session = running_session();
        let key = TaskKey::new(BodyPart::Head, ViewAngle::Front);
        session.apply(SessionEvent::TaskStarted(key)).unwrap();
        session
            .apply(SessionEvent::TaskGenerated(key, image(1)))
            .unwrap();

        let err = session.apply(SessionEvent::TaskStarted(key)).unwrap_err();
        assert!(matches!(
            err,
            StateError::InvalidTaskTransition {
                from: TaskStatus::Processing,
                ..
            }
        ));

        let other = TaskKey::new(BodyPart::Head, ViewAngle::Side);
        let err = session
            .apply(SessionEvent::TaskProcessed(other, image(2)))
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTaskTransition { .. }));
    }

    #[test]
    fn test_all_settled_completes_session() {
        let mut session = running_session();
        let keys = all_task_keys();
        for (i, key) in keys.iter().enumerate() {
            if i % 5 == 0 {
                fail_task(&mut session, *key);
            } else {
                complete_task(&mut session, *key);
            }
            assert_progress_invariant(&session);
        }

        assert_eq!(session.overall_status(), OverallStatus::Complete);
        assert_eq!(session.progress().failed, 5);
        assert_eq!(session.progress().completed, TASK_COUNT - 5);
    }

    #[test]
    fn test_retry_reopens_only_that_task() {
        let mut session = running_session();
        let keys = all_task_keys();
        let failed_key = keys[7];
        for key in &keys {
            if *key == failed_key {
                fail_task(&mut session, *key);
            } else {
                complete_task(&mut session, *key);
            }
        }
        assert_eq!(session.overall_status(), OverallStatus::Complete);

        let before = session.clone();
        session.apply(SessionEvent::Retry(failed_key)).unwrap();

        assert_eq!(session.overall_status(), OverallStatus::GeneratingParts);
        assert_eq!(session.progress().failed, 0);
        assert_eq!(session.progress().completed, TASK_COUNT - 1);
        assert_progress_invariant(&session);

        let task = session.task(failed_key).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error_message.is_none());
        assert!(task.raw_image.is_none());
        assert!(task.transparent_image.is_none());

        for key in keys.iter().filter(|k| **k != failed_key) {
            assert_eq!(session.task(*key), before.task(*key));
        }

        complete_task(&mut session, failed_key);
        assert_eq!(session.overall_status(), OverallStatus::Complete);
        assert_progress_invariant(&session);
    }

    #[test]
    fn test_retry_requires_error_status() {
        let mut session = running_session();
        let key = TaskKey::new(BodyPart::LeftLeg, ViewAngle::Front);
        let err = session.apply(SessionEvent::Retry(key)).unwrap_err();
        assert_eq!(
            err,
            StateError::NotRetryable {
                key,
                status: TaskStatus::Pending
            }
        );
    }

    #[test]
    fn test_edit_attributes_only_before_start() {
        let mut session = Session::default();
        let attrs = CharacterAttributes {
            role: "Archer".to_string(),
            ..Default::default()
        };
        session
            .apply(SessionEvent::EditAttributes(attrs.clone()))
            .unwrap();
        assert_eq!(session.attributes(), &attrs);

        session.apply(SessionEvent::Start(attrs.clone())).unwrap();
        let err = session
            .apply(SessionEvent::EditAttributes(CharacterAttributes::default()))
            .unwrap_err();
        assert_eq!(err, StateError::AttributesLocked);
    }

    #[test]
    fn test_reset_produces_fresh_idle_session() {
        let mut session = running_session();
        let key = TaskKey::new(BodyPart::Head, ViewAngle::Front);
        complete_task(&mut session, key);
        let old_id = session.id();

        session.apply(SessionEvent::Reset).unwrap();

        assert_ne!(session.id(), old_id);
        assert_eq!(session.overall_status(), OverallStatus::Idle);
        assert!(session.reference_sheet().is_none());
        assert_eq!(session.progress().completed, 0);
        assert!(session.tasks().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(session.attributes().role, "Knight");
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = CharacterAttributes {
            role: "Mage".to_string(),
            ..Default::default()
        };
        let b = CharacterAttributes {
            body_type: BodyType::Heavy,
            ..a.clone()
        };
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
