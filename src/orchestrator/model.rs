//! Core data model for the orchestration DAG: `Task`, `Plan`, events, and the
//! document types that flow between stage handlers.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// One node kind in the per-job DAG. Order matches the standard plan shape
/// (§4.G); `order()` below is the planner's default ordering, not a fixed
/// enum discriminant, since documentary-only/video-only plans reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    FetchProfile,
    EnrichProfile,
    AggregateHistory,
    StructureJourney,
    GenerateTimeline,
    GenerateDocumentary,
    GenerateVideo,
}

impl StageKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FetchProfile => "FETCH_PROFILE",
            Self::EnrichProfile => "ENRICH_PROFILE",
            Self::AggregateHistory => "AGGREGATE_HISTORY",
            Self::StructureJourney => "STRUCTURE_JOURNEY",
            Self::GenerateTimeline => "GENERATE_TIMELINE",
            Self::GenerateDocumentary => "GENERATE_DOCUMENTARY",
            Self::GenerateVideo => "GENERATE_VIDEO",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::FetchProfile => "Extract a canonical profile from the source reference",
            Self::EnrichProfile => "Scrape related links and code-hosting activity",
            Self::AggregateHistory => "Merge the profile with the owner's prior history",
            Self::StructureJourney => "Build the narrative structure of the journey",
            Self::GenerateTimeline => "Derive a chronological timeline of events",
            Self::GenerateDocumentary => "Script a documentary from the journey",
            Self::GenerateVideo => "Render documentary segments into video",
        }
    }
}

/// Mutable lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Dependency satisfaction: a dependency is "met" when it is COMPLETED or
    /// SKIPPED (§8 universal invariant).
    #[must_use]
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Overall plan state (§4.H state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Initial,
    Running,
    Completed,
    Failed,
}

impl PlanStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One node in the DAG (spec §3 "Task"). `status`/`progress`/`message`/
/// `error`/`retry_count`/timestamps/`outputs` are mutable during execution;
/// everything else is fixed once the planner materializes the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub kind: StageKind,
    pub order: u32,
    pub deps: Vec<String>,
    pub critical: bool,
    pub max_retries: u32,
    pub estimated_seconds: u32,

    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outputs: Option<Value>,
}

impl Task {
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        kind: StageKind,
        order: u32,
        deps: Vec<String>,
        critical: bool,
        max_retries: u32,
        estimated_seconds: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            order,
            deps,
            critical,
            max_retries,
            estimated_seconds,
            status: TaskStatus::Pending,
            progress: 0,
            message: None,
            error: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            outputs: None,
        }
    }

    /// §3 invariant: `completed_at` set iff status is terminal.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let completed_at_consistent = self.status.is_terminal() == self.completed_at.is_some();
        let retry_bounded = self.retry_count <= self.max_retries;
        let progress_consistent = self.status != TaskStatus::Completed || self.progress == 100;
        completed_at_consistent && retry_bounded && progress_consistent
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.completed_at = None;
    }

    pub fn mark_completed(&mut self, outputs: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.outputs = Some(outputs);
        self.error = None;
        self.completed_at = Some(now);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }

    pub fn mark_skipped(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Skipped;
        self.message = Some("skipped: dependency not satisfied".to_string());
        self.completed_at = Some(now);
    }
}

/// Wire representation of a [`Task`] (spec §6 "Task snapshot (wire)"):
/// renames `deps` to `dependencies` and adds the kind's display `name`/
/// `description`, which the internal `Task` doesn't carry (they're derived
/// from `StageKind`, not stored per-task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub kind: StageKind,
    pub name: &'static str,
    pub description: &'static str,
    pub order: u32,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_seconds: u32,
    pub critical: bool,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            kind: task.kind,
            name: task.kind.name(),
            description: task.kind.description(),
            order: task.order,
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
            dependencies: task.deps.clone(),
            error: task.error.clone(),
            started_at: task.started_at,
            completed_at: task.completed_at,
            estimated_seconds: task.estimated_seconds,
            critical: task.critical,
        }
    }
}

/// Wire representation of a [`Plan`] (spec §6 "Plan snapshot (wire)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_id: Uuid,
    pub job_id: String,
    pub source_ref: SourceRef,
    pub status: PlanStatus,
    pub progress: u8,
    pub current_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskSnapshot>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
}

impl From<&Plan> for PlanSnapshot {
    fn from(plan: &Plan) -> Self {
        Self {
            plan_id: plan.plan_id,
            job_id: plan.job_id.clone(),
            source_ref: plan.source_ref.clone(),
            status: plan.status,
            progress: plan.progress,
            current_task_id: plan.current_task_id.clone(),
            created_at: plan.created_at,
            completed_at: plan.completed_at,
            tasks: plan.tasks.iter().map(TaskSnapshot::from).collect(),
            total_tasks: plan.total_tasks(),
            completed_tasks: plan.completed_tasks(),
        }
    }
}

/// How the subject's reference into the system was provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Url,
    Resume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_kind: SourceKind,
    /// The profile URL, or an opaque handle into blob storage for a résumé.
    pub reference: String,
}

/// Plan-scoped options (spec §3). Kept as a typed struct rather than a bag of
/// `Value`s so the planner and handlers share one source of truth, with a
/// `Value` escape hatch for forward-compatible fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanOptions {
    pub guest_id: String,
    pub history_id: Option<String>,
    #[serde(default)]
    pub include_github: bool,
    pub video_settings: Option<VideoSettings>,
    #[serde(default)]
    pub first_segment_only: bool,
    #[serde(default)]
    pub video_only: bool,
    #[serde(default)]
    pub documentary_only: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    pub export_format: Option<String>,
}

fn default_resolution() -> String {
    "1280x720".to_string()
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            aspect_ratio: default_aspect_ratio(),
            export_format: None,
        }
    }
}

/// One job (spec §3 "Plan"). Exclusively owned by the [`JobRegistry`];
/// handlers receive a borrow for the duration of one task.
///
/// [`JobRegistry`]: crate::orchestrator::registry::JobRegistry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub job_id: String,
    pub source_ref: SourceRef,
    pub tasks: Vec<Task>,
    pub options: PlanOptions,
    pub status: PlanStatus,
    pub progress: u8,
    pub current_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Stage kind -> opaque output document, the AI-gateway boundary type.
    pub result_data: HashMap<StageKind, Value>,
}

impl Plan {
    #[must_use]
    pub fn new(job_id: String, source_ref: SourceRef, options: PlanOptions, tasks: Vec<Task>, now: DateTime<Utc>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            job_id,
            source_ref,
            tasks,
            options,
            status: PlanStatus::Initial,
            progress: 0,
            current_task_id: None,
            created_at: now,
            completed_at: None,
            result_data: HashMap::new(),
        }
    }

    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    #[must_use]
    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn completed_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.status.is_terminal()).count()
    }

    /// `plan.progress = floor(completed_count / total_tasks * 100)`.
    pub fn recompute_progress(&mut self) {
        let total = self.total_tasks();
        if total == 0 {
            self.progress = 100;
            return;
        }
        let completed = self.completed_tasks();
        #[allow(clippy::cast_precision_loss)]
        let pct = (completed as f64 / total as f64) * 100.0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.progress = pct.floor() as u8;
        }
    }

    /// A dependency is satisfied when every task it names is COMPLETED or
    /// SKIPPED (redundant deps, per spec §9 open question, resolve the same
    /// way: all named deps are checked, even transitively-implied ones).
    #[must_use]
    pub fn deps_satisfied(&self, task: &Task) -> bool {
        task.deps.iter().all(|dep_id| {
            self.task(dep_id)
                .is_some_and(|dep| dep.status.satisfies_dependency())
        })
    }
}

/// A single scraped web page (spec §3 "Scraped document").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedDocument {
    pub url: String,
    pub success: bool,
    pub error: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: String,
    pub original_length: usize,
    pub headings: Vec<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub domain: Option<String>,
    pub published_date: Option<String>,
    pub featured_image: Option<String>,
    pub links: Vec<ExtractedLink>,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub text: String,
    pub url: String,
}

impl ScrapedDocument {
    #[must_use]
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            error: Some(error.into()),
            title: None,
            description: None,
            content: String::new(),
            original_length: 0,
            headings: Vec::new(),
            author: None,
            publisher: None,
            domain: None,
            published_date: None,
            featured_image: None,
            links: Vec::new(),
            quality_score: 0.0,
        }
    }
}

/// Wire event kinds (spec §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    PlanStarted,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskRetrying,
    TaskFailed,
    PlanCompleted,
    PlanFailed,
    InitialStatus,
    StatusResponse,
}

/// The payload of a progress [`Event`]: either a task snapshot (with the
/// plan's rolled-up progress) or a full plan snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Task {
        task: TaskSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        plan_progress: Option<u8>,
    },
    Plan {
        plan: PlanSnapshot,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_kind: EventKind,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn task_event(kind: EventKind, job_id: impl Into<String>, task: Task, plan_progress: Option<u8>, now: DateTime<Utc>) -> Self {
        Self {
            event_kind: kind,
            job_id: job_id.into(),
            timestamp: now,
            payload: EventPayload::Task { task: TaskSnapshot::from(&task), plan_progress },
        }
    }

    #[must_use]
    pub fn plan_event(kind: EventKind, job_id: impl Into<String>, plan: Plan, now: DateTime<Utc>) -> Self {
        Self {
            event_kind: kind,
            job_id: job_id.into(),
            timestamp: now,
            payload: EventPayload::Plan { plan: PlanSnapshot::from(&plan) },
        }
    }
}

/// Error taxonomy (spec §7). `is_retryable` is what the scheduler consults
/// instead of re-deriving retryability from string matching.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transient external error: {0}")]
    Transient(String),
    #[error("permanent external error: {0}")]
    Permanent(String),
    #[error("domain error: {0}")]
    Domain(String),
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl StageError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Domain(msg) => msg.clone(),
            Self::Transient(msg) => format!("temporary failure, will retry: {msg}"),
            Self::Permanent(msg) => format!("request could not be completed: {msg}"),
            Self::Internal(msg) => format!("internal error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new("task_001", StageKind::FetchProfile, 1, vec![], true, 2, 30)
    }

    #[test]
    fn new_task_has_consistent_invariants() {
        let task = sample_task();
        assert!(task.invariants_hold());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn mark_completed_sets_progress_and_timestamp() {
        let mut task = sample_task();
        let now = Utc::now();
        task.mark_completed(serde_json::json!({"ok": true}), now);
        assert!(task.invariants_hold());
        assert_eq!(task.progress, 100);
        assert_eq!(task.completed_at, Some(now));
    }

    #[test]
    fn mark_failed_sets_completed_at_without_completing() {
        let mut task = sample_task();
        let now = Utc::now();
        task.mark_failed("boom", now);
        assert!(task.invariants_hold());
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn plan_progress_is_floor_of_completed_over_total() {
        let mut plan = Plan::new(
            "job-1".to_string(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/me".into() },
            PlanOptions::default(),
            vec![
                {
                    let mut t = Task::new("task_001", StageKind::FetchProfile, 1, vec![], true, 2, 30);
                    t.mark_completed(serde_json::json!({}), Utc::now());
                    t
                },
                Task::new("task_002", StageKind::EnrichProfile, 2, vec!["task_001".into()], false, 2, 30),
                Task::new("task_003", StageKind::AggregateHistory, 3, vec!["task_002".into()], false, 2, 30),
            ],
            Utc::now(),
        );
        plan.recompute_progress();
        assert_eq!(plan.progress, 33);
    }

    #[test]
    fn deps_satisfied_treats_skipped_as_met() {
        let mut plan = Plan::new(
            "job-1".to_string(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/me".into() },
            PlanOptions::default(),
            vec![
                {
                    let mut t = Task::new("task_001", StageKind::FetchProfile, 1, vec![], true, 2, 30);
                    t.mark_skipped(Utc::now());
                    t
                },
            ],
            Utc::now(),
        );
        let downstream = Task::new("task_002", StageKind::EnrichProfile, 2, vec!["task_001".into()], false, 2, 30);
        plan.tasks.push(downstream.clone());
        assert!(plan.deps_satisfied(&downstream));
    }
}
