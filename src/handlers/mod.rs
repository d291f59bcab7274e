//! Stage handler contract (spec §4.F) and the closed dispatch table keyed
//! by [`StageKind`] (REDESIGN FLAGS §9 "Duck-typed handler dispatch").
pub mod aggregate_history;
pub mod enrich_profile;
pub mod fetch_profile;
pub mod generate_documentary;
pub mod generate_timeline;
pub mod generate_video;
pub mod structure_journey;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::gateway::AiGateway;
use crate::orchestrator::events::EventBus;
use crate::orchestrator::model::{Event, EventKind, Plan, StageError, StageKind, Task};
use crate::store::artifact::ArtifactStore;
use crate::web::WebFetcher;

/// Everything a handler needs besides the task it is executing: read-only
/// access to the plan (for prior stages' outputs), the external
/// collaborators, and a way to report progress. A handler receives a
/// borrow of the `Plan` for the duration of one task (spec §3 ownership);
/// it must not mutate `task.status`.
pub struct HandlerContext<'a> {
    pub plan: &'a Plan,
    pub gateway: &'a dyn AiGateway,
    pub fetcher: &'a WebFetcher,
    pub store: &'a dyn ArtifactStore,
    pub progress: ProgressReporter,
}

/// Publishes `task_progress` events as a handler advances, without letting
/// the handler touch `task.status` (that remains the scheduler's duty).
#[derive(Clone)]
pub struct ProgressReporter {
    events: Arc<EventBus>,
    base_task: Task,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(events: Arc<EventBus>, base_task: Task) -> Self {
        Self { events, base_task }
    }

    /// Report progress in `[0, 100]` with an optional human-readable
    /// message; publishes a `task_progress` event immediately.
    pub fn report(&self, progress: u8, message: impl Into<String>) {
        let mut snapshot = self.base_task.clone();
        snapshot.progress = progress.min(100);
        snapshot.message = Some(message.into());
        let event = Event::task_event(
            EventKind::TaskProgress,
            self.base_task.task_id.clone(),
            snapshot,
            None,
            chrono::Utc::now(),
        );
        self.events.publish(event);
    }
}

/// One per-stage-kind handler (spec §4.F common contract).
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn execute(&self, ctx: &HandlerContext<'_>, task: &Task) -> Result<Value, StageError>;
}

/// Closed dispatch table: stage kind -> handler. Built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<StageKind, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    #[must_use]
    pub fn with_handler(mut self, kind: StageKind, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    #[must_use]
    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// The default registry wired with every stage kind's production
    /// handler (spec §4.F.1-§4.F.7).
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with_handler(StageKind::FetchProfile, Arc::new(fetch_profile::FetchProfileHandler))
            .with_handler(StageKind::EnrichProfile, Arc::new(enrich_profile::EnrichProfileHandler))
            .with_handler(StageKind::AggregateHistory, Arc::new(aggregate_history::AggregateHistoryHandler))
            .with_handler(StageKind::StructureJourney, Arc::new(structure_journey::StructureJourneyHandler))
            .with_handler(StageKind::GenerateTimeline, Arc::new(generate_timeline::GenerateTimelineHandler))
            .with_handler(StageKind::GenerateDocumentary, Arc::new(generate_documentary::GenerateDocumentaryHandler))
            .with_handler(StageKind::GenerateVideo, Arc::new(generate_video::GenerateVideoHandler))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Convenience accessor: pull another stage's output document out of the
/// plan's `result_data`/task outputs, surfacing an internal-invariant error
/// if it is missing (spec §7 "dependency missing").
pub fn required_output(plan: &Plan, kind: StageKind) -> Result<Value, StageError> {
    plan.result_data
        .get(&kind)
        .cloned()
        .ok_or_else(|| StageError::Internal(format!("missing required output from {:?}", kind)))
}
