//! DAG planner (spec §4.G): given a source reference and options, emits one
//! of three prebuilt task shapes.
use crate::orchestrator::model::{Plan, PlanOptions, SourceRef, StageKind, Task};

const DEFAULT_MAX_RETRIES: u32 = 2;

/// Build the per-job task list for `options`. Criticality and dependency
/// wiring follow spec §4.G exactly, including the redundant-but-preserved
/// `task_005`/`task_006` dependency on `task_001` noted in spec §9.
#[must_use]
pub fn plan_tasks(options: &PlanOptions) -> Vec<Task> {
    if options.video_only {
        video_only_tasks()
    } else if options.documentary_only {
        documentary_only_tasks()
    } else {
        standard_tasks()
    }
}

fn standard_tasks() -> Vec<Task> {
    vec![
        Task::new("task_001", StageKind::FetchProfile, 1, vec![], true, DEFAULT_MAX_RETRIES, 20),
        Task::new("task_002", StageKind::EnrichProfile, 2, vec!["task_001".into()], false, DEFAULT_MAX_RETRIES, 45),
        Task::new("task_003", StageKind::AggregateHistory, 3, vec!["task_002".into()], false, DEFAULT_MAX_RETRIES, 30),
        Task::new("task_004", StageKind::StructureJourney, 4, vec!["task_003".into()], false, DEFAULT_MAX_RETRIES, 40),
        Task::new(
            "task_005",
            StageKind::GenerateTimeline,
            5,
            vec!["task_001".into(), "task_004".into()],
            false,
            DEFAULT_MAX_RETRIES,
            30,
        ),
        Task::new(
            "task_006",
            StageKind::GenerateDocumentary,
            6,
            vec!["task_001".into(), "task_004".into()],
            false,
            DEFAULT_MAX_RETRIES,
            60,
        ),
    ]
}

fn documentary_only_tasks() -> Vec<Task> {
    vec![Task::new("task_001", StageKind::GenerateDocumentary, 1, vec![], false, DEFAULT_MAX_RETRIES, 60)]
}

fn video_only_tasks() -> Vec<Task> {
    vec![Task::new("task_001", StageKind::GenerateVideo, 1, vec![], false, DEFAULT_MAX_RETRIES, 180)]
}

#[must_use]
pub fn build_plan(job_id: String, source_ref: SourceRef, options: PlanOptions, now: chrono::DateTime<chrono::Utc>) -> Plan {
    let tasks = plan_tasks(&options);
    Plan::new(job_id, source_ref, options, tasks, now)
}
