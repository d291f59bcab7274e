//! Scheduler/executor (spec §4.H): drives a plan's task DAG in ascending
//! `order`, enforces dependency ordering, retries with backoff, skips
//! unsatisfied-dependency tasks, and guards against duplicate execution.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::gateway::AiGateway;
use crate::handlers::{HandlerContext, HandlerRegistry, ProgressReporter};
use crate::orchestrator::events::EventBus;
use crate::orchestrator::model::{Event, EventKind, Plan, PlanStatus, StageError, Task, TaskStatus};
use crate::orchestrator::registry::JobRegistry;
use crate::store::artifact::ArtifactStore;
use crate::web::WebFetcher;

pub struct Scheduler {
    registry: Arc<JobRegistry>,
    events: Arc<EventBus>,
    handlers: Arc<HandlerRegistry>,
    gateway: Arc<dyn AiGateway>,
    fetcher: Arc<WebFetcher>,
    store: Arc<dyn ArtifactStore>,
    cancelled: Mutex<HashSet<String>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        events: Arc<EventBus>,
        handlers: Arc<HandlerRegistry>,
        gateway: Arc<dyn AiGateway>,
        fetcher: Arc<WebFetcher>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self { registry, events, handlers, gateway, fetcher, store, cancelled: Mutex::new(HashSet::new()) }
    }

    /// Start driving `job_id`'s plan in the background. A no-op if the job
    /// is already executing, unknown, or already terminal (spec §4.H
    /// duplicate-execution guard, §8 idempotence).
    pub fn execute(self: &Arc<Self>, job_id: String) {
        if !self.registry.try_start_execution(&job_id) {
            info!(job_id, "execute: no-op (already executing or terminal)");
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(job_id).await;
        });
    }

    /// Same guard and drive logic as [`Self::execute`], but awaited
    /// in-place. Used by tests and by callers that need completion before
    /// returning (the production HTTP surface uses `execute`, which is
    /// fire-and-forget).
    pub async fn execute_and_wait(self: &Arc<Self>, job_id: String) {
        if !self.registry.try_start_execution(&job_id) {
            return;
        }
        self.drive(job_id).await;
    }

    /// Mark `job_id` for cancellation; takes effect at the next task
    /// boundary (spec §4.H, §5 — handlers are not preempted mid-call).
    pub fn cancel(&self, job_id: &str) {
        self.cancelled.lock().expect("mutex poisoned").insert(job_id.to_string());
    }

    fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancelled.lock().expect("mutex poisoned").contains(job_id)
    }

    fn clear_cancelled(&self, job_id: &str) {
        self.cancelled.lock().expect("mutex poisoned").remove(job_id);
    }

    async fn drive(&self, job_id: String) {
        let Some(mut plan) = self.registry.get(&job_id) else {
            error!(job_id = %job_id, "drive: plan not found in registry");
            self.registry.finish_execution(&job_id);
            return;
        };

        plan.status = PlanStatus::Running;
        self.registry.update(plan.clone());
        self.events.publish(Event::plan_event(EventKind::PlanStarted, job_id.clone(), plan.clone(), Utc::now()));

        let task_ids: Vec<String> = {
            let mut ordered = plan.tasks.clone();
            ordered.sort_by_key(|t| t.order);
            ordered.into_iter().map(|t| t.task_id).collect()
        };

        let mut critical_failure = false;

        for task_id in task_ids {
            if self.is_cancelled(&job_id) {
                warn!(job_id = %job_id, "drive: cancellation observed at task boundary");
                critical_failure = true;
                break;
            }

            let Some(mut current) = self.registry.get(&job_id) else { break };
            let Some(task) = current.task(&task_id).cloned() else { continue };

            if !current.deps_satisfied(&task) {
                if let Some(t) = current.task_mut(&task_id) {
                    t.mark_skipped(Utc::now());
                }
                current.recompute_progress();
                current.current_task_id = Some(task_id.clone());
                self.registry.update(current.clone());
                let snapshot = current.task(&task_id).cloned().expect("just updated");
                self.events.publish(Event::task_event(
                    EventKind::TaskCompleted,
                    job_id.clone(),
                    snapshot,
                    Some(current.progress),
                    Utc::now(),
                ));
                continue;
            }

            let final_status = self.run_task_with_retries(&job_id, &task_id).await;

            if final_status == TaskStatus::Failed {
                let plan_after = self.registry.get(&job_id);
                let is_critical = plan_after.as_ref().and_then(|p| p.task(&task_id)).is_some_and(|t| t.critical);
                if is_critical {
                    critical_failure = true;
                    break;
                }
            }
        }

        self.clear_cancelled(&job_id);

        let Some(mut plan) = self.registry.get(&job_id) else {
            self.registry.finish_execution(&job_id);
            return;
        };

        let now = Utc::now();
        if critical_failure {
            plan.status = PlanStatus::Failed;
            plan.completed_at = Some(now);
            self.registry.update(plan.clone());
            self.events.publish(Event::plan_event(EventKind::PlanFailed, job_id.clone(), plan, now));
        } else {
            plan.recompute_progress();
            plan.status = PlanStatus::Completed;
            plan.progress = 100;
            plan.completed_at = Some(now);
            self.registry.update(plan.clone());
            self.events.publish(Event::plan_event(EventKind::PlanCompleted, job_id.clone(), plan, now));
        }

        self.registry.finish_execution(&job_id);
    }

    /// Run one task to a terminal status, retrying transient handler
    /// errors up to `task.max_retries` times with exponential backoff
    /// `2^retry_count` seconds (spec §4.F "retry-cycle semantics").
    async fn run_task_with_retries(&self, job_id: &str, task_id: &str) -> TaskStatus {
        loop {
            let Some(mut plan) = self.registry.get(job_id) else { return TaskStatus::Failed };
            let Some(task) = plan.task(task_id).cloned() else { return TaskStatus::Failed };

            let started_now = Utc::now();
            if let Some(t) = plan.task_mut(task_id) {
                t.mark_running(started_now);
            }
            plan.current_task_id = Some(task_id.to_string());
            self.registry.update(plan.clone());
            let running_snapshot = plan.task(task_id).cloned().expect("just updated");
            self.events.publish(Event::task_event(
                EventKind::TaskStarted,
                job_id.to_string(),
                running_snapshot.clone(),
                Some(plan.progress),
                started_now,
            ));

            let reporter = ProgressReporter::new(Arc::clone(&self.events), running_snapshot);
            let outcome = self.invoke_handler(&plan, &task, reporter).await;

            let mut plan = self.registry.get(job_id).unwrap_or(plan);
            match outcome {
                Ok(output) => {
                    let now = Utc::now();
                    if let Some(t) = plan.task_mut(task_id) {
                        t.mark_completed(output.clone(), now);
                    }
                    plan.result_data.insert(task.kind, output);
                    plan.recompute_progress();
                    self.registry.update(plan.clone());
                    let snapshot = plan.task(task_id).cloned().expect("just updated");
                    self.events.publish(Event::task_event(
                        EventKind::TaskCompleted,
                        job_id.to_string(),
                        snapshot,
                        Some(plan.progress),
                        now,
                    ));
                    return TaskStatus::Completed;
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    let can_retry = retryable && task.retry_count < task.max_retries;

                    if can_retry {
                        let next_retry_count = task.retry_count + 1;
                        if let Some(t) = plan.task_mut(task_id) {
                            t.retry_count = next_retry_count;
                            t.message = Some(error.user_message());
                        }
                        self.registry.update(plan.clone());
                        let snapshot = plan.task(task_id).cloned().expect("just updated");
                        self.events.publish(Event::task_event(
                            EventKind::TaskRetrying,
                            job_id.to_string(),
                            snapshot,
                            Some(plan.progress),
                            Utc::now(),
                        ));

                        let backoff_secs = 2_u64.saturating_pow(next_retry_count);
                        tokio::time::sleep(StdDuration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    let now = Utc::now();
                    if let Some(t) = plan.task_mut(task_id) {
                        t.mark_failed(error.user_message(), now);
                    }
                    plan.recompute_progress();
                    self.registry.update(plan.clone());
                    let snapshot = plan.task(task_id).cloned().expect("just updated");
                    self.events.publish(Event::task_event(
                        EventKind::TaskFailed,
                        job_id.to_string(),
                        snapshot,
                        Some(plan.progress),
                        now,
                    ));
                    return TaskStatus::Failed;
                }
            }
        }
    }

    async fn invoke_handler(
        &self,
        plan: &Plan,
        task: &Task,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, StageError> {
        let Some(handler) = self.handlers.get(task.kind) else {
            return Err(StageError::Internal(format!("no handler registered for {:?}", task.kind)));
        };
        let ctx = HandlerContext {
            plan,
            gateway: self.gateway.as_ref(),
            fetcher: self.fetcher.as_ref(),
            store: self.store.as_ref(),
            progress,
        };
        handler.execute(&ctx, task).await
    }
}
