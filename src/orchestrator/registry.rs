//! Job registry (spec §4.I): the sole owner of in-memory [`Plan`] objects,
//! keyed by `job_id`. Holds the duplicate-execution guard and the
//! retention sweeper.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::orchestrator::events::EventBus;
use crate::orchestrator::model::Plan;

struct Entry {
    plan: Plan,
    executing: bool,
}

/// Thread-safe map from `job_id` to [`Plan`], plus the process-wide
/// duplicate-execution guard (spec §4.H "Duplicate-execution guard").
/// `_plans` and `_executing` are guarded by a single mutex; only the
/// registry mutates them (spec §5).
pub struct JobRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    events: Arc<EventBus>,
}

impl JobRegistry {
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), events }
    }

    pub fn put(&self, plan: Plan) {
        let job_id = plan.job_id.clone();
        self.entries.lock().expect("mutex poisoned").insert(job_id, Entry { plan, executing: false });
    }

    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Plan> {
        self.entries.lock().expect("mutex poisoned").get(job_id).map(|e| e.plan.clone())
    }

    pub fn remove(&self, job_id: &str) -> Option<Plan> {
        let removed = self.entries.lock().expect("mutex poisoned").remove(job_id).map(|e| e.plan);
        if removed.is_some() {
            // Subscribers attached to an evicted plan are disconnected (spec §4.I).
            let subscriber_count = self.events.subscriber_count(job_id);
            tracing::debug!(job_id, subscriber_count, "plan removed, subscribers will see closed channel");
        }
        removed
    }

    /// Replace the stored plan with `plan` (used after each task transition
    /// so the registry's copy reflects the latest mutation).
    pub fn update(&self, plan: Plan) {
        let job_id = plan.job_id.clone();
        let mut entries = self.entries.lock().expect("mutex poisoned");
        if let Some(entry) = entries.get_mut(&job_id) {
            entry.plan = plan;
        } else {
            entries.insert(job_id, Entry { plan, executing: false });
        }
    }

    /// Atomically claim the execution guard for `job_id`. Returns `false`
    /// if a second `execute` call observes the job already executing or
    /// the plan already in a terminal state (spec §4.H, §8 idempotence).
    pub fn try_start_execution(&self, job_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("mutex poisoned");
        let Some(entry) = entries.get_mut(job_id) else { return false };
        if entry.executing || entry.plan.status.is_terminal() {
            return false;
        }
        entry.executing = true;
        true
    }

    pub fn finish_execution(&self, job_id: &str) {
        if let Some(entry) = self.entries.lock().expect("mutex poisoned").get_mut(job_id) {
            entry.executing = false;
        }
    }

    #[must_use]
    pub fn is_executing(&self, job_id: &str) -> bool {
        self.entries.lock().expect("mutex poisoned").get(job_id).is_some_and(|e| e.executing)
    }

    /// Find a non-terminal plan whose `options.history_id` matches
    /// `history_id` (spec §6: the compute-documentary/generate-video
    /// endpoints "return its id rather than starting a duplicate" when a
    /// plan for the same history is still running).
    #[must_use]
    pub fn find_running_by_history_id(&self, history_id: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("mutex poisoned")
            .values()
            .find(|entry| {
                !entry.plan.status.is_terminal() && entry.plan.options.history_id.as_deref() == Some(history_id)
            })
            .map(|entry| entry.plan.job_id.clone())
    }

    /// Drop terminal plans whose `completed_at` is older than `max_age`.
    /// Returns the set of evicted job ids.
    pub fn sweep(&self, max_age: Duration) -> HashSet<String> {
        let now: DateTime<Utc> = Utc::now();
        let mut entries = self.entries.lock().expect("mutex poisoned");
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.plan.status.is_terminal()
                    && entry.plan.completed_at.is_some_and(|completed_at| now - completed_at > max_age)
            })
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in &stale {
            entries.remove(job_id);
        }
        stale.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::model::{PlanOptions, PlanStatus, SourceKind, SourceRef};

    fn sample_plan(job_id: &str) -> Plan {
        Plan::new(
            job_id.to_string(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/me".into() },
            PlanOptions::default(),
            vec![],
            Utc::now(),
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let registry = JobRegistry::new(Arc::new(EventBus::new()));
        registry.put(sample_plan("job-1"));
        assert!(registry.get("job-1").is_some());
        assert!(registry.get("job-missing").is_none());
    }

    #[test]
    fn try_start_execution_guards_against_duplicates() {
        let registry = JobRegistry::new(Arc::new(EventBus::new()));
        registry.put(sample_plan("job-1"));
        assert!(registry.try_start_execution("job-1"));
        assert!(!registry.try_start_execution("job-1"));
        registry.finish_execution("job-1");
        assert!(registry.try_start_execution("job-1"));
    }

    #[test]
    fn try_start_execution_refuses_terminal_plan() {
        let registry = JobRegistry::new(Arc::new(EventBus::new()));
        let mut plan = sample_plan("job-1");
        plan.status = PlanStatus::Completed;
        registry.put(plan);
        assert!(!registry.try_start_execution("job-1"));
    }

    #[test]
    fn find_running_by_history_id_ignores_terminal_plans() {
        let registry = JobRegistry::new(Arc::new(EventBus::new()));

        let mut running = sample_plan("job-running");
        running.options.history_id = Some("hist-1".to_string());
        running.status = PlanStatus::Running;
        registry.put(running);

        let mut done = sample_plan("job-done");
        done.options.history_id = Some("hist-2".to_string());
        done.status = PlanStatus::Completed;
        registry.put(done);

        assert_eq!(registry.find_running_by_history_id("hist-1"), Some("job-running".to_string()));
        assert_eq!(registry.find_running_by_history_id("hist-2"), None);
        assert_eq!(registry.find_running_by_history_id("hist-missing"), None);
    }

    #[test]
    fn sweep_removes_exactly_stale_terminal_plans() {
        let registry = JobRegistry::new(Arc::new(EventBus::new()));

        let mut old_plan = sample_plan("job-old");
        old_plan.status = PlanStatus::Completed;
        old_plan.completed_at = Some(Utc::now() - Duration::minutes(60));
        registry.put(old_plan);

        let mut fresh_plan = sample_plan("job-fresh");
        fresh_plan.status = PlanStatus::Completed;
        fresh_plan.completed_at = Some(Utc::now());
        registry.put(fresh_plan);

        registry.put(sample_plan("job-running"));

        let evicted = registry.sweep(Duration::minutes(30));

        assert!(evicted.contains("job-old"));
        assert!(!evicted.contains("job-fresh"));
        assert!(!evicted.contains("job-running"));
        assert!(registry.get("job-old").is_none());
        assert!(registry.get("job-fresh").is_some());
        assert!(registry.get("job-running").is_some());
    }
}
