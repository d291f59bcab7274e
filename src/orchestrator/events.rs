//! Event bus (spec §4.A): per-job pub/sub fan-out of typed progress events.
//! Subscribers are modelled as a channel per subscriber (REDESIGN FLAGS §9
//! "Callback-based fan-out") so a slow peer cannot block others; `publish`
//! holds the bus mutex only long enough to snapshot the subscriber set,
//! then sends after releasing it.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::orchestrator::model::Event;

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<Event>,
}

/// Per-job pub/sub fan-out. One instance is shared (via `Arc`) across the
/// whole process; it outlives any single plan.
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Register a new subscriber for `job_id`, returning its id (for later
    /// `unsubscribe`) and the receiving half of its channel.
    pub fn subscribe(&self, job_id: &str) -> (SubscriberId, UnboundedReceiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("mutex poisoned")
            .entry(job_id.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        (id, receiver)
    }

    pub fn unsubscribe(&self, job_id: &str, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock().expect("mutex poisoned");
        if let Some(list) = subscribers.get_mut(job_id) {
            list.retain(|sub| sub.id != id);
            if list.is_empty() {
                subscribers.remove(job_id);
            }
        }
    }

    /// Fan out `event` to every current subscriber of `event.job_id`, in
    /// registration order. A send that fails (receiver dropped) evicts that
    /// subscriber; other subscribers are unaffected. Publishing to a job
    /// with zero subscribers succeeds silently.
    pub fn publish(&self, event: Event) {
        let job_id = event.job_id.clone();
        let snapshot: Vec<(SubscriberId, UnboundedSender<Event>)> = {
            let subscribers = self.subscribers.lock().expect("mutex poisoned");
            subscribers
                .get(&job_id)
                .map(|list| list.iter().map(|s| (s.id, s.sender.clone())).collect())
                .unwrap_or_default()
        };

        let mut failed = Vec::new();
        for (id, sender) in &snapshot {
            if sender.send(event.clone()).is_err() {
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("mutex poisoned");
            if let Some(list) = subscribers.get_mut(&job_id) {
                list.retain(|sub| !failed.contains(&sub.id));
                if list.is_empty() {
                    subscribers.remove(&job_id);
                }
            }
            debug!(job_id = %job_id, evicted = failed.len(), "evicted disconnected subscribers");
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers.lock().expect("mutex poisoned").get(job_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::model::{EventKind, EventPayload, Plan, PlanOptions, SourceKind, SourceRef};
    use chrono::Utc;

    fn sample_event(job_id: &str) -> Event {
        let plan = Plan::new(
            job_id.to_string(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/me".into() },
            PlanOptions::default(),
            vec![],
            Utc::now(),
        );
        Event::plan_event(EventKind::PlanStarted, job_id, plan, Utc::now())
    }

    #[test]
    fn subscribe_then_unsubscribe_leaves_set_empty() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe("job-1");
        assert_eq!(bus.subscriber_count("job-1"), 1);
        bus.unsubscribe("job-1", id);
        assert_eq!(bus.subscriber_count("job-1"), 0);
    }

    #[test]
    fn publish_with_zero_subscribers_succeeds_silently() {
        let bus = EventBus::new();
        bus.publish(sample_event("job-none"));
    }

    #[test]
    fn publish_fans_out_to_all_subscribers_in_order() {
        let bus = EventBus::new();
        let (_id1, mut rx1) = bus.subscribe("job-1");
        let (_id2, mut rx2) = bus.subscribe("job-1");

        bus.publish(sample_event("job-1"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn dropped_receiver_is_evicted_without_affecting_others() {
        let bus = EventBus::new();
        let (_id1, rx1) = bus.subscribe("job-1");
        let (_id2, mut rx2) = bus.subscribe("job-1");
        drop(rx1);

        bus.publish(sample_event("job-1"));

        assert!(rx2.try_recv().is_ok());
        assert_eq!(bus.subscriber_count("job-1"), 1);
    }
}
