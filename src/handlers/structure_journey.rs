//! STRUCTURE_JOURNEY (spec §4.F.4): build the narrative structure of the
//! journey from whichever upstream profile document is available.
//!
//! Design note: a *transient* gateway error is propagated so the scheduler's
//! retry/backoff applies and the task can still end FAILED once
//! `max_retries` is exhausted (spec §8 scenario 2). A *non-retryable*
//! gateway error instead synthesizes the minimal fallback document spec.md
//! describes, so a single permanent provider failure degrades gracefully
//! rather than failing the whole stage outright.
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::gateway::GenerateStructuredRequest;
use crate::handlers::{HandlerContext, StageHandler};
use crate::orchestrator::model::{Plan, StageError, StageKind, Task};

fn journey_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {
                "type": "object",
                "properties": {
                    "headline": {"type": "string"},
                    "narrative": {"type": "string"},
                    "career_span": {"type": "string"},
                    "key_themes": {"type": "array"}
                }
            },
            "milestones": {"type": "array"},
            "career_chapters": {"type": "array"},
            "skills_evolution": {"type": "array"},
            "impact_metrics": {
                "type": "object",
                "properties": {
                    "years_experience": {"type": "integer"},
                    "companies_count": {"type": "integer"},
                    "projects_count": {"type": "integer"},
                    "skills_count": {"type": "integer"}
                }
            }
        },
        "required": ["summary", "milestones"]
    })
}

fn fallback_document(profile: &Value, error_message: &str) -> Value {
    let name = profile.get("name").and_then(Value::as_str).unwrap_or("this professional");
    let skills_count = profile.get("skills").and_then(Value::as_array).map_or(0, Vec::len);
    json!({
        "summary": {
            "headline": format!("{name}'s professional journey"),
            "narrative": "",
            "career_span": "",
            "key_themes": []
        },
        "milestones": [],
        "career_chapters": [],
        "skills_evolution": [],
        "impact_metrics": {
            "years_experience": 0,
            "companies_count": 0,
            "projects_count": 0,
            "skills_count": skills_count
        },
        "error": error_message
    })
}

/// Prefer the most-downstream upstream document available: merged history,
/// then enriched profile, then the raw fetched profile.
fn resolve_input_profile(plan: &Plan) -> Result<Value, StageError> {
    for kind in [StageKind::AggregateHistory, StageKind::EnrichProfile, StageKind::FetchProfile] {
        if let Some(document) = plan.result_data.get(&kind) {
            return Ok(document.clone());
        }
    }
    Err(StageError::Internal("no upstream profile document available for STRUCTURE_JOURNEY".into()))
}

pub struct StructureJourneyHandler;

#[async_trait]
impl StageHandler for StructureJourneyHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let profile = resolve_input_profile(ctx.plan)?;

        ctx.progress.report(20, "structuring journey narrative");
        let request = GenerateStructuredRequest {
            prompt: format!("Build the narrative structure of this person's professional journey from: {profile}"),
            schema: journey_schema(),
            tools: vec![],
        };

        match ctx.gateway.generate_structured(request).await {
            Ok(document) => {
                ctx.progress.report(100, "journey structured");
                Ok(document)
            }
            Err(error) if error.is_retryable() => Err(error),
            Err(error) => {
                ctx.progress.report(100, "journey structuring failed, using fallback");
                Ok(fallback_document(&profile, &error.user_message()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockAiGateway;
    use crate::handlers::ProgressReporter;
    use crate::orchestrator::events::EventBus;
    use crate::orchestrator::model::{PlanOptions, SourceKind, SourceRef};
    use crate::orchestrator::planner::build_plan;
    use crate::store::artifact::InMemoryArtifactStore;
    use crate::web::WebFetcher;
    use chrono::Utc;
    use std::sync::Arc;

    fn plan_with_fetched_profile(profile: Value) -> Plan {
        let mut plan = build_plan(
            "job-1".into(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/me".into() },
            PlanOptions::default(),
            Utc::now(),
        );
        plan.result_data.insert(StageKind::FetchProfile, profile);
        plan
    }

    #[tokio::test]
    async fn successful_structuring_returns_gateway_document() {
        let gateway = MockAiGateway::new();
        gateway.enqueue_structured_success(json!({
            "summary": {"headline": "h", "narrative": "n", "career_span": "5y", "key_themes": []},
            "milestones": [], "career_chapters": [], "skills_evolution": [],
            "impact_metrics": {"years_experience": 5, "companies_count": 2, "projects_count": 3, "skills_count": 4}
        }));
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let store = InMemoryArtifactStore::new();
        let plan = plan_with_fetched_profile(json!({"name": "Ada Lovelace", "skills": ["rust", "math"]}));
        let task = plan.task("task_004").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(Arc::new(EventBus::new()), task.clone()),
        };

        let output = StructureJourneyHandler.execute(&ctx, &task).await.unwrap();
        assert_eq!(output.get("summary").unwrap().get("headline").and_then(Value::as_str), Some("h"));
        assert!(output.get("error").is_none());
    }

    #[tokio::test]
    async fn permanent_gateway_failure_falls_back_with_error_field() {
        let gateway = MockAiGateway::new();
        gateway.enqueue_structured_failure(StageError::Permanent("schema mismatch".into()));
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let store = InMemoryArtifactStore::new();
        let plan = plan_with_fetched_profile(json!({"name": "Ada Lovelace", "skills": ["rust", "math"]}));
        let task = plan.task("task_004").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(Arc::new(EventBus::new()), task.clone()),
        };

        let output = StructureJourneyHandler.execute(&ctx, &task).await.unwrap();
        assert!(output.get("error").is_some());
        assert_eq!(output.get("impact_metrics").unwrap().get("skills_count").and_then(Value::as_u64), Some(2));
    }

    #[tokio::test]
    async fn transient_gateway_failure_propagates_for_scheduler_retry() {
        let gateway = MockAiGateway::new();
        gateway.enqueue_structured_failure(StageError::Transient("provider 503".into()));
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let store = InMemoryArtifactStore::new();
        let plan = plan_with_fetched_profile(json!({"name": "Ada Lovelace"}));
        let task = plan.task("task_004").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(Arc::new(EventBus::new()), task.clone()),
        };

        let error = StructureJourneyHandler.execute(&ctx, &task).await.unwrap_err();
        assert!(error.is_retryable());
    }
}
