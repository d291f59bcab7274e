//! FETCH_PROFILE (spec §4.F.1): detect the source mode and produce a
//! canonical profile document.
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use url::Url;

use crate::gateway::{GatewayTool, GenerateStructuredRequest};
use crate::handlers::{HandlerContext, StageHandler};
use crate::orchestrator::model::{SourceKind, SourceRef, StageError, Task};
use crate::web::fetcher::is_blocked_host;

const MIN_NAME_CHARS: usize = 2;
const MIN_TITLE_CHARS: usize = 3;

pub struct FetchProfileHandler;

/// `_is_valid_profile`: name present (≥2 chars) AND (title ≥3 chars OR a
/// non-empty experiences/education/skills array).
#[must_use]
pub fn is_valid_profile(profile: &Value) -> bool {
    let name_ok = profile
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|n| n.trim().chars().count() >= MIN_NAME_CHARS);
    if !name_ok {
        return false;
    }

    let title_ok = profile
        .get("title")
        .and_then(Value::as_str)
        .is_some_and(|t| t.trim().chars().count() >= MIN_TITLE_CHARS);
    let has_non_empty_array = |key: &str| profile.get(key).and_then(Value::as_array).is_some_and(|a| !a.is_empty());

    title_ok || has_non_empty_array("experiences") || has_non_empty_array("education") || has_non_empty_array("skills")
}

fn profile_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "title": {"type": "string"},
            "location": {"type": "string"},
            "bio": {"type": "string"},
            "experiences": {"type": "array"},
            "education": {"type": "array"},
            "skills": {"type": "array"},
            "projects": {"type": "array"},
            "achievements": {"type": "array"},
            "certifications": {"type": "array"},
            "contact_links": {"type": "array"},
            "related_links": {"type": "array"}
        },
        "required": ["name"]
    })
}

impl FetchProfileHandler {
    async fn extract_from_pdf(
        &self,
        ctx: &HandlerContext<'_>,
        source_ref: &SourceRef,
    ) -> Result<(Value, &'static str), StageError> {
        let bytes = ctx
            .store
            .read_blob(&source_ref.reference)
            .await
            .map_err(|error| StageError::Domain(format!("unreadable résumé PDF: {error}")))?;

        let prompt = "Extract a canonical professional profile from this résumé PDF.";
        let mut profile = ctx.gateway.generate_from_pdf(&bytes, prompt, &profile_schema()).await?;

        let has_related_links =
            profile.get("related_links").and_then(Value::as_array).is_some_and(|links| !links.is_empty());
        if !has_related_links {
            if let Some(name) = profile.get("name").and_then(Value::as_str).map(str::to_string) {
                let request = GenerateStructuredRequest {
                    prompt: format!("Find public professional profile links for {name}."),
                    schema: json!({"type": "object", "properties": {"related_links": {"type": "array"}}}),
                    tools: vec![GatewayTool::WebSearchGrounding],
                };
                if let Ok(links_doc) = ctx.gateway.generate_structured(request).await {
                    if let (Some(links), Value::Object(map)) =
                        (links_doc.get("related_links").cloned(), &mut profile)
                    {
                        map.insert("related_links".into(), links);
                    }
                }
            }
        }

        // Non-fatal: the blob is cleaned up best-effort once extracted.
        let _ = ctx.store.delete_blob(&source_ref.reference).await;

        Ok((profile, "pdf_resume"))
    }

    /// Platforms on the blocklist (spec §4.B). An OAuth-linked direct fetch
    /// is out of scope (auth is a non-goal, §1); this always takes the
    /// "otherwise" branch — web-search grounding anchored on the URL string.
    async fn extract_from_walled_platform(
        &self,
        ctx: &HandlerContext<'_>,
        source_ref: &SourceRef,
    ) -> Result<(Value, &'static str), StageError> {
        let request = GenerateStructuredRequest {
            prompt: format!("Construct a professional profile for the person at {}.", source_ref.reference),
            schema: profile_schema(),
            tools: vec![GatewayTool::WebSearchGrounding],
        };
        let profile = ctx.gateway.generate_structured(request).await?;
        Ok((profile, "walled_platform_search"))
    }

    async fn extract_from_open_url(
        &self,
        ctx: &HandlerContext<'_>,
        source_ref: &SourceRef,
    ) -> Result<(Value, &'static str), StageError> {
        let request = GenerateStructuredRequest {
            prompt: format!("Build a canonical professional profile from {}.", source_ref.reference),
            schema: profile_schema(),
            tools: vec![GatewayTool::UrlInlineContext, GatewayTool::WebSearchGrounding],
        };
        let profile = ctx.gateway.generate_structured(request).await?;
        Ok((profile, "open_url"))
    }
}

#[async_trait]
impl StageHandler for FetchProfileHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let source_ref = ctx.plan.source_ref.clone();
        ctx.progress.report(5, "detecting source mode");

        let (mut profile, extraction_method) = match source_ref.source_kind {
            SourceKind::Resume => self.extract_from_pdf(ctx, &source_ref).await?,
            SourceKind::Url => {
                let is_walled = Url::parse(&source_ref.reference)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .is_some_and(|host| is_blocked_host(&host));
                if is_walled {
                    self.extract_from_walled_platform(ctx, &source_ref).await?
                } else {
                    self.extract_from_open_url(ctx, &source_ref).await?
                }
            }
        };

        ctx.progress.report(80, "validating extracted profile");
        if !is_valid_profile(&profile) {
            return Err(StageError::Domain(format!(
                "extracted document does not look like a profile (source: {extraction_method})"
            )));
        }

        if let Value::Object(map) = &mut profile {
            map.insert(
                "source_ref".into(),
                json!({"source_kind": source_ref.source_kind, "reference": source_ref.reference}),
            );
            map.insert("extraction_timestamp".into(), json!(Utc::now().to_rfc3339()));
            map.insert("extraction_method".into(), json!(extraction_method));
        }

        ctx.progress.report(100, "profile extracted");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockAiGateway;
    use crate::handlers::ProgressReporter;
    use crate::orchestrator::events::EventBus;
    use crate::orchestrator::model::{PlanOptions, StageKind};
    use crate::orchestrator::planner::build_plan;
    use crate::store::artifact::InMemoryArtifactStore;
    use crate::web::WebFetcher;
    use std::sync::Arc;

    fn ctx_pieces() -> (MockAiGateway, WebFetcher, InMemoryArtifactStore, Arc<EventBus>) {
        (MockAiGateway::new(), WebFetcher::new(5).expect("fetcher builds"), InMemoryArtifactStore::new(), Arc::new(EventBus::new()))
    }

    #[test]
    fn valid_profile_requires_name_and_one_signal() {
        assert!(is_valid_profile(&json!({"name": "Ada Lovelace", "title": "Engineer"})));
        assert!(is_valid_profile(&json!({"name": "Ada Lovelace", "experiences": [{"role": "x"}]})));
        assert!(!is_valid_profile(&json!({"name": "Ada Lovelace"})));
        assert!(!is_valid_profile(&json!({"name": "A", "title": "Engineer"})));
        assert!(!is_valid_profile(&json!({})));
    }

    #[tokio::test]
    async fn open_url_extracts_profile_and_stamps_metadata() {
        let (gateway, fetcher, store, events) = ctx_pieces();
        gateway.enqueue_structured_success(json!({
            "name": "Ada Lovelace",
            "title": "Software Engineer",
            "experiences": [],
            "related_links": []
        }));

        let plan = build_plan(
            "job-1".into(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/ada".into() },
            PlanOptions::default(),
            Utc::now(),
        );
        let task = plan.task("task_001").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(events, task.clone()),
        };

        let output = FetchProfileHandler.execute(&ctx, &task).await.expect("valid profile");
        assert_eq!(output.get("name").and_then(Value::as_str), Some("Ada Lovelace"));
        assert_eq!(output.get("extraction_method").and_then(Value::as_str), Some("open_url"));
        assert!(output.get("extraction_timestamp").is_some());
    }

    #[tokio::test]
    async fn invalid_profile_document_fails_as_domain_error() {
        let (gateway, fetcher, store, events) = ctx_pieces();
        gateway.enqueue_structured_success(json!({"name": "A"}));

        let plan = build_plan(
            "job-1".into(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/ada".into() },
            PlanOptions::default(),
            Utc::now(),
        );
        let task = plan.task("task_001").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(events, task.clone()),
        };

        let error = FetchProfileHandler.execute(&ctx, &task).await.unwrap_err();
        assert!(matches!(error, StageError::Domain(_)));
    }

    #[tokio::test]
    async fn walled_platform_url_skips_direct_fetch_and_uses_search_grounding() {
        let (gateway, fetcher, store, events) = ctx_pieces();
        gateway.enqueue_structured_success(json!({"name": "Ada Lovelace", "title": "Engineer"}));

        let plan = build_plan(
            "job-1".into(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://www.linkedin.com/in/ada".into() },
            PlanOptions::default(),
            Utc::now(),
        );
        let task = plan.task("task_001").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(events, task.clone()),
        };

        let output = FetchProfileHandler.execute(&ctx, &task).await.expect("valid profile");
        assert_eq!(output.get("extraction_method").and_then(Value::as_str), Some("walled_platform_search"));
    }

    #[tokio::test]
    async fn resume_source_reads_blob_and_deletes_it_on_success() {
        let (gateway, fetcher, store, events) = ctx_pieces();
        let handle = store.stage_blob(b"%PDF-1.4 fake".to_vec()).await.unwrap();
        gateway.enqueue_structured_success(json!({
            "name": "Ada Lovelace", "title": "Engineer", "related_links": ["https://example.dev/a"]
        }));

        let plan = build_plan(
            "job-1".into(),
            SourceRef { source_kind: SourceKind::Resume, reference: handle.clone() },
            PlanOptions::default(),
            Utc::now(),
        );
        let task = plan.task("task_001").unwrap().clone();
        assert_eq!(task.kind, StageKind::FetchProfile);
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(events, task.clone()),
        };

        let output = FetchProfileHandler.execute(&ctx, &task).await.expect("valid profile");
        assert_eq!(output.get("extraction_method").and_then(Value::as_str), Some("pdf_resume"));
        assert!(store.read_blob(&handle).await.is_err(), "blob should be deleted after extraction");
    }
}
