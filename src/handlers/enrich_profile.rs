//! ENRICH_PROFILE (spec §4.F.2): scrape the profile's related links and,
//! optionally, summarize code-hosting activity.
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::gateway::{GatewayTool, GenerateStructuredRequest};
use crate::handlers::{HandlerContext, StageHandler, required_output};
use crate::orchestrator::model::{ScrapedDocument, StageError, StageKind, Task};

const MAX_RELATED_LINKS: usize = 20;
const SCRAPE_MAX_CONCURRENT: usize = 5;

pub struct EnrichProfileHandler;

impl EnrichProfileHandler {
    /// Code-hosting aggregate stats are sourced through the AI gateway
    /// rather than a direct provider API call, since credential management
    /// is out of scope (auth is a non-goal, §1). Failure here is swallowed;
    /// the caller treats it as "no github_data" rather than a stage error.
    async fn fetch_github_aggregate(&self, ctx: &HandlerContext<'_>, related_links: &[String]) -> Option<Value> {
        let github_url = related_links.iter().find(|url| url.contains("github.com"))?;
        let request = GenerateStructuredRequest {
            prompt: format!(
                "Summarize recent public activity for the GitHub account at {github_url}: a language \
                 histogram over the 30 most recent repositories, a significant-project list sorted by \
                 stars+forks with each project's topics, and event-type counts over the latest 100 events."
            ),
            schema: json!({
                "type": "object",
                "properties": {
                    "language_histogram": {"type": "object"},
                    "significant_projects": {"type": "array"},
                    "event_type_counts": {"type": "object"}
                }
            }),
            tools: vec![GatewayTool::WebSearchGrounding],
        };
        match ctx.gateway.generate_structured(request).await {
            Ok(data) => Some(data),
            Err(error) => {
                warn!(%error, "github aggregate enrichment failed, continuing without github_data");
                None
            }
        }
    }
}

#[async_trait]
impl StageHandler for EnrichProfileHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let profile = required_output(ctx.plan, StageKind::FetchProfile)?;
        let mut enriched = profile.clone();

        let primary_url = ctx.plan.source_ref.reference.as_str();
        let related_links: Vec<String> = profile
            .get("related_links")
            .and_then(Value::as_array)
            .map(|links| {
                links
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|url| *url != primary_url)
                    .take(MAX_RELATED_LINKS)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        ctx.progress.report(10, format!("scraping {} related links", related_links.len()));
        let scraped = ctx.fetcher.scrape_many(&related_links, SCRAPE_MAX_CONCURRENT).await;

        let mut successful: Vec<ScrapedDocument> = scraped.into_iter().filter(|doc| doc.success).collect();
        successful.sort_by(|a, b| b.quality_score.partial_cmp(&a.quality_score).unwrap_or(std::cmp::Ordering::Equal));

        let stats = json!({
            "related_links_found": related_links.len(),
            "links_scraped": related_links.len(),
            "successful_scrapes": successful.len(),
        });

        if let Value::Object(map) = &mut enriched {
            map.insert("scraped_content".into(), serde_json::to_value(&successful).unwrap_or(Value::Array(vec![])));
            map.insert("enrichment_stats".into(), stats);

            if ctx.plan.options.include_github {
                if let Some(github_data) = self.fetch_github_aggregate(ctx, &related_links).await {
                    map.insert("github_data".into(), github_data);
                }
            }

            map.insert("enrichment_timestamp".into(), json!(Utc::now().to_rfc3339()));
        }

        ctx.progress.report(100, "enrichment complete");
        Ok(enriched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockAiGateway;
    use crate::handlers::ProgressReporter;
    use crate::orchestrator::events::EventBus;
    use crate::orchestrator::model::{PlanOptions, SourceKind, SourceRef, StageKind};
    use crate::orchestrator::planner::build_plan;
    use crate::store::artifact::InMemoryArtifactStore;
    use crate::web::WebFetcher;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn html_page(title: &str) -> String {
        format!(
            "<html><head><title>{title}</title></head><body><article><h1>{title}</h1>\
             <p>Experienced leader with career achievements, projects, and skills in engineering \
             and professional development across multiple companies.</p></article></body></html>"
        )
    }

    async fn plan_with_profile(gateway: &MockAiGateway, related_links: Vec<String>) -> crate::orchestrator::model::Plan {
        let mut plan = build_plan(
            "job-1".into(),
            SourceRef { source_kind: SourceKind::Url, reference: "https://example.dev/me".into() },
            PlanOptions::default(),
            Utc::now(),
        );
        let _ = gateway;
        plan.result_data.insert(
            StageKind::FetchProfile,
            json!({"name": "Ada Lovelace", "title": "Engineer", "related_links": related_links}),
        );
        plan
    }

    #[tokio::test]
    async fn enrichment_fetcher_scenario_nine_of_twelve_succeed_sorted_descending() {
        let server = MockServer::start().await;

        // 7 plain successful html pages.
        let mut related_links: Vec<String> = Vec::new();
        for i in 0..7 {
            let page_path = format!("/page{i}");
            Mock::given(method("GET"))
                .and(path(page_path.clone()))
                .respond_with(ResponseTemplate::new(200).set_body_string(html_page(&format!("Page {i}"))).insert_header("content-type", "text/html"))
                .mount(&server)
                .await;
            related_links.push(format!("{}{}", server.uri(), page_path));
        }

        // 2 links that 429 once then succeed.
        for i in 0..2 {
            let page_path = format!("/flaky{i}");
            Mock::given(method("GET"))
                .and(path(page_path.clone()))
                .respond_with(ResponseTemplate::new(429))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(page_path.clone()))
                .respond_with(ResponseTemplate::new(200).set_body_string(html_page(&format!("Flaky {i}"))).insert_header("content-type", "text/html"))
                .mount(&server)
                .await;
            related_links.push(format!("{}{}", server.uri(), page_path));
        }

        // 1 pdf content type, rejected.
        Mock::given(method("GET"))
            .and(path("/resume.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()).insert_header("content-type", "application/pdf"))
            .mount(&server)
            .await;
        related_links.push(format!("{}/resume.pdf", server.uri()));

        // 2 blocked hosts, excluded before any network call.
        related_links.push("https://www.linkedin.com/in/ada".to_string());
        related_links.push("https://x.com/ada".to_string());

        assert_eq!(related_links.len(), 12);

        let gateway = MockAiGateway::new();
        let plan = plan_with_profile(&gateway, related_links).await;
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let store = InMemoryArtifactStore::new();
        let task = plan.task("task_002").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(Arc::new(EventBus::new()), task.clone()),
        };

        let output = EnrichProfileHandler.execute(&ctx, &task).await.expect("non-critical, never errors");
        let scraped_content = output.get("scraped_content").and_then(Value::as_array).unwrap();
        assert_eq!(scraped_content.len(), 9);

        let scores: Vec<f64> = scraped_content
            .iter()
            .map(|doc| doc.get("quality_score").and_then(Value::as_f64).unwrap())
            .collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(scores, sorted, "scraped_content must be sorted by descending quality_score");

        let stats = output.get("enrichment_stats").unwrap();
        assert_eq!(stats.get("related_links_found").and_then(Value::as_u64), Some(12));
        assert_eq!(stats.get("successful_scrapes").and_then(Value::as_u64), Some(9));
    }

    #[tokio::test]
    async fn excludes_primary_source_url_from_related_links() {
        let gateway = MockAiGateway::new();
        let plan = plan_with_profile(&gateway, vec!["https://example.dev/me".to_string()]).await;
        let fetcher = WebFetcher::new(5).expect("fetcher builds");
        let store = InMemoryArtifactStore::new();
        let task = plan.task("task_002").unwrap().clone();
        let ctx = HandlerContext {
            plan: &plan,
            gateway: &gateway,
            fetcher: &fetcher,
            store: &store,
            progress: ProgressReporter::new(Arc::new(EventBus::new()), task.clone()),
        };

        let output = EnrichProfileHandler.execute(&ctx, &task).await.unwrap();
        let stats = output.get("enrichment_stats").unwrap();
        assert_eq!(stats.get("related_links_found").and_then(Value::as_u64), Some(0));
    }
}
