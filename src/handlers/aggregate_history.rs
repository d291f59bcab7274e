//! AGGREGATE_HISTORY (spec §4.F.3): merge the enriched profile with the
//! owner's prior history, or pass it through unchanged on a first record.
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use crate::gateway::GenerateStructuredRequest;
use crate::handlers::{HandlerContext, StageHandler, required_output};
use crate::orchestrator::model::{StageError, StageKind, Task};
use crate::store::artifact::FieldKey;

fn merged_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "title": {"type": "string"},
            "experiences": {"type": "array"},
            "education": {"type": "array"},
            "skills": {"type": "array"},
            "projects": {"type": "array"},
            "achievements": {"type": "array"},
            "certifications": {"type": "array"},
            "skill_evolution": {"type": "array"}
        },
        "required": ["name"]
    })
}

fn merge_prompt(current: &Value, prior_structured: &[Value], scraped_content: &[Value]) -> String {
    format!(
        "Merge this profile with the owner's prior records chronologically. Deduplicate experiences and \
         projects, track skill evolution over time, and enrich achievements using the scraped sources.\n\n\
         Current profile:\n{current}\n\nPrior records ({prior_count}):\n{prior_structured:?}\n\n\
         Scraped sources ({scraped_count}):\n{scraped_content:?}",
        prior_count = prior_structured.len(),
        scraped_count = scraped_content.len(),
    )
}

pub struct AggregateHistoryHandler;

#[async_trait]
impl StageHandler for AggregateHistoryHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let enriched = required_output(ctx.plan, StageKind::EnrichProfile)?;
        let owner_ref = ctx.plan.options.guest_id.clone();

        let history_id = match &ctx.plan.options.history_id {
            Some(id) => id.clone(),
            None => ctx
                .store
                .create_job_row(&owner_ref, &ctx.plan.source_ref.reference)
                .await
                .unwrap_or_else(|_| ctx.plan.job_id.clone()),
        };

        let scraped_content = enriched.get("scraped_content").and_then(Value::as_array).cloned().unwrap_or_default();

        let prior_rows = match ctx.store.list_by_owner(&owner_ref).await {
            Ok(rows) => rows.into_iter().filter(|row| row.history_id != history_id).collect::<Vec<_>>(),
            Err(error) => {
                warn!(%error, "failed to list prior history rows (non-critical)");
                Vec::new()
            }
        };
        let prior_structured: Vec<Value> = prior_rows
            .iter()
            .filter_map(|row| row.fields.get(FieldKey::StructuredMerged.as_str()).cloned())
            .filter(|doc| doc.as_object().is_some_and(|object| !object.is_empty()))
            .collect();

        let is_first_record = prior_structured.is_empty() && scraped_content.is_empty();

        let merged = if is_first_record {
            ctx.progress.report(50, "first record, persisting unchanged");
            let mut doc = enriched.clone();
            if let Value::Object(map) = &mut doc {
                map.insert("aggregated".into(), json!(false));
                map.insert("first_record".into(), json!(true));
            }
            doc
        } else {
            ctx.progress.report(40, "merging with prior history");
            let request = GenerateStructuredRequest {
                prompt: merge_prompt(&enriched, &prior_structured, &scraped_content),
                schema: merged_schema(),
                tools: vec![],
            };
            let mut merged_doc = ctx.gateway.generate_structured(request).await?;
            if let Value::Object(map) = &mut merged_doc {
                map.insert("aggregated".into(), json!(true));
                map.insert("first_record".into(), json!(false));
            }
            merged_doc
        };

        if let Err(error) = ctx.store.write_field(&history_id, FieldKey::StructuredMerged, merged.clone()).await {
            warn!(%error, "failed to persist structured.merged (non-critical)");
        }
        if !is_first_record {
            if let Err(error) = ctx.store.write_field(&history_id, FieldKey::Raw, enriched.clone()).await {
                warn!(%error, "failed to persist raw input (non-critical)");
            }
        }

        ctx.progress.report(100, "history aggregated");
        Ok(merged)
    }
}
