//! GENERATE_DOCUMENTARY (spec §4.F.6): script a documentary from the
//! structured journey and merged profile, or from the persisted journey
//! when running as a documentary-only plan.
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::gateway::GenerateStructuredRequest;
use crate::handlers::{HandlerContext, StageHandler};
use crate::orchestrator::model::{StageError, StageKind, Task};
use crate::store::artifact::FieldKey;

fn documentary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "tagline": {"type": "string"},
            "duration_estimate": {"type": "integer"},
            "segments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "order": {"type": "integer"},
                        "title": {"type": "string"},
                        "duration_seconds": {"type": "integer"},
                        "visual_description": {"type": "string"},
                        "narration": {"type": "string"},
                        "mood": {"type": "string", "enum": ["inspirational", "professional", "dynamic", "reflective", "triumphant"]},
                        "background_music_hint": {"type": "string"},
                        "data_visualization": {"type": "string"}
                    },
                    "required": ["id", "order", "visual_description", "narration", "mood"]
                }
            },
            "opening_hook": {"type": "string"},
            "closing_statement": {"type": "string"}
        },
        "required": ["title", "segments"]
    })
}

fn validate_segments(document: &Value) -> Result<(), StageError> {
    let segments = document
        .get("segments")
        .and_then(Value::as_array)
        .ok_or_else(|| StageError::Domain("documentary has no segments array".into()))?;

    if segments.is_empty() {
        return Err(StageError::Domain("documentary segments are empty".into()));
    }

    let has_valid_segment = segments.iter().any(|segment| {
        let narration = segment.get("narration").and_then(Value::as_str).is_some_and(|n| !n.trim().is_empty());
        let visual = segment.get("visual_description").and_then(Value::as_str).is_some_and(|v| !v.trim().is_empty());
        narration && visual
    });
    if !has_valid_segment {
        return Err(StageError::Domain("no documentary segment has both narration and visual_description".into()));
    }

    Ok(())
}

pub struct GenerateDocumentaryHandler;

impl GenerateDocumentaryHandler {
    async fn resolve_journey(&self, ctx: &HandlerContext<'_>) -> Result<Value, StageError> {
        if let Some(journey) = ctx.plan.result_data.get(&StageKind::StructureJourney) {
            return Ok(journey.clone());
        }
        let history_id = ctx
            .plan
            .options
            .history_id
            .as_deref()
            .ok_or_else(|| StageError::Validation("documentary-only plan requires a history_id".into()))?;
        ctx.store
            .read_structured(history_id, FieldKey::StructuredJourney)
            .await?
            .ok_or_else(|| StageError::Domain(format!("no persisted journey for history_id {history_id}")))
    }

    fn resolve_profile(&self, ctx: &HandlerContext<'_>) -> Value {
        ctx.plan
            .result_data
            .get(&StageKind::AggregateHistory)
            .or_else(|| ctx.plan.result_data.get(&StageKind::EnrichProfile))
            .or_else(|| ctx.plan.result_data.get(&StageKind::FetchProfile))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl StageHandler for GenerateDocumentaryHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let journey = self.resolve_journey(ctx).await?;
        let profile = self.resolve_profile(ctx);

        ctx.progress.report(20, "scripting documentary");
        let request = GenerateStructuredRequest {
            prompt: format!("Script a documentary from this journey and profile.\nJourney: {journey}\nProfile: {profile}"),
            schema: documentary_schema(),
            tools: vec![],
        };
        let document = ctx.gateway.generate_structured(request).await?;
        validate_segments(&document)?;

        ctx.progress.report(100, "documentary scripted");
        Ok(document)
    }
}
