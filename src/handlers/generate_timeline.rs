//! GENERATE_TIMELINE (spec §4.F.5): derive a chronological timeline from
//! the structured journey, with fixed category -> color/icon mappings.
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::gateway::GenerateStructuredRequest;
use crate::handlers::{HandlerContext, StageHandler, required_output};
use crate::orchestrator::model::{StageError, StageKind, Task};

const CATEGORY_COLOR_ICON: &[(&str, &str, &str)] = &[
    ("career", "blue", "briefcase"),
    ("education", "green", "grad-cap"),
    ("achievement", "gold", "trophy"),
    ("project", "purple", "code"),
    ("certification", "orange", "cert"),
];

fn color_and_icon_for(category: &str) -> (&'static str, &'static str) {
    CATEGORY_COLOR_ICON
        .iter()
        .find(|(cat, _, _)| *cat == category)
        .map(|(_, color, icon)| (*color, *icon))
        .unwrap_or(("gray", "circle"))
}

fn timeline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "events": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "date": {"type": "string"},
                        "end_date": {"type": "string"},
                        "title": {"type": "string"},
                        "subtitle": {"type": "string"},
                        "description": {"type": "string"},
                        "category": {"type": "string", "enum": ["career", "education", "achievement", "project", "certification"]},
                        "media": {"type": "string"},
                        "tags": {"type": "array"}
                    },
                    "required": ["id", "date", "title", "category"]
                }
            },
            "eras": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "start_date": {"type": "string"},
                        "end_date": {"type": "string"},
                        "color": {"type": "string"}
                    }
                }
            }
        },
        "required": ["events", "eras"]
    })
}

pub struct GenerateTimelineHandler;

#[async_trait]
impl StageHandler for GenerateTimelineHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let journey = required_output(ctx.plan, StageKind::StructureJourney)?;

        ctx.progress.report(20, "generating timeline");
        let request = GenerateStructuredRequest {
            prompt: format!("Derive a chronological timeline of events and eras from this journey: {journey}"),
            schema: timeline_schema(),
            tools: vec![],
        };
        let mut document = ctx.gateway.generate_structured(request).await?;

        if let Some(events) = document.get_mut("events").and_then(Value::as_array_mut) {
            for event in events.iter_mut() {
                let category = event.get("category").and_then(Value::as_str).unwrap_or("").to_string();
                let (color, icon) = color_and_icon_for(&category);
                if let Value::Object(map) = event {
                    map.insert("color".into(), json!(color));
                    map.insert("icon".into(), json!(icon));
                }
            }
        }

        ctx.progress.report(100, "timeline generated");
        Ok(document)
    }
}
