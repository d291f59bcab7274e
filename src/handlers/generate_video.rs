//! GENERATE_VIDEO (spec §4.F.7): render documentary segments into video,
//! chaining each call's continuity reference to the previous segment's
//! handle, then concatenate into a full video when more than one segment
//! renders successfully.
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use crate::gateway::VideoHandle;
use crate::handlers::HandlerContext;
use crate::handlers::StageHandler;
use crate::orchestrator::model::{StageError, StageKind, Task};
use crate::store::artifact::FieldKey;

const MAX_NARRATION_WORDS: usize = 15;
const SEGMENT_DURATION_SECONDS: u32 = 8;

/// `_build_character_bible` keyword buckets (SPEC_FULL §3): match the most
/// recent experience's title against a fixed industry vocabulary.
const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Technology", &["engineer", "developer", "software", "data", "architect", "programmer", "devops", "technical"]),
    ("Finance", &["finance", "financial", "accountant", "analyst", "investment", "banking", "trader"]),
    ("Healthcare", &["doctor", "nurse", "physician", "clinical", "medical", "healthcare", "therapist"]),
    ("Creative", &["designer", "artist", "writer", "photographer", "creative", "director"]),
    ("Education", &["teacher", "professor", "instructor", "educator", "lecturer", "tutor"]),
];

#[must_use]
pub fn infer_industry(most_recent_title: &str) -> Option<&'static str> {
    let lower = most_recent_title.to_lowercase();
    INDUSTRY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(industry, _)| *industry)
}

fn build_character_bible(name: &str, title: &str, industry: Option<&str>) -> String {
    let industry_line = industry.map_or_else(
        || "No specific industry setting; keep visuals professionally neutral.".to_string(),
        |industry| format!("Industry setting: {industry}."),
    );
    format!(
        "CHARACTER BIBLE\nSubject: {name}\nCurrent role: {title}\n{industry_line}\n\
         Demeanour: composed, approachable, confident.\n\
         Cinematographic palette: warm neutral tones, shallow depth of field, documentary lighting.\n\
         Voice continuity: narration stays in third person, measured pace, consistent tone across segments."
    )
}

fn validate_segment(segment: &Value) -> Result<(String, String), StageError> {
    let narration = segment
        .get("narration")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| StageError::Domain("segment missing narration".into()))?;
    let visual = segment
        .get("visual_description")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| StageError::Domain("segment missing visual_description".into()))?;

    let word_count = narration.split_whitespace().count();
    if word_count > MAX_NARRATION_WORDS {
        return Err(StageError::Domain(format!("segment narration has {word_count} words, exceeds {MAX_NARRATION_WORDS}")));
    }

    Ok((narration.to_string(), visual.to_string()))
}

pub struct GenerateVideoHandler;

impl GenerateVideoHandler {
    async fn resolve_documentary(&self, ctx: &HandlerContext<'_>) -> Result<Value, StageError> {
        if let Some(documentary) = ctx.plan.result_data.get(&StageKind::GenerateDocumentary) {
            return Ok(documentary.clone());
        }
        let history_id = ctx
            .plan
            .options
            .history_id
            .as_deref()
            .ok_or_else(|| StageError::Validation("video-only plan requires a history_id".into()))?;
        ctx.store
            .read_structured(history_id, FieldKey::StructuredDocumentary)
            .await?
            .ok_or_else(|| StageError::Domain(format!("no persisted documentary for history_id {history_id}")))
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

    async fn history_id(&self, ctx: &HandlerContext<'_>) -> Result<String, StageError> {
        if let Some(id) = &ctx.plan.options.history_id {
            return Ok(id.clone());
        }
        ctx.store
            .create_job_row(&ctx.plan.options.guest_id, &ctx.plan.source_ref.reference)
            .await
    }
}

#[async_trait]
impl StageHandler for GenerateVideoHandler {
    async fn execute(&self, ctx: &HandlerContext<'_>, _task: &Task) -> Result<Value, StageError> {
        let documentary = self.resolve_documentary(ctx).await?;
        let profile = self.resolve_profile(ctx);

        let name = profile.get("name").and_then(Value::as_str).unwrap_or("the subject");
        let title = profile.get("title").and_then(Value::as_str).unwrap_or("professional");
        let most_recent_title = profile
            .get("experiences")
            .and_then(Value::as_array)
            .and_then(|experiences| experiences.first())
            .and_then(|experience| experience.get("title").and_then(Value::as_str))
            .unwrap_or(title);
        let bible = build_character_bible(name, title, infer_industry(most_recent_title));

        let video_settings = ctx.plan.options.video_settings.clone().unwrap_or_default();
        let all_segments = documentary.get("segments").and_then(Value::as_array).cloned().unwrap_or_default();
        let segments: Vec<Value> =
            if ctx.plan.options.first_segment_only { all_segments.into_iter().take(1).collect() } else { all_segments };

        if segments.is_empty() {
            return Err(StageError::Domain("no documentary segments available for video generation".into()));
        }

        let history_id = self.history_id(ctx).await?;

        let mut continuity_ref: Option<VideoHandle> = None;
        let mut rendered: Vec<(Vec<u8>, String)> = Vec::new();
        let mut failures = 0usize;
        let total = segments.len();

        for (index, segment) in segments.iter().enumerate() {
            let Ok((narration, visual)) = validate_segment(segment) else {
                failures += 1;
                continue;
            };
            let segment_title = segment.get("title").and_then(Value::as_str).unwrap_or("");
            let prompt = format!(
                "{bible}\n\nSegment {order}: {segment_title}\nVisual: {visual}\nNarration: {narration}",
                order = index + 1
            );

            let segment_result = ctx
                .gateway
                .generate_video_segment(
                    &prompt,
                    SEGMENT_DURATION_SECONDS,
                    &video_settings.resolution,
                    &video_settings.aspect_ratio,
                    continuity_ref.as_ref(),
                )
                .await;

            match segment_result {
                Ok(result) => {
                    let upload_name = format!("segment-{}", index + 1);
                    match ctx.store.upload_blob(&history_id, &upload_name, result.bytes.clone()).await {
                        Ok(url) => {
                            ctx.progress.report(((index + 1) * 80 / total) as u8, format!("segment {} rendered", index + 1));
                            rendered.push((result.bytes, url));
                            continuity_ref = Some(result.handle);
                        }
                        Err(error) => {
                            warn!(%error, "failed to upload rendered segment, continuing");
                            failures += 1;
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, "video segment render failed, continuing with remaining segments");
                    failures += 1;
                }
            }
        }

        if rendered.is_empty() {
            return Err(StageError::Domain("all video segments failed to render".into()));
        }

        let segment_urls: Vec<String> = rendered.iter().map(|(_, url)| url.clone()).collect();
        if let Err(error) = ctx.store.write_field(&history_id, FieldKey::SegmentVideoUrl, json!(segment_urls)).await {
            warn!(%error, "failed to persist segment_video_urls (non-critical)");
        }

        let full_video_url = if rendered.len() > 1 {
            let bytes_in_order: Vec<Vec<u8>> = rendered.iter().map(|(bytes, _)| bytes.clone()).collect();
            let merged_bytes = ctx.gateway.concat_videos(&bytes_in_order).await?;
            ctx.store.upload_blob(&history_id, "full_video", merged_bytes).await?
        } else {
            rendered[0].1.clone()
        };

        if let Err(error) = ctx.store.write_field(&history_id, FieldKey::FullVideoUrl, json!(full_video_url.clone())).await {
            warn!(%error, "failed to persist full_video_url (non-critical)");
        }
        if let Err(error) =
            ctx.store.write_field(&history_id, FieldKey::IntroVideoUrl, json!(segment_urls.first())).await
        {
            warn!(%error, "failed to persist intro_video_url (non-critical)");
        }

        ctx.progress.report(100, "video generation complete");
        Ok(json!({
            "segment_video_urls": segment_urls,
            "full_video_url": full_video_url,
            "segments_rendered": rendered.len(),
            "segments_failed": failures,
        }))
    }
}
