//! AI gateway (spec §4.D): a single abstraction over text/JSON generation,
//! search-grounded generation, PDF ingestion, and video synthesis. The core
//! only depends on this trait; any backend satisfying it is acceptable. The
//! gateway itself decodes no provider wire format (out of scope, §1) — it
//! is expected to be long-latency and occasionally transiently failing; the
//! scheduler, not the gateway, owns retry/timeout policy (§4.D).
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;

use crate::orchestrator::model::StageError;

/// A tool an AI gateway call may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTool {
    WebSearchGrounding,
    UrlInlineContext,
}

/// Parameters for one `generate_structured` call.
#[derive(Debug, Clone)]
pub struct GenerateStructuredRequest {
    pub prompt: String,
    pub schema: Value,
    pub tools: Vec<GatewayTool>,
}

/// An opaque, provider-returned handle identifying a generated video clip.
/// Passed back as `continuity_ref` on the next call so the two segments
/// share visual/character identity (spec §4.D, glossary "continuity
/// reference").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoHandle(pub String);

#[derive(Debug, Clone)]
pub struct VideoSegmentResult {
    pub handle: VideoHandle,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Generate a JSON document conforming to `request.schema`, optionally
    /// grounded by the requested tools.
    async fn generate_structured(&self, request: GenerateStructuredRequest) -> Result<Value, StageError>;

    /// Ingest a PDF's bytes and produce a JSON document conforming to
    /// `schema`.
    async fn generate_from_pdf(&self, bytes: &[u8], prompt: &str, schema: &Value) -> Result<Value, StageError>;

    /// Render one video segment. `continuity_ref`, when present, is the
    /// handle from the immediately preceding segment's result.
    async fn generate_video_segment(
        &self,
        prompt: &str,
        duration_seconds: u32,
        resolution: &str,
        aspect_ratio: &str,
        continuity_ref: Option<&VideoHandle>,
    ) -> Result<VideoSegmentResult, StageError>;

    /// Concatenate already-rendered segment byte buffers, in order, into a
    /// single video.
    async fn concat_videos(&self, segments: &[Vec<u8>]) -> Result<Vec<u8>, StageError>;
}
