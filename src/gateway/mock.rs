//! An in-memory [`AiGateway`] used for local running and tests. Production
//! deployments wire in a real provider-backed implementation of the same
//! trait (out of scope, §1); this mock exists so the orchestration core is
//! runnable and testable without one.
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::gateway::{AiGateway, GenerateStructuredRequest, VideoHandle, VideoSegmentResult};
use crate::orchestrator::model::StageError;

/// A scripted response or failure, consumed in FIFO order by the next
/// matching call. Falls back to `default_response` (or success) once the
/// queue is drained, so tests only need to script the calls they care about.
enum Scripted {
    Value(Value),
    Error(StageError),
}

/// Programmable mock gateway: tests enqueue canned responses/failures per
/// call kind to exercise the scheduler's retry-on-transient-error behavior
/// (spec §8 scenarios 2/3) deterministically.
pub struct MockAiGateway {
    structured_queue: Mutex<VecDeque<Scripted>>,
    pdf_queue: Mutex<VecDeque<Scripted>>,
    video_segment_calls: Mutex<Vec<(String, Option<VideoHandle>)>>,
    concat_calls: Mutex<u32>,
    next_video_handle: Mutex<u64>,
}

impl Default for MockAiGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAiGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            structured_queue: Mutex::new(VecDeque::new()),
            pdf_queue: Mutex::new(VecDeque::new()),
            video_segment_calls: Mutex::new(Vec::new()),
            concat_calls: Mutex::new(0),
            next_video_handle: Mutex::new(0),
        }
    }

    pub fn enqueue_structured_success(&self, value: Value) {
        self.structured_queue.lock().expect("mutex poisoned").push_back(Scripted::Value(value));
    }

    pub fn enqueue_structured_failure(&self, error: StageError) {
        self.structured_queue.lock().expect("mutex poisoned").push_back(Scripted::Error(error));
    }

    pub fn enqueue_structured_transient_failures(&self, count: u32) {
        let mut queue = self.structured_queue.lock().expect("mutex poisoned");
        for _ in 0..count {
            queue.push_back(Scripted::Error(StageError::Transient("mock transient failure".into())));
        }
    }

    #[must_use]
    pub fn video_segment_calls(&self) -> Vec<(String, Option<VideoHandle>)> {
        self.video_segment_calls.lock().expect("mutex poisoned").clone()
    }

    #[must_use]
    pub fn concat_call_count(&self) -> u32 {
        *self.concat_calls.lock().expect("mutex poisoned")
    }
}

#[async_trait]
impl AiGateway for MockAiGateway {
    async fn generate_structured(&self, request: GenerateStructuredRequest) -> Result<Value, StageError> {
        let scripted = self.structured_queue.lock().expect("mutex poisoned").pop_front();
        match scripted {
            Some(Scripted::Value(value)) => Ok(value),
            Some(Scripted::Error(error)) => Err(error),
            None => Ok(json!({ "mock": true, "prompt_echo": request.prompt })),
        }
    }

    async fn generate_from_pdf(&self, _bytes: &[u8], prompt: &str, _schema: &Value) -> Result<Value, StageError> {
        let scripted = self.pdf_queue.lock().expect("mutex poisoned").pop_front();
        match scripted {
            Some(Scripted::Value(value)) => Ok(value),
            Some(Scripted::Error(error)) => Err(error),
            None => Ok(json!({ "mock": true, "prompt_echo": prompt })),
        }
    }

    async fn generate_video_segment(
        &self,
        prompt: &str,
        _duration_seconds: u32,
        _resolution: &str,
        _aspect_ratio: &str,
        continuity_ref: Option<&VideoHandle>,
    ) -> Result<VideoSegmentResult, StageError> {
        let mut counter = self.next_video_handle.lock().expect("mutex poisoned");
        *counter += 1;
        let handle = VideoHandle(format!("mock-segment-{counter}"));
        drop(counter);

        self.video_segment_calls
            .lock()
            .expect("mutex poisoned")
            .push((prompt.to_string(), continuity_ref.cloned()));

        Ok(VideoSegmentResult { handle, bytes: vec![0_u8; 8] })
    }

    async fn concat_videos(&self, segments: &[Vec<u8>]) -> Result<Vec<u8>, StageError> {
        *self.concat_calls.lock().expect("mutex poisoned") += 1;
        Ok(segments.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_drain_before_falling_back_to_success() {
        let gateway = MockAiGateway::new();
        gateway.enqueue_structured_transient_failures(2);
        gateway.enqueue_structured_success(json!({"ok": true}));

        let req = || GenerateStructuredRequest { prompt: "p".into(), schema: json!({}), tools: vec![] };
        assert!(gateway.generate_structured(req()).await.is_err());
        assert!(gateway.generate_structured(req()).await.is_err());
        assert_eq!(gateway.generate_structured(req()).await.unwrap(), json!({"ok": true}));
        // Queue drained: falls back to a default success.
        assert!(gateway.generate_structured(req()).await.is_ok());
    }

    #[tokio::test]
    async fn video_segments_carry_continuity_ref_forward() {
        let gateway = MockAiGateway::new();
        let first = gateway.generate_video_segment("p1", 8, "1280x720", "16:9", None).await.unwrap();
        let second = gateway
            .generate_video_segment("p2", 8, "1280x720", "16:9", Some(&first.handle))
            .await
            .unwrap();

        let calls = gateway.video_segment_calls();
        assert_eq!(calls[1].1, Some(first.handle.clone()));
        assert_ne!(first.handle, second.handle);
    }
}
