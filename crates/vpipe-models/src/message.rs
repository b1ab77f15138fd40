//! Broker message schemas.
//!
//! Field names are part of the wire contract shared with every stage worker
//! and must stay stable.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Classify, ErrorKind};
use crate::retry::RetryInfo;
use crate::stage::Stage;
use crate::video::{StageRunStatus, VideoId};

/// Message that starts a stage for a video.
///
/// Published by the orchestrator to a stage queue, and by the upload service
/// to the orchestrator queue to start the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageMessage {
    pub video_id: VideoId,
    #[serde(default)]
    pub filename: String,
    #[serde(flatten)]
    pub retry: RetryInfo,
}

impl StageMessage {
    pub fn new(video_id: VideoId, filename: impl Into<String>, max_retries: u32) -> Self {
        Self {
            video_id,
            filename: filename.into(),
            retry: RetryInfo::new(max_retries),
        }
    }

    /// Copy of this message for the next delivery attempt.
    pub fn retried(&self, now: DateTime<Utc>) -> Self {
        Self {
            retry: self.retry.next_attempt(now),
            ..self.clone()
        }
    }
}

/// Message a stage worker sends to the orchestrator when it finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageCompletedMessage {
    pub video_id: VideoId,
    #[serde(default)]
    pub filename: String,
    /// `<bucket>/<object>` of the produced artifact.
    #[serde(default)]
    pub bucket_path: String,
    #[serde(default)]
    pub status: String,
    /// Explicit stage tag. Older producers only send `bucket_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(flatten)]
    pub retry: RetryInfo,
}

impl StageCompletedMessage {
    pub fn new(
        stage: Stage,
        video_id: VideoId,
        filename: impl Into<String>,
        bucket_path: impl Into<String>,
    ) -> Self {
        Self {
            video_id,
            filename: filename.into(),
            bucket_path: bucket_path.into(),
            status: StageRunStatus::Completed.as_str().to_string(),
            stage: Some(stage),
            retry: RetryInfo::default(),
        }
    }

    /// The stage that finished.
    ///
    /// Uses the explicit tag when present, otherwise the bucket path marker.
    /// A path without a known marker means the final stage.
    pub fn completed_stage(&self) -> Stage {
        self.stage
            .or_else(|| Stage::from_bucket_path(&self.bucket_path))
            .unwrap_or(Stage::IntroOutro)
    }

    pub fn retried(&self, now: DateTime<Utc>) -> Self {
        Self {
            retry: self.retry.next_attempt(now),
            ..self.clone()
        }
    }
}

/// Payload that cannot be turned into a pipeline message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid message format: missing video_id")]
    MissingVideoId,
}

impl Classify for MessageError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}

/// A message arriving on the orchestrator queue.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Start(StageMessage),
    StageCompleted(StageCompletedMessage),
}

impl InboundMessage {
    /// Decode a raw payload.
    ///
    /// A payload is a completion event when it names a stage or carries a
    /// bucket path; anything else is a start request.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;

        let is_completion = value.get("stage").is_some_and(|s| !s.is_null())
            || value
                .get("bucket_path")
                .and_then(|p| p.as_str())
                .is_some_and(|p| !p.is_empty());

        let message = if is_completion {
            let completed: StageCompletedMessage = serde_json::from_value(value)?;
            InboundMessage::StageCompleted(completed)
        } else {
            let start: StageMessage = serde_json::from_value(value)?;
            InboundMessage::Start(start)
        };

        if message.video_id().is_empty() {
            return Err(MessageError::MissingVideoId);
        }
        Ok(message)
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            InboundMessage::Start(m) => &m.video_id,
            InboundMessage::StageCompleted(m) => &m.video_id,
        }
    }

    pub fn retry(&self) -> &RetryInfo {
        match self {
            InboundMessage::Start(m) => &m.retry,
            InboundMessage::StageCompleted(m) => &m.retry,
        }
    }

    /// Serialized copy for the next delivery attempt.
    pub fn retried_payload(&self, now: DateTime<Utc>) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            InboundMessage::Start(m) => serde_json::to_vec(&m.retried(now)),
            InboundMessage::StageCompleted(m) => serde_json::to_vec(&m.retried(now)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_message_wire_fields() {
        let msg = StageMessage::new(VideoId::from("123"), "video123.mp4", 3);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["video_id"], "123");
        assert_eq!(value["filename"], "video123.mp4");
        assert_eq!(value["retry_count"], 0);
        assert_eq!(value["max_retries"], 3);
        assert!(value["last_retry"].is_null());
    }

    #[test]
    fn test_parse_start_message() {
        let payload = br#"{"video_id":"123","filename":"a.mp4","retry_count":1,"max_retries":3,"last_retry":null}"#;
        match InboundMessage::parse(payload).unwrap() {
            InboundMessage::Start(m) => {
                assert_eq!(m.video_id.as_str(), "123");
                assert_eq!(m.retry.retry_count, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_start_without_retry_fields() {
        let msg = InboundMessage::parse(br#"{"video_id":"123"}"#).unwrap();
        assert_eq!(msg.retry(), &RetryInfo::default());
    }

    #[test]
    fn test_parse_completion_by_bucket_path() {
        let payload = br#"{"video_id":"123","filename":"video123.mp4","bucket_path":"trim/video123.mp4","status":"COMPLETED"}"#;
        match InboundMessage::parse(payload).unwrap() {
            InboundMessage::StageCompleted(m) => assert_eq!(m.completed_stage(), Stage::Trim),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_legacy_bucket_name_containing_marker() {
        let payload = br#"{"video_id":"1","filename":"v.mp4","bucket_path":"videos-trim/v.mp4"}"#;
        match InboundMessage::parse(payload).unwrap() {
            InboundMessage::StageCompleted(m) => assert_eq!(m.completed_stage(), Stage::Trim),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_explicit_stage_wins_over_bucket_path() {
        let payload = br#"{"video_id":"1","filename":"a.mp4","bucket_path":"trim/a.mp4","stage":"watermark"}"#;
        match InboundMessage::parse(payload).unwrap() {
            InboundMessage::StageCompleted(m) => assert_eq!(m.completed_stage(), Stage::Watermark),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_bucket_path_is_final_stage() {
        let payload = br#"{"video_id":"1","filename":"x.mp4","bucket_path":"unknown/x.mp4"}"#;
        match InboundMessage::parse(payload).unwrap() {
            InboundMessage::StageCompleted(m) => assert_eq!(m.completed_stage(), Stage::IntroOutro),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payloads_are_permanent() {
        for payload in [&b"not json"[..], b"{\"video_id\":", b"[1,2,3]", b"{\"filename\":\"a\"}"] {
            let err = InboundMessage::parse(payload).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Permanent);
            assert!(err.to_string().starts_with("Invalid message format"));
        }
    }

    #[test]
    fn test_unknown_stage_tag_is_malformed() {
        let err = InboundMessage::parse(br#"{"video_id":"1","stage":"encode"}"#).unwrap_err();
        assert!(matches!(err, MessageError::Malformed(_)));
    }

    #[test]
    fn test_empty_video_id_is_rejected() {
        let err = InboundMessage::parse(br#"{"video_id":"","filename":"a.mp4"}"#).unwrap_err();
        assert!(matches!(err, MessageError::MissingVideoId));
    }

    #[test]
    fn test_retried_payload_increments() {
        let now = Utc::now();
        let msg = InboundMessage::Start(StageMessage::new(VideoId::from("9"), "a.mp4", 3));
        let bytes = msg.retried_payload(now).unwrap();
        let decoded: StageMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.retry.retry_count, 1);
        assert_eq!(decoded.retry.last_retry, Some(now));
    }
}
