//! Relay-to-consumer wire protocol
//!
//! Every frame travels as a single SSE `data:` line carrying a JSON object
//! whose `type` field names the variant. A stream holds at most one
//! `conversationCreated` frame (always first) and ends with exactly one
//! terminal frame, `done` or `error`.

use serde::{Deserialize, Serialize};

use crate::types::{Annotation, ConversationId};

/// One normalized unit of the relay output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamFrame {
    /// A new upstream conversation was created for this request
    #[serde(rename = "conversationCreated")]
    ConversationCreated {
        #[serde(rename = "conversationId")]
        handle: ConversationId,
    },
    /// Incremental assistant text
    #[serde(rename = "chunk")]
    TextDelta {
        #[serde(rename = "content")]
        text: String,
    },
    /// Citation attached to the assistant text
    #[serde(rename = "annotation")]
    Annotation(Annotation),
    /// Token usage and wall time for the run
    #[serde(rename = "usage")]
    UsageReport(UsageReport),
    /// Normal completion
    #[serde(rename = "done")]
    Done,
    /// Failure after streaming began
    #[serde(rename = "error")]
    Error { message: String },
}

/// Usage metrics sent once per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Milliseconds between request acceptance and run completion
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl StreamFrame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check if this is a terminal frame (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done | StreamFrame::Error { .. })
    }

    /// Serialize the JSON payload carried on the `data:` line
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Encode as a complete SSE event: `data: <json>\n\n`
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Existing conversation handle; absent on the first message
    #[serde(default)]
    pub thread_id: Option<ConversationId>,
    /// `data:<mime>;base64,<payload>` URIs
    #[serde(default)]
    pub image_data_uris: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_thread(mut self, thread_id: Option<ConversationId>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.image_data_uris = if images.is_empty() { None } else { Some(images) };
        self
    }
}

/// Structured (non-SSE) error body returned before streaming starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
}

/// Per-item reason attached to an invalid-argument response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Index of the offending image in `imageDataUris`, if item specific
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub reason: String,
}
