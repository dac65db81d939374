//! Core types shared between the relay, its consumers and the upstream backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque conversation identifier issued by the upstream agent service.
///
/// The relay never inspects it; consumers echo it back as `threadId` on every
/// follow-up request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An image attached to a user message, already validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// MIME type, e.g. `image/png`
    pub mime_type: String,
    /// Base64 payload exactly as received (not re-encoded)
    pub data: String,
}

impl ImageInput {
    /// Rebuild the data URI form expected by the upstream API
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A user turn submitted to the upstream agent
#[derive(Debug, Clone, Default)]
pub struct UserMessage {
    pub text: String,
    pub images: Vec<ImageInput>,
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageInput>) -> Self {
        self.images = images;
        self
    }
}

/// Agent definition resolved from the upstream service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    /// Upstream agent identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Model deployment backing the agent
    pub model: String,
    /// System instructions configured on the agent
    #[serde(default)]
    pub instructions: Option<String>,
    /// Suggested first messages for an empty conversation
    #[serde(default)]
    pub starter_prompts: Vec<String>,
}

/// Token usage reported by the upstream at run completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

/// Character range of the assistant text an annotation refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// What an annotation points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationKind {
    /// Web page; locator is the URL
    UrlCitation,
    /// Document from the agent's file search; locator is the upstream file id
    FileCitation,
    /// File generated during the run; locator is the upstream file id
    FilePath,
}

/// A citation attached to a span of assistant output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub kind: AnnotationKind,
    /// Display label (page title, file name, or the locator itself)
    pub label: String,
    /// URL or upstream file id
    pub locator: String,
    pub span: Span,
    /// Excerpt of the cited source, when the upstream returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// Identity used to collapse duplicate citations of the same source span
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationKey {
    pub kind: AnnotationKind,
    pub locator: String,
    pub span_start: u32,
}

impl Annotation {
    pub fn identity_key(&self) -> AnnotationKey {
        AnnotationKey {
            kind: self.kind,
            locator: self.locator.clone(),
            span_start: self.span.start,
        }
    }
}
