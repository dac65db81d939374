//! Request validation
//!
//! Everything here runs before the relay touches the upstream service. A
//! request is accepted whole or rejected whole: one bad image fails the
//! request and every offending image is reported.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use tern_ai::{ChatRequest, ConversationId, ErrorDetail, ImageInput, UserMessage};
use thiserror::Error;

/// Maximum number of images attached to one message
pub const MAX_IMAGES: usize = 5;

/// Maximum decoded size of a single image
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Image MIME types the upstream accepts
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Longest conversation title derived from a first message, in characters
pub const MAX_TITLE_CHARS: usize = 50;

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:([A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+);base64,(.*)$").expect("valid regex")
});

/// Why a single image was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRejection {
    #[error("not a base64 data URI")]
    Malformed,

    #[error("unsupported image type '{0}'")]
    UnsupportedType(String),

    #[error("payload is not valid base64")]
    InvalidBase64,

    #[error("image is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

/// A rejected image and its position in the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIssue {
    pub index: usize,
    pub rejection: ImageRejection,
}

/// Why a request was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("too many images: {count} (max {max})")]
    TooManyImages { count: usize, max: usize },

    #[error("{} image(s) rejected", .0.len())]
    Images(Vec<ImageIssue>),
}

impl ValidationError {
    /// Per-item reasons for the structured error body
    pub fn details(&self) -> Vec<ErrorDetail> {
        match self {
            ValidationError::Images(issues) => issues
                .iter()
                .map(|issue| ErrorDetail {
                    index: Some(issue.index),
                    reason: issue.rejection.to_string(),
                })
                .collect(),
            other => vec![ErrorDetail {
                index: None,
                reason: other.to_string(),
            }],
        }
    }
}

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub message: UserMessage,
    pub thread_id: Option<ConversationId>,
}

impl ValidatedRequest {
    /// Title seeded into a newly created conversation
    pub fn title(&self) -> String {
        conversation_title(&self.message.text)
    }
}

/// Validate a chat request without any upstream call
pub fn validate_request(request: ChatRequest) -> Result<ValidatedRequest, ValidationError> {
    let text = request.message.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    let uris = request.image_data_uris.unwrap_or_default();
    if uris.len() > MAX_IMAGES {
        return Err(ValidationError::TooManyImages {
            count: uris.len(),
            max: MAX_IMAGES,
        });
    }

    let mut images = Vec::with_capacity(uris.len());
    let mut issues = Vec::new();
    for (index, uri) in uris.iter().enumerate() {
        match parse_image(uri) {
            Ok(image) => images.push(image),
            Err(rejection) => issues.push(ImageIssue { index, rejection }),
        }
    }
    if !issues.is_empty() {
        return Err(ValidationError::Images(issues));
    }

    // Blank thread ids are treated as absent
    let thread_id = request
        .thread_id
        .filter(|id| !id.as_str().trim().is_empty());

    Ok(ValidatedRequest {
        message: UserMessage::text(text).with_images(images),
        thread_id,
    })
}

/// Parse and check one `data:<mime>;base64,<payload>` URI
pub fn parse_image(uri: &str) -> Result<ImageInput, ImageRejection> {
    let captures = DATA_URI.captures(uri.trim()).ok_or(ImageRejection::Malformed)?;
    let mime_type = captures[1].to_ascii_lowercase();
    let payload = &captures[2];

    if !ALLOWED_IMAGE_TYPES.contains(&mime_type.as_str()) {
        return Err(ImageRejection::UnsupportedType(mime_type));
    }

    // Reject obviously oversized payloads before decoding them
    let estimated = payload.len() / 4 * 3;
    if estimated > MAX_IMAGE_BYTES + 3 {
        return Err(ImageRejection::TooLarge {
            size: estimated,
            limit: MAX_IMAGE_BYTES,
        });
    }

    let decoded = STANDARD
        .decode(payload)
        .map_err(|_| ImageRejection::InvalidBase64)?;
    if decoded.len() > MAX_IMAGE_BYTES {
        return Err(ImageRejection::TooLarge {
            size: decoded.len(),
            limit: MAX_IMAGE_BYTES,
        });
    }

    Ok(ImageInput {
        mime_type,
        data: payload.to_string(),
    })
}

/// Derive a conversation title from the first message
pub fn conversation_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        return trimmed.to_string();
    }
    let prefix: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    format!("{}...", prefix)
}
