//! Upstream streaming event types

use std::pin::Pin;
use tokio_stream::Stream;

use crate::types::Usage;

/// Events emitted by an upstream agent run, in upstream order
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Assistant text delta
    TextDelta { delta: String },
    /// Results of a file-search tool call. These may arrive before the
    /// message item whose citations reference them.
    FileSearchResults { results: Vec<FileSearchResult> },
    /// An assistant message item finished; carries its citations
    MessageCompleted { annotations: Vec<UpstreamAnnotation> },
    /// Run finished successfully
    Completed { usage: Option<Usage> },
    /// Run failed
    Error { message: String },
}

/// A single file-search hit
#[derive(Debug, Clone, PartialEq)]
pub struct FileSearchResult {
    pub file_id: String,
    pub filename: Option<String>,
    /// Retrieved chunk text
    pub text: Option<String>,
}

/// Citation metadata as the upstream reports it
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamAnnotation {
    UrlCitation {
        url: String,
        title: Option<String>,
        start: u32,
        end: u32,
    },
    FileCitation {
        file_id: String,
        filename: Option<String>,
        start: u32,
        end: u32,
    },
    FilePath {
        file_id: String,
        filename: Option<String>,
        start: u32,
        end: u32,
    },
}

impl UpstreamEvent {
    /// Check if this is a terminal event (Completed or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpstreamEvent::Completed { .. } | UpstreamEvent::Error { .. }
        )
    }
}

/// A stream of upstream events
pub type UpstreamEventStream = Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>>;
