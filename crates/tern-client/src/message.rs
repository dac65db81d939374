//! Assistant message reconciliation
//!
//! One [`AssistantMessageState`] per send. Frames are folded into it in
//! arrival order; once the status is terminal further frames are ignored.

use std::collections::HashSet;

use tern_ai::{Annotation, AnnotationKey, ConversationId, StreamFrame, UsageReport};
use uuid::Uuid;

use crate::error::{Error, FailureAction};

/// Lifecycle of one assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Request sent, nothing received yet
    Pending,
    Streaming,
    Complete,
    Errored,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Complete | MessageStatus::Errored | MessageStatus::Cancelled
        )
    }
}

/// Snapshot of the assistant reply being streamed
#[derive(Debug, Clone)]
pub struct AssistantMessageState {
    pub id: Uuid,
    pub conversation_id: Option<ConversationId>,
    pub text: String,
    pub annotations: Vec<Annotation>,
    pub usage: Option<UsageReport>,
    pub status: MessageStatus,
    /// Set when the status is `Errored`
    pub error: Option<Error>,
    annotation_keys: HashSet<AnnotationKey>,
    last_delta: Option<String>,
    dedupe: bool,
}

impl AssistantMessageState {
    pub fn new(id: Uuid, conversation_id: Option<ConversationId>) -> Self {
        Self {
            id,
            conversation_id,
            text: String::new(),
            annotations: Vec::new(),
            usage: None,
            status: MessageStatus::Pending,
            error: None,
            annotation_keys: HashSet::new(),
            last_delta: None,
            dedupe: true,
        }
    }

    /// Toggle suppression of a text delta identical to the one just before it
    pub fn with_dedupe(mut self, enabled: bool) -> Self {
        self.dedupe = enabled;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the failure (if any) is worth retrying
    pub fn recoverable(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_retryable)
    }

    pub fn failure_action(&self) -> FailureAction {
        self.error
            .as_ref()
            .map_or(FailureAction::None, Error::action)
    }

    /// First byte arrived
    pub fn mark_streaming(&mut self) {
        if self.status == MessageStatus::Pending {
            self.status = MessageStatus::Streaming;
        }
    }

    /// Fold one frame into the state. Returns whether anything changed.
    pub fn apply(&mut self, frame: StreamFrame) -> bool {
        if self.is_terminal() {
            tracing::debug!(message = %self.id, "ignoring frame after terminal status");
            return false;
        }
        self.mark_streaming();

        let text = match frame {
            StreamFrame::TextDelta { text } => text,
            other => {
                self.last_delta = None;
                return self.apply_non_delta(other);
            }
        };

        if self.dedupe && self.last_delta.as_deref() == Some(text.as_str()) {
            tracing::debug!(message = %self.id, "dropping repeated chunk");
            return false;
        }
        self.text.push_str(&text);
        self.last_delta = Some(text);
        true
    }

    fn apply_non_delta(&mut self, frame: StreamFrame) -> bool {
        match frame {
            StreamFrame::ConversationCreated { handle } => {
                self.conversation_id = Some(handle);
                true
            }
            StreamFrame::Annotation(annotation) => {
                if self.annotation_keys.insert(annotation.identity_key()) {
                    self.annotations.push(annotation);
                    true
                } else {
                    false
                }
            }
            StreamFrame::UsageReport(usage) => {
                if self.usage.is_some() {
                    return false;
                }
                self.usage = Some(usage);
                true
            }
            StreamFrame::Done => {
                self.status = MessageStatus::Complete;
                true
            }
            StreamFrame::Error { message } => {
                self.status = MessageStatus::Errored;
                self.error = Some(Error::Upstream(message));
                true
            }
            StreamFrame::TextDelta { .. } => false,
        }
    }

    /// End the message with a failure unless it already ended
    pub fn fail(&mut self, error: Error) {
        if self.is_terminal() {
            return;
        }
        if error == Error::Cancelled {
            self.cancel();
            return;
        }
        self.status = MessageStatus::Errored;
        self.error = Some(error);
    }

    /// Mark cancelled unless it already ended. Returns whether it changed.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = MessageStatus::Cancelled;
        true
    }
}
