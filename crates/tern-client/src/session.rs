//! Chat session
//!
//! A session runs at most one send at a time. Starting a send cancels the
//! previous one; the superseded send stops quietly and never publishes
//! again. Snapshots of the active reply are published on a watch channel.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tern_ai::{ChatRequest, ConversationId, StreamFrame};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decoder::FrameDecoder;
use crate::error::{Error, Result};
use crate::message::AssistantMessageState;
use crate::transport::{ByteStream, RelayTransport, RetryConfig, TokenProvider};

/// Session behavior knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub retry: RetryConfig,
    /// Drop a text chunk identical to the chunk right before it
    pub dedupe_consecutive_chunks: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            dedupe_consecutive_chunks: true,
        }
    }
}

struct ActiveSend {
    id: Uuid,
    cancel: CancellationToken,
}

/// State shared between the session and its drive tasks
struct Shared {
    active: Mutex<Option<ActiveSend>>,
    conversation: Mutex<Option<ConversationId>>,
    state_tx: watch::Sender<Option<AssistantMessageState>>,
}

impl Shared {
    /// Publish a snapshot if it belongs to the active send
    fn publish(&self, state: &AssistantMessageState) -> bool {
        let active = self.active.lock();
        if active.as_ref().map(|a| a.id) != Some(state.id) {
            return false;
        }
        self.state_tx.send_replace(Some(state.clone()));
        true
    }

    fn record_conversation(&self, id: Uuid, handle: ConversationId) {
        let active = self.active.lock();
        if active.as_ref().map(|a| a.id) == Some(id) {
            *self.conversation.lock() = Some(handle);
        }
    }
}

/// Handle to one in-flight send
pub struct SendHandle {
    id: Uuid,
    task: JoinHandle<AssistantMessageState>,
}

impl SendHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the send to finish and return its final state
    pub async fn wait(self) -> AssistantMessageState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(message = %self.id, "send task aborted: {}", e);
                let mut state = AssistantMessageState::new(self.id, None);
                state.cancel();
                state
            }
        }
    }
}

/// Client side of one chat conversation
pub struct ChatSession {
    transport: Arc<dyn RelayTransport>,
    tokens: Arc<dyn TokenProvider>,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn RelayTransport>, tokens: Arc<dyn TokenProvider>) -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            transport,
            tokens,
            config: SessionConfig::default(),
            shared: Arc::new(Shared {
                active: Mutex::new(None),
                conversation: Mutex::new(None),
                state_tx,
            }),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Continue an existing conversation
    pub fn resume(self, conversation: ConversationId) -> Self {
        *self.shared.conversation.lock() = Some(conversation);
        self
    }

    /// Observe snapshots of the active reply
    pub fn subscribe(&self) -> watch::Receiver<Option<AssistantMessageState>> {
        self.shared.state_tx.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Option<AssistantMessageState> {
        self.shared.state_tx.borrow().clone()
    }

    /// Conversation subsequent sends continue
    pub fn conversation(&self) -> Option<ConversationId> {
        self.shared.conversation.lock().clone()
    }

    /// Forget the conversation; the next send starts a new one
    pub fn reset(&self) {
        self.cancel();
        *self.shared.conversation.lock() = None;
    }

    /// Send a message, cancelling any send still in flight.
    ///
    /// An empty message is rejected locally without contacting the relay.
    pub fn send(&self, message: impl Into<String>, image_data_uris: Vec<String>) -> Result<SendHandle> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(Error::InvalidArgument {
                message: "message must not be empty".to_string(),
                details: Vec::new(),
            });
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let conversation = self.conversation();
        let state = AssistantMessageState::new(id, conversation.clone())
            .with_dedupe(self.config.dedupe_consecutive_chunks);

        {
            let mut active = self.shared.active.lock();
            if let Some(previous) = active.take() {
                tracing::debug!(message = %previous.id, "superseding in-flight send");
                previous.cancel.cancel();
            }
            *active = Some(ActiveSend {
                id,
                cancel: cancel.clone(),
            });
            self.shared.state_tx.send_replace(Some(state.clone()));
        }

        let request = ChatRequest::new(message)
            .in_thread(conversation)
            .with_images(image_data_uris);
        let drive = Drive {
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            retry: self.config.retry.clone(),
            shared: Arc::clone(&self.shared),
            cancel,
        };
        let task = tokio::spawn(drive.run(request, state));

        Ok(SendHandle { id, task })
    }

    /// Cancel the active send, publishing it as cancelled
    pub fn cancel(&self) {
        let mut active = self.shared.active.lock();
        let Some(current) = active.take() else {
            return;
        };
        current.cancel.cancel();
        self.shared.state_tx.send_if_modified(|snapshot| match snapshot {
            Some(state) if state.id == current.id => state.cancel(),
            _ => false,
        });
        tracing::debug!(message = %current.id, "send cancelled");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(current) = self.shared.active.lock().take() {
            current.cancel.cancel();
        }
    }
}

/// Everything one send task needs
struct Drive {
    transport: Arc<dyn RelayTransport>,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Drive {
    async fn run(self, request: ChatRequest, mut state: AssistantMessageState) -> AssistantMessageState {
        match self.stream(&request, &mut state).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                state.cancel();
                return state;
            }
            Err(e) => {
                tracing::debug!(message = %state.id, "send failed: {}", e);
                state.fail(e);
            }
        }
        self.shared.publish(&state);
        state
    }

    /// Open the stream with retries, then fold frames until a terminal one
    async fn stream(&self, request: &ChatRequest, state: &mut AssistantMessageState) -> Result<()> {
        let Some(token) = self.tokens.token().await else {
            return Err(Error::AuthFailure("no access token available".to_string()));
        };

        let mut body = self.open_with_retry(request, &token).await?;
        let mut decoder = FrameDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    state.mark_streaming();
                    for frame in decoder.feed(&chunk)? {
                        self.apply(state, frame);
                    }
                    self.shared.publish(state);
                    if state.is_terminal() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if let Some(frame) = decoder.finish() {
                        self.apply(state, frame);
                    }
                    if !state.is_terminal() {
                        return Err(Error::Transport(
                            "stream ended before completion".to_string(),
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }

    fn apply(&self, state: &mut AssistantMessageState, frame: StreamFrame) {
        if let StreamFrame::ConversationCreated { handle } = &frame {
            self.shared.record_conversation(state.id, handle.clone());
        }
        state.apply(frame);
    }

    async fn open_with_retry(&self, request: &ChatRequest, token: &str) -> Result<ByteStream> {
        let mut attempt = 0u32;
        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                opened = self.transport.open(request, token) => opened,
            };

            match opened {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
