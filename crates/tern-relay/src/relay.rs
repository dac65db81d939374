//! The streaming relay
//!
//! A request goes through two phases. Setup (metadata, conversation
//! creation, opening the upstream run) happens before any byte is sent, so
//! its failures become structured HTTP errors. Once the upstream run is open
//! a producer task translates upstream events into [`StreamFrame`]s and
//! pushes them into a bounded channel drained by the SSE writer.
//!
//! A conversation created during setup is always reported to the client.
//! If the upstream run then fails to open, the stream carries
//! `ConversationCreated` followed by `Error`, so a resend reuses the handle.

use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::StreamExt;
use tern_ai::{
    AgentBackend, ConversationId, StreamFrame, UpstreamEvent, UpstreamEventStream, UsageReport,
};
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::citations::QuoteIndex;
use crate::error::{RelayError, Result};
use crate::metadata::MetadataCache;
use crate::validate::ValidatedRequest;

/// Default capacity of the per-request frame channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Translates one upstream run into wire frames.
///
/// Owns the request-scoped quote index and the request start time used for
/// the usage report.
pub struct FrameTranslator {
    quotes: QuoteIndex,
    started: Instant,
    usage_sent: bool,
}

impl FrameTranslator {
    pub fn new(started: Instant) -> Self {
        Self {
            quotes: QuoteIndex::new(),
            started,
            usage_sent: false,
        }
    }

    /// Frames for one upstream event, in emission order
    pub fn translate(&mut self, event: UpstreamEvent) -> Vec<StreamFrame> {
        match event {
            UpstreamEvent::TextDelta { delta } => {
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![StreamFrame::TextDelta { text: delta }]
                }
            }
            UpstreamEvent::FileSearchResults { results } => {
                self.quotes.record(&results);
                Vec::new()
            }
            UpstreamEvent::MessageCompleted { annotations } => annotations
                .into_iter()
                .map(|a| StreamFrame::Annotation(self.quotes.resolve(a)))
                .collect(),
            UpstreamEvent::Completed { usage } => match usage {
                Some(usage) if !self.usage_sent => {
                    self.usage_sent = true;
                    vec![StreamFrame::UsageReport(UsageReport {
                        prompt_tokens: usage.input,
                        completion_tokens: usage.output,
                        total_tokens: usage.total,
                        duration_ms: self.started.elapsed().as_millis() as u64,
                    })]
                }
                _ => Vec::new(),
            },
            UpstreamEvent::Error { message } => vec![StreamFrame::Error { message }],
        }
    }
}

/// Relay between clients and one upstream agent
pub struct Relay {
    backend: Arc<dyn AgentBackend>,
    metadata: MetadataCache,
    channel_capacity: usize,
}

impl Relay {
    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            metadata: MetadataCache::new(Arc::clone(&backend)),
            backend,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Set up the upstream run and start the producer.
    ///
    /// Returns the receiving end of the frame channel. Errors returned here
    /// happened before streaming and left no new conversation behind.
    pub async fn open(
        &self,
        request: ValidatedRequest,
        started: Instant,
    ) -> Result<mpsc::Receiver<StreamFrame>> {
        let agent = self
            .metadata
            .get_or_load()
            .await
            .map_err(RelayError::Metadata)?;

        let (conversation, created) = match request.thread_id.clone() {
            Some(existing) => (existing, false),
            None => {
                let title = request.title();
                let id = self.backend.create_conversation(Some(&title)).await?;
                (id, true)
            }
        };

        tracing::debug!(
            agent = %agent.name,
            conversation = %conversation,
            created,
            images = request.message.images.len(),
            "opening upstream run"
        );

        let upstream = match self
            .backend
            .send_message(&conversation, &request.message)
            .await
        {
            Ok(upstream) => upstream,
            Err(e) if created => {
                tracing::warn!(
                    conversation = %conversation,
                    "upstream run failed to open after creating conversation: {}",
                    e
                );
                return Ok(created_then_failed(conversation, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let lead = created.then(|| StreamFrame::ConversationCreated {
            handle: conversation.clone(),
        });
        tokio::spawn(produce(upstream, lead, FrameTranslator::new(started), tx));

        Ok(rx)
    }
}

/// A finished stream for a conversation whose first run never started
fn created_then_failed(
    handle: ConversationId,
    message: String,
) -> mpsc::Receiver<StreamFrame> {
    let (tx, rx) = mpsc::channel(2);
    // Fresh channel with room for both frames
    let _ = tx.try_send(StreamFrame::ConversationCreated { handle });
    let _ = tx.try_send(StreamFrame::error(message));
    rx
}

/// Producer loop: upstream events in, frames out, exactly one terminal frame.
async fn produce(
    mut upstream: UpstreamEventStream,
    lead: Option<StreamFrame>,
    mut translator: FrameTranslator,
    tx: mpsc::Sender<StreamFrame>,
) {
    if let Some(frame) = lead {
        if tx.send(frame).await.is_err() {
            tracing::debug!("client went away before the first frame");
            return;
        }
    }

    while let Some(event) = upstream.next().await {
        let failed = matches!(event, UpstreamEvent::Error { .. });
        let completed = matches!(event, UpstreamEvent::Completed { .. });

        for frame in translator.translate(event) {
            if tx.send(frame).await.is_err() {
                tracing::debug!("client disconnected, dropping upstream run");
                return;
            }
        }

        if failed {
            tracing::warn!("upstream run failed mid-stream");
            return;
        }
        if completed {
            break;
        }
    }

    if tx.send(StreamFrame::Done).await.is_err() {
        tracing::debug!("client disconnected before completion");
    }
}

/// Drain the frame channel, closing with an error frame if the producer
/// stopped without a terminal frame (e.g. it panicked).
pub fn frame_stream(mut rx: mpsc::Receiver<StreamFrame>) -> impl Stream<Item = StreamFrame> {
    stream! {
        let mut terminated = false;
        while let Some(frame) = rx.recv().await {
            terminated = frame.is_terminal();
            yield frame;
            if terminated {
                break;
            }
        }
        if !terminated {
            tracing::error!("relay producer stopped without a terminal frame");
            yield StreamFrame::error("stream terminated unexpectedly");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tern_ai::stream::{FileSearchResult, UpstreamAnnotation};
    use tern_ai::{
        AgentMetadata, Annotation, AnnotationKind, ChatRequest, ConversationId, Span, Usage,
        UserMessage,
    };

    use crate::validate::validate_request;

    /// Backend that replays a fixed upstream event script
    pub(crate) struct ScriptedBackend {
        pub events: Vec<UpstreamEvent>,
        pub fail_create: bool,
        pub fail_send: bool,
        pub created_titles: Mutex<Vec<String>>,
        pub sent: Mutex<Vec<(ConversationId, UserMessage)>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(events: Vec<UpstreamEvent>) -> Self {
            Self {
                events,
                fail_create: false,
                fail_send: false,
                created_titles: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentBackend for ScriptedBackend {
        async fn agent_metadata(&self) -> tern_ai::Result<AgentMetadata> {
            Ok(AgentMetadata {
                id: "asst_1".into(),
                name: "Helpdesk".into(),
                model: "gpt-4.1".into(),
                instructions: Some("Be brief.".into()),
                starter_prompts: vec!["What can you do?".into()],
            })
        }

        async fn create_conversation(&self, title: Option<&str>) -> tern_ai::Result<ConversationId> {
            if self.fail_create {
                return Err(tern_ai::Error::api("server_error", "conversation store down"));
            }
            self.created_titles
                .lock()
                .push(title.unwrap_or_default().to_string());
            Ok(ConversationId::new("conv_new"))
        }

        async fn send_message(
            &self,
            conversation: &ConversationId,
            message: &UserMessage,
        ) -> tern_ai::Result<UpstreamEventStream> {
            self.sent.lock().push((conversation.clone(), message.clone()));
            if self.fail_send {
                return Err(tern_ai::Error::api("server_error", "503 busy"));
            }
            let events = self.events.clone();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    async fn run(backend: ScriptedBackend, request: ChatRequest) -> (Vec<StreamFrame>, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let relay = Relay::new(backend.clone());
        let validated = validate_request(request).unwrap();
        let rx = relay.open(validated, Instant::now()).await.unwrap();
        let frames = frame_stream(rx).collect().await;
        (frames, backend)
    }

    fn happy_script() -> Vec<UpstreamEvent> {
        vec![
            UpstreamEvent::TextDelta { delta: "Hello ".into() },
            UpstreamEvent::TextDelta { delta: "".into() },
            UpstreamEvent::TextDelta { delta: "world".into() },
            UpstreamEvent::Completed {
                usage: Some(Usage { input: 10, output: 5, total: 15 }),
            },
        ]
    }

    fn assert_well_formed(frames: &[StreamFrame]) {
        let terminals = frames.iter().filter(|f| f.is_terminal()).count();
        assert_eq!(terminals, 1, "exactly one terminal frame: {:?}", frames);
        assert!(frames.last().unwrap().is_terminal());

        let created: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(f, StreamFrame::ConversationCreated { .. }))
            .map(|(i, _)| i)
            .collect();
        assert!(created.len() <= 1);
        if let Some(&i) = created.first() {
            assert_eq!(i, 0, "conversationCreated must come first");
        }
    }

    #[tokio::test]
    async fn test_new_conversation_frames() {
        let (frames, backend) = run(
            ScriptedBackend::new(happy_script()),
            ChatRequest::new("What is the leave policy?"),
        )
        .await;

        assert_well_formed(&frames);
        assert_eq!(
            frames[0],
            StreamFrame::ConversationCreated {
                handle: "conv_new".into()
            }
        );
        assert_eq!(frames[1], StreamFrame::text("Hello "));
        assert_eq!(frames[2], StreamFrame::text("world"));
        let StreamFrame::UsageReport(usage) = &frames[3] else {
            panic!("expected usage, got {:?}", frames[3]);
        };
        assert_eq!(
            (usage.prompt_tokens, usage.completion_tokens, usage.total_tokens),
            (10, 5, 15)
        );
        assert_eq!(frames[4], StreamFrame::Done);
        assert_eq!(frames.len(), 5);

        assert_eq!(
            backend.created_titles.lock().as_slice(),
            &["What is the leave policy?".to_string()]
        );
        assert_eq!(backend.sent.lock()[0].0.as_str(), "conv_new");
    }

    #[tokio::test]
    async fn test_existing_conversation_has_no_created_frame() {
        let (frames, backend) = run(
            ScriptedBackend::new(happy_script()),
            ChatRequest::new("and sick leave?").in_thread(Some("conv_old".into())),
        )
        .await;

        assert_well_formed(&frames);
        assert!(
            !frames
                .iter()
                .any(|f| matches!(f, StreamFrame::ConversationCreated { .. }))
        );
        assert!(backend.created_titles.lock().is_empty());
        assert_eq!(backend.sent.lock()[0].0.as_str(), "conv_old");
    }

    #[tokio::test]
    async fn test_long_message_title_truncated() {
        let message = "word ".repeat(30);
        let (_, backend) = run(ScriptedBackend::new(happy_script()), ChatRequest::new(message)).await;
        let titles = backend.created_titles.lock();
        assert!(titles[0].ends_with("..."));
        assert_eq!(titles[0].chars().count(), 53);
    }

    #[tokio::test]
    async fn test_upstream_error_ends_without_done() {
        let script = vec![
            UpstreamEvent::TextDelta { delta: "partial".into() },
            UpstreamEvent::Error {
                message: "rate limited".into(),
            },
            UpstreamEvent::TextDelta {
                delta: "never sent".into(),
            },
        ];
        let (frames, _) = run(
            ScriptedBackend::new(script),
            ChatRequest::new("hi").in_thread(Some("c".into())),
        )
        .await;

        assert_well_formed(&frames);
        assert_eq!(
            frames,
            vec![StreamFrame::text("partial"), StreamFrame::error("rate limited")]
        );
    }

    #[tokio::test]
    async fn test_stream_end_without_completion_still_done() {
        let script = vec![UpstreamEvent::TextDelta { delta: "ok".into() }];
        let (frames, _) = run(
            ScriptedBackend::new(script),
            ChatRequest::new("hi").in_thread(Some("c".into())),
        )
        .await;
        assert_eq!(frames, vec![StreamFrame::text("ok"), StreamFrame::Done]);
    }

    #[tokio::test]
    async fn test_citations_resolved_from_earlier_search_results() {
        let script = vec![
            UpstreamEvent::FileSearchResults {
                results: vec![FileSearchResult {
                    file_id: "file-1".into(),
                    filename: Some("handbook.pdf".into()),
                    text: Some("Vacation accrues monthly.".into()),
                }],
            },
            UpstreamEvent::TextDelta {
                delta: "You accrue leave monthly [1].".into(),
            },
            UpstreamEvent::MessageCompleted {
                annotations: vec![
                    UpstreamAnnotation::FileCitation {
                        file_id: "file-1".into(),
                        filename: None,
                        start: 26,
                        end: 29,
                    },
                    UpstreamAnnotation::UrlCitation {
                        url: "https://hr.example.com".into(),
                        title: None,
                        start: 0,
                        end: 3,
                    },
                ],
            },
            UpstreamEvent::Completed { usage: None },
        ];
        let (frames, _) = run(
            ScriptedBackend::new(script),
            ChatRequest::new("leave?").in_thread(Some("c".into())),
        )
        .await;

        assert_well_formed(&frames);
        assert_eq!(
            frames[1],
            StreamFrame::Annotation(Annotation {
                kind: AnnotationKind::FileCitation,
                label: "handbook.pdf".into(),
                locator: "file-1".into(),
                span: Span::new(26, 29),
                quote: Some("Vacation accrues monthly.".into()),
            })
        );
        assert!(matches!(
            &frames[2],
            StreamFrame::Annotation(a) if a.kind == AnnotationKind::UrlCitation
        ));
        // No usage reported upstream, so none relayed
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], StreamFrame::Done);
    }

    #[tokio::test]
    async fn test_events_after_completion_ignored() {
        let script = vec![
            UpstreamEvent::Completed { usage: None },
            UpstreamEvent::TextDelta { delta: "late".into() },
        ];
        let (frames, _) = run(
            ScriptedBackend::new(script),
            ChatRequest::new("hi").in_thread(Some("c".into())),
        )
        .await;
        assert_eq!(frames, vec![StreamFrame::Done]);
    }

    #[tokio::test]
    async fn test_create_failure_is_pre_stream_error() {
        let mut backend = ScriptedBackend::new(happy_script());
        backend.fail_create = true;
        let relay = Relay::new(Arc::new(backend));
        let validated = validate_request(ChatRequest::new("hi")).unwrap();

        let err = relay.open(validated, Instant::now()).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_send_failure_after_create_reports_handle() {
        let mut backend = ScriptedBackend::new(happy_script());
        backend.fail_send = true;
        let (frames, backend) = run(backend, ChatRequest::new("hi")).await;

        assert_well_formed(&frames);
        assert_eq!(
            frames[0],
            StreamFrame::ConversationCreated {
                handle: "conv_new".into()
            }
        );
        assert!(matches!(
            &frames[1],
            StreamFrame::Error { message } if message.contains("503 busy")
        ));
        assert_eq!(frames.len(), 2);
        assert_eq!(backend.created_titles.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_resend_after_failed_open_creates_no_new_conversation() {
        let mut backend = ScriptedBackend::new(happy_script());
        backend.fail_send = true;
        let backend = Arc::new(backend);
        let relay = Relay::new(backend.clone());

        let validated = validate_request(ChatRequest::new("hi")).unwrap();
        let rx = relay.open(validated, Instant::now()).await.unwrap();
        let frames: Vec<StreamFrame> = frame_stream(rx).collect().await;
        let StreamFrame::ConversationCreated { handle } = &frames[0] else {
            panic!("expected conversationCreated, got {:?}", frames[0]);
        };

        // The client resends against the reported handle
        for _ in 0..3 {
            let validated =
                validate_request(ChatRequest::new("hi").in_thread(Some(handle.clone()))).unwrap();
            let err = relay.open(validated, Instant::now()).await.unwrap_err();
            assert!(matches!(err, RelayError::Upstream(_)));
        }
        assert_eq!(backend.created_titles.lock().len(), 1);
        assert_eq!(backend.sent.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_metadata_loaded_once_across_requests() {
        let backend = Arc::new(ScriptedBackend::new(happy_script()));
        let relay = Relay::new(backend);
        assert!(relay.metadata().peek().is_none());

        for _ in 0..3 {
            let validated =
                validate_request(ChatRequest::new("hi").in_thread(Some("c".into()))).unwrap();
            let rx = relay.open(validated, Instant::now()).await.unwrap();
            let _: Vec<StreamFrame> = frame_stream(rx).collect().await;
        }
        assert_eq!(relay.metadata().peek().unwrap().name, "Helpdesk");
    }

    #[tokio::test]
    async fn test_frame_stream_synthesizes_error_when_producer_vanishes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamFrame::text("half")).await.unwrap();
        drop(tx);

        let frames: Vec<StreamFrame> = frame_stream(rx).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], StreamFrame::Error { .. }));
    }

    #[tokio::test]
    async fn test_usage_reported_once() {
        let mut translator = FrameTranslator::new(Instant::now());
        let usage = Some(Usage { input: 1, output: 1, total: 2 });
        assert_eq!(translator.translate(UpstreamEvent::Completed { usage }).len(), 1);
        assert!(translator.translate(UpstreamEvent::Completed { usage }).is_empty());
    }
}
