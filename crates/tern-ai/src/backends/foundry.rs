//! Hosted agent service speaking the Responses-style conversation API

use std::collections::HashMap;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::AgentBackend;
use crate::{
    error::{Error, Result},
    stream::{FileSearchResult, UpstreamAnnotation, UpstreamEvent, UpstreamEventStream},
    types::{AgentMetadata, ConversationId, Usage, UserMessage},
};

/// How the backend authenticates against the agent service
#[derive(Debug, Clone)]
pub enum Credential {
    /// Sent as the `api-key` header
    ApiKey(String),
    /// Sent as `Authorization: Bearer <token>`
    Bearer(String),
}

/// Agent service client
pub struct FoundryBackend {
    client: reqwest::Client,
    endpoint: String,
    agent: String,
    credential: Credential,
    api_version: Option<String>,
}

impl FoundryBackend {
    /// Create a client for `agent` hosted under `endpoint`
    pub fn new(endpoint: impl Into<String>, agent: impl Into<String>, credential: Credential) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            agent: agent.into(),
            credential,
            api_version: None,
        }
    }

    /// Pin the `api-version` query parameter sent with every call
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Replace the HTTP client, e.g. to apply a connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(self)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.endpoint, path);
        let mut builder = self.client.request(method, url);
        builder = match &self.credential {
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
        };
        if let Some(ref version) = self.api_version {
            builder = builder.query(&[("api-version", version)]);
        }
        builder
    }

    fn build_response_request(
        &self,
        conversation: &ConversationId,
        message: &UserMessage,
    ) -> ResponseRequest {
        let mut content = vec![InputContent::InputText {
            text: message.text.clone(),
        }];
        content.extend(message.images.iter().map(|img| InputContent::InputImage {
            image_url: img.data_uri(),
        }));

        ResponseRequest {
            agent: AgentReference {
                name: self.agent.clone(),
                reference_type: "agent_reference".to_string(),
            },
            conversation: conversation.as_str().to_string(),
            input: vec![InputMessage {
                role: "user".to_string(),
                content,
            }],
            stream: true,
        }
    }
}

#[async_trait]
impl AgentBackend for FoundryBackend {
    async fn agent_metadata(&self) -> Result<AgentMetadata> {
        let path = format!("agents/{}", self.agent);
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        let response = check_status(response).await?;
        let agent: AgentResource = response.json().await?;
        Ok(agent.into_metadata())
    }

    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationId> {
        let mut metadata = HashMap::new();
        if let Some(title) = title {
            metadata.insert("title".to_string(), title.to_string());
        }

        let response = self
            .request(reqwest::Method::POST, "conversations")
            .json(&CreateConversationRequest { metadata })
            .send()
            .await?;
        let response = check_status(response).await?;
        let created: ConversationResource = response.json().await?;

        tracing::debug!(conversation = %created.id, "created upstream conversation");
        Ok(ConversationId::new(created.id))
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &UserMessage,
    ) -> Result<UpstreamEventStream> {
        let request = self.build_response_request(conversation, message);
        let request_builder = self
            .request(reqwest::Method::POST, "responses")
            .json(&request);

        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        // Wait for the connection to open so that connect and status failures
        // surface here rather than as in-stream events.
        match event_source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => {
                return Err(Error::UnexpectedResponse(format!(
                    "event before open: {}",
                    msg.event
                )));
            }
            Some(Err(e)) => {
                event_source.close();
                return Err(open_error(e).await);
            }
            None => return Err(Error::Sse("stream closed before opening".to_string())),
        }

        Ok(Box::pin(create_stream(event_source)))
    }
}

/// Map a failed HTTP response onto the error taxonomy
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after_secs(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, retry_after, body))
}

fn status_error(status: reqwest::StatusCode, retry_after: Option<u64>, body: String) -> Error {
    let message = error_message_from_body(&body).unwrap_or(body);
    match status.as_u16() {
        401 | 403 => Error::Auth(format!("{}: {}", status, message)),
        429 => Error::RateLimited { retry_after },
        500..=599 => Error::api("server_error", format!("{}: {}", status, message)),
        _ => Error::api(format!("http_{}", status.as_u16()), message),
    }
}

async fn open_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            status_error(status, retry_after, body)
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn error_message_from_body(body: &str) -> Option<String> {
    let parsed: ErrorEnvelope = serde_json::from_str(body).ok()?;
    parsed.error.message
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = UpstreamEvent> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let parsed: std::result::Result<StreamPayload, _> = serde_json::from_str(&msg.data);
                    let payload = match parsed {
                        Ok(payload) => payload,
                        Err(e) => {
                            yield UpstreamEvent::Error {
                                message: format!("Failed to parse upstream event: {}", e),
                            };
                            break;
                        }
                    };

                    match payload {
                        StreamPayload::OutputTextDelta { delta } => {
                            yield UpstreamEvent::TextDelta { delta };
                        }
                        StreamPayload::OutputItemDone { item } => {
                            if let Some(event) = item.into_event() {
                                yield event;
                            }
                        }
                        StreamPayload::Completed { response } => {
                            yield UpstreamEvent::Completed {
                                usage: response.usage.map(Into::into),
                            };
                            break;
                        }
                        StreamPayload::Failed { response } => {
                            let message = response
                                .error
                                .and_then(|e| e.message)
                                .unwrap_or_else(|| "agent run failed".to_string());
                            yield UpstreamEvent::Error { message };
                            break;
                        }
                        StreamPayload::Error { message, code } => {
                            let message = message
                                .or(code)
                                .unwrap_or_else(|| "upstream error".to_string());
                            yield UpstreamEvent::Error { message };
                            break;
                        }
                        StreamPayload::Other => {}
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    yield UpstreamEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    break;
                }
            }
        }

        event_source.close();
    }
}

// Request types

#[derive(Debug, Serialize)]
struct CreateConversationRequest {
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ResponseRequest {
    agent: AgentReference,
    conversation: String,
    input: Vec<InputMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AgentReference {
    name: String,
    #[serde(rename = "type")]
    reference_type: String,
}

#[derive(Debug, Serialize)]
struct InputMessage {
    role: String,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent {
    InputText { text: String },
    InputImage { image_url: String },
}

// Response types

#[derive(Debug, Deserialize)]
struct ConversationResource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AgentResource {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    definition: Option<AgentDefinition>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AgentDefinition {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
}

impl AgentResource {
    fn into_metadata(self) -> AgentMetadata {
        let (def_model, def_instructions) = match self.definition {
            Some(def) => (def.model, def.instructions),
            None => (None, None),
        };
        // Starter prompts are stored newline separated in agent metadata
        let starter_prompts = self
            .metadata
            .get("starterPrompts")
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        AgentMetadata {
            id: self.id.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            model: self.model.or(def_model).unwrap_or_default(),
            instructions: self.instructions.or(def_instructions),
            starter_prompts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

// Streaming payload types

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamPayload {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: OutputItem },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseBody },
    #[serde(rename = "response.failed")]
    Failed { response: ResponseBody },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    usage: Option<RawUsage>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<RawUsage> for Usage {
    fn from(raw: RawUsage) -> Self {
        Usage {
            input: raw.input_tokens,
            output: raw.output_tokens,
            total: raw
                .total_tokens
                .unwrap_or(raw.input_tokens.saturating_add(raw.output_tokens)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum OutputItem {
    #[serde(rename = "file_search_call")]
    FileSearchCall {
        #[serde(default)]
        results: Option<Vec<RawSearchResult>>,
    },
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

impl OutputItem {
    fn into_event(self) -> Option<UpstreamEvent> {
        match self {
            OutputItem::FileSearchCall { results } => {
                let results: Vec<FileSearchResult> = results
                    .unwrap_or_default()
                    .into_iter()
                    .map(|r| FileSearchResult {
                        file_id: r.file_id,
                        filename: r.filename,
                        text: r.text,
                    })
                    .collect();
                if results.is_empty() {
                    None
                } else {
                    Some(UpstreamEvent::FileSearchResults { results })
                }
            }
            OutputItem::Message { content } => {
                let annotations = content
                    .into_iter()
                    .flat_map(|part| match part {
                        ContentPart::OutputText { annotations } => annotations,
                        ContentPart::Other => Vec::new(),
                    })
                    .filter_map(RawAnnotation::into_upstream)
                    .collect();
                Some(UpstreamEvent::MessageCompleted { annotations })
            }
            OutputItem::Other => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResult {
    file_id: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "output_text")]
    OutputText {
        #[serde(default)]
        annotations: Vec<RawAnnotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawAnnotation {
    #[serde(rename = "url_citation")]
    UrlCitation {
        url: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(flatten)]
        range: RawRange,
    },
    #[serde(rename = "file_citation")]
    FileCitation {
        file_id: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(flatten)]
        range: RawRange,
    },
    #[serde(rename = "file_path")]
    FilePath {
        file_id: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(flatten)]
        range: RawRange,
    },
    #[serde(other)]
    Other,
}

/// Either `start_index`/`end_index` or a single insertion `index`
#[derive(Debug, Default, Deserialize)]
struct RawRange {
    #[serde(default)]
    start_index: Option<u32>,
    #[serde(default)]
    end_index: Option<u32>,
    #[serde(default)]
    index: Option<u32>,
}

impl RawRange {
    fn bounds(&self) -> (u32, u32) {
        let start = self.start_index.or(self.index).unwrap_or(0);
        let end = self.end_index.unwrap_or(start);
        (start, end)
    }
}

impl RawAnnotation {
    fn into_upstream(self) -> Option<UpstreamAnnotation> {
        match self {
            RawAnnotation::UrlCitation { url, title, range } => {
                let (start, end) = range.bounds();
                Some(UpstreamAnnotation::UrlCitation {
                    url,
                    title,
                    start,
                    end,
                })
            }
            RawAnnotation::FileCitation {
                file_id,
                filename,
                range,
            } => {
                let (start, end) = range.bounds();
                Some(UpstreamAnnotation::FileCitation {
                    file_id,
                    filename,
                    start,
                    end,
                })
            }
            RawAnnotation::FilePath {
                file_id,
                filename,
                range,
            } => {
                let (start, end) = range.bounds();
                Some(UpstreamAnnotation::FilePath {
                    file_id,
                    filename,
                    start,
                    end,
                })
            }
            RawAnnotation::Other => None,
        }
    }
}
