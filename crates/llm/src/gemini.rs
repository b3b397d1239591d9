use deepres_demux::{Fragment, RawCitation};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    DecodePayloadSnafu, EmptyPromptSnafu, HttpRequestSnafu, HttpStatusSnafu, LlmProvider,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderEvent, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamRequest, UpstreamSnafu, emit_error_event,
    make_event_stream,
};

pub const GEMINI_PROVIDER_ID: &str = "gemini";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Streams Gemini `streamGenerateContent` responses, including search grounding sources.
pub struct GeminiProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let http = reqwest::Client::builder()
            .build()
            .context(HttpRequestSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self { config, http })
    }

    fn stream_url(config: &ProviderConfig, model_id: &str) -> String {
        let endpoint = if config.endpoint.is_empty() {
            DEFAULT_GEMINI_ENDPOINT
        } else {
            config.endpoint.trim_end_matches('/')
        };
        format!("{endpoint}/models/{model_id}:streamGenerateContent?alt=sse")
    }

    async fn open_stream(
        http: &reqwest::Client,
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<reqwest::Response> {
        let url = Self::stream_url(config, &request.model_id);
        let body = GenerateContentRequest::from_stream_request(request);

        let response = http
            .post(&url)
            .header(API_KEY_HEADER, config.api_key.as_str())
            .json(&body)
            .send()
            .await
            .context(HttpRequestSnafu {
                stage: "send-generate-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return HttpStatusSnafu {
                stage: "generate-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    /// Forwards one SSE payload. Returns false when the stream should stop.
    fn forward_payload(event_tx: &mpsc::UnboundedSender<ProviderEvent>, payload: &str) -> bool {
        match parse_payload(payload) {
            Ok(fragment) => event_tx.send(ProviderEvent::Fragment(fragment)).is_ok(),
            Err(ProviderError::DecodePayload { source, .. }) => {
                tracing::warn!(
                    error = %source,
                    payload_len = payload.len(),
                    "skipping undecodable stream payload"
                );
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "provider stream reported an error payload");
                emit_error_event(event_tx, error);
                false
            }
        }
    }

    async fn run_stream_worker(
        http: reqwest::Client,
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<ProviderEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let response = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(
                    model_id = %request.model_id,
                    "gemini stream cancelled before open"
                );
                return;
            }
            opened = Self::open_stream(&http, &config, &request) => opened,
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                emit_error_event(&event_tx, error);
                return;
            }
        };

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    // Dropping the event stream aborts the HTTP transfer.
                    tracing::debug!(model_id = %request.model_id, "gemini stream cancelled");
                    return;
                }
                next_event = events.next() => {
                    match next_event {
                        Some(Ok(event)) => {
                            if !Self::forward_payload(&event_tx, &event.data) {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(error = %source, "gemini stream read failed");
                            emit_error_event(
                                &event_tx,
                                ProviderError::ReadStream {
                                    stage: "read-stream-event",
                                    source,
                                },
                            );
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = event_tx.send(ProviderEvent::Done);
    }
}

impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Google Gemini"
    }

    fn default_model(&self) -> &str {
        DEFAULT_GEMINI_MODEL
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "gemini-stream-chat"
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.http.clone(),
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<RequestContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    fn from_stream_request(request: &StreamRequest) -> Self {
        let system_instruction = request
            .system_instruction
            .as_deref()
            .filter(|instruction| !instruction.trim().is_empty())
            .map(|instruction| RequestContent::new(None, instruction));

        let tools = if request.search_grounding {
            vec![Tool {
                google_search: GoogleSearch {},
            }]
        } else {
            Vec::new()
        };

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        Self {
            contents: vec![RequestContent::new(Some("user"), &request.prompt)],
            system_instruction,
            tools,
            generation_config,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart>,
}

impl RequestContent {
    fn new(role: Option<&'static str>, text: &str) -> Self {
        Self {
            role,
            parts: vec![RequestPart {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<RawCitation>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Maps one streamed `GenerateContentResponse` JSON payload into a fragment.
///
/// Only the first candidate is read. Thought parts are not part of the visible text.
fn parse_payload(payload: &str) -> ProviderResult<Fragment> {
    let response: GenerateContentResponse =
        serde_json::from_str(payload).context(DecodePayloadSnafu {
            stage: "decode-generate-response",
        })?;

    if let Some(error) = response.error {
        return UpstreamSnafu {
            stage: "generate-response-error",
            message: error.message,
        }
        .fail();
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(Fragment::default());
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| part.thought != Some(true))
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let citations = candidate
        .grounding_metadata
        .map(|metadata| {
            metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(Fragment::text(text).with_citations(citations))
}
