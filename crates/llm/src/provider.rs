use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use deepres_demux::Fragment;
use futures::Stream;
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

/// Research protocol the model is instructed to follow, including the artifact markers.
pub const SYSTEM_INSTRUCTION: &str = r#"
You are DeepRes, an advanced research assistant designed to create comprehensive, deep-dive reports.

PROTOCOL:
1.  **Analyze**: When a user asks a question, immediately analyze if it requires a simple answer or a deep research report.
2.  **Search**: Use the Google Search tool to gather in-depth, recent, and factual information.
3.  **Structure**:
    *   Begin your response with a brief, conversational summary or acknowledgement in the chat.
    *   If the query warrants a report (most will), use the separator `:::artifact_start` to begin the document mode.
    *   Inside the artifact, start with a Markdown title (H1).
    *   Write a structured, professional Markdown report (Introduction, Key Findings, Analysis, Conclusion).
    *   End the artifact with `:::artifact_end`.

EXAMPLE OUTPUT:
Sure, I can research the history of quantum computing for you. Here is a deep dive report.

:::artifact_start
# The Evolution of Quantum Computing

## Introduction
Quantum computing represents a paradigm shift...
...
:::artifact_end

Hope this helps!
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    /// Base URL override; empty means the provider's own default.
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub model_id: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub search_grounding: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl StreamRequest {
    /// Creates a research request using the default protocol instruction and search grounding.
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
            search_grounding: true,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction;
        self
    }

    pub fn with_search_grounding(mut self, enabled: bool) -> Self {
        self.search_grounding = enabled;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Event produced by a provider worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Fragment(Fragment),
    Done,
    Error(String),
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request on `{stage}` has an empty prompt"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to read event stream on `{stage}`, {source}"))]
    ReadStream {
        stage: &'static str,
        source: eventsource_stream::EventStreamError<reqwest::Error>,
    },
    #[snafu(display("provider returned status {status}: {body}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode stream payload on `{stage}`, {source}"))]
    DecodePayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("provider reported an error: {message}"))]
    Upstream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Terminal failure surfaced by a [`ProviderEventStream`].
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("provider stream failed: {message}"))]
pub struct StreamFailure {
    pub message: String,
}

/// Receiving half of a provider stream.
///
/// Yields fragments until the worker reports completion or one failure. Dropping it
/// signals the worker to stop producing.
pub struct ProviderEventStream {
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
    finished: bool,
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<ProviderEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
            finished: false,
        }
    }

    /// Asks the worker to stop. The stream then ends without reporting a failure.
    pub fn cancel(&mut self) -> bool {
        self.finished = true;
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Stream for ProviderEventStream {
    type Item = Result<Fragment, StreamFailure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(ProviderEvent::Fragment(fragment))) => Poll::Ready(Some(Ok(fragment))),
            Poll::Ready(Some(ProviderEvent::Done)) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(ProviderEvent::Error(message))) => {
                this.finished = true;
                Poll::Ready(Some(Err(StreamFailure { message })))
            }
            Poll::Ready(None) => {
                // Worker went away without a terminal event.
                this.finished = true;
                Poll::Ready(Some(Err(StreamFailure {
                    message: "stream closed before completion".to_string(),
                })))
            }
        }
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

/// Creates the channel pair a provider worker uses to feed a [`ProviderEventStream`].
///
/// The receiver resolves once the stream is cancelled or dropped.
pub fn make_event_stream() -> (
    mpsc::UnboundedSender<ProviderEvent>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}

pub(crate) fn emit_error_event(
    event_tx: &mpsc::UnboundedSender<ProviderEvent>,
    error: ProviderError,
) {
    let _ = event_tx.send(ProviderEvent::Error(error.to_string()));
}
