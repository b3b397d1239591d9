use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use deepres_demux::{Demultiplexer, Mode, TurnRejection, TurnResult, artifact_opened, drive_turn};
use deepres_llm::{LlmProvider, ProviderError, StreamRequest};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("provider failed on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("turn rejected on `{stage}`: {rejection:?}"))]
    TurnRejected {
        stage: &'static str,
        rejection: TurnRejection,
    },
    #[snafu(display("failed to write artifact to {path:?} on `{stage}`: {source}"))]
    WriteArtifact {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize snapshot on `{stage}`: {source}"))]
    SerializeSnapshot {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Receives every snapshot of a turn, in order.
pub trait SnapshotSink {
    fn on_snapshot(&mut self, snapshot: &TurnResult);
}

/// Opens a provider stream for `request` and drives one turn through the demultiplexer.
///
/// A cancelled turn (ctrl-c) ends with the last snapshot, marked as no longer streaming.
pub async fn run_turn(
    provider: &dyn LlmProvider,
    request: StreamRequest,
    sink: &mut dyn SnapshotSink,
) -> SessionResult<TurnResult> {
    tracing::info!(
        provider_id = %provider.id(),
        model_id = %request.model_id,
        search_grounding = request.search_grounding,
        "starting research turn"
    );

    let handle = provider.stream_chat(request).context(ProviderSnafu {
        stage: "open-provider-stream",
    })?;
    let worker = tokio::spawn(handle.worker);

    let mut demux = Demultiplexer::new();
    let mut last = TurnResult::loading();
    sink.on_snapshot(&last);

    let outcome = {
        let turn = drive_turn(&mut demux, handle.stream, |snapshot| {
            last = snapshot.clone();
            sink.on_snapshot(snapshot);
        });
        tokio::select! {
            result = turn => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };

    let result = match outcome {
        Some(result) => result.map_err(|rejection| SessionError::TurnRejected {
            stage: "drive-turn",
            rejection,
        })?,
        None => {
            // The dropped stream has already told the worker to stop.
            tracing::warn!("turn cancelled by user");
            last.is_loading = false;
            last.is_streaming = false;
            sink.on_snapshot(&last);
            last
        }
    };

    if let Err(error) = worker.await {
        tracing::warn!(error = %error, "provider worker did not shut down cleanly");
    }

    Ok(result)
}

/// Terminal presentation of snapshots: JSON lines, or a rendered report at the end.
pub struct TerminalSink {
    json: bool,
    previous: TurnResult,
    failure: Option<SessionError>,
}

impl TerminalSink {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            previous: TurnResult::loading(),
            failure: None,
        }
    }

    /// Returns the first output error hit while emitting snapshots.
    pub fn take_failure(&mut self) -> Option<SessionError> {
        self.failure.take()
    }

    fn emit_json(snapshot: &TurnResult) -> SessionResult<()> {
        let line = serde_json::to_string(snapshot).context(SerializeSnapshotSnafu {
            stage: "serialize-snapshot-line",
        })?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").context(WriteOutputSnafu {
            stage: "write-snapshot-line",
        })?;
        stdout.flush().context(WriteOutputSnafu {
            stage: "flush-snapshot-line",
        })
    }
}

impl SnapshotSink for TerminalSink {
    fn on_snapshot(&mut self, snapshot: &TurnResult) {
        if artifact_opened(&self.previous, snapshot) {
            tracing::info!(title = %snapshot.artifact_title, "artifact opened");
        }

        if self.json
            && self.failure.is_none()
            && let Err(error) = Self::emit_json(snapshot)
        {
            self.failure = Some(error);
        }

        self.previous = snapshot.clone();
    }
}

/// Renders the final turn for a terminal: chat text, artifact, then numbered sources.
///
/// With `artifact_path` set, the artifact is written there instead of inlined.
pub fn format_report(result: &TurnResult, artifact_path: Option<&Path>) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "{}", result.chat_text);

    if result.mode == Mode::Artifact {
        match artifact_path {
            Some(path) => {
                let _ = writeln!(
                    report,
                    "\n[artifact] {} -> {}",
                    result.artifact_title,
                    path.display()
                );
            }
            None => {
                let _ = writeln!(report, "\n===== {} =====", result.artifact_title);
                let _ = writeln!(report, "{}", result.artifact_body.trim());
            }
        }
    }

    if !result.citations.is_empty() {
        let _ = writeln!(report, "\nSources:");
        for (index, citation) in result.citations.iter().enumerate() {
            let _ = writeln!(report, "[{}] {} <{}>", index + 1, citation.title, citation.uri);
        }
    }

    report
}

pub fn write_artifact(result: &TurnResult, path: &Path) -> SessionResult<()> {
    std::fs::write(path, result.artifact_body.trim_start()).context(WriteArtifactSnafu {
        stage: "write-artifact-file",
        path: path.to_path_buf(),
    })
}
