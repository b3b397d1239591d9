use serde::Serialize;

use crate::citation::{Citation, CitationSet, RawCitation};
use crate::markers::{Split, split};
use crate::title::extract_title;

/// Chat text shown in place of the response when the stream fails.
pub const STREAM_FAILURE_MESSAGE: &str = "Sorry, an error occurred during research.";

/// One incremental delivery from a stream source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fragment {
    pub text: String,
    pub citations: Vec<RawCitation>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<RawCitation>) -> Self {
        self.citations = citations;
        self
    }
}

/// Which surface the response is currently feeding.
///
/// `Chat -> Artifact` is one-way within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    Artifact,
}

/// Terminal outcome reported by the caller when the fragment stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnOutcome {
    Success,
    Failure,
}

/// Full, internally consistent snapshot emitted after every fragment and at turn end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub chat_text: String,
    pub mode: Mode,
    pub artifact_body: String,
    pub artifact_title: String,
    pub citations: Vec<Citation>,
    pub is_loading: bool,
    pub is_streaming: bool,
}

impl TurnResult {
    /// Snapshot a host shows between the start of a turn and its first fragment.
    pub fn loading() -> Self {
        Self {
            chat_text: String::new(),
            mode: Mode::Chat,
            artifact_body: String::new(),
            artifact_title: extract_title(""),
            citations: Vec::new(),
            is_loading: true,
            is_streaming: true,
        }
    }
}

/// Returns true when `next` is the first snapshot of the turn in artifact mode.
///
/// Hosts use this to open the artifact view exactly once per turn.
pub fn artifact_opened(previous: &TurnResult, next: &TurnResult) -> bool {
    previous.mode == Mode::Chat && next.mode == Mode::Artifact
}

/// Owned state of one turn: the append-only response buffer and accumulated citations.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    buffer: String,
    citations: CitationSet,
    fragments: usize,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `fragment` and returns the recomputed snapshot.
    pub fn apply(&mut self, fragment: &Fragment) -> TurnResult {
        self.buffer.push_str(&fragment.text);
        let added = self.citations.merge(&fragment.citations);
        self.fragments += 1;

        tracing::trace!(
            fragment_len = fragment.text.len(),
            buffer_len = self.buffer.len(),
            citations_added = added,
            "applied response fragment"
        );

        self.snapshot()
    }

    /// Recomputes the snapshot from the buffer and citation set without mutating them.
    pub fn snapshot(&self) -> TurnResult {
        let split = split(&self.buffer);
        let mode = match split {
            Split::Chat { .. } => Mode::Chat,
            Split::Artifact { .. } => Mode::Artifact,
        };
        let artifact_body = split.body();

        TurnResult {
            chat_text: split.chat().trim().to_string(),
            mode,
            artifact_body: artifact_body.to_string(),
            artifact_title: extract_title(artifact_body),
            citations: self.citations.as_slice().to_vec(),
            is_loading: self.fragments == 0,
            is_streaming: true,
        }
    }

    /// Produces the terminal snapshot for `outcome`.
    ///
    /// A failure replaces the chat text only; artifact state stays as last computed.
    pub fn finish(&self, outcome: TurnOutcome) -> TurnResult {
        let mut result = self.snapshot();
        result.is_loading = false;
        result.is_streaming = false;
        if outcome == TurnOutcome::Failure {
            result.chat_text = STREAM_FAILURE_MESSAGE.to_string();
        }
        result
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }
}

/// Monotonic identifier of one turn on a [`Demultiplexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

/// Handle returned by [`Demultiplexer::begin_turn`], threading the turn identity
/// through later calls.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TurnHandle {
    id: TurnId,
}

impl TurnHandle {
    pub fn id(&self) -> TurnId {
        self.id
    }
}

/// Rejection reason for lifecycle calls that are not defined in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRejection {
    AlreadyActive { active: TurnId },
    NoActiveTurn,
    TurnMismatch { active: TurnId, attempted: TurnId },
}

/// Caller-owned demultiplexer with an explicit begin/end turn lifecycle.
///
/// At most one turn is active; its state is dropped when the turn ends.
#[derive(Debug, Default)]
pub struct Demultiplexer {
    next_id: u64,
    active: Option<(TurnId, TurnState)>,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a turn with an empty buffer and citation set.
    pub fn begin_turn(&mut self) -> Result<TurnHandle, TurnRejection> {
        if let Some((active, _)) = &self.active {
            return Err(TurnRejection::AlreadyActive { active: *active });
        }

        self.next_id += 1;
        let id = TurnId(self.next_id);
        self.active = Some((id, TurnState::new()));
        tracing::debug!(turn_id = id.0, "turn started");
        Ok(TurnHandle { id })
    }

    pub fn on_fragment(
        &mut self,
        handle: &TurnHandle,
        fragment: Fragment,
    ) -> Result<TurnResult, TurnRejection> {
        let state = self.active_state(handle)?;
        Ok(state.apply(&fragment))
    }

    /// Ends the active turn and returns its terminal snapshot.
    pub fn end_turn(
        &mut self,
        handle: &TurnHandle,
        outcome: TurnOutcome,
    ) -> Result<TurnResult, TurnRejection> {
        let result = self.active_state(handle)?.finish(outcome);
        self.active = None;
        tracing::debug!(turn_id = handle.id.0, ?outcome, mode = ?result.mode, "turn ended");
        Ok(result)
    }

    /// Discards the active turn without producing a terminal snapshot.
    ///
    /// The caller keeps whatever snapshot it last received.
    pub fn cancel_turn(&mut self, handle: &TurnHandle) -> Result<(), TurnRejection> {
        let state = self.active_state(handle)?;
        tracing::debug!(
            turn_id = handle.id.0,
            fragments = state.fragment_count(),
            "turn cancelled"
        );
        self.active = None;
        Ok(())
    }

    /// Returns the current snapshot of the active turn.
    pub fn current(&self, handle: &TurnHandle) -> Result<TurnResult, TurnRejection> {
        match &self.active {
            Some((active, state)) if *active == handle.id => Ok(state.snapshot()),
            Some((active, _)) => Err(TurnRejection::TurnMismatch {
                active: *active,
                attempted: handle.id,
            }),
            None => Err(TurnRejection::NoActiveTurn),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn active_state(&mut self, handle: &TurnHandle) -> Result<&mut TurnState, TurnRejection> {
        match &mut self.active {
            Some((active, state)) if *active == handle.id => Ok(state),
            Some((active, _)) => Err(TurnRejection::TurnMismatch {
                active: *active,
                attempted: handle.id,
            }),
            None => Err(TurnRejection::NoActiveTurn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::DEFAULT_ARTIFACT_TITLE;

    fn feed(state: &mut TurnState, fragments: &[&str]) -> Vec<TurnResult> {
        fragments
            .iter()
            .map(|text| state.apply(&Fragment::text(*text)))
            .collect()
    }

    #[test]
    fn plain_chat_turn_trims_and_completes() {
        let mut demux = Demultiplexer::new();
        let turn = demux.begin_turn().expect("first turn should start");

        let snapshot = demux
            .on_fragment(&turn, Fragment::text("Sure, here is info. "))
            .expect("fragment should apply");
        assert!(!snapshot.is_loading);
        assert!(snapshot.is_streaming);

        let last = demux
            .end_turn(&turn, TurnOutcome::Success)
            .expect("turn should end");
        assert_eq!(last.chat_text, "Sure, here is info.");
        assert_eq!(last.mode, Mode::Chat);
        assert_eq!(last.artifact_body, "");
        assert!(!last.is_streaming);
        assert!(!demux.is_active());
    }

    #[test]
    fn artifact_opens_with_title_and_body() {
        let mut state = TurnState::new();
        let snapshots = feed(
            &mut state,
            &["Intro text ", ":::artifact_start\n# Report Title\nBody line one."],
        );

        assert_eq!(snapshots[0].mode, Mode::Chat);
        let last = &snapshots[1];
        assert_eq!(last.chat_text, "Intro text");
        assert_eq!(last.mode, Mode::Artifact);
        assert_eq!(last.artifact_title, "Report Title");
        assert_eq!(last.artifact_body, "\n# Report Title\nBody line one.");
        assert!(artifact_opened(&snapshots[0], last));
    }

    #[test]
    fn body_freezes_after_end_marker() {
        let mut state = TurnState::new();
        let snapshots = feed(
            &mut state,
            &[
                ":::artifact_start# T\nBody",
                " more body :::artifact_end",
                " trailing chat",
            ],
        );

        assert_eq!(snapshots[1].artifact_body, "# T\nBody more body ");
        assert_eq!(snapshots[2].artifact_body, "# T\nBody more body ");
        assert_eq!(snapshots[2].artifact_title, "T");
        assert_eq!(snapshots[2].chat_text, "");
        assert_eq!(snapshots[2].mode, Mode::Artifact);
    }

    #[test]
    fn reversed_markers_keep_the_artifact_open() {
        let mut state = TurnState::new();
        let snapshot = state.apply(&Fragment::text(
            ":::artifact_end stray text :::artifact_start\nReal body",
        ));

        assert_eq!(snapshot.mode, Mode::Artifact);
        assert_eq!(snapshot.artifact_body, "\nReal body");
        assert_eq!(snapshot.chat_text, ":::artifact_end stray text");
    }

    #[test]
    fn failure_replaces_chat_but_keeps_artifact() {
        let mut demux = Demultiplexer::new();
        let turn = demux.begin_turn().expect("turn should start");
        demux
            .on_fragment(&turn, Fragment::text("Intro text "))
            .expect("fragment should apply");
        let before = demux
            .on_fragment(
                &turn,
                Fragment::text(":::artifact_start\n# Report Title\nBody line one."),
            )
            .expect("fragment should apply");

        let failed = demux
            .end_turn(&turn, TurnOutcome::Failure)
            .expect("turn should end");
        assert_eq!(failed.chat_text, STREAM_FAILURE_MESSAGE);
        assert_eq!(failed.artifact_body, before.artifact_body);
        assert_eq!(failed.artifact_title, before.artifact_title);
        assert_eq!(failed.mode, Mode::Artifact);
        assert!(!failed.is_loading);
        assert!(!failed.is_streaming);
    }

    #[test]
    fn title_updates_once_heading_arrives() {
        let mut state = TurnState::new();
        let snapshots = feed(
            &mut state,
            &[":::artifact_start\n", "# Late", " Heading\nbody"],
        );

        assert_eq!(snapshots[0].artifact_title, DEFAULT_ARTIFACT_TITLE);
        assert_eq!(snapshots[1].artifact_title, "Late");
        assert_eq!(snapshots[2].artifact_title, "Late Heading");
    }

    #[test]
    fn chat_prefix_is_stable_once_artifact_starts() {
        let mut state = TurnState::new();
        let snapshots = feed(
            &mut state,
            &["  Hello ", "there :::artifact_start", "# A\n", "more"],
        );

        assert_eq!(snapshots[0].chat_text, "Hello");
        for snapshot in &snapshots[1..] {
            assert_eq!(snapshot.chat_text, "Hello there");
        }
    }

    #[test]
    fn citations_accumulate_in_first_seen_order() {
        let mut state = TurnState::new();
        state.apply(&Fragment::text("a").with_citations(vec![
            RawCitation::new("https://one.example", "One"),
            RawCitation {
                uri: Some("https://partial.example".to_string()),
                title: None,
            },
        ]));
        let snapshot = state.apply(&Fragment::text("b").with_citations(vec![
            RawCitation::new("https://two.example", "Two"),
            RawCitation::new("https://one.example", "One (dup)"),
        ]));

        let uris = snapshot
            .citations
            .iter()
            .map(|citation| citation.uri.as_str())
            .collect::<Vec<_>>();
        assert_eq!(uris, ["https://one.example", "https://two.example"]);
        assert_eq!(snapshot.citations[0].title, "One");
    }

    #[test]
    fn snapshot_is_idempotent() {
        let mut state = TurnState::new();
        state.apply(
            &Fragment::text("x :::artifact_start\n# T\n")
                .with_citations(vec![RawCitation::new("https://s.example", "S")]),
        );

        assert_eq!(state.snapshot(), state.snapshot());
        assert_eq!(state.fragment_count(), 1);
    }

    #[test]
    fn snapshot_before_first_fragment_is_loading() {
        let state = TurnState::new();
        assert_eq!(state.snapshot(), TurnResult::loading());
    }

    #[test]
    fn lifecycle_misuse_is_rejected() {
        let mut demux = Demultiplexer::new();
        let first = demux.begin_turn().expect("first turn should start");

        assert_eq!(
            demux.begin_turn(),
            Err(TurnRejection::AlreadyActive { active: first.id() })
        );

        demux
            .end_turn(&first, TurnOutcome::Success)
            .expect("turn should end");
        assert_eq!(
            demux.on_fragment(&first, Fragment::text("late")),
            Err(TurnRejection::NoActiveTurn)
        );

        let second = demux.begin_turn().expect("second turn should start");
        assert!(second.id() > first.id());
        assert_eq!(
            demux.end_turn(&first, TurnOutcome::Success),
            Err(TurnRejection::TurnMismatch {
                active: second.id(),
                attempted: first.id(),
            })
        );
    }

    #[test]
    fn new_turn_starts_from_empty_state() {
        let mut demux = Demultiplexer::new();
        let first = demux.begin_turn().expect("turn should start");
        demux
            .on_fragment(
                &first,
                Fragment::text(":::artifact_start\n# Old")
                    .with_citations(vec![RawCitation::new("https://old.example", "Old")]),
            )
            .expect("fragment should apply");
        demux
            .cancel_turn(&first)
            .expect("turn should be cancelled");
        assert!(!demux.is_active());
        assert_eq!(
            demux.current(&first),
            Err(TurnRejection::NoActiveTurn)
        );
        assert_eq!(
            demux.cancel_turn(&first),
            Err(TurnRejection::NoActiveTurn)
        );

        let second = demux.begin_turn().expect("turn should start");
        let snapshot = demux.current(&second).expect("turn should be active");
        assert_eq!(snapshot, TurnResult::loading());
    }

    #[test]
    fn snapshot_serializes_with_camel_case_fields() {
        let mut state = TurnState::new();
        let snapshot = state.apply(&Fragment::text("hi"));
        let json = serde_json::to_value(&snapshot).expect("snapshot should serialize");

        assert_eq!(json["chatText"], "hi");
        assert_eq!(json["mode"], "chat");
        assert_eq!(json["isStreaming"], true);
        assert_eq!(json["artifactTitle"], DEFAULT_ARTIFACT_TITLE);
    }
}
