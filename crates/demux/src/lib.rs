//! Splits one streamed research-assistant response into chat prose and an artifact document.
//!
//! The core is a pure reduction over an append-only response buffer: every fragment
//! produces a complete [`TurnResult`] snapshot recomputed from scratch.

#![deny(unsafe_code)]

pub mod citation;
pub mod driver;
pub mod markers;
pub mod title;
pub mod turn;

pub use citation::{Citation, CitationSet, RawCitation};
pub use driver::drive_turn;
pub use markers::{ARTIFACT_END, ARTIFACT_START, Split, split};
pub use title::{DEFAULT_ARTIFACT_TITLE, extract_title};
pub use turn::{
    Demultiplexer, Fragment, Mode, STREAM_FAILURE_MESSAGE, TurnHandle, TurnId, TurnOutcome,
    TurnRejection, TurnResult, TurnState, artifact_opened,
};
