use std::fmt::Display;

use futures::{Stream, StreamExt};

use crate::turn::{Demultiplexer, Fragment, TurnOutcome, TurnRejection, TurnResult};

/// Runs one full turn over a pull-based fragment stream.
///
/// Fragments are processed one at a time; every snapshot, including the terminal one,
/// is handed to `on_snapshot`. The first stream error ends the turn as a failure and
/// nothing further is polled. Dropping the returned future stops consumption and the
/// last emitted snapshot stands.
pub async fn drive_turn<S, E, F>(
    demux: &mut Demultiplexer,
    stream: S,
    mut on_snapshot: F,
) -> Result<TurnResult, TurnRejection>
where
    S: Stream<Item = Result<Fragment, E>>,
    E: Display,
    F: FnMut(&TurnResult),
{
    let handle = demux.begin_turn()?;
    let mut stream = std::pin::pin!(stream);
    let mut outcome = TurnOutcome::Success;

    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                let snapshot = demux.on_fragment(&handle, fragment)?;
                on_snapshot(&snapshot);
            }
            Err(error) => {
                tracing::warn!(
                    turn_id = handle.id().0,
                    error = %error,
                    "fragment stream failed; ending turn"
                );
                outcome = TurnOutcome::Failure;
                break;
            }
        }
    }

    let last = demux.end_turn(&handle, outcome)?;
    on_snapshot(&last);
    Ok(last)
}
