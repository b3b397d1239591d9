/// Literal token that switches a response into artifact mode.
pub const ARTIFACT_START: &str = ":::artifact_start";
/// Literal token that closes the artifact body.
pub const ARTIFACT_END: &str = ":::artifact_end";

/// Result of scanning the whole response buffer for artifact markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split<'a> {
    /// No start marker yet; the entire buffer is chat.
    Chat { chat: &'a str },
    /// A start marker was found. `chat` is everything before it (untrimmed).
    Artifact {
        chat: &'a str,
        body: &'a str,
        closed: bool,
    },
}

impl<'a> Split<'a> {
    pub fn chat(&self) -> &'a str {
        match self {
            Self::Chat { chat } | Self::Artifact { chat, .. } => chat,
        }
    }

    pub fn body(&self) -> &'a str {
        match self {
            Self::Chat { .. } => "",
            Self::Artifact { body, .. } => body,
        }
    }
}

/// Scans `buffer` for the first start marker and the first end marker after it.
///
/// An end marker positioned before the start marker is ignored, and a second start
/// marker inside the body is passed through as content. Partial markers never match
/// because only complete literal occurrences are searched for.
pub fn split(buffer: &str) -> Split<'_> {
    let Some(start) = buffer.find(ARTIFACT_START) else {
        return Split::Chat { chat: buffer };
    };

    let chat = &buffer[..start];
    let rest = &buffer[start + ARTIFACT_START.len()..];
    match rest.find(ARTIFACT_END) {
        Some(end) => Split::Artifact {
            chat,
            body: &rest[..end],
            closed: true,
        },
        None => Split::Artifact {
            chat,
            body: rest,
            closed: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_without_markers_is_pure_chat() {
        let split = split("just chatting");
        assert_eq!(split, Split::Chat { chat: "just chatting" });
        assert_eq!(split.body(), "");
    }

    #[test]
    fn open_artifact_runs_to_end_of_buffer() {
        let split = split("Intro :::artifact_start\n# Title\nBody");
        assert_eq!(
            split,
            Split::Artifact {
                chat: "Intro ",
                body: "\n# Title\nBody",
                closed: false,
            }
        );
    }

    #[test]
    fn end_marker_bounds_the_body() {
        let split = split(":::artifact_start body :::artifact_end trailing");
        assert_eq!(split.body(), " body ");
        assert!(matches!(split, Split::Artifact { closed: true, .. }));
    }

    #[test]
    fn end_marker_before_start_is_ignored() {
        let split = split(":::artifact_end stray :::artifact_start\nReal body");
        assert_eq!(
            split,
            Split::Artifact {
                chat: ":::artifact_end stray ",
                body: "\nReal body",
                closed: false,
            }
        );
    }

    #[test]
    fn second_start_marker_is_body_content() {
        let split = split(":::artifact_start a :::artifact_start b");
        assert_eq!(split.body(), " a :::artifact_start b");
    }

    #[test]
    fn truncated_markers_do_not_match() {
        assert_eq!(split("text :::artifact_st").body(), "");
        assert!(matches!(split("text :::artifact_st"), Split::Chat { .. }));

        let open = split(":::artifact_start body :::artifact_e");
        assert_eq!(open.body(), " body :::artifact_e");
        assert!(matches!(open, Split::Artifact { closed: false, .. }));
    }
}
