use std::sync::LazyLock;

use regex::Regex;

/// Title shown while the artifact has no H1 heading.
pub const DEFAULT_ARTIFACT_TITLE: &str = "Untitled Report";

// `R` makes `$` and `.` treat CRLF as a line ending.
static H1_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mR)^#\s+(.+)$").expect("H1 heading pattern is valid"));

/// Returns the text of the first `# heading` line in `body`, or the default title.
pub fn extract_title(body: &str) -> String {
    H1_HEADING
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|heading| heading.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_ARTIFACT_TITLE.to_string())
}
