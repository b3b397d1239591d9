use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A web source the model consulted while answering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    pub title: String,
}

impl Citation {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

/// Citation record as delivered by a provider, where either field may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawCitation {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl RawCitation {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            title: Some(title.into()),
        }
    }

    /// Returns a citation only when both `uri` and `title` are present.
    pub fn accept(&self) -> Option<Citation> {
        match (&self.uri, &self.title) {
            (Some(uri), Some(title)) => Some(Citation::new(uri.clone(), title.clone())),
            _ => None,
        }
    }
}

/// Insertion-ordered citations, deduplicated by `uri`. Entries are never removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CitationSet {
    entries: Vec<Citation>,
    seen: HashSet<String>,
}

impl CitationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every acceptable record whose `uri` has not been seen yet.
    ///
    /// Returns how many citations were added.
    pub fn merge<'a, I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = &'a RawCitation>,
    {
        let before = self.entries.len();
        for citation in records.into_iter().filter_map(RawCitation::accept) {
            // First occurrence wins the position; later duplicates are ignored.
            if self.seen.insert(citation.uri.clone()) {
                self.entries.push(citation);
            }
        }
        self.entries.len() - before
    }

    pub fn as_slice(&self) -> &[Citation] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
