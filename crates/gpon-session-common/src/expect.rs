//! Pattern matching over an accumulating output buffer.
//!
//! Device output arrives in arbitrary chunks. Chunks are appended to an
//! [`ExpectBuffer`]; a wait succeeds once any of its patterns matches.
//! When several patterns match, the one starting earliest wins and ties go
//! to the lower pattern index. Everything up to the end of the winning
//! match is consumed, the remainder stays for the next wait.

use crate::error::{OltError, OltResult};
use regex::Regex;

/// A named pattern to wait for.
#[derive(Debug, Clone)]
pub struct Pattern {
    label: String,
    regex: Regex,
}

impl Pattern {
    /// Matches `text` verbatim.
    pub fn literal(text: &str) -> Self {
        Self {
            label: text.to_string(),
            // An escaped literal is always a valid expression.
            regex: Regex::new(&regex::escape(text)).expect("escaped literal compiles"),
        }
    }

    /// Matches a regular expression.
    pub fn regex(source: &str) -> OltResult<Self> {
        let regex = Regex::new(source)
            .map_err(|e| OltError::parse("pattern", format!("'{}': {}", source, e)))?;
        Ok(Self {
            label: source.to_string(),
            regex,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        self.regex.find(haystack).map(|m| (m.start(), m.end()))
    }
}

/// Joins pattern labels for error messages.
pub fn describe(patterns: &[Pattern]) -> String {
    patterns
        .iter()
        .map(|p| format!("'{}'", p.label()))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the winning pattern.
    pub index: usize,
    /// Output preceding the match.
    pub before: String,
    /// The matched text.
    pub matched: String,
}

impl Match {
    /// `before` followed by `matched`.
    pub fn output(&self) -> String {
        format!("{}{}", self.before, self.matched)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExpectBuffer {
    data: String,
}

impl ExpectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.data.push_str(chunk);
    }

    pub fn contents(&self) -> &str {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Consumes through the earliest match, if any pattern matches.
    pub fn try_match(&mut self, patterns: &[Pattern]) -> Option<Match> {
        let mut best: Option<(usize, usize, usize)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            if let Some((start, end)) = pattern.find(&self.data) {
                let better = match best {
                    Some((best_start, _, _)) => start < best_start,
                    None => true,
                };
                if better {
                    best = Some((start, end, index));
                }
            }
        }

        let (start, end, index) = best?;
        let before = self.data[..start].to_string();
        let matched = self.data[start..end].to_string();
        self.data.drain(..end);
        Some(Match {
            index,
            before,
            matched,
        })
    }
}
