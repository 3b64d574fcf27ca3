//! Match location discovery for patch specs.
//!
//! The matcher never mutates content; it only reports byte spans. Absence of
//! a match is a normal outcome (the file may already be patched or its
//! structure may have shifted) and is reported as an empty sequence.

use crate::config::schema::{Match, PatchSpec};
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Newline convention of a matched region.
///
/// Source files may use either convention; a literal pattern written with
/// `\n` is tried in its LF form first, then its CRLF form. This is the
/// normal dual-encoding case, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Re-encode `text` in this newline convention.
    pub fn render(&self, text: &str) -> String {
        let lf = normalize_newlines(text);
        match self {
            LineEnding::Lf => lf,
            LineEnding::CrLf => lf.replace('\n', "\r\n"),
        }
    }

    /// Detect the dominant convention of a content blob.
    pub fn of_content(content: &str) -> Self {
        if content.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }
}

/// Collapse CRLF to LF so patterns can be compared in one canonical form.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// True if `needle` occurs in `content` in either newline convention.
pub fn contains_any_flavor(content: &str, needle: &str) -> bool {
    let lf = normalize_newlines(needle);
    if content.contains(&lf) {
        return true;
    }
    let crlf = lf.replace('\n', "\r\n");
    crlf != lf && content.contains(&crlf)
}

/// A substring span identified by the matcher, with captured groups for the
/// regex strategy.
#[derive(Debug, Clone)]
pub struct MatchLocation {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// Newline convention the replacement should be rendered in
    pub line_ending: LineEnding,
    /// Indexed capture group texts; index 0 is the whole match
    pub captures: Vec<Option<String>>,
    /// Named capture group texts
    pub named: HashMap<String, Option<String>>,
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("invalid pattern: {message}")]
    InvalidPattern { message: String },
}

/// Find every occurrence the spec's strategy identifies, in content order.
pub fn find(content: &str, spec: &PatchSpec) -> Result<Vec<MatchLocation>, MatchError> {
    match &spec.matcher {
        Match::Literal { text } => Ok(find_literal(content, text)),
        Match::Regex { pattern } => find_regex(content, pattern),
    }
}

fn find_literal(content: &str, pattern: &str) -> Vec<MatchLocation> {
    let lf = normalize_newlines(pattern);

    // A single-line pattern says nothing about the file's convention, so
    // the replacement follows the content instead of the matched variant.
    let lf_flavor = if lf.contains('\n') {
        LineEnding::Lf
    } else {
        LineEnding::of_content(content)
    };

    let locations = literal_occurrences(content, &lf, lf_flavor);
    if !locations.is_empty() {
        return locations;
    }

    let crlf = lf.replace('\n', "\r\n");
    if crlf == lf {
        return locations;
    }
    literal_occurrences(content, &crlf, LineEnding::CrLf)
}

fn literal_occurrences(content: &str, needle: &str, line_ending: LineEnding) -> Vec<MatchLocation> {
    content
        .match_indices(needle)
        .map(|(start, matched)| MatchLocation {
            byte_start: start,
            byte_end: start + matched.len(),
            line_ending,
            captures: vec![Some(matched.to_string())],
            named: HashMap::new(),
        })
        .collect()
}

fn find_regex(content: &str, pattern: &str) -> Result<Vec<MatchLocation>, MatchError> {
    let re = Regex::new(pattern).map_err(|e| MatchError::InvalidPattern {
        message: e.to_string(),
    })?;

    // The replacement template's literal segments follow the file's own
    // convention, not the convention the template was authored in.
    let line_ending = LineEnding::of_content(content);

    let names: Vec<&str> = re.capture_names().flatten().collect();

    Ok(re
        .captures_iter(content)
        .map(|caps| {
            let whole = caps.get(0).expect("group 0 always participates");
            let captures = (0..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect();
            let named = names
                .iter()
                .map(|&name| {
                    (
                        name.to_string(),
                        caps.name(name).map(|m| m.as_str().to_string()),
                    )
                })
                .collect();
            MatchLocation {
                byte_start: whole.start(),
                byte_end: whole.end(),
                line_ending,
                captures,
                named,
            }
        })
        .collect())
}
