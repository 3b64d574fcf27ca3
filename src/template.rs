//! Replacement template rendering for the regex match strategy.
//!
//! Templates reference capture groups with `$1`, `$name`, or `${name}`;
//! `$$` produces a literal dollar sign. A reference to a group the pattern
//! does not define, or one that did not participate in this match, is a
//! [`TemplateError`] — fatal to the spec being applied, never to the run.
//!
//! Literal template segments are re-encoded in the newline convention of the
//! target content so a template authored with `\n` patches CRLF files
//! cleanly. Captured text is inserted verbatim since it already came from
//! the target.

use crate::matcher::MatchLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template references unknown capture group '{name}'")]
    UnknownGroup { name: String },

    #[error("capture group '{name}' did not participate in the match")]
    GroupNotCaptured { name: String },

    #[error("unterminated '${{' group reference in template")]
    Unterminated,
}

/// Render a replacement template against one match.
pub fn render(template: &str, location: &MatchLocation) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                literal.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(TemplateError::Unterminated),
                    }
                }
                flush_literal(&mut out, &mut literal, location);
                out.push_str(&lookup(&name, location)?);
            }
            _ => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    // Bare '$' with no group reference stays literal.
                    literal.push('$');
                } else {
                    flush_literal(&mut out, &mut literal, location);
                    out.push_str(&lookup(&name, location)?);
                }
            }
        }
    }

    flush_literal(&mut out, &mut literal, location);
    Ok(out)
}

fn flush_literal(out: &mut String, literal: &mut String, location: &MatchLocation) {
    if !literal.is_empty() {
        out.push_str(&location.line_ending.render(literal));
        literal.clear();
    }
}

fn lookup(name: &str, location: &MatchLocation) -> Result<String, TemplateError> {
    if name.chars().all(|c| c.is_ascii_digit()) {
        let index: usize = name.parse().map_err(|_| TemplateError::UnknownGroup {
            name: name.to_string(),
        })?;
        let slot = location
            .captures
            .get(index)
            .ok_or_else(|| TemplateError::UnknownGroup {
                name: name.to_string(),
            })?;
        return slot.clone().ok_or_else(|| TemplateError::GroupNotCaptured {
            name: name.to_string(),
        });
    }

    let slot = location
        .named
        .get(name)
        .ok_or_else(|| TemplateError::UnknownGroup {
            name: name.to_string(),
        })?;
    slot.clone().ok_or_else(|| TemplateError::GroupNotCaptured {
        name: name.to_string(),
    })
}
