//! Patch orchestration over in-memory content.
//!
//! Applies an ordered list of patch specs to a content blob, exactly once
//! each. The central correctness property is full idempotence: applying the
//! same spec list to its own output produces no further `Applied` results
//! and returns the content unchanged, so the tool is safe to re-run against
//! partially patched files.
//!
//! Specs are processed strictly in declared order and each idempotence
//! check runs against the *current* content, so later specs observe the
//! effects of earlier ones. The patcher never reorders specs; a spec that
//! depends on another's output must be listed after it.

use crate::config::schema::{Match, PatchSpec, Verify};
use crate::matcher::{self, MatchLocation};
use crate::template;
use serde::Serialize;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Outcome of one spec against one content blob.
///
/// `NotFound` and `SkippedAlreadyPresent` are first-class outcomes, not
/// error paths; only `Failed` counts against the process exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Outcome {
    /// The spec matched and its replacement was spliced in
    Applied,
    /// The idempotence marker (or the replacement itself) is already present
    SkippedAlreadyPresent,
    /// The pattern matched nothing; content left unchanged
    NotFound,
    /// The spec could not be applied (bad template, failed verification, a
    /// required spec that matched nothing)
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[must_use = "PatchResult should be checked for failures"]
pub struct PatchResult {
    pub spec_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub occurrences_replaced: usize,
}

impl PatchResult {
    fn new(spec: &PatchSpec, outcome: Outcome, occurrences_replaced: usize) -> Self {
        Self {
            spec_id: spec.id.clone(),
            outcome,
            occurrences_replaced,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Applied => write!(
                f,
                "{}: applied ({} occurrence{})",
                self.spec_id,
                self.occurrences_replaced,
                if self.occurrences_replaced == 1 { "" } else { "s" }
            ),
            Outcome::SkippedAlreadyPresent => {
                write!(f, "{}: skipped (already present)", self.spec_id)
            }
            Outcome::NotFound => write!(f, "{}: pattern not found", self.spec_id),
            Outcome::Failed { reason } => write!(f, "{}: failed - {}", self.spec_id, reason),
        }
    }
}

/// Apply every spec, in declared order, to `content`.
///
/// Returns the patched content and one result per spec. Non-fatal
/// conditions (`NotFound`, `Failed`) never abort the run; remaining specs
/// still execute against the current content.
pub fn apply(content: &str, specs: &[&PatchSpec]) -> (String, Vec<PatchResult>) {
    let mut current = content.to_string();
    let mut results = Vec::with_capacity(specs.len());

    for spec in specs {
        let (next, result) = apply_one(&current, spec);
        current = next;
        results.push(result);
    }

    (current, results)
}

fn apply_one(content: &str, spec: &PatchSpec) -> (String, PatchResult) {
    // 1. Idempotence check against the current content. The explicit marker
    // wins; a literal spec without one falls back to the presence of its
    // own replacement text, which is what makes markerless replace specs
    // re-runnable.
    if marker_present(content, spec) {
        return (
            content.to_string(),
            PatchResult::new(spec, Outcome::SkippedAlreadyPresent, 0),
        );
    }

    // 2. Locate insertion points.
    let locations = match matcher::find(content, spec) {
        Ok(locations) => locations,
        Err(e) => {
            return (
                content.to_string(),
                PatchResult::new(
                    spec,
                    Outcome::Failed {
                        reason: e.to_string(),
                    },
                    0,
                ),
            );
        }
    };

    if locations.is_empty() {
        let outcome = if spec.required {
            Outcome::Failed {
                reason: "required patch matched no locations".to_string(),
            }
        } else {
            Outcome::NotFound
        };
        return (content.to_string(), PatchResult::new(spec, outcome, 0));
    }

    // 3. Verify the first matched span before touching anything.
    if let Some(verify) = &spec.verify {
        if let Err(reason) = check_verification(content, &locations[0], verify) {
            return (
                content.to_string(),
                PatchResult::new(spec, Outcome::Failed { reason }, 0),
            );
        }
    }

    // 4. Render every replacement before splicing any, so a template error
    // leaves the content untouched for this spec.
    let selected = &locations[..spec.max_applications.min(locations.len())];
    let mut rendered = Vec::with_capacity(selected.len());
    for location in selected {
        match render_replacement(spec, location) {
            Ok(text) => rendered.push(text),
            Err(e) => {
                return (
                    content.to_string(),
                    PatchResult::new(
                        spec,
                        Outcome::Failed {
                            reason: e.to_string(),
                        },
                        0,
                    ),
                );
            }
        }
    }

    // 5. Splice back-to-front so earlier byte offsets stay valid.
    let mut patched = content.to_string();
    for (location, replacement) in selected.iter().zip(rendered.iter()).rev() {
        patched.replace_range(location.byte_start..location.byte_end, replacement);
    }

    let count = selected.len();
    (patched, PatchResult::new(spec, Outcome::Applied, count))
}

fn marker_present(content: &str, spec: &PatchSpec) -> bool {
    if let Some(marker) = &spec.marker {
        return matcher::contains_any_flavor(content, marker);
    }
    // Implicit marker for literal replace specs. Regex specs always carry an
    // explicit marker (enforced by config validation) because their rendered
    // output is match-dependent.
    match &spec.matcher {
        Match::Literal { .. } if !spec.replace.text.is_empty() => {
            matcher::contains_any_flavor(content, &spec.replace.text)
        }
        _ => false,
    }
}

fn render_replacement(
    spec: &PatchSpec,
    location: &MatchLocation,
) -> Result<String, template::TemplateError> {
    match &spec.matcher {
        // Literal replacements are verbatim text, re-encoded in the newline
        // convention of the variant that matched. No template syntax: the
        // replacement may legitimately contain '$' (JS template strings).
        Match::Literal { .. } => Ok(location.line_ending.render(&spec.replace.text)),
        Match::Regex { .. } => template::render(&spec.replace.text, location),
    }
}

fn check_verification(
    content: &str,
    location: &MatchLocation,
    verify: &Verify,
) -> Result<(), String> {
    let span = &content[location.byte_start..location.byte_end];
    match verify {
        Verify::ExactMatch { expected_text } => {
            if span == expected_text {
                Ok(())
            } else {
                Err(format!(
                    "verification failed: expected {:?}, found {:?}",
                    expected_text, span
                ))
            }
        }
        Verify::Hash { expected } => {
            let expected_hash = u64::from_str_radix(expected.trim_start_matches("0x"), 16)
                .map_err(|_| format!("invalid xxh3 hash value: {expected}"))?;
            let actual = xxh3_64(span.as_bytes());
            if actual == expected_hash {
                Ok(())
            } else {
                Err(format!(
                    "verification failed: span hash {actual:#x} does not match {expected_hash:#x}"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Match, Replace};

    fn literal(id: &str, text: &str, replacement: &str, marker: Option<&str>) -> PatchSpec {
        PatchSpec {
            id: id.to_string(),
            file: "page.tsx".to_string(),
            matcher: Match::Literal {
                text: text.to_string(),
            },
            replace: Replace {
                text: replacement.to_string(),
            },
            marker: marker.map(str::to_string),
            max_applications: 1,
            required: false,
            verify: None,
        }
    }

    fn regex(id: &str, pattern: &str, replacement: &str, marker: &str) -> PatchSpec {
        PatchSpec {
            id: id.to_string(),
            file: "page.tsx".to_string(),
            matcher: Match::Regex {
                pattern: pattern.to_string(),
            },
            replace: Replace {
                text: replacement.to_string(),
            },
            marker: Some(marker.to_string()),
            max_applications: 1,
            required: false,
            verify: None,
        }
    }

    #[test]
    fn dash_to_plus_scenario() {
        let spec = literal("dash", "-", "+", Some("A+B"));

        let (first, results) = apply("A-B", &[&spec]);
        assert_eq!(first, "A+B");
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert_eq!(results[0].occurrences_replaced, 1);

        let (second, results) = apply(&first, &[&spec]);
        assert_eq!(second, "A+B");
        assert_eq!(results[0].outcome, Outcome::SkippedAlreadyPresent);
        assert_eq!(results[0].occurrences_replaced, 0);
    }

    #[test]
    fn absent_pattern_is_not_found_and_byte_identical() {
        let spec = literal("missing", "zz", "yy", Some("marker"));
        let (out, results) = apply("A-B", &[&spec]);
        assert_eq!(out, "A-B");
        assert_eq!(results[0].outcome, Outcome::NotFound);
    }

    #[test]
    fn required_spec_not_found_is_failed() {
        let mut spec = literal("missing", "zz", "yy", Some("marker"));
        spec.required = true;
        let (_, results) = apply("A-B", &[&spec]);
        assert!(results[0].is_failed());
    }

    #[test]
    fn not_found_does_not_block_subsequent_specs() {
        let one = literal("one", "a", "A", None);
        let two = literal("two", "zz", "ZZ", None);
        let three = literal("three", "c", "C", None);

        let (out, results) = apply("a b c", &[&one, &two, &three]);
        assert_eq!(out, "A b C");
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert_eq!(results[1].outcome, Outcome::NotFound);
        assert_eq!(results[2].outcome, Outcome::Applied);
    }

    #[test]
    fn later_spec_sees_earlier_specs_output() {
        // Spec two's marker is the literal output of spec one, so on a
        // second run both report already-present.
        let one = literal("one", "start", "HANDLER", None);
        let two = literal("two", "call-site", "call HANDLER now", Some("call HANDLER"));

        let (first, results) = apply("start then call-site", &[&one, &two]);
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert_eq!(results[1].outcome, Outcome::Applied);

        let (second, results) = apply(&first, &[&one, &two]);
        assert_eq!(second, first);
        assert_eq!(results[0].outcome, Outcome::SkippedAlreadyPresent);
        assert_eq!(results[1].outcome, Outcome::SkippedAlreadyPresent);
    }

    #[test]
    fn max_applications_limits_replacements() {
        let mut spec = literal("multi", "a", "b", Some("done"));
        spec.max_applications = 2;
        let (out, results) = apply("a a a", &[&spec]);
        assert_eq!(out, "b b a");
        assert_eq!(results[0].occurrences_replaced, 2);
    }

    #[test]
    fn markerless_literal_replace_is_idempotent() {
        let spec = literal("flag", "logoUrl }", "logoUrl, includePila: true }", None);
        let content = "body({ logoUrl })";

        let (first, results) = apply(content, &[&spec]);
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert!(first.contains("includePila"));

        let (second, results) = apply(&first, &[&spec]);
        assert_eq!(second, first);
        assert_eq!(results[0].outcome, Outcome::SkippedAlreadyPresent);
    }

    #[test]
    fn crlf_content_gets_crlf_replacement() {
        let spec = literal("col", "</td>\n<td>", "</td>\n<td-new/>\n<td>", None);
        let content = "row\r\n</td>\r\n<td>\r\nend";

        let (out, results) = apply(content, &[&spec]);
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert_eq!(out, "row\r\n</td>\r\n<td-new/>\r\n<td>\r\nend");
        // Unmatched regions keep their original bytes.
        assert!(out.starts_with("row\r\n"));
        assert!(out.ends_with("\r\nend"));
    }

    #[test]
    fn regex_template_splices_captures() {
        let spec = regex(
            "column",
            r"(</td>\s*)(<td class=)",
            "$1<td-new/>\n$2",
            "td-new",
        );
        let content = "</td>\n<td class=\"x\">";

        let (out, results) = apply(content, &[&spec]);
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert_eq!(out, "</td>\n<td-new/>\n<td class=\"x\">");

        let (second, results) = apply(&out, &[&spec]);
        assert_eq!(second, out);
        assert_eq!(results[0].outcome, Outcome::SkippedAlreadyPresent);
    }

    #[test]
    fn template_error_fails_only_that_spec() {
        let before = literal("before", "a", "A", None);
        let bad = regex("bad", "(b)", "$2", "never-present");
        let after = literal("after", "c", "C", None);

        let (out, results) = apply("a b c", &[&before, &bad, &after]);
        assert_eq!(out, "A b C");
        assert_eq!(results[0].outcome, Outcome::Applied);
        assert!(results[1].is_failed());
        assert_eq!(results[2].outcome, Outcome::Applied);
    }

    #[test]
    fn verification_mismatch_fails_spec() {
        let mut spec = literal("verify", "abc", "xyz", Some("xyz"));
        spec.verify = Some(Verify::ExactMatch {
            expected_text: "something else".to_string(),
        });
        let (out, results) = apply("abc", &[&spec]);
        assert_eq!(out, "abc");
        assert!(results[0].is_failed());
    }

    #[test]
    fn verification_hash_accepts_matching_span() {
        let expected = format!("{:x}", xxh3_64(b"abc"));
        let mut spec = literal("verify", "abc", "xyz", Some("xyz"));
        spec.verify = Some(Verify::Hash { expected });
        let (out, results) = apply("abc", &[&spec]);
        assert_eq!(out, "xyz");
        assert_eq!(results[0].outcome, Outcome::Applied);
    }

    #[test]
    fn marker_matches_either_newline_flavor() {
        let spec = literal("handler", "insert-here", "const handler = () => {\n}", None);
        // Already patched by an earlier run that wrote CRLF.
        let content = "const handler = () => {\r\n}";
        let (out, results) = apply(content, &[&spec]);
        assert_eq!(out, content);
        assert_eq!(results[0].outcome, Outcome::SkippedAlreadyPresent);
    }
}
