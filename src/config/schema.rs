use serde::Deserialize;
use std::fmt;

/// A named, ordered set of patch specs loaded from one TOML file.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchSpec>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// When true, patch file paths are resolved against the target root.
    #[serde(default)]
    pub root_relative: bool,
}

/// One declarative text transformation with its own idempotence check.
#[derive(Debug, Deserialize, Clone)]
pub struct PatchSpec {
    pub id: String,
    pub file: String,
    #[serde(rename = "match")]
    pub matcher: Match,
    pub replace: Replace,
    /// Idempotence marker: if present in current content, the patch is
    /// considered already applied and is skipped.
    #[serde(default)]
    pub marker: Option<String>,
    /// Replace at most this many occurrences (first N in content order).
    #[serde(default = "default_max_applications")]
    pub max_applications: usize,
    /// Upgrade a NotFound outcome to a hard failure for this spec.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub verify: Option<Verify>,
}

fn default_max_applications() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Match {
    /// Exact substring search. Matches the LF form of `text` first, then
    /// the CRLF form, since target files may use either convention.
    Literal { text: String },
    /// Single compiled regex pattern. Capture groups are available to the
    /// replacement template as `$1`, `${name}`, etc.
    Regex { pattern: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Replace {
    pub text: String,
}

/// Optional verification of the matched span before replacing.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Verify {
    ExactMatch { expected_text: String },
    /// xxh3 hash of the expected span, as a hex string.
    Hash { expected: String },
}

impl PatchSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            }
            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            }
            if patch.max_applications == 0 {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "max_applications must be at least 1".to_string(),
                });
            }

            match &patch.matcher {
                Match::Literal { text } => {
                    if text.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "match.text",
                        });
                    }
                    // A deletion leaves no trace in the content, so there is
                    // nothing to fall back on for the already-applied check.
                    if patch.replace.text.is_empty() && patch.marker.is_none() {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "literal patch with empty replacement requires a marker"
                                .to_string(),
                        });
                    }
                }
                Match::Regex { pattern } => {
                    if pattern.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "match.pattern",
                        });
                    } else if let Err(e) = regex::Regex::new(pattern) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: format!("invalid regex pattern: {e}"),
                        });
                    }
                    // Regex output is template-dependent, so presence of the
                    // rendered replacement cannot be checked after the fact.
                    if patch.marker.is_none() {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "regex patch requires an explicit marker".to_string(),
                        });
                    }
                }
            }

            if let Some(marker) = &patch.marker {
                if marker.is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: Some(patch.id.clone()),
                        field: "marker",
                    });
                }
            }

            if let Some(Verify::Hash { expected }) = &patch.verify {
                if u64::from_str_radix(expected.trim_start_matches("0x"), 16).is_err() {
                    issues.push(ValidationIssue::InvalidCombo {
                        patch_id: Some(patch.id.clone()),
                        message: format!("invalid xxh3 hash value: {expected}"),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch set contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
