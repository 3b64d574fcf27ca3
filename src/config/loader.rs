use crate::config::schema::{PatchSet, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Io { .. } => self,
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read patch set from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch set TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch set ({}): {}", path.display(), source),
                None => write!(f, "invalid patch set: {}", source),
            },
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchSet, ConfigError> {
    let set: PatchSet = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    set.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(set)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Match;

    #[test]
    fn load_literal_patch_set() {
        let set = load_from_str(
            r#"
[meta]
name = "pila-upload"
root_relative = true

[[patches]]
id = "add-include-flag"
file = "src/pages/ClosurePage.tsx"
marker = "includePila: true"

[patches.match]
type = "literal"
text = "logoUrl: unit?.logoUrl\n}"

[patches.replace]
text = "logoUrl: unit?.logoUrl\n},\nincludePila: true"
"#,
        )
        .unwrap();

        assert_eq!(set.meta.name, "pila-upload");
        assert!(set.meta.root_relative);
        assert_eq!(set.patches.len(), 1);
        assert!(matches!(set.patches[0].matcher, Match::Literal { .. }));
        assert_eq!(set.patches[0].max_applications, 1);
        assert!(!set.patches[0].required);
    }

    #[test]
    fn load_regex_patch_set() {
        let set = load_from_str(
            r#"
[[patches]]
id = "insert-column"
file = "page.tsx"
marker = "pilaFileUrl"
max_applications = 1
required = true

[patches.match]
type = "regex"
pattern = '(</td>\s*<td)'

[patches.replace]
text = "</td>\n<td-new/>$1"
"#,
        )
        .unwrap();

        assert!(set.patches[0].required);
        assert_eq!(set.patches[0].marker.as_deref(), Some("pilaFileUrl"));
    }

    #[test]
    fn invalid_toml_reports_parse_error() {
        let err = load_from_str("[[patches]\nid=").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn validation_failure_reports_patch_id() {
        let err = load_from_str(
            r#"
[[patches]]
id = "broken"
file = "page.tsx"

[patches.match]
type = "regex"
pattern = "(unclosed"

[patches.replace]
text = "x"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = load_from_path("/nonexistent/patches.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
