//! File boundary: reads targets, runs the patcher, writes results back.
//!
//! The patcher itself is pure; everything that touches the filesystem lives
//! here. Writes are atomic (tempfile + fsync + rename) and only happen when
//! the patched content differs from the original, so an all-skipped run
//! never churns modification timestamps. The read-modify-write window is
//! covered by an advisory lock file so two concurrent invocations against
//! the same target cannot lose updates.

use crate::config::schema::{PatchSet, PatchSpec};
use crate::patcher::{self, PatchResult};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("target file is locked: {path} (remove {lock} if no other run is active)")]
    Locked { path: PathBuf, lock: PathBuf },
}

/// Whether a run is allowed to write results back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Apply,
    /// Compute everything, write nothing. Used by `status` and `--dry-run`.
    DryRun,
}

/// Per-file outcome of one patch set run.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub results: Vec<PatchResult>,
    /// True when patching produced different content
    pub changed: bool,
    /// True when the new content actually reached disk
    pub written: bool,
    #[serde(skip)]
    pub original: String,
    #[serde(skip)]
    pub patched: String,
}

impl FileReport {
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }
}

/// Run one patch set against its target files.
///
/// Specs are grouped by resolved file path, preserving declared order both
/// across groups and within each group, and each file is read exactly once.
/// One entry is returned per target file; a file-level error carries the
/// path it happened on and does not stop the remaining files.
pub fn run_patch_set(
    set: &PatchSet,
    root: &Path,
    mode: WriteMode,
) -> Vec<Result<FileReport, RunError>> {
    let mut groups: Vec<(PathBuf, Vec<&PatchSpec>)> = Vec::new();
    for spec in &set.patches {
        let path = if set.meta.root_relative {
            root.join(&spec.file)
        } else {
            PathBuf::from(&spec.file)
        };
        match groups.iter_mut().find(|(p, _)| *p == path) {
            Some((_, specs)) => specs.push(spec),
            None => groups.push((path, vec![spec])),
        }
    }

    groups
        .into_iter()
        .map(|(path, specs)| run_file(&path, &specs, mode))
        .collect()
}

fn run_file(
    path: &Path,
    specs: &[&PatchSpec],
    mode: WriteMode,
) -> Result<FileReport, RunError> {
    // Lock before reading: the lock covers the whole read-modify-write
    // window, not just the write.
    let _lock = match mode {
        WriteMode::Apply => Some(LockGuard::acquire(path)?),
        WriteMode::DryRun => None,
    };

    let original = fs::read_to_string(path).map_err(|source| RunError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (patched, results) = patcher::apply(&original, specs);
    let changed = patched != original;

    let written = if changed && mode == WriteMode::Apply {
        atomic_write(path, patched.as_bytes())?;
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(path, now).map_err(|source| RunError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        true
    } else {
        false
    };

    Ok(FileReport {
        file: path.to_path_buf(),
        results,
        changed,
        written,
        original,
        patched,
    })
}

/// Advisory exclusivity for a target file's read-modify-write window.
///
/// Creates `<file>.lock` next to the target with `create_new`, which is
/// atomic on all platforms; the lock is released on drop. This is advisory
/// only: it protects cooperating invocations of this tool, not arbitrary
/// writers.
pub struct LockGuard {
    lock_path: PathBuf,
}

impl LockGuard {
    pub fn acquire(target: &Path) -> Result<Self, RunError> {
        let lock_path = lock_path_for(target);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(Self { lock_path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(RunError::Locked {
                path: target.to_path_buf(),
                lock: lock_path,
            }),
            Err(source) => Err(RunError::Io {
                path: lock_path,
                source,
            }),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the target is left untouched.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), RunError> {
    let io_err = |source: std::io::Error| RunError::Io {
        path: path.to_path_buf(),
        source,
    };

    // Tempfile in the same directory so the rename stays on one filesystem.
    let parent = path.parent().ok_or_else(|| {
        io_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    temp.write_all(content).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Match, Metadata, Replace};
    use std::time::Duration;

    fn literal(id: &str, file: &str, text: &str, replacement: &str) -> PatchSpec {
        PatchSpec {
            id: id.to_string(),
            file: file.to_string(),
            matcher: Match::Literal {
                text: text.to_string(),
            },
            replace: Replace {
                text: replacement.to_string(),
            },
            marker: None,
            max_applications: 1,
            required: false,
            verify: None,
        }
    }

    fn set_of(patches: Vec<PatchSpec>) -> PatchSet {
        PatchSet {
            meta: Metadata {
                name: "test".to_string(),
                description: None,
                root_relative: true,
            },
            patches,
        }
    }

    #[test]
    fn applies_and_writes_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page.tsx"), "A-B").unwrap();

        let set = set_of(vec![literal("dash", "page.tsx", "-", "+")]);
        let reports = run_patch_set(&set, dir.path(), WriteMode::Apply);

        let report = reports[0].as_ref().unwrap();
        assert!(report.changed);
        assert!(report.written);
        assert_eq!(
            fs::read_to_string(dir.path().join("page.tsx")).unwrap(),
            "A+B"
        );
        // Lock released after the run.
        assert!(!dir.path().join("page.tsx.lock").exists());
    }

    #[test]
    fn unchanged_file_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.tsx");
        fs::write(&path, "A+B").unwrap();

        let old = filetime::FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&path, old).unwrap();

        let mut spec = literal("dash", "page.tsx", "-", "+");
        spec.marker = Some("A+B".to_string());
        let reports = run_patch_set(&set_of(vec![spec]), dir.path(), WriteMode::Apply);

        let report = reports[0].as_ref().unwrap();
        assert!(!report.changed);
        assert!(!report.written);
        // mtime untouched because nothing was written
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn dry_run_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.tsx");
        fs::write(&path, "A-B").unwrap();

        let set = set_of(vec![literal("dash", "page.tsx", "-", "+")]);
        let reports = run_patch_set(&set, dir.path(), WriteMode::DryRun);

        let report = reports[0].as_ref().unwrap();
        assert!(report.changed);
        assert!(!report.written);
        assert_eq!(report.patched, "A+B");
        assert_eq!(fs::read_to_string(&path).unwrap(), "A-B");
    }

    #[test]
    fn missing_file_is_io_error_and_other_files_still_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.tsx"), "A-B").unwrap();

        let set = set_of(vec![
            literal("gone", "missing.tsx", "-", "+"),
            literal("dash", "ok.tsx", "-", "+"),
        ]);
        let reports = run_patch_set(&set, dir.path(), WriteMode::Apply);

        assert!(matches!(reports[0], Err(RunError::Io { .. })));
        assert!(reports[1].as_ref().unwrap().written);
    }

    #[test]
    fn held_lock_blocks_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.tsx");
        fs::write(&path, "A-B").unwrap();
        fs::write(dir.path().join("page.tsx.lock"), "").unwrap();

        let set = set_of(vec![literal("dash", "page.tsx", "-", "+")]);
        let reports = run_patch_set(&set, dir.path(), WriteMode::Apply);

        assert!(matches!(reports[0], Err(RunError::Locked { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "A-B");
    }

    #[test]
    fn lock_guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("page.tsx");
        fs::write(&target, "x").unwrap();

        {
            let _guard = LockGuard::acquire(&target).unwrap();
            assert!(dir.path().join("page.tsx.lock").exists());
            assert!(matches!(
                LockGuard::acquire(&target),
                Err(RunError::Locked { .. })
            ));
        }
        assert!(!dir.path().join("page.tsx.lock").exists());
    }

    #[test]
    fn groups_preserve_declared_order_within_a_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page.tsx"), "start then call-site").unwrap();

        // Second spec's marker is the output of the first.
        let one = literal("one", "page.tsx", "start", "HANDLER");
        let mut two = literal("two", "page.tsx", "call-site", "call HANDLER now");
        two.marker = Some("call HANDLER".to_string());

        let set = set_of(vec![one, two]);
        let reports = run_patch_set(&set, dir.path(), WriteMode::Apply);
        let report = reports[0].as_ref().unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].spec_id, "one");
        assert_eq!(report.results[1].spec_id, "two");
        assert_eq!(
            fs::read_to_string(dir.path().join("page.tsx")).unwrap(),
            "HANDLER then call HANDLER now"
        );

        // Re-run is a no-op.
        std::thread::sleep(Duration::from_millis(5));
        let reports = run_patch_set(&set, dir.path(), WriteMode::Apply);
        let report = reports[0].as_ref().unwrap();
        assert!(!report.changed);
    }
}
