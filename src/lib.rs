//! Textpatch: idempotent text patching for source files
//!
//! Applies a named, ordered set of text transformations to target files,
//! exactly once each. Every patch spec pairs a detector (its idempotence
//! marker) with an applier (a literal or regex substitution), so re-running
//! the tool against a partially patched file is always safe.
//!
//! # Architecture
//!
//! The [`patcher`] module is pure: it transforms an in-memory content blob
//! and reports one [`PatchResult`] per spec. Span discovery lives in
//! [`matcher`], replacement rendering in [`template`], and everything that
//! touches the filesystem (atomic writes, advisory locking) in [`io`].
//!
//! # Safety
//!
//! - Idempotence markers are evaluated against current content, so later
//!   specs see the effects of earlier ones
//! - Atomic file writes (tempfile + fsync + rename)
//! - Files are rewritten only when their content actually changed
//! - Advisory lock over the read-modify-write window
//! - Line-ending style (LF vs CRLF) is preserved end to end
//!
//! # Example
//!
//! ```
//! use textpatch::{patcher, Match, PatchSpec, Replace};
//!
//! let spec = PatchSpec {
//!     id: "dash-to-plus".to_string(),
//!     file: "page.tsx".to_string(),
//!     matcher: Match::Literal { text: "-".to_string() },
//!     replace: Replace { text: "+".to_string() },
//!     marker: Some("A+B".to_string()),
//!     max_applications: 1,
//!     required: false,
//!     verify: None,
//! };
//!
//! let (patched, results) = patcher::apply("A-B", &[&spec]);
//! assert_eq!(patched, "A+B");
//! assert_eq!(results[0].occurrences_replaced, 1);
//! ```

pub mod config;
pub mod io;
pub mod matcher;
pub mod patcher;
pub mod template;

// Re-exports
pub use config::{
    load_from_path, load_from_str, ConfigError, Match, Metadata, PatchSet, PatchSpec, Replace,
    ValidationError, Verify,
};
pub use io::{run_patch_set, FileReport, LockGuard, RunError, WriteMode};
pub use matcher::{LineEnding, MatchError, MatchLocation};
pub use patcher::{apply, Outcome, PatchResult};
pub use template::TemplateError;
