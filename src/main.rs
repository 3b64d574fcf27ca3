use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use textpatch::config::load_from_path;
use textpatch::io::{run_patch_set, FileReport, RunError, WriteMode};
use textpatch::patcher::Outcome;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "textpatch")]
#[command(about = "Idempotent text patching for source files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to their target files
    Apply {
        /// Target root directory (defaults to $TEXTPATCH_ROOT, then cwd)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Specific patch file to apply (otherwise applies all in patches/)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Emit a machine-readable JSON summary instead of console output
        #[arg(long)]
        json: bool,
    },

    /// Check status of patches without applying
    Status {
        /// Target root directory (defaults to $TEXTPATCH_ROOT, then cwd)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Specific patch file to check
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// List available patch sets and their specs
    List {
        /// Target root directory (defaults to $TEXTPATCH_ROOT, then cwd)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Specific patch file to list
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            root,
            patches,
            dry_run,
            diff,
            json,
        } => cmd_apply(root, patches, dry_run, diff, json),

        Commands::Status { root, patches } => cmd_status(root, patches),

        Commands::List { root, patches } => cmd_list(root, patches),
    }
}

/// Resolve the target root directory.
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. TEXTPATCH_ROOT environment variable
/// 3. Current working directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_root {
        return Ok(path.canonicalize()?);
    }

    if let Ok(env_path) = env::var("TEXTPATCH_ROOT") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: TEXTPATCH_ROOT is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    Ok(env::current_dir()?.canonicalize()?)
}

/// Discover all .toml patch files in a patches/ directory.
///
/// Discovery order:
/// 1. `<root>/patches` (keeps patch files alongside the target).
/// 2. `./patches` relative to the current working directory.
fn discover_patch_files(root: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches_dir = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let root_patches_dir = root.join("patches");

    let candidate_dirs: Vec<PathBuf> = std::iter::once(root_patches_dir.clone())
        .chain(cwd_patches_dir)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml patch files found in either ./patches or {}/patches",
        root.display()
    )
}

fn patch_files_to_load(root: &Path, explicit: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    match explicit {
        Some(path) => Ok(vec![path]),
        None => discover_patch_files(root),
    }
}

/// Show unified diff between original and patched content.
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

struct Totals {
    applied: usize,
    skipped: usize,
    not_found: usize,
    failed: usize,
}

impl Totals {
    fn new() -> Self {
        Self {
            applied: 0,
            skipped: 0,
            not_found: 0,
            failed: 0,
        }
    }

    fn record(&mut self, report: &FileReport) {
        for result in &report.results {
            match &result.outcome {
                Outcome::Applied => self.applied += 1,
                Outcome::SkippedAlreadyPresent => self.skipped += 1,
                Outcome::NotFound => self.not_found += 1,
                Outcome::Failed { .. } => self.failed += 1,
            }
        }
    }
}

fn print_report(report: &FileReport, dry_run: bool, show_diff: bool) {
    for result in &report.results {
        match &result.outcome {
            Outcome::Applied => {
                let verb = if dry_run { "Would apply" } else { "Applied" };
                println!(
                    "{} {}: {} to {} ({} occurrence{})",
                    "✓".green(),
                    result.spec_id,
                    verb,
                    report.file.display(),
                    result.occurrences_replaced,
                    if result.occurrences_replaced == 1 {
                        ""
                    } else {
                        "s"
                    }
                );
            }
            Outcome::SkippedAlreadyPresent => {
                println!(
                    "{} {}: Already present in {}",
                    "⊙".yellow(),
                    result.spec_id,
                    report.file.display()
                );
            }
            Outcome::NotFound => {
                println!(
                    "{} {}: Pattern not found in {}",
                    "⊘".cyan(),
                    result.spec_id,
                    report.file.display()
                );
            }
            Outcome::Failed { reason } => {
                eprintln!("{} {}: Failed - {}", "✗".red(), result.spec_id, reason);
                eprintln!("  File: {}", report.file.display());
            }
        }
    }

    if show_diff && report.changed {
        display_diff(&report.file, &report.original, &report.patched);
    }
}

fn cmd_apply(
    root: Option<PathBuf>,
    patches: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
    json_output: bool,
) -> Result<()> {
    let root = resolve_root(root)?;
    let patch_files = patch_files_to_load(&root, patches)?;

    let mode = if dry_run {
        WriteMode::DryRun
    } else {
        WriteMode::Apply
    };

    let mut totals = Totals::new();
    let mut file_errors = 0;
    let mut sets_json = Vec::new();

    if !json_output {
        println!("Target root: {}", root.display());
        println!();
    }

    for patch_file in patch_files {
        let set = load_from_path(&patch_file)?;

        if !json_output {
            println!("Loading patches from {}...", patch_file.display());
            if dry_run {
                println!("{}", "  [DRY RUN - no files will be modified]".cyan());
            }
        }

        let reports = run_patch_set(&set, &root, mode);
        let mut files_json = Vec::new();

        for report in &reports {
            match report {
                Ok(report) => {
                    totals.record(report);
                    if json_output {
                        files_json.push(serde_json::to_value(report)?);
                    } else {
                        print_report(report, dry_run, show_diff);
                    }
                }
                Err(e) => {
                    file_errors += 1;
                    if json_output {
                        let path = match e {
                            RunError::Io { path, .. } | RunError::Locked { path, .. } => path,
                        };
                        files_json.push(json!({
                            "file": path,
                            "error": e.to_string(),
                        }));
                    } else {
                        eprintln!("{} {}", "✗".red(), e);
                    }
                }
            }
        }

        if json_output {
            sets_json.push(json!({
                "set": set.meta.name,
                "source": patch_file,
                "files": files_json,
            }));
        } else {
            println!();
        }
    }

    if json_output {
        let summary = json!({
            "dry_run": dry_run,
            "sets": sets_json,
            "totals": {
                "applied": totals.applied,
                "skipped_already_present": totals.skipped,
                "not_found": totals.not_found,
                "failed": totals.failed,
                "file_errors": file_errors,
            },
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", "Summary:".bold());
        println!("  {} applied", format!("{}", totals.applied).green());
        println!(
            "  {} already present",
            format!("{}", totals.skipped).yellow()
        );
        println!("  {} not found", format!("{}", totals.not_found).cyan());
        println!("  {} failed", format!("{}", totals.failed).red());
        if file_errors > 0 {
            println!("  {} file errors", format!("{}", file_errors).red());
        }
    }

    // NotFound is a normal, forgiving outcome; only hard failures and I/O
    // errors produce a non-zero exit.
    if totals.failed > 0 || file_errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(root: Option<PathBuf>, patches: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let patch_files = patch_files_to_load(&root, patches)?;

    println!("{}", "Patch Status Report".bold());
    println!("Target root: {}", root.display());
    println!();

    let mut present = Vec::new();
    let mut pending = Vec::new();
    let mut not_found = Vec::new();
    let mut failed = Vec::new();

    for patch_file in patch_files {
        let set = load_from_path(&patch_file)?;
        let reports = run_patch_set(&set, &root, WriteMode::DryRun);

        for report in reports {
            match report {
                Ok(report) => {
                    for result in report.results {
                        match result.outcome {
                            Outcome::Applied => pending.push(result.spec_id),
                            Outcome::SkippedAlreadyPresent => present.push(result.spec_id),
                            Outcome::NotFound => not_found.push(result.spec_id),
                            Outcome::Failed { reason } => failed.push((result.spec_id, reason)),
                        }
                    }
                }
                Err(e) => failed.push(("<file>".to_string(), e.to_string())),
            }
        }
    }

    if !present.is_empty() {
        println!(
            "{} {} ({} specs)",
            "✓".green(),
            "ALREADY PRESENT".green().bold(),
            present.len()
        );
        for id in &present {
            println!("  - {}", id);
        }
        println!();
    }

    if !pending.is_empty() {
        println!(
            "{} {} ({} specs)",
            "⊙".yellow(),
            "WOULD APPLY".yellow().bold(),
            pending.len()
        );
        for id in &pending {
            println!("  - {}", id);
        }
        println!();
    }

    if !not_found.is_empty() {
        println!(
            "{} {} ({} specs)",
            "⊘".cyan(),
            "NOT FOUND".cyan().bold(),
            not_found.len()
        );
        for id in &not_found {
            println!("  - {}", id);
        }
        println!();
    }

    if !failed.is_empty() {
        println!(
            "{} {} ({} specs)",
            "✗".red(),
            "FAILED".red().bold(),
            failed.len()
        );
        for (id, reason) in &failed {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_list(root: Option<PathBuf>, patches: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let patch_files = patch_files_to_load(&root, patches)?;

    for patch_file in patch_files {
        let set = load_from_path(&patch_file)?;

        let name = if set.meta.name.is_empty() {
            patch_file.display().to_string()
        } else {
            set.meta.name.clone()
        };
        println!("{} ({})", name.bold(), patch_file.display());
        if let Some(description) = &set.meta.description {
            println!("  {}", description.dimmed());
        }

        for spec in &set.patches {
            let strategy = match &spec.matcher {
                textpatch::Match::Literal { .. } => "literal",
                textpatch::Match::Regex { .. } => "regex",
            };
            let required = if spec.required { " [required]" } else { "" };
            println!("  - {} ({} -> {}){}", spec.id, strategy, spec.file, required);
        }
        println!();
    }

    Ok(())
}
