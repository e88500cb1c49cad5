use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use serde_json::{Value as JsonValue, json};

mod batch;
mod codec;
mod encoding;
mod error;
mod files;
mod line_endings;
mod logging;
mod mutator;
mod run;

use codec::{Codec, DEFAULT_LEGACY_LABEL};
use files::{FilenamePattern, WalkOptions, collect_candidates};
use mutator::{BackupStatus, MutateOptions};
use run::{FileOutcome, ReplacementRequest, RunEvent, RunOptions, RunSummary};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Replace(cmd) => handle_replace(cmd),
        Command::Batch(cmd) => handle_batch(cmd),
        Command::Detect(cmd) => handle_detect(cmd),
        Command::Log(cmd) => handle_log(cmd),
    }
}

fn handle_replace(cmd: ReplaceCommand) -> Result<()> {
    let search = resolve_text(cmd.find.as_deref(), cmd.find_file.as_deref())?;
    let replace = resolve_text(cmd.replacement.as_deref(), cmd.with_file.as_deref())?;
    let request = ReplacementRequest::new(&cmd.root, &cmd.name, &search, &replace)?;
    let Some(summary) = run_request(request, &cmd.common)? else {
        bail!("run aborted");
    };
    if summary.has_failures() {
        bail!(
            "run finished with {} failed file(s) and {} unreadable entr(ies)",
            summary.errors,
            summary.walk_errors
        );
    }
    Ok(())
}

fn handle_batch(cmd: BatchCommand) -> Result<()> {
    let BatchCommand { common, plan } = cmd;
    let batch_plan = batch::load_plan(&plan)?;
    let total = batch_plan.steps.len();
    let mut failures = 0usize;
    for (idx, step) in batch_plan.steps.iter().enumerate() {
        if !common.json {
            println!("\n=== Batch Step {}/{}: {} ===", idx + 1, total, step.root.display());
        }
        let request = step.request()?;
        let merged = merge_common(&common, step);
        let Some(summary) = run_request(request, &merged)? else {
            bail!("batch step {} aborted", idx + 1);
        };
        failures += summary.errors + summary.walk_errors;
    }
    if failures > 0 {
        bail!("batch finished with {failures} failure(s)");
    }
    Ok(())
}

fn handle_detect(cmd: DetectCommand) -> Result<()> {
    let codec = Codec::new(Some(cmd.legacy_encoding.as_str()))?;
    let pattern = FilenamePattern::parse(&cmd.name)?;
    let walk = WalkOptions {
        skip_hidden: cmd.skip_hidden,
        exclude: cmd.exclude.clone(),
    };
    let candidates = collect_candidates(&cmd.root, &pattern, &walk)?;
    if !cmd.json {
        println!("encoding strategy: {}", codec.describe());
    }
    for path in &candidates.files {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("warning: could not read {}: {err}", path.display());
                continue;
            }
        };
        let kind = encoding::detect(&bytes);
        if cmd.json {
            let row = json!({
                "path": path.display().to_string(),
                "encoding": kind,
                "bytes": bytes.len(),
            });
            println!("{}", serde_json::to_string(&row)?);
        } else {
            println!("{:<12} {}", kind.to_string(), path.display());
        }
    }
    for err in &candidates.errors {
        eprintln!("warning: skipped during traversal: {err}");
    }
    Ok(())
}

fn handle_log(cmd: LogCommand) -> Result<()> {
    let entries = logging::read_recent(&cmd.file, cmd.tail)?;
    if entries.is_empty() {
        println!("change log is empty.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "[{}] {:<10} {:>4} {:<12} {}",
            entry.timestamp,
            entry.action,
            entry.replacements,
            entry.encoding.as_deref().unwrap_or("-"),
            entry.path
        );
        if let Some(message) = entry.message {
            println!("    {message}");
        }
    }
    Ok(())
}

/// Starts one run on the worker thread and renders its events as they
/// arrive. `None` means the run aborted before touching any file.
fn run_request(request: ReplacementRequest, common: &CommonArgs) -> Result<Option<RunSummary>> {
    let options = common.run_options()?;
    if !common.json {
        print_run_summary(&request, common, &options);
    }
    let handle = run::spawn(request, options).context("starting worker thread")?;
    for event in handle.events() {
        if let (Some(log), RunEvent::FileFinished(outcome)) = (&common.change_log, &event) {
            if let Err(err) = logging::record_outcome(log, outcome, common.dry_run) {
                eprintln!("warning: could not update change log: {err:#}");
            }
        }
        if common.json {
            println!("{}", serde_json::to_string(&event_to_json(&event))?);
        } else {
            print_event(&event, common.dry_run);
        }
    }
    Ok(handle.join()?)
}

fn print_run_summary(request: &ReplacementRequest, common: &CommonArgs, options: &RunOptions) {
    println!("root: {}", request.root.display());
    println!("files: {}", request.pattern);
    println!("mode: {}", if common.dry_run { "dry-run" } else { "apply" });
    println!("encoding strategy: {}", options.codec.describe());
    if common.skip_hidden {
        println!("hidden entries skipped");
    }
    if !common.exclude.is_empty() {
        println!("exclude globs: {:?}", common.exclude);
    }
    if common.allow_lossy {
        println!("lossy rewrites allowed");
    }
    if let Some(log) = &common.change_log {
        println!("change log: {}", log.display());
    }
    println!(
        "find: {} chars, replace with: {} chars",
        request.search.chars().count(),
        request.replace.chars().count()
    );
    println!("---");
}

fn print_event(event: &RunEvent, dry_run: bool) {
    match event {
        RunEvent::Started { .. } => println!("--- Starting processing ---"),
        RunEvent::FileStarted { path } => println!("Processing: {}", path.display()),
        RunEvent::FileFinished(outcome) => print_outcome(outcome, dry_run),
        RunEvent::Warning { path, message } => match path {
            Some(path) => eprintln!("warning: {}: {message}", path.display()),
            None => eprintln!("warning: {message}"),
        },
        RunEvent::Summary(summary) => {
            println!("\n--- Summary ---");
            println!("Files processed: {}", summary.files_processed);
            println!("Files changed: {}", summary.files_changed);
            println!("Total replacements: {}", summary.total_replacements);
            if summary.has_failures() {
                println!(
                    "Errors: {} file(s), {} unreadable entr(ies)",
                    summary.errors, summary.walk_errors
                );
            }
        }
        RunEvent::Aborted(err) => eprintln!("ERROR: {err}"),
        RunEvent::Finished => println!("--- Processing finished ---"),
    }
}

fn print_outcome(outcome: &FileOutcome, dry_run: bool) {
    let report = match &outcome.result {
        Ok(report) => report,
        Err(err) => {
            println!(" -> ERROR: {err}");
            return;
        }
    };
    if report.replacements == 0 {
        println!(" -> Text not found.");
        return;
    }
    match &report.backup {
        Some(BackupStatus::Created(bak)) => println!(" -> Backup created: {}", bak.display()),
        Some(BackupStatus::Failed(err)) => println!(" -> Warning: {err}"),
        None => {}
    }
    if report.lossy_decode {
        println!(" -> Warning: undecodable bytes were replaced with U+FFFD");
    }
    if report.lossy_encode {
        println!(
            " -> Warning: some characters have no {} representation and were written as '?'",
            report.encoding
        );
    }
    if dry_run {
        println!(" -> Would replace: {} occurrences.", report.replacements);
    } else {
        println!(" -> Replaced: {} occurrences.", report.replacements);
    }
}

fn event_to_json(event: &RunEvent) -> JsonValue {
    match event {
        RunEvent::Started { root, pattern } => json!({
            "event": "started",
            "root": root.display().to_string(),
            "pattern": pattern,
        }),
        RunEvent::FileStarted { path } => json!({
            "event": "file_started",
            "path": path.display().to_string(),
        }),
        RunEvent::FileFinished(outcome) => {
            let path = outcome.path.display().to_string();
            match &outcome.result {
                Ok(report) => {
                    let (backup, backup_error) = match &report.backup {
                        Some(BackupStatus::Created(bak)) => {
                            (Some(bak.display().to_string()), None)
                        }
                        Some(BackupStatus::Failed(err)) => (None, Some(err.to_string())),
                        None => (None, None),
                    };
                    json!({
                        "event": "file_finished",
                        "path": path,
                        "replacements": report.replacements,
                        "encoding": report.encoding,
                        "bom": report.had_bom,
                        "written": report.written,
                        "backup": backup,
                        "backup_error": backup_error,
                        "lossy_decode": report.lossy_decode,
                        "lossy_encode": report.lossy_encode,
                    })
                }
                Err(err) => json!({
                    "event": "file_finished",
                    "path": path,
                    "error": err.to_string(),
                }),
            }
        }
        RunEvent::Warning { path, message } => json!({
            "event": "warning",
            "path": path.as_ref().map(|p| p.display().to_string()),
            "message": message,
        }),
        RunEvent::Summary(summary) => json!({
            "event": "summary",
            "summary": summary,
        }),
        RunEvent::Aborted(err) => json!({
            "event": "aborted",
            "error": err.to_string(),
        }),
        RunEvent::Finished => json!({ "event": "finished" }),
    }
}

/// Inline text wins; text read from a file loses one trailing line break,
/// which editors add on save.
fn resolve_text(inline: Option<&str>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = inline {
        return Ok(text.to_string());
    }
    let Some(path) = file else {
        return Ok(String::new());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let trimmed = text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(&text);
    Ok(trimmed.to_string())
}

fn merge_common(base: &CommonArgs, step: &batch::PlanStep) -> CommonArgs {
    let mut merged = base.clone();
    if let Some(label) = &step.legacy_encoding {
        merged.legacy_encoding = label.clone();
    }
    if let Some(dry_run) = step.dry_run {
        merged.dry_run = dry_run;
    }
    if let Some(allow_lossy) = step.allow_lossy {
        merged.allow_lossy = allow_lossy;
    }
    if let Some(skip_hidden) = step.skip_hidden {
        merged.skip_hidden = skip_hidden;
    }
    if let Some(exclude) = &step.exclude {
        merged.exclude = exclude.clone();
    }
    merged
}

#[derive(Debug, Parser)]
#[command(
    name = "bulkreplace",
    version,
    about = "Recursive in-place find and replace that keeps each file's encoding"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace literal text in every matching file under a folder.
    Replace(ReplaceCommand),
    /// Run the replacements listed in a YAML or JSON plan, one after another.
    Batch(BatchCommand),
    /// Print the detected encoding of every matching file.
    Detect(DetectCommand),
    /// Show the most recent change log entries.
    Log(LogCommand),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    #[arg(long = "legacy-encoding", value_name = "LABEL", default_value = DEFAULT_LEGACY_LABEL)]
    legacy_encoding: String,
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long = "allow-lossy", action = ArgAction::SetTrue)]
    allow_lossy: bool,
    #[arg(long = "skip-hidden", action = ArgAction::SetTrue)]
    skip_hidden: bool,
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    #[arg(long = "change-log", value_name = "FILE", value_hint = ValueHint::FilePath)]
    change_log: Option<PathBuf>,
}

impl CommonArgs {
    fn run_options(&self) -> Result<RunOptions> {
        Ok(RunOptions {
            codec: Codec::new(Some(self.legacy_encoding.as_str()))?,
            walk: WalkOptions {
                skip_hidden: self.skip_hidden,
                exclude: self.exclude.clone(),
            },
            mutate: MutateOptions {
                dry_run: self.dry_run,
                allow_lossy: self.allow_lossy,
            },
        })
    }
}

#[derive(Debug, Args)]
struct ReplaceCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    root: PathBuf,
    /// Exact file name, or `*.ext` to match by extension.
    #[arg(long, value_name = "NAME")]
    name: String,
    #[arg(
        long,
        value_name = "TEXT",
        allow_hyphen_values = true,
        conflicts_with = "find_file",
        required_unless_present = "find_file"
    )]
    find: Option<String>,
    #[arg(long = "find-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    find_file: Option<PathBuf>,
    #[arg(
        long = "with",
        value_name = "TEXT",
        allow_hyphen_values = true,
        conflicts_with = "with_file"
    )]
    replacement: Option<String>,
    #[arg(long = "with-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    with_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct BatchCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "PLAN", value_hint = ValueHint::FilePath)]
    plan: PathBuf,
}

#[derive(Debug, Args)]
struct DetectCommand {
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    root: PathBuf,
    #[arg(long, value_name = "NAME")]
    name: String,
    #[arg(long = "legacy-encoding", value_name = "LABEL", default_value = DEFAULT_LEGACY_LABEL)]
    legacy_encoding: String,
    #[arg(long = "skip-hidden", action = ArgAction::SetTrue)]
    skip_hidden: bool,
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long = "file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    file: PathBuf,
    #[arg(long = "tail", default_value_t = 20)]
    tail: usize,
}
