use std::any::Any;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::codec::Codec;
use crate::error::{FileError, RequestError, RunError};
use crate::files::{FilenamePattern, WalkOptions, collect_candidates};
use crate::line_endings::str_to_lf;
use crate::mutator::{FileReport, MutateOptions, process_file};

/// Everything a caller supplies for one run. Search and replacement text are
/// stored in LF-only form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRequest {
    pub root: PathBuf,
    pub pattern: String,
    pub search: String,
    pub replace: String,
}

impl ReplacementRequest {
    pub fn new(
        root: impl Into<PathBuf>,
        pattern: impl Into<String>,
        search: &str,
        replace: &str,
    ) -> Result<Self, RequestError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(RequestError::EmptyPattern);
        }
        let replace = str_to_lf(replace);
        if replace.ends_with('\n') {
            return Err(RequestError::TrailingNewline);
        }
        Ok(Self {
            root: root.into(),
            pattern,
            search: str_to_lf(search).into_owned(),
            replace: replace.into_owned(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub codec: Codec,
    pub walk: WalkOptions,
    pub mutate: MutateOptions,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<FileReport, FileError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files_processed: usize,
    pub files_changed: usize,
    pub not_found: usize,
    pub errors: usize,
    pub walk_errors: usize,
    pub total_replacements: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        self.files_processed += 1;
        match &outcome.result {
            Ok(report) if report.replacements == 0 => self.not_found += 1,
            Ok(report) => {
                self.files_changed += 1;
                self.total_replacements += report.replacements;
            }
            Err(_) => self.errors += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.errors > 0 || self.walk_errors > 0
    }
}

/// Progress messages, in the order they happen. For every file the worker
/// sends `FileStarted` before the matching `FileFinished`. `Finished` is
/// always the last event of a run.
#[derive(Debug)]
pub enum RunEvent {
    Started { root: PathBuf, pattern: String },
    FileStarted { path: PathBuf },
    FileFinished(FileOutcome),
    Warning { path: Option<PathBuf>, message: String },
    Summary(RunSummary),
    Aborted(RunError),
    Finished,
}

/// A run executing on its own worker thread.
pub struct RunHandle {
    events: Receiver<RunEvent>,
    worker: JoinHandle<Option<RunSummary>>,
}

impl RunHandle {
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    /// Waits for the worker. `Ok(None)` means the run aborted and the reason
    /// was already sent as `RunEvent::Aborted`.
    pub fn join(self) -> Result<Option<RunSummary>, RunError> {
        self.worker
            .join()
            .map_err(|payload| RunError::WorkerPanicked(panic_message(payload.as_ref())))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Starts the run on a background thread and hands back the event stream.
pub fn spawn(request: ReplacementRequest, options: RunOptions) -> io::Result<RunHandle> {
    let (sender, events) = mpsc::channel();
    let worker = thread::Builder::new()
        .name("bulkreplace-worker".into())
        .spawn(move || {
            let summary = match execute(&request, &options, &sender) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    let _ = sender.send(RunEvent::Aborted(err));
                    None
                }
            };
            let _ = sender.send(RunEvent::Finished);
            summary
        })?;
    Ok(RunHandle { events, worker })
}

/// Runs on the calling thread. Only root/pattern problems abort; every
/// per-file failure becomes a `FileOutcome` and the walk continues.
pub fn execute(
    request: &ReplacementRequest,
    options: &RunOptions,
    events: &Sender<RunEvent>,
) -> Result<RunSummary, RunError> {
    let pattern = FilenamePattern::parse(&request.pattern)?;
    let candidates = collect_candidates(&request.root, &pattern, &options.walk)?;
    emit(
        events,
        RunEvent::Started {
            root: request.root.clone(),
            pattern: pattern.to_string(),
        },
    );

    for err in &candidates.errors {
        emit(
            events,
            RunEvent::Warning {
                path: err.path().map(Path::to_path_buf),
                message: format!("skipped during traversal: {err}"),
            },
        );
    }

    let mut summary = process_all(candidates.files, request, options, events);
    summary.walk_errors = candidates.errors.len();
    emit(events, RunEvent::Summary(summary));
    Ok(summary)
}

/// Processes `paths` one after another in the given order.
pub fn process_all(
    paths: impl IntoIterator<Item = PathBuf>,
    request: &ReplacementRequest,
    options: &RunOptions,
    events: &Sender<RunEvent>,
) -> RunSummary {
    let search: Vec<u16> = request.search.encode_utf16().collect();
    let replace: Vec<u16> = request.replace.encode_utf16().collect();
    let mut summary = RunSummary::default();

    for path in paths {
        emit(events, RunEvent::FileStarted { path: path.clone() });
        let result = process_file(&path, &search, &replace, &options.codec, &options.mutate);
        let outcome = FileOutcome { path, result };
        summary.record(&outcome);
        emit(events, RunEvent::FileFinished(outcome));
    }

    summary
}

// The receiver may already be gone; the run still completes.
fn emit(events: &Sender<RunEvent>, event: RunEvent) {
    let _ = events.send(event);
}
