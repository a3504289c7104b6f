//! Run orchestration: stream an archive through normalize → persist → render,
//! number every record, log every outcome, and escalate systemic failures.

pub mod batch;
pub mod log;

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ConvertOptions;
use crate::error::{ConvertError, Result};
use crate::export::attachment::{not_extracted, AttachmentPersister};
use crate::export::pdf;
use crate::model::attachment::{PersistOutcome, PersistResult};
use crate::naming::{archive_label, format_sequence, sequence_width, unique_labels, OutputLayout};
use crate::parser::mbox::{MboxReader, RawMessageRecord};
use crate::parser::mime::Normalizer;

use self::log::{Outcome, RunLog};

/// Lifecycle of one archive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Streaming,
    /// Every record was attempted.
    Done,
    /// The archive could not be read or the output could not be created.
    Fatal,
    /// Too many consecutive PDF failures; the rest was not processed.
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Fatal => "fatal",
            Self::Aborted => "aborted",
        }
    }
}

/// Progress hooks for a front end. All methods default to no-ops.
pub trait Progress {
    /// An archive with `total` records is about to be streamed.
    fn start(&self, _label: &str, _total: u64) {}
    /// `done` of `total` records have been handled.
    fn advance(&self, _done: u64, _total: u64) {}
    /// The archive run ended.
    fn finish(&self, _report: &RunReport) {}
}

/// Progress sink that reports nothing.
pub struct NoProgress;

impl Progress for NoProgress {}

/// One archive to convert and where its outputs go.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub path: PathBuf,
    /// Name used in log lines.
    pub label: String,
    pub layout: OutputLayout,
}

impl ArchiveJob {
    pub fn new(path: impl Into<PathBuf>, layout: OutputLayout) -> Self {
        let path = path.into();
        let label = layout
            .label
            .clone()
            .unwrap_or_else(|| archive_label(&path));
        Self { path, label, layout }
    }
}

/// Summary of one archive run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub archive: PathBuf,
    pub label: String,
    pub state: RunState,
    /// Records seen, including corrupt and unprocessed ones.
    pub messages: u64,
    pub processed: u64,
    pub failed: u64,
    pub not_processed: u64,
    pub attachments_saved: u64,
    pub attachments_skipped: u64,
    pub attachments_failed: u64,
    pub pdf_dir: PathBuf,
    pub attachments_dir: PathBuf,
    pub log_path: PathBuf,
    /// Cause of a `fatal` or `aborted` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    fn new(job: &ArchiveJob) -> Self {
        Self {
            archive: job.path.clone(),
            label: job.label.clone(),
            state: RunState::Init,
            messages: 0,
            processed: 0,
            failed: 0,
            not_processed: 0,
            attachments_saved: 0,
            attachments_skipped: 0,
            attachments_failed: 0,
            pdf_dir: job.layout.pdf_dir.clone(),
            attachments_dir: job.layout.attachments_dir.clone(),
            log_path: job.layout.log_path.clone(),
            error: None,
        }
    }

    /// Whether the run reached `Done`.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    fn count_attachments(&mut self, manifest: &[PersistResult]) {
        for result in manifest {
            match result.outcome {
                PersistOutcome::Saved { .. } => self.attachments_saved += 1,
                PersistOutcome::SkippedTooLarge { .. } | PersistOutcome::NotExtracted => {
                    self.attachments_skipped += 1
                }
                PersistOutcome::Unreadable | PersistOutcome::Failed { .. } => {
                    self.attachments_failed += 1
                }
            }
        }
    }
}

/// Mutable state of one archive run, owned by [`convert_archive`].
struct RunContext {
    next_sequence: u64,
    width: usize,
    consecutive_render_failures: u32,
    max_consecutive_failures: u32,
    report: RunReport,
}

impl RunContext {
    fn new(job: &ArchiveJob, options: &ConvertOptions) -> Self {
        Self {
            next_sequence: 1,
            width: sequence_width(0),
            consecutive_render_failures: 0,
            max_consecutive_failures: options.max_consecutive_failures.max(1),
            report: RunReport::new(job),
        }
    }

    /// Hand out the next sequence number. Every record takes one.
    fn next_sequence(&mut self) -> (u64, String) {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        self.report.messages += 1;
        (seq, format_sequence(seq, self.width))
    }

    fn state(&self) -> RunState {
        self.report.state
    }

    fn set_state(&mut self, state: RunState) {
        self.report.state = state;
    }
}

/// Why one message failed.
struct MessageFailure {
    stage: &'static str,
    cause: String,
}

impl MessageFailure {
    fn new(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            cause: err.to_string(),
        }
    }

    /// Failures that count toward run escalation.
    fn is_render(&self) -> bool {
        matches!(self.stage, "render" | "panic")
    }
}

/// A successfully rendered message.
struct MessageSuccess {
    pdf_name: String,
    manifest: Vec<PersistResult>,
    notes: Vec<String>,
}

/// Convert one archive. Never returns an error: an unreadable archive or
/// output directory ends the run in [`RunState::Fatal`], recorded in the report
/// and the log.
pub fn convert_archive(
    job: &ArchiveJob,
    options: &ConvertOptions,
    log: &mut RunLog,
    progress: &dyn Progress,
) -> RunReport {
    let mut ctx = RunContext::new(job, options);
    let label = job.label.as_str();
    log.event(label, "open", &[("path", job.path.display().to_string())]);

    let (total, reader) = match open_archive(job) {
        Ok(opened) => opened,
        Err(e) => {
            error!(archive = %job.path.display(), error = %e, "Cannot convert archive");
            ctx.set_state(RunState::Fatal);
            ctx.report.error = Some(e.to_string());
            log.event(label, "fatal", &[("cause", e.to_string())]);
            progress.finish(&ctx.report);
            return ctx.report;
        }
    };

    ctx.width = sequence_width(total);
    ctx.set_state(RunState::Streaming);
    progress.start(label, total);
    info!(archive = %job.path.display(), total, "Converting archive");

    let normalizer = Normalizer::new(options.size_ceiling);

    for item in reader {
        let (seq, seq_str) = ctx.next_sequence();

        if ctx.state() == RunState::Aborted {
            ctx.report.not_processed += 1;
            log.message(
                label,
                &seq_str,
                Outcome::NotProcessed,
                &[("cause", "run aborted after repeated PDF failures".to_string())],
            );
            progress.advance(seq, total);
            continue;
        }

        let result = match item {
            Err(e) => Err(MessageFailure::new("read", e)),
            Ok(record) => panic::catch_unwind(AssertUnwindSafe(|| {
                process_message(&record, seq, &seq_str, job, options, &normalizer)
            }))
            .unwrap_or_else(|payload| Err(MessageFailure::new("panic", panic_message(&*payload)))),
        };

        match result {
            Ok(success) => {
                ctx.consecutive_render_failures = 0;
                ctx.report.processed += 1;
                ctx.report.count_attachments(&success.manifest);
                log_success(log, label, &seq_str, &success);
            }
            Err(failure) => {
                ctx.report.failed += 1;
                log.message(
                    label,
                    &seq_str,
                    Outcome::Failed,
                    &[("stage", failure.stage.to_string()), ("cause", failure.cause.clone())],
                );
                if failure.is_render() {
                    ctx.consecutive_render_failures += 1;
                    if ctx.consecutive_render_failures >= ctx.max_consecutive_failures {
                        let cause = format!(
                            "{} consecutive PDF failures, last: {}",
                            ctx.consecutive_render_failures, failure.cause
                        );
                        error!(archive = %job.path.display(), %cause, "Aborting run");
                        ctx.set_state(RunState::Aborted);
                        ctx.report.error = Some(cause.clone());
                        log.event(label, "aborted", &[("cause", cause)]);
                    }
                }
            }
        }
        progress.advance(seq, total);
    }

    if ctx.state() == RunState::Streaming {
        ctx.set_state(RunState::Done);
    }
    let report = ctx.report;
    log.event(
        label,
        "done",
        &[
            ("state", report.state.as_str().to_string()),
            ("messages", report.messages.to_string()),
            ("processed", report.processed.to_string()),
            ("failed", report.failed.to_string()),
            ("not_processed", report.not_processed.to_string()),
            ("attachments_saved", report.attachments_saved.to_string()),
            ("attachments_skipped", report.attachments_skipped.to_string()),
        ],
    );
    progress.finish(&report);
    report
}

/// Count the records, open the stream, and create the PDF directory.
fn open_archive(job: &ArchiveJob) -> Result<(u64, MboxReader)> {
    let total = MboxReader::count_records(&job.path)?;
    let reader = MboxReader::open(&job.path)?;
    std::fs::create_dir_all(&job.layout.pdf_dir).map_err(|e| ConvertError::OutputDir {
        path: job.layout.pdf_dir.clone(),
        source: e,
    })?;
    Ok((total, reader))
}

fn process_message(
    record: &RawMessageRecord,
    seq: u64,
    seq_str: &str,
    job: &ArchiveJob,
    options: &ConvertOptions,
    normalizer: &Normalizer,
) -> std::result::Result<MessageSuccess, MessageFailure> {
    let message = normalizer
        .normalize(record, seq)
        .map_err(|e| MessageFailure::new("parse", e))?;

    let manifest = if options.skip_attachments {
        not_extracted(&message.attachments)
    } else {
        let prefix = job.layout.attachment_prefix(seq_str);
        AttachmentPersister::new(&job.layout.attachments_dir, prefix, options.size_ceiling)
            .persist_all(&message.attachments)
    };

    let pdf_path = job.layout.pdf_path(seq_str, &message.headers.subject);
    let summary = pdf::render(&message, &manifest, &pdf_path, &options.pdf)
        .map_err(|e| MessageFailure::new("render", e))?;

    let mut notes = message.notes;
    if summary.missing_glyphs > 0 {
        notes.push(format!(
            "{} character(s) have no glyph in font {}",
            summary.missing_glyphs,
            options.pdf.font.name()
        ));
    }

    let pdf_name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(MessageSuccess {
        pdf_name,
        manifest,
        notes,
    })
}

fn log_success(log: &mut RunLog, label: &str, seq: &str, success: &MessageSuccess) {
    let saved = success.manifest.iter().filter(|r| r.is_saved()).count();
    log.message(
        label,
        seq,
        Outcome::Ok,
        &[
            ("pdf", success.pdf_name.clone()),
            ("attachments", success.manifest.len().to_string()),
            ("saved", saved.to_string()),
        ],
    );

    for result in &success.manifest {
        match &result.outcome {
            PersistOutcome::SkippedTooLarge { size, ceiling } => log.message(
                label,
                seq,
                Outcome::Skipped,
                &[
                    ("attachment", result.display_name.clone()),
                    ("size", size.to_string()),
                    ("ceiling", ceiling.to_string()),
                    ("cause", "attachment exceeds size ceiling".to_string()),
                ],
            ),
            PersistOutcome::Failed { reason } => log.message(
                label,
                seq,
                Outcome::Failed,
                &[
                    ("stage", "attachment".to_string()),
                    ("attachment", result.display_name.clone()),
                    ("cause", reason.clone()),
                ],
            ),
            _ => {}
        }
    }

    for note in &success.notes {
        log.message(label, seq, Outcome::Info, &[("cause", note.clone())]);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Convert one archive into `output_dir` with the single-archive layout.
///
/// Fails only when the output directory or the run log cannot be created; an
/// unreadable archive is reported through [`RunState::Fatal`].
pub fn convert_single(
    input: &Path,
    output_dir: &Path,
    options: &ConvertOptions,
    progress: &dyn Progress,
) -> Result<RunReport> {
    create_output_dir(output_dir)?;
    let layout = OutputLayout::single(output_dir, options.attachments_dir.as_deref());
    let mut log = RunLog::open(&layout.log_path)?;
    let job = ArchiveJob::new(input, layout);
    Ok(convert_archive(&job, options, &mut log, progress))
}

/// Convert every archive under `input_dir` matching the configured glob, each
/// as an independent run with its own numbering. An unreadable archive does
/// not stop the others.
pub fn convert_batch(
    input_dir: &Path,
    output_dir: &Path,
    options: &ConvertOptions,
    progress: &dyn Progress,
) -> Result<Vec<RunReport>> {
    let archives = batch::discover_archives(input_dir, &options.glob_pattern)?;
    if archives.is_empty() {
        warn!(
            dir = %input_dir.display(),
            pattern = %options.glob_pattern,
            "No archives matched"
        );
        return Ok(Vec::new());
    }

    create_output_dir(output_dir)?;
    let mut log = RunLog::open(output_dir.join(crate::naming::RUN_LOG_NAME))?;
    let labels = unique_labels(&archives);

    let mut reports = Vec::with_capacity(archives.len());
    for (path, label) in archives.iter().zip(&labels) {
        let layout = OutputLayout::batch(output_dir, options.attachments_dir.as_deref(), label);
        let job = ArchiveJob::new(path, layout);
        reports.push(convert_archive(&job, options, &mut log, progress));
    }
    Ok(reports)
}

fn create_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ConvertError::OutputDir {
        path: dir.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_are_padded() {
        let layout = OutputLayout::single(Path::new("/out"), None);
        let job = ArchiveJob::new("/in/inbox.mbox", layout);
        let mut ctx = RunContext::new(&job, &ConvertOptions::default());
        ctx.width = sequence_width(12_345);
        assert_eq!(ctx.next_sequence(), (1, "00001".to_string()));
        assert_eq!(ctx.next_sequence(), (2, "00002".to_string()));
        assert_eq!(ctx.report.messages, 2);
        assert_eq!(job.label, "inbox");
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");
        let payload = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "code 7");
    }

    fn write_archive(path: &Path, count: usize) {
        let mut data = String::new();
        for i in 1..=count {
            data.push_str(&format!("From a@x Mon Jan  1 00:00:00 2024\nSubject: m{i}\n\nbody {i}\n\n"));
        }
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_render_failures_escalate_to_abort() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("inbox.mbox");
        write_archive(&archive, 8);

        let out = dir.path().join("out");
        let layout = OutputLayout::single(&out, None);
        // Directories squatting on the PDF names make every rename fail
        for i in 1..=8 {
            std::fs::create_dir_all(out.join(format!("000{i}_m{i}.pdf"))).unwrap();
        }

        let mut log = RunLog::open(&layout.log_path).unwrap();
        let job = ArchiveJob::new(&archive, layout);
        let options = ConvertOptions {
            max_consecutive_failures: 3,
            ..ConvertOptions::default()
        };
        let report = convert_archive(&job, &options, &mut log, &NoProgress);

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.messages, 8);
        assert_eq!(report.failed, 3);
        assert_eq!(report.not_processed, 5);
        assert_eq!(report.processed, 0);

        let content = std::fs::read_to_string(&report.log_path).unwrap();
        assert_eq!(content.matches("outcome=failed stage=render").count(), 3);
        assert_eq!(content.matches("outcome=not_processed").count(), 5);
        assert!(content.contains("seq=0008 outcome=not_processed"));
        assert!(content.contains("event=aborted"));
    }

    #[test]
    fn test_unwritable_pdf_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("inbox.mbox");
        write_archive(&archive, 2);

        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let mut layout = OutputLayout::single(&out, None);
        let blocker = out.join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        layout.pdf_dir = blocker.join("pdfs");

        let mut log = RunLog::open(&layout.log_path).unwrap();
        let job = ArchiveJob::new(&archive, layout);
        let report = convert_archive(&job, &ConvertOptions::default(), &mut log, &NoProgress);

        assert_eq!(report.state, RunState::Fatal);
        assert_eq!(report.messages, 0);
        assert!(report.error.is_some());
    }
}
