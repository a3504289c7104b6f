//! The per-run conversion log.
//!
//! One line per message outcome plus archive-level events, appended to
//! `conversion.log` and flushed line by line:
//!
//! ```text
//! 2024-05-01T10:00:00.123Z [archive=inbox] seq=0003 outcome=failed stage=render cause="disk full"
//! 2024-05-01T10:00:01.456Z [archive=inbox] event=done processed=41 failed=1 not_processed=0
//! ```
//!
//! Every line is mirrored to `tracing`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::error::{ConvertError, Result};

/// Result of one message, as written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Failed,
    /// Part of the message was not written (an attachment over the ceiling).
    Skipped,
    /// Never attempted because the run was aborted.
    NotProcessed,
    /// A recovered condition worth recording.
    Info,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::NotProcessed => "not_processed",
            Self::Info => "info",
        })
    }
}

/// Append-only writer for `conversion.log`.
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Open (or create) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ConvertError::io(&path, e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log one message outcome. A `cause` field is always quoted.
    pub fn message(&mut self, archive: &str, seq: &str, outcome: Outcome, fields: &[(&str, String)]) {
        let mut body = format!("seq={seq} outcome={outcome}");
        push_fields(&mut body, fields);

        match outcome {
            Outcome::Failed | Outcome::NotProcessed => warn!(archive, "{body}"),
            _ => info!(archive, "{body}"),
        }
        self.write_line(archive, &body);
    }

    /// Log an archive-level event (`open`, `done`, `fatal`, `aborted`).
    pub fn event(&mut self, archive: &str, event: &str, fields: &[(&str, String)]) {
        let mut body = format!("event={event}");
        push_fields(&mut body, fields);

        match event {
            "fatal" | "aborted" => warn!(archive, "{body}"),
            _ => info!(archive, "{body}"),
        }
        self.write_line(archive, &body);
    }

    fn write_line(&mut self, archive: &str, body: &str) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format!("{timestamp} [archive={archive}] {body}\n");
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush());
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Failed to write conversion log");
        }
    }
}

fn push_fields(body: &mut String, fields: &[(&str, String)]) {
    for (key, value) in fields {
        body.push(' ');
        body.push_str(key);
        body.push('=');
        if *key == "cause" || needs_quotes(value) {
            body.push_str(&quote(value));
        } else {
            body.push_str(value);
        }
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"' || c == '=')
}

/// Double-quote `value`, escaping quotes, backslashes and line breaks.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
