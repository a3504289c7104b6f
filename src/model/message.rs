//! Normalized message: the per-message state shared by the persister and renderer.

use super::attachment::AttachmentDescriptor;

/// Body used when a message has neither plain text nor HTML.
pub const NO_BODY_PLACEHOLDER: &str = "[no readable body]";

/// Title used when a message has no subject.
pub const NO_SUBJECT_TITLE: &str = "(no subject)";

/// Display strings for the header block. Missing headers are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub date: String,
}

/// Which body policy branch produced `body_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    Plain,
    Html,
    Missing,
}

/// One message after parsing, body selection, and attachment enumeration.
///
/// Lives only for the duration of one pipeline iteration.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    /// 1-based ordinal in archive order.
    pub sequence: u64,
    pub headers: MessageHeaders,
    /// Never empty: falls back to [`NO_BODY_PLACEHOLDER`].
    pub body_text: String,
    pub body_source: BodySource,
    pub attachments: Vec<AttachmentDescriptor>,
    /// Recovered decoding substitutions, reported as informational log lines.
    pub notes: Vec<String>,
}

impl NormalizedMessage {
    /// The document title: the subject, or [`NO_SUBJECT_TITLE`].
    pub fn title(&self) -> &str {
        let subject = self.headers.subject.trim();
        if subject.is_empty() {
            NO_SUBJECT_TITLE
        } else {
            subject
        }
    }
}
