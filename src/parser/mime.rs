//! MIME normalization: body selection and attachment enumeration.
//!
//! A raw record is parsed with `mail-parser`, its part tree is classified once
//! into `PartNode`s, then flattened in document order into a
//! [`NormalizedMessage`] ready for the attachment persister and the PDF renderer.

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::model::attachment::{AttachmentContent, AttachmentDescriptor};
use crate::model::message::{BodySource, NormalizedMessage, NO_BODY_PLACEHOLDER};
use crate::parser::html::html_to_text;
use crate::parser::mbox::RawMessageRecord;

/// Maximum depth for recursive multipart descent (adversarial input guard).
const MAX_DEPTH: usize = 10;

/// Turns raw records into normalized messages.
pub struct Normalizer {
    parser: MessageParser,
    size_ceiling: u64,
}

impl Normalizer {
    /// Attachments whose decoded size exceeds `size_ceiling` bytes are
    /// recorded as too large and their payload is not retained.
    pub fn new(size_ceiling: u64) -> Self {
        Self {
            parser: MessageParser::default(),
            size_ceiling,
        }
    }

    /// Normalize one record. `sequence` is its 1-based position in the archive.
    pub fn normalize(&self, record: &RawMessageRecord, sequence: u64) -> Result<NormalizedMessage> {
        let headers = record.headers().message_headers();

        let message = self.parser.parse(record.data.as_slice()).ok_or_else(|| {
            ConvertError::MessageUnparseable(format!(
                "no MIME structure in record at offset {}",
                record.offset
            ))
        })?;

        let tree = PartNode::resolve(&message, 0, 0);
        let mut flat = Flattened::default();
        flatten(&tree, self.size_ceiling, &mut flat);

        let (body_text, body_source) = flat.select_body();
        debug!(
            sequence,
            body = ?body_source,
            attachments = flat.attachments.len(),
            "Normalized message"
        );

        Ok(NormalizedMessage {
            sequence,
            headers,
            body_text,
            body_source,
            attachments: flat.attachments,
            notes: flat.notes,
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SIZE_CEILING)
    }
}

/// One MIME part, classified once at parse time.
enum PartNode<'a> {
    /// Inline `text/plain` body text.
    Text { text: &'a str, degraded: bool },
    /// Inline `text/html` body text.
    Html { html: &'a str, degraded: bool },
    Attachment {
        filename: Option<&'a str>,
        mime_type: String,
        bytes: &'a [u8],
        unreadable: bool,
    },
    Container(Vec<PartNode<'a>>),
}

impl<'a> PartNode<'a> {
    /// Classify part `part_id` of `message` and, for containers, its children.
    fn resolve(message: &'a Message<'a>, part_id: usize, depth: usize) -> Self {
        let Some(part) = message.parts.get(part_id) else {
            return PartNode::Container(Vec::new());
        };

        let mime_type = mime_type_of(part);
        let filename = part.attachment_name();
        let explicit_attachment = filename.is_some() || is_attachment_disposition(part);
        let attachment = |bytes: &'a [u8], mime_type: String| PartNode::Attachment {
            filename,
            mime_type,
            bytes,
            unreadable: part.is_encoding_problem,
        };

        match &part.body {
            PartType::Multipart(children) => {
                if depth >= MAX_DEPTH {
                    warn!(part_id, "MIME nesting deeper than {MAX_DEPTH} levels, inner parts ignored");
                    return PartNode::Container(Vec::new());
                }
                PartNode::Container(
                    children
                        .iter()
                        .map(|child| Self::resolve(message, *child as usize, depth + 1))
                        .collect(),
                )
            }
            PartType::Text(text) if !explicit_attachment && mime_type == "text/plain" => {
                PartNode::Text {
                    text,
                    degraded: part.is_encoding_problem || text.contains('\u{FFFD}'),
                }
            }
            PartType::Html(html) if !explicit_attachment => PartNode::Html {
                html,
                degraded: part.is_encoding_problem || html.contains('\u{FFFD}'),
            },
            PartType::Text(text) | PartType::Html(text) => attachment(text.as_bytes(), mime_type),
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
                attachment(&bytes[..], mime_type)
            }
            PartType::Message(nested) => {
                attachment(&nested.raw_message[..], "message/rfc822".to_string())
            }
        }
    }
}

/// Body candidates and attachments gathered from a part tree.
#[derive(Default)]
struct Flattened {
    plain: Vec<String>,
    html: Vec<String>,
    attachments: Vec<AttachmentDescriptor>,
    notes: Vec<String>,
}

/// Depth-first, document-order flattening of a resolved part tree.
fn flatten(node: &PartNode<'_>, size_ceiling: u64, out: &mut Flattened) {
    match node {
        PartNode::Container(children) => {
            for child in children {
                flatten(child, size_ceiling, out);
            }
        }
        PartNode::Text { text, degraded } => {
            if *degraded {
                out.notes
                    .push(format!("text part {}: undecodable bytes replaced", out.plain.len() + 1));
            }
            out.plain.push(normalize_newlines(text));
        }
        PartNode::Html { html, degraded } => {
            if *degraded {
                out.notes
                    .push(format!("html part {}: undecodable bytes replaced", out.html.len() + 1));
            }
            out.html.push(html.to_string());
        }
        PartNode::Attachment {
            filename,
            mime_type,
            bytes,
            unreadable,
        } => {
            let index = out.attachments.len() + 1;
            let byte_size = bytes.len() as u64;
            let content = if *unreadable {
                out.notes
                    .push(format!("attachment {index}: transfer encoding could not be decoded"));
                AttachmentContent::Unreadable
            } else if byte_size > size_ceiling {
                AttachmentContent::TooLarge
            } else {
                AttachmentContent::Bytes(bytes.to_vec())
            };
            out.attachments.push(AttachmentDescriptor {
                original_filename: filename.map(String::from),
                mime_type: mime_type.clone(),
                byte_size,
                content,
            });
        }
    }
}

impl Flattened {
    /// Plain text wins if any inline text/plain part has content; otherwise the
    /// first HTML part is flattened; otherwise the placeholder.
    fn select_body(&self) -> (String, BodySource) {
        if self.plain.iter().any(|t| !t.trim().is_empty()) {
            let joined = self
                .plain
                .iter()
                .map(|t| t.trim_end())
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");
            return (joined, BodySource::Plain);
        }

        if let Some(html) = self.html.first() {
            let text = html_to_text(html);
            if !text.is_empty() {
                return (text, BodySource::Html);
            }
        }

        (NO_BODY_PLACEHOLDER.to_string(), BodySource::Missing)
    }
}

/// Lowercased `type/subtype`; parts without a Content-Type get the RFC 2045
/// default for their decoded kind.
fn mime_type_of(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        },
        None => match &part.body {
            PartType::Html(_) => "text/html".to_string(),
            PartType::Text(_) => "text/plain".to_string(),
            PartType::Message(_) => "message/rfc822".to_string(),
            _ => "application/octet-stream".to_string(),
        },
    }
}

fn is_attachment_disposition(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
        .unwrap_or(false)
}

/// Convert CRLF and lone CR line endings to LF.
fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}
