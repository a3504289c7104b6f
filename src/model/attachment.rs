//! Attachment descriptors and persistence outcomes.

use serde::Serialize;

/// Display name used for parts that could not be decoded.
pub const UNREADABLE_PART_NAME: &str = "[unreadable part]";

/// Payload state of an attachment, fixed at normalization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    /// Decoded bytes, at or below the size ceiling.
    Bytes(Vec<u8>),
    /// Above the size ceiling; the payload was never copied.
    TooLarge,
    /// The part's transfer encoding could not be decoded.
    Unreadable,
}

/// One attachment found in a message, in tree order.
#[derive(Debug, Clone)]
pub struct AttachmentDescriptor {
    /// Filename from `Content-Disposition` / `Content-Type` (untrusted).
    pub original_filename: Option<String>,
    /// Lowercased MIME type (e.g. `"image/jpeg"`).
    pub mime_type: String,
    /// Decoded size in bytes.
    pub byte_size: u64,
    pub content: AttachmentContent,
}

impl AttachmentDescriptor {
    /// Name shown in the manifest and the log.
    pub fn display_name(&self, index: usize) -> String {
        if self.content == AttachmentContent::Unreadable {
            return UNREADABLE_PART_NAME.to_string();
        }
        match &self.original_filename {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => format!("attachment_{index}.{}", extension_for_mime(&self.mime_type)),
        }
    }
}

/// What happened to one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistOutcome {
    /// Written to the attachment directory under `file_name`.
    Saved { file_name: String },
    /// Above the size ceiling, not written.
    SkippedTooLarge { size: u64, ceiling: u64 },
    /// Not decodable, not written.
    Unreadable,
    /// Attachment extraction is disabled for this run.
    NotExtracted,
    /// Writing this file failed.
    Failed { reason: String },
}

/// Manifest entry for one attachment.
#[derive(Debug, Clone, Serialize)]
pub struct PersistResult {
    /// 1-based position within the message.
    pub index: usize,
    pub display_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub outcome: PersistOutcome,
}

impl PersistResult {
    /// Manifest entry for `descriptor` with the given outcome.
    pub fn new(descriptor: &AttachmentDescriptor, index: usize, outcome: PersistOutcome) -> Self {
        Self {
            index,
            display_name: descriptor.display_name(index),
            mime_type: descriptor.mime_type.clone(),
            byte_size: descriptor.byte_size,
            outcome,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self.outcome, PersistOutcome::Saved { .. })
    }
}

/// Generic file extension for a MIME type, used when a part has no filename.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" | "application/x-gzip" => "gz",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/pgp-signature" => "asc",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "image/svg+xml" => "svg",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "text/calendar" => "ics",
        "text/vcard" | "text/x-vcard" => "vcf",
        "message/rfc822" => "eml",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: Option<&str>, mime: &str, content: AttachmentContent) -> AttachmentDescriptor {
        AttachmentDescriptor {
            original_filename: name.map(String::from),
            mime_type: mime.to_string(),
            byte_size: 3,
            content,
        }
    }

    #[test]
    fn test_display_name_prefers_original() {
        let d = descriptor(Some(" report.pdf "), "application/pdf", AttachmentContent::TooLarge);
        assert_eq!(d.display_name(1), "report.pdf");
    }

    #[test]
    fn test_display_name_placeholder_uses_mime() {
        let d = descriptor(None, "image/png", AttachmentContent::Bytes(vec![1, 2, 3]));
        assert_eq!(d.display_name(2), "attachment_2.png");
        let d = descriptor(Some("  "), "application/x-unknown", AttachmentContent::TooLarge);
        assert_eq!(d.display_name(7), "attachment_7.bin");
    }

    #[test]
    fn test_display_name_unreadable() {
        let d = descriptor(Some("x.zip"), "application/zip", AttachmentContent::Unreadable);
        assert_eq!(d.display_name(1), UNREADABLE_PART_NAME);
    }
}
