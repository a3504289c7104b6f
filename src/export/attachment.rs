//! Write a message's attachments to the attachment directory.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::model::attachment::{AttachmentContent, AttachmentDescriptor, PersistOutcome, PersistResult};
use crate::naming::{sanitize_filename, truncate_filename, with_index_suffix};

/// Longest file name most filesystems accept, in bytes.
const NAME_MAX_BYTES: usize = 255;

/// Room kept free for `_N` index suffixes.
const SUFFIX_RESERVE: usize = 16;

/// Persists the attachments of one message.
///
/// Final names are `{prefix}{sanitized_name}`; the prefix carries the
/// sequence number (and archive label in batch mode), so names only need to be
/// deduplicated within the message. Names are compared case-insensitively,
/// since `Photo.JPG` and `photo.jpg` are one file on macOS and Windows.
pub struct AttachmentPersister {
    dir: PathBuf,
    prefix: String,
    size_ceiling: u64,
    /// Lowercased names already handed out.
    used_names: HashSet<String>,
    dir_ready: bool,
}

impl AttachmentPersister {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, size_ceiling: u64) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            size_ceiling,
            used_names: HashSet::new(),
            dir_ready: false,
        }
    }

    /// Persist one attachment. `index` is its 1-based position in the message.
    ///
    /// Never fails: a write error is reported as [`PersistOutcome::Failed`].
    pub fn persist(&mut self, descriptor: &AttachmentDescriptor, index: usize) -> PersistResult {
        let bytes = match &descriptor.content {
            AttachmentContent::Unreadable => {
                return PersistResult::new(descriptor, index, PersistOutcome::Unreadable);
            }
            AttachmentContent::Bytes(bytes) if descriptor.byte_size <= self.size_ceiling => bytes,
            _ => {
                return PersistResult::new(
                    descriptor,
                    index,
                    PersistOutcome::SkippedTooLarge {
                        size: descriptor.byte_size,
                        ceiling: self.size_ceiling,
                    },
                );
            }
        };

        let file_name = self.claim_name(&descriptor.display_name(index), index);
        let path = self.dir.join(&file_name);

        let outcome = match self.write_atomic(&path, bytes) {
            Ok(()) => {
                debug!(path = %path.display(), size = bytes.len(), "Saved attachment");
                PersistOutcome::Saved { file_name }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to save attachment");
                PersistOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        PersistResult::new(descriptor, index, outcome)
    }

    /// Persist every attachment of a message, in order.
    pub fn persist_all(&mut self, attachments: &[AttachmentDescriptor]) -> Vec<PersistResult> {
        attachments
            .iter()
            .enumerate()
            .map(|(i, descriptor)| self.persist(descriptor, i + 1))
            .collect()
    }

    /// Pick the final name for `display_name`, unique within this message and
    /// short enough, prefix included, to be created.
    fn claim_name(&mut self, display_name: &str, index: usize) -> String {
        let budget = NAME_MAX_BYTES
            .saturating_sub(self.prefix.len() + SUFFIX_RESERVE)
            .max(SUFFIX_RESERVE * 2);
        let mut candidate = truncate_filename(&sanitize_filename(display_name), budget);
        let mut name = format!("{}{candidate}", self.prefix);
        while !self.used_names.insert(name.to_lowercase()) {
            candidate = with_index_suffix(&candidate, index);
            name = format!("{}{candidate}", self.prefix);
        }
        name
    }

    fn write_atomic(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        if !self.dir_ready {
            std::fs::create_dir_all(&self.dir).map_err(|e| ConvertError::OutputDir {
                path: self.dir.clone(),
                source: e,
            })?;
            self.dir_ready = true;
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".mbox2pdf-")
            .suffix(".part")
            .tempfile_in(&self.dir)
            .map_err(|e| ConvertError::io(path, e))?;
        tmp.write_all(bytes).map_err(|e| ConvertError::io(path, e))?;
        tmp.flush().map_err(|e| ConvertError::io(path, e))?;
        tmp.persist(path).map_err(|e| ConvertError::io(path, e.error))?;
        Ok(())
    }
}

/// Manifest entries for a run with attachment extraction disabled.
pub fn not_extracted(attachments: &[AttachmentDescriptor]) -> Vec<PersistResult> {
    attachments
        .iter()
        .enumerate()
        .map(|(i, descriptor)| {
            let outcome = if descriptor.content == AttachmentContent::Unreadable {
                PersistOutcome::Unreadable
            } else {
                PersistOutcome::NotExtracted
            };
            PersistResult::new(descriptor, i + 1, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_attachment(name: Option<&str>, mime: &str, data: &[u8]) -> AttachmentDescriptor {
        AttachmentDescriptor {
            original_filename: name.map(String::from),
            mime_type: mime.to_string(),
            byte_size: data.len() as u64,
            content: AttachmentContent::Bytes(data.to_vec()),
        }
    }

    #[test]
    fn test_saves_with_prefix_and_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let att_dir = dir.path().join("attachments");
        let mut persister = AttachmentPersister::new(&att_dir, "0001_", 1024);

        let result = persister.persist(&bytes_attachment(Some("report.pdf"), "application/pdf", b"%PDF"), 1);

        assert_eq!(
            result.outcome,
            PersistOutcome::Saved {
                file_name: "0001_report.pdf".to_string()
            }
        );
        assert_eq!(std::fs::read(att_dir.join("0001_report.pdf")).unwrap(), b"%PDF");
        assert_eq!(std::fs::read_dir(&att_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_duplicate_names_in_message_get_index_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = AttachmentPersister::new(dir.path(), "0002_", 1024);
        let results = persister.persist_all(&[
            bytes_attachment(Some("image.png"), "image/png", b"one"),
            bytes_attachment(Some("image.png"), "image/png", b"two"),
            bytes_attachment(Some("image.png"), "image/png", b"three"),
        ]);

        let names: Vec<String> = results
            .iter()
            .map(|r| match &r.outcome {
                PersistOutcome::Saved { file_name } => file_name.clone(),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["0002_image.png", "0002_image_2.png", "0002_image_3.png"]);
        assert_eq!(std::fs::read(dir.path().join("0002_image_3.png")).unwrap(), b"three");
    }

    #[test]
    fn test_names_differing_only_in_case_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = AttachmentPersister::new(dir.path(), "0004_", 1024);
        let results = persister.persist_all(&[
            bytes_attachment(Some("Photo.JPG"), "image/jpeg", b"upper"),
            bytes_attachment(Some("photo.jpg"), "image/jpeg", b"lower"),
        ]);

        let names: Vec<&str> = results
            .iter()
            .map(|r| match &r.outcome {
                PersistOutcome::Saved { file_name } => file_name.as_str(),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["0004_Photo.JPG", "0004_photo_2.jpg"]);
        assert_eq!(std::fs::read(dir.path().join("0004_Photo.JPG")).unwrap(), b"upper");
        assert_eq!(std::fs::read(dir.path().join("0004_photo_2.jpg")).unwrap(), b"lower");
    }

    #[test]
    fn test_long_multibyte_name_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = AttachmentPersister::new(dir.path(), "0001_", 1024);
        let name = format!("{}.pdf", "報告書".repeat(30));

        let result = persister.persist(&bytes_attachment(Some(&name), "application/pdf", b"%PDF"), 1);

        let file_name = match &result.outcome {
            PersistOutcome::Saved { file_name } => file_name.clone(),
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(file_name.len() <= 255, "{} bytes", file_name.len());
        assert!(file_name.starts_with("0001_報告書"));
        assert!(file_name.ends_with(".pdf"));
        assert_eq!(std::fs::read(dir.path().join(&file_name)).unwrap(), b"%PDF");
        assert_eq!(result.display_name, name);
    }

    #[test]
    fn test_long_prefix_shrinks_name_budget() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = format!("{}_0001_", "ü".repeat(32));
        let mut persister = AttachmentPersister::new(dir.path(), prefix.clone(), 1024);
        let name = format!("{}.txt", "ж".repeat(150));

        let first = persister.persist(&bytes_attachment(Some(&name), "text/plain", b"a"), 1);
        let second = persister.persist(&bytes_attachment(Some(&name), "text/plain", b"b"), 2);

        for result in [&first, &second] {
            match &result.outcome {
                PersistOutcome::Saved { file_name } => {
                    assert!(file_name.len() <= 255, "{} bytes", file_name.len());
                    assert!(file_name.starts_with(&prefix));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_ne!(first.outcome, second.outcome);
    }

    #[test]
    fn test_ceiling_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = AttachmentPersister::new(dir.path(), "0001_", 4);

        let at = persister.persist(&bytes_attachment(Some("at.bin"), "application/octet-stream", b"1234"), 1);
        assert!(at.is_saved());

        let over = persister.persist(&bytes_attachment(Some("over.bin"), "application/octet-stream", b"12345"), 2);
        assert_eq!(over.outcome, PersistOutcome::SkippedTooLarge { size: 5, ceiling: 4 });
        assert!(!dir.path().join("0001_over.bin").exists());
    }

    #[test]
    fn test_missing_name_and_hostile_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = AttachmentPersister::new(dir.path(), "0003_", 1024);
        let results = persister.persist_all(&[
            bytes_attachment(None, "image/jpeg", b"jpg"),
            bytes_attachment(Some("../../evil.sh"), "text/x-sh", b"echo"),
        ]);
        assert!(dir.path().join("0003_attachment_1.jpg").exists());
        assert_eq!(results[1].display_name, "../../evil.sh");
        assert!(dir.path().join("0003__.._evil.sh").exists());
    }

    #[test]
    fn test_unreadable_and_not_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let unreadable = AttachmentDescriptor {
            original_filename: Some("x.zip".to_string()),
            mime_type: "application/zip".to_string(),
            byte_size: 0,
            content: AttachmentContent::Unreadable,
        };
        let mut persister = AttachmentPersister::new(dir.path().join("att"), "0001_", 1024);
        let result = persister.persist(&unreadable, 1);
        assert_eq!(result.outcome, PersistOutcome::Unreadable);
        assert!(!dir.path().join("att").exists());

        let manifest = not_extracted(&[bytes_attachment(Some("a.txt"), "text/plain", b"a"), unreadable]);
        assert_eq!(manifest[0].outcome, PersistOutcome::NotExtracted);
        assert_eq!(manifest[1].outcome, PersistOutcome::Unreadable);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut persister = AttachmentPersister::new(&blocker, "0001_", 1024);
        let result = persister.persist(&bytes_attachment(Some("a.txt"), "text/plain", b"a"), 1);
        assert!(matches!(result.outcome, PersistOutcome::Failed { .. }));
    }
}
