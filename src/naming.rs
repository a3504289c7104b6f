//! Output naming: sequence numbers, subject slugs, sanitized attachment names,
//! archive labels, and the output directory layout.
//!
//! Every output name is unique by construction: the sequence prefix separates
//! messages, the archive label separates archives in batch mode, and the
//! per-message index suffix separates duplicate attachment names. Nothing here
//! looks at the filesystem.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Slugs are cut to this many characters.
const MAX_SLUG_LEN: usize = 50;

/// Sanitized attachment names are cut to this many UTF-8 bytes.
pub const MAX_FILENAME_BYTES: usize = 200;

/// Archive labels are cut to this many UTF-8 bytes.
const MAX_LABEL_BYTES: usize = 64;

/// Name of the attachment directory under the output root.
pub const ATTACHMENTS_DIR_NAME: &str = "attachments";

/// Name of the run log under the output root.
pub const RUN_LOG_NAME: &str = "conversion.log";

/// Zero-padding width for a run of `total` records: at least 4 digits.
pub fn sequence_width(total: u64) -> usize {
    total.to_string().len().max(4)
}

/// `format_sequence(7, 4)` → `"0007"`.
pub fn format_sequence(sequence: u64, width: usize) -> String {
    format!("{sequence:0width$}")
}

/// Filesystem-safe slug of a subject line.
///
/// Lowercase alphanumerics are kept, every other run of characters becomes a
/// single `_`, and the result is cut to 50 characters. An empty result is
/// `untitled`.
pub fn subject_slug(subject: &str) -> String {
    let mut slug = String::with_capacity(subject.len().min(MAX_SLUG_LEN));
    let mut pending_sep = false;
    let mut len = 0;

    for c in subject.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_sep && len > 0 {
                if len + 1 >= MAX_SLUG_LEN {
                    break;
                }
                slug.push('_');
                len += 1;
            }
            pending_sep = false;
            slug.push(c);
            len += 1;
            if len >= MAX_SLUG_LEN {
                break;
            }
        } else {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// `"{seq}_{slug}.pdf"` for an already formatted sequence number.
pub fn pdf_file_name(sequence: &str, subject: &str) -> String {
    format!("{sequence}_{}.pdf", subject_slug(subject))
}

/// Make an untrusted filename safe to create inside a single directory.
///
/// Path separators, control characters and `<>:"|?*` become `_`, leading dots
/// and whitespace are removed, and the name is cut to 200 bytes keeping its
/// extension.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    truncate_filename(trimmed, MAX_FILENAME_BYTES)
}

/// Cut `name` to at most `max_bytes` UTF-8 bytes on a character boundary,
/// keeping a short extension intact.
pub fn truncate_filename(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    if ext.is_empty() || ext.len() + 2 > max_bytes / 2 {
        return truncate_bytes(name, max_bytes).to_string();
    }
    let stem = truncate_bytes(stem, max_bytes - ext.len() - 1);
    format!("{stem}.{ext}")
}

/// Longest prefix of `s` within `max_bytes` that ends on a character boundary.
fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split `name` into stem and extension (without the dot). A leading dot or a
/// missing dot means no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(dot) => (&name[..dot], &name[dot + 1..]),
    }
}

/// Insert `_{index}` before the extension: `report.pdf` → `report_2.pdf`.
pub fn with_index_suffix(name: &str, index: usize) -> String {
    match split_extension(name) {
        (stem, "") => format!("{stem}_{index}"),
        (stem, ext) => format!("{stem}_{index}.{ext}"),
    }
}

/// Sanitized file stem of an archive path, used as its label in batch mode.
///
/// Only alphanumerics, `-` and `.` survive; everything else, `_` included,
/// becomes `-`. Attachment prefixes join label and sequence with `_`, so a
/// label without `_` keeps `{label}_{seq}_` unambiguous.
pub fn archive_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let label: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let label = truncate_bytes(label.trim_start_matches('.'), MAX_LABEL_BYTES);
    if label.is_empty() {
        "archive".to_string()
    } else {
        label.to_string()
    }
}

/// Labels for a sorted list of archives; repeated stems get `-2`, `-3`, ….
pub fn unique_labels(paths: &[PathBuf]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut labels = Vec::with_capacity(paths.len());

    for path in paths {
        let base = archive_label(path);
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let mut label = if *count == 1 {
            base.clone()
        } else {
            format!("{base}-{count}")
        };
        // A literal "inbox-2.mbox" next to two "inbox" archives
        while taken.contains(&label) {
            *count += 1;
            label = format!("{base}-{count}");
        }
        taken.insert(label.clone());
        labels.push(label);
    }
    labels
}

/// Where one archive's outputs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    /// Directory receiving the PDFs.
    pub pdf_dir: PathBuf,
    /// Directory receiving saved attachments.
    pub attachments_dir: PathBuf,
    /// Append-only run log.
    pub log_path: PathBuf,
    /// Archive label, present in batch mode only.
    pub label: Option<String>,
}

impl OutputLayout {
    /// Single-archive layout: everything directly under `output_dir`.
    pub fn single(output_dir: &Path, attachments_dir: Option<&Path>) -> Self {
        Self {
            pdf_dir: output_dir.to_path_buf(),
            attachments_dir: attachments_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| output_dir.join(ATTACHMENTS_DIR_NAME)),
            log_path: output_dir.join(RUN_LOG_NAME),
            label: None,
        }
    }

    /// Batch layout: PDFs under `output_dir/<label>/`, shared attachments
    /// directory and run log.
    pub fn batch(output_dir: &Path, attachments_dir: Option<&Path>, label: &str) -> Self {
        Self {
            pdf_dir: output_dir.join(label),
            label: Some(label.to_string()),
            ..Self::single(output_dir, attachments_dir)
        }
    }

    /// Prefix for attachment names of one message: `{seq}_` or `{label}_{seq}_`.
    pub fn attachment_prefix(&self, sequence: &str) -> String {
        match &self.label {
            Some(label) => format!("{label}_{sequence}_"),
            None => format!("{sequence}_"),
        }
    }

    pub fn pdf_path(&self, sequence: &str, subject: &str) -> PathBuf {
        self.pdf_dir.join(pdf_file_name(sequence, subject))
    }
}
