//! Streaming MBOX reader.
//!
//! Reads the archive line by line with a 1 MB buffer and yields one record at a
//! time, in on-disk order. Never loads the whole file into memory. A malformed
//! record is yielded as an error and iteration carries on with the next one.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::parser::header::{self, HeaderMap};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Records above this size are reported as corrupt (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One message as stored in the archive.
#[derive(Debug, Clone)]
pub struct RawMessageRecord {
    /// Byte offset of the `From ` separator line.
    pub offset: u64,
    /// The separator line itself, without its line ending.
    pub separator: String,
    /// Headers and body, separator line excluded.
    pub data: Vec<u8>,
}

impl RawMessageRecord {
    /// Parse the header block of this record.
    pub fn headers(&self) -> HeaderMap {
        HeaderMap::parse(header::header_section(&self.data))
    }
}

/// Record being accumulated while scanning.
struct Pending {
    offset: u64,
    separator: String,
    data: Vec<u8>,
    truncated: bool,
}

/// Forward-only iterator over the records of one MBOX file.
///
/// Tolerates mixed `\n` / `\r\n` line endings, NUL bytes in bodies, a UTF-8
/// BOM, and `From ` separators not preceded by a blank line (logged).
pub struct MboxReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    line_buf: Vec<u8>,
    pending: Option<Pending>,
    prev_line_was_blank: bool,
    max_message_size: usize,
    finished: bool,
}

impl MboxReader {
    /// Open an archive for reading.
    ///
    /// Fails with [`ConvertError::ArchiveUnreadable`] when the path is missing,
    /// is a directory, cannot be opened, or does not start with a `From `
    /// separator. An empty file is a valid archive with no records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConvertError::unreadable(&path, "file not found")
            } else {
                ConvertError::unreadable(&path, e.to_string())
            }
        })?;
        if metadata.is_dir() {
            return Err(ConvertError::unreadable(&path, "is a directory"));
        }

        let file = File::open(&path).map_err(|e| ConvertError::unreadable(&path, e.to_string()))?;
        let mut reader = Self {
            path,
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            offset: 0,
            line_buf: Vec::with_capacity(4096),
            pending: None,
            prev_line_was_blank: true,
            max_message_size: MAX_MESSAGE_SIZE,
            finished: false,
        };
        reader.find_first_separator()?;
        Ok(reader)
    }

    /// Override the per-record size limit.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Path to the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count the records of an archive with a separate pass.
    pub fn count_records(path: impl AsRef<Path>) -> Result<u64> {
        Ok(Self::open(path)?.count() as u64)
    }

    /// Skip leading blank lines and require the first content line to be a separator.
    fn find_first_separator(&mut self) -> Result<()> {
        loop {
            let len = self
                .read_line()
                .map_err(|e| ConvertError::unreadable(&self.path, e.to_string()))?;
            if len == 0 {
                self.finished = true;
                return Ok(());
            }

            let line = self.line_buf.strip_prefix(UTF8_BOM).unwrap_or(&self.line_buf);
            if is_blank_line(line) {
                self.offset += len as u64;
                continue;
            }
            if !is_mbox_separator(line) {
                return Err(ConvertError::unreadable(
                    &self.path,
                    "not an MBOX archive (no leading 'From ' separator)",
                ));
            }

            let line = line.to_vec();
            self.start_record(&line);
            self.offset += len as u64;
            return Ok(());
        }
    }

    /// Read one line (including its `\n`) into `line_buf`. Returns 0 at EOF.
    fn read_line(&mut self) -> std::io::Result<usize> {
        self.line_buf.clear();
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(self.line_buf.len());
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.line_buf.extend_from_slice(&buf[..=pos]);
                    self.reader.consume(pos + 1);
                    return Ok(self.line_buf.len());
                }
                None => {
                    let len = buf.len();
                    self.line_buf.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn start_record(&mut self, separator_line: &[u8]) {
        let separator = String::from_utf8_lossy(separator_line)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending = Some(Pending {
            offset: self.offset,
            separator,
            data: Vec::with_capacity(64 * 1024),
            truncated: false,
        });
    }

    fn append_line(&mut self) {
        let max = self.max_message_size;
        if let Some(pending) = self.pending.as_mut() {
            if pending.data.len() + self.line_buf.len() <= max {
                pending.data.extend_from_slice(&self.line_buf);
            } else if !pending.truncated {
                warn!(
                    offset = pending.offset,
                    max_size = max,
                    "Message exceeds maximum size, truncating"
                );
                pending.truncated = true;
            }
        }
    }
}

impl Iterator for MboxReader {
    type Item = Result<RawMessageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return self.pending.take().map(finish_record);
        }

        loop {
            let len = match self.read_line() {
                Ok(len) => len,
                Err(e) => {
                    self.finished = true;
                    let offset = self.pending.take().map(|p| p.offset).unwrap_or(self.offset);
                    return Some(Err(ConvertError::CorruptRecord {
                        offset,
                        reason: format!("read error: {e}"),
                    }));
                }
            };
            if len == 0 {
                self.finished = true;
                return self.pending.take().map(finish_record);
            }

            let mut completed = None;
            if is_mbox_separator(&self.line_buf) {
                if !self.prev_line_was_blank {
                    warn!(
                        offset = self.offset,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                completed = self.pending.take();
                let line = std::mem::take(&mut self.line_buf);
                self.start_record(&line);
                self.line_buf = line;
            } else {
                self.append_line();
            }

            self.prev_line_was_blank = is_blank_line(&self.line_buf);
            self.offset += len as u64;

            if let Some(done) = completed {
                return Some(finish_record(done));
            }
        }
    }
}

/// Validate an accumulated record.
fn finish_record(pending: Pending) -> Result<RawMessageRecord> {
    let corrupt = |reason: &str| ConvertError::CorruptRecord {
        offset: pending.offset,
        reason: reason.to_string(),
    };

    if pending.truncated {
        return Err(corrupt("record exceeds the maximum message size"));
    }
    let first_line = pending
        .data
        .split(|&b| b == b'\n')
        .next()
        .unwrap_or_default();
    if pending.data.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(corrupt("empty record"));
    }
    if !header::is_header_line(first_line) {
        return Err(corrupt("record has no header block"));
    }

    debug!(offset = pending.offset, length = pending.data.len(), "Read record");
    Ok(RawMessageRecord {
        offset: pending.offset,
        separator: pending.separator,
        data: pending.data,
    })
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn archive(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(b"From user@example.com Thu Jan 01 00:00:00 2024\n"));
        assert!(!is_mbox_separator(b"from user@example.com\n"));
        assert!(!is_mbox_separator(b">From user@example.com\n"));
        assert!(!is_mbox_separator(b"Subject: From here\n"));
    }

    #[test]
    fn test_is_blank_line() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b" \t\n"));
        assert!(!is_blank_line(b"x\n"));
    }

    #[test]
    fn test_reads_records_in_order() {
        let file = archive(
            b"From a@x Mon Jan 1 00:00:00 2024\nSubject: one\n\nBody one\n\n\
              From b@x Mon Jan 1 00:00:00 2024\r\nSubject: two\r\n\r\nBody two\r\n",
        );
        let records: Vec<_> = MboxReader::open(file.path()).unwrap().collect();
        assert_eq!(records.len(), 2);
        let first = records[0].as_ref().unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(first.separator, "From a@x Mon Jan 1 00:00:00 2024");
        assert_eq!(first.headers().first("subject"), Some("one"));
        let second = records[1].as_ref().unwrap();
        assert_eq!(second.headers().first("subject"), Some("two"));
        assert!(second.data.ends_with(b"Body two\r\n"));
    }

    #[test]
    fn test_escaped_from_in_body_is_not_a_separator() {
        let file = archive(b"From a@x\nSubject: s\n\n>From the start\nend\n");
        assert_eq!(MboxReader::count_records(file.path()).unwrap(), 1);
    }

    #[test]
    fn test_separator_without_blank_line_still_splits() {
        let file = archive(b"From a@x\nSubject: 1\n\nbody\nFrom b@x\nSubject: 2\n\nbody\n");
        assert_eq!(MboxReader::count_records(file.path()).unwrap(), 2);
    }

    #[test]
    fn test_corrupt_record_does_not_stop_iteration() {
        let file = archive(
            b"From a@x\n\x00\x01 garbage without headers\n\nFrom b@x\nSubject: ok\n\nfine\n",
        );
        let records: Vec<_> = MboxReader::open(file.path()).unwrap().collect();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            Err(ConvertError::CorruptRecord { offset: 0, .. })
        ));
        assert!(records[1].is_ok());
    }

    #[test]
    fn test_empty_record_is_corrupt() {
        let file = archive(b"From a@x\n\nFrom b@x\nSubject: ok\n\nfine\n");
        let records: Vec<_> = MboxReader::open(file.path()).unwrap().collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_err());
    }

    #[test]
    fn test_oversized_record_is_corrupt() {
        let file = archive(b"From a@x\nSubject: big\n\n0123456789012345678901234567890123456789\n");
        let mut reader = MboxReader::open(file.path()).unwrap().with_max_message_size(32);
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_empty_file_has_no_records() {
        let file = archive(b"");
        assert_eq!(MboxReader::count_records(file.path()).unwrap(), 0);
    }

    #[test]
    fn test_bom_and_leading_blank_lines() {
        let file = archive(b"\xEF\xBB\xBF\n\nFrom a@x\nSubject: s\n\nb\n");
        let records: Vec<_> = MboxReader::open(file.path()).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().offset, 5);
    }

    #[test]
    fn test_not_an_mbox() {
        let file = archive(b"Subject: loose message\n\nhello\n");
        let err = MboxReader::open(file.path()).err().unwrap();
        assert!(matches!(err, ConvertError::ArchiveUnreadable { .. }));
    }

    #[test]
    fn test_missing_and_directory_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MboxReader::open(dir.path().join("nope.mbox")),
            Err(ConvertError::ArchiveUnreadable { .. })
        ));
        assert!(matches!(
            MboxReader::open(dir.path()),
            Err(ConvertError::ArchiveUnreadable { .. })
        ));
    }
}
