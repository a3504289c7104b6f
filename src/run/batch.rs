//! Batch mode: find the archives under a directory that match a glob pattern.
//!
//! Patterns are matched against each file's path relative to the directory,
//! segment by segment:
//! - `*` matches any run of characters within a segment
//! - `?` matches one character
//! - `[abc]`, `[a-z]`, `[!abc]` match one character from (or not from) a set
//! - `**` as a whole segment matches any number of directories, including none

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ConvertError, Result};

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    AnyDepth,
    Tokens(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| ConvertError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = pattern.trim().trim_start_matches("./");
        if trimmed.is_empty() {
            return Err(invalid("empty pattern"));
        }
        if trimmed.starts_with('/') {
            return Err(invalid("pattern must be relative to the input directory"));
        }

        let segments = trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "**" {
                    Ok(Segment::AnyDepth)
                } else {
                    parse_tokens(s).map(Segment::Tokens).map_err(|r| invalid(r))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Deepest directory level a match can sit at, or `None` with `**`.
    fn max_depth(&self) -> Option<usize> {
        if self.segments.contains(&Segment::AnyDepth) {
            None
        } else {
            Some(self.segments.len())
        }
    }

    /// Match a relative path given as its components.
    pub fn matches_components(&self, components: &[&str]) -> bool {
        match_segments(&self.segments, components)
    }

    /// Match a path relative to the batch directory.
    pub fn matches(&self, relative: &Path) -> bool {
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        self.matches_components(&parts)
    }
}

fn parse_tokens(segment: &str) -> std::result::Result<Vec<Token>, &'static str> {
    let mut tokens = Vec::new();
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if segment.contains("**") {
                    return Err("'**' must be a whole path segment");
                }
                tokens.push(Token::AnyRun);
            }
            '?' => tokens.push(Token::AnyChar),
            '[' => {
                let negated = matches!(chars.peek(), Some('!') | Some('^'));
                if negated {
                    chars.next();
                }
                let mut ranges = Vec::new();
                let mut closed = false;
                let mut first = true;
                while let Some(c) = chars.next() {
                    if c == ']' && !first {
                        closed = true;
                        break;
                    }
                    first = false;
                    let mut lookahead = chars.clone();
                    if lookahead.next() == Some('-') {
                        match lookahead.next() {
                            Some(end) if end != ']' => {
                                chars.next();
                                chars.next();
                                if end < c {
                                    return Err("reversed character range");
                                }
                                ranges.push((c, end));
                                continue;
                            }
                            _ => {}
                        }
                    }
                    ranges.push((c, c));
                }
                if !closed {
                    return Err("unclosed character class");
                }
                tokens.push(Token::Class { negated, ranges });
            }
            c => tokens.push(Token::Literal(c)),
        }
    }
    Ok(tokens)
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((Segment::Tokens(tokens), rest)) => match path.split_first() {
            Some((first, remaining)) => {
                let chars: Vec<char> = first.chars().collect();
                match_tokens(tokens, &chars) && match_segments(rest, remaining)
            }
            None => false,
        },
    }
}

fn match_tokens(tokens: &[Token], text: &[char]) -> bool {
    match tokens.split_first() {
        None => text.is_empty(),
        Some((Token::AnyRun, rest)) => (0..=text.len()).any(|skip| match_tokens(rest, &text[skip..])),
        Some((token, rest)) => match text.split_first() {
            Some((&c, remaining)) => token_matches(token, c) && match_tokens(rest, remaining),
            None => false,
        },
    }
}

fn token_matches(token: &Token, c: char) -> bool {
    match token {
        Token::Literal(l) => *l == c,
        Token::AnyChar => true,
        Token::AnyRun => true,
        Token::Class { negated, ranges } => {
            let hit = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
            hit != *negated
        }
    }
}

/// Find the regular files under `dir` whose relative path matches `pattern`,
/// sorted by path.
pub fn discover_archives(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let glob = GlobPattern::new(pattern)?;

    let metadata = std::fs::metadata(dir).map_err(|e| ConvertError::unreadable(dir, e.to_string()))?;
    if !metadata.is_dir() {
        return Err(ConvertError::unreadable(dir, "not a directory"));
    }

    let mut walker = WalkDir::new(dir).follow_links(true).min_depth(1);
    if let Some(depth) = glob.max_depth() {
        walker = walker.max_depth(depth);
    }

    let mut found = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        if glob.matches(relative) {
            found.push(entry.into_path());
        }
    }

    found.sort();
    debug!(dir = %dir.display(), pattern = glob.as_str(), count = found.len(), "Discovered archives");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        GlobPattern::new(pattern).unwrap().matches(Path::new(path))
    }

    #[test]
    fn test_star_stays_in_segment() {
        assert!(matches("*.mbox", "inbox.mbox"));
        assert!(!matches("*.mbox", "inbox.mbox.bak"));
        assert!(!matches("*.mbox", "2024/inbox.mbox"));
        assert!(matches("*/*.mbox", "2024/inbox.mbox"));
    }

    #[test]
    fn test_double_star_spans_directories() {
        assert!(matches("**/*.mbox", "inbox.mbox"));
        assert!(matches("**/*.mbox", "a/b/c/inbox.mbox"));
        assert!(matches("archive/**/x?.mbox", "archive/2023/q1/x1.mbox"));
        assert!(!matches("archive/**/x?.mbox", "other/x1.mbox"));
    }

    #[test]
    fn test_classes() {
        assert!(matches("[abc]*.mbox", "bob.mbox"));
        assert!(!matches("[abc]*.mbox", "dan.mbox"));
        assert!(matches("mail-[0-9][0-9].mbox", "mail-07.mbox"));
        assert!(matches("[!x]*", "inbox"));
        assert!(!matches("[!x]*", "xmail"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(GlobPattern::new("").is_err());
        assert!(GlobPattern::new("[abc.mbox").is_err());
        assert!(GlobPattern::new("a**.mbox").is_err());
        assert!(GlobPattern::new("/abs/*.mbox").is_err());
        assert!(matches!(
            GlobPattern::new("[z-a]"),
            Err(ConvertError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_discover_archives_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("nested")).unwrap();
        for name in ["b.mbox", "a.mbox", "notes.txt", "nested/c.mbox"] {
            std::fs::write(root.join(name), b"").unwrap();
        }
        std::fs::create_dir_all(root.join("dir.mbox")).unwrap();

        let top = discover_archives(root, "*.mbox").unwrap();
        assert_eq!(top, vec![root.join("a.mbox"), root.join("b.mbox")]);

        let all = discover_archives(root, "**/*.mbox").unwrap();
        assert_eq!(
            all,
            vec![root.join("a.mbox"), root.join("b.mbox"), root.join("nested/c.mbox")]
        );
    }

    #[test]
    fn test_discover_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_archives(&dir.path().join("nope"), "*.mbox").unwrap_err();
        assert!(matches!(err, ConvertError::ArchiveUnreadable { .. }));
    }
}
