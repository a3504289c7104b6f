//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), and charset decoding.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine as _;
use tracing::warn;

use crate::model::address::display_mailbox_list;
use crate::model::message::MessageHeaders;

/// Base64 engine for encoded-words, which are often emitted without padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Header fields of one message, in source order.
///
/// Names are stored lowercased; repeated fields (e.g. `Received`) are all kept.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    fields: Vec<(String, String)>,
}

impl HeaderMap {
    /// Parse a raw header block (everything before the first blank line).
    pub fn parse(raw_headers: &[u8]) -> Self {
        Self {
            fields: unfold_headers(&decode_header_bytes(raw_headers)),
        }
    }

    /// First value of a field, case-insensitive.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a field, in source order.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value with RFC 2047 encoded-words resolved; `""` when absent.
    pub fn decoded(&self, name: &str) -> String {
        self.first(name).map(decode_encoded_words).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Display strings for the PDF header block.
    pub fn message_headers(&self) -> MessageHeaders {
        MessageHeaders {
            from: display_mailbox_list(&self.decoded("from")),
            to: display_mailbox_list(&self.decoded("to")),
            cc: display_mailbox_list(&self.decoded("cc")),
            subject: collapse_whitespace(&self.decoded("subject")),
            date: collapse_whitespace(&self.decoded("date")),
        }
    }
}

/// Return the header section of a message: bytes up to the first blank line.
pub fn header_section(message: &[u8]) -> &[u8] {
    let mut line_start = 0;
    while line_start < message.len() {
        let line_end = message[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| line_start + p + 1)
            .unwrap_or(message.len());
        let line = &message[line_start..line_end];
        if line.iter().all(|&b| b == b'\r' || b == b'\n') {
            return &message[..line_start];
        }
        line_start = line_end;
    }
    message
}

/// Whether a line looks like the start of a header field (`Name: value`).
pub fn is_header_line(line: &[u8]) -> bool {
    match line.iter().position(|&b| b == b':') {
        Some(0) | None => false,
        Some(colon) => line[..colon].iter().all(|&b| (33..=126).contains(&b)),
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF_u8, 0xBB, 0xBF][..]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Join continuation lines (leading space or tab) onto the previous field.
///
/// Returns `(lowercase_name, value)` pairs. Lines that are neither a field nor a
/// continuation are dropped.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = fields.last_mut() {
                let continuation = line.trim();
                if !continuation.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(continuation);
                }
            }
        } else if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                fields.push((name.to_ascii_lowercase(), value.trim().to_string()));
            }
        }
    }

    fields
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`.
/// Malformed words are kept verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two adjacent encoded-words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        match decode_one_word(&remaining[start + 2..]) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &remaining[start + 2 + consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = &remaining[start + 2..];
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`, returning the text and the bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded = &rest[..end];
    if charset.is_empty() || encoded.contains(' ') {
        return None;
    }

    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => LENIENT_BASE64.decode(encoded.trim()).ok()?,
        "Q" | "q" => decode_q_encoding(encoded),
        _ => return None,
    };

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    Some((decode_charset(charset, &bytes), consumed))
}

/// Q-encoding (RFC 2047 §4.2): `_` is a space, `=XX` a hex byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode bytes in a named charset, replacing undecodable sequences with U+FFFD.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_base64_without_padding() {
        assert_eq!(decode_encoded_words("=?utf-8?b?SG9sYQ?="), "Hola");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_adjacent_words_drop_separator() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_mixed_plain_and_encoded() {
        assert_eq!(
            decode_encoded_words("Re: =?UTF-8?Q?R=C3=A9sum=C3=A9?= attached"),
            "Re: Résumé attached"
        );
    }

    #[test]
    fn test_malformed_word_kept() {
        assert_eq!(decode_encoded_words("price =?x"), "price =?x");
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
    }

    #[test]
    fn test_windows1252_word() {
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_unfold_and_first_value() {
        let raw = b"Received: one\nReceived: two\nSubject: A long\n\tsubject line\nsubject: ignored\n";
        let map = HeaderMap::parse(raw);
        assert_eq!(map.first("SUBJECT"), Some("A long subject line"));
        assert_eq!(map.all("received").collect::<Vec<_>>(), vec!["one", "two"]);
        assert_eq!(map.decoded("x-missing"), "");
    }

    #[test]
    fn test_latin1_raw_header_bytes() {
        let map = HeaderMap::parse(b"Subject: Caf\xe9\n");
        assert_eq!(map.decoded("subject"), "Café");
    }

    #[test]
    fn test_message_headers_display() {
        let raw = b"From: =?UTF-8?B?Sm9zw6k=?= <jose@example.com>\nTo: a@x.org,  b@y.org\nSubject:  Hello   World \n";
        let headers = HeaderMap::parse(raw).message_headers();
        assert_eq!(headers.from, "José <jose@example.com>");
        assert_eq!(headers.to, "a@x.org, b@y.org");
        assert_eq!(headers.subject, "Hello World");
        assert_eq!(headers.date, "");
    }

    #[test]
    fn test_header_section_stops_at_blank_line() {
        let msg = b"Subject: Hi\r\nFrom: a@b\r\n\r\nBody\r\n";
        assert_eq!(header_section(msg), b"Subject: Hi\r\nFrom: a@b\r\n");
        assert_eq!(header_section(b"Subject: only"), b"Subject: only");
    }

    #[test]
    fn test_is_header_line() {
        assert!(is_header_line(b"Subject: hi\n"));
        assert!(is_header_line(b"X-Custom-1:value"));
        assert!(!is_header_line(b"just some text\n"));
        assert!(!is_header_line(b": no name\n"));
        assert!(!is_header_line(b"Not A Header: x\n"));
    }
}
