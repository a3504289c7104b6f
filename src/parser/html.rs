//! HTML-to-text flattening for HTML-only messages.
//!
//! Policy:
//! - `script`, `style`, `head` and `title` contents are dropped
//! - `br` is a line break; `div`, `tr`, `li`, `dt`, `dd` start a new line
//!   (`li` gets a `- ` bullet)
//! - paragraph-level elements (`p`, headings, lists, tables, `blockquote`,
//!   `pre`, `hr`, sectioning elements) are separated by one blank line
//! - every other tag is removed without leaving whitespace
//! - runs of whitespace in text collapse to a single space
//! - named and numeric entities are decoded; unknown entities are kept as-is
//! - lines are trimmed, repeated blank lines collapse, the result is trimmed

/// Elements whose content never reaches the output.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "title", "noscript", "template"];

/// Elements separated from their neighbours by a blank line.
const PARAGRAPH_ELEMENTS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "dl", "table", "blockquote", "pre",
    "hr", "section", "article", "header", "footer", "nav", "aside", "address", "figure", "form",
    "fieldset",
];

/// Elements that start on a new line.
const LINE_ELEMENTS: &[&str] = &["div", "tr", "li", "dt", "dd", "caption", "center"];

/// Convert an HTML document or fragment into readable plain text.
pub fn html_to_text(html: &str) -> String {
    let mut out = TextBuilder::default();
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        out.push_text(&rest[..lt]);
        let after = &rest[lt + 1..];

        if let Some(comment) = after.strip_prefix("!--") {
            rest = comment.find("-->").map(|end| &comment[end + 3..]).unwrap_or("");
            continue;
        }

        let Some(gt) = after.find('>') else {
            // A lone '<' is text
            out.push_text(&rest[lt..lt + 1]);
            rest = after;
            continue;
        };
        let tag = Tag::parse(&after[..gt]);
        rest = &after[gt + 1..];

        let Some(tag) = tag else {
            continue;
        };

        if !tag.closing && SKIPPED_ELEMENTS.contains(&tag.name.as_str()) {
            rest = skip_element(rest, &tag.name);
            continue;
        }

        match tag.name.as_str() {
            "br" => out.line_break(),
            "li" if !tag.closing => {
                out.block_break();
                out.push_raw("- ");
            }
            name if PARAGRAPH_ELEMENTS.contains(&name) => out.paragraph_break(),
            name if LINE_ELEMENTS.contains(&name) => out.block_break(),
            _ => {}
        }
    }
    out.push_text(rest);
    out.finish()
}

/// A parsed start or end tag; attributes are ignored.
struct Tag {
    name: String,
    closing: bool,
}

impl Tag {
    /// Parse the text between `<` and `>`. Declarations (`<!DOCTYPE>`) and
    /// processing instructions yield `None`.
    fn parse(inner: &str) -> Option<Self> {
        let inner = inner.trim();
        if inner.starts_with(['!', '?']) {
            return None;
        }
        let (closing, body) = match inner.strip_prefix('/') {
            Some(body) => (true, body.trim_start()),
            None => (false, inner),
        };
        let name: String = body
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(Self { name, closing })
    }
}

/// Skip past the matching `</name>` of an element whose content is dropped.
fn skip_element<'a>(html: &'a str, name: &str) -> &'a str {
    let lower = html.to_ascii_lowercase();
    let close = format!("</{name}");
    match lower.find(&close) {
        Some(start) => {
            let after = &html[start..];
            after.find('>').map(|gt| &after[gt + 1..]).unwrap_or("")
        }
        None => "",
    }
}

/// Accumulates output text, collapsing whitespace and tracking breaks.
#[derive(Default)]
struct TextBuilder {
    text: String,
    /// Whitespace seen in the source since the last visible character.
    pending_space: bool,
}

impl TextBuilder {
    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let decoded = decode_entities(raw);
        for ch in decoded.chars() {
            if ch.is_whitespace() && ch != '\u{a0}' {
                self.pending_space = true;
            } else {
                let at_line_start = self.text.is_empty() || self.text.ends_with('\n');
                if self.pending_space && !at_line_start {
                    self.text.push(' ');
                }
                self.pending_space = false;
                self.text.push(if ch == '\u{a0}' { ' ' } else { ch });
            }
        }
    }

    fn push_raw(&mut self, s: &str) {
        self.pending_space = false;
        self.text.push_str(s);
    }

    /// Unconditional newline (`<br>`).
    fn line_break(&mut self) {
        self.pending_space = false;
        self.text.push('\n');
    }

    /// Start a new line unless already at one.
    fn block_break(&mut self) {
        self.pending_space = false;
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    /// End the current line and leave one blank line after it.
    fn paragraph_break(&mut self) {
        self.pending_space = false;
        if self.text.is_empty() {
            return;
        }
        while !self.text.ends_with("\n\n") {
            self.text.push('\n');
        }
    }

    /// Trim every line and collapse runs of blank lines into one.
    fn finish(self) -> String {
        let mut cleaned = String::with_capacity(self.text.len());
        let mut saw_blank = false;
        for line in self.text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                saw_blank = true;
                continue;
            }
            if !cleaned.is_empty() {
                cleaned.push_str(if saw_blank { "\n\n" } else { "\n" });
            }
            cleaned.push_str(trimmed);
            saw_blank = false;
        }
        cleaned
    }
}

/// Decode HTML character references in a text run.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp + 1..];
        let decoded = candidate
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 10)
            .and_then(|semi| decode_entity(&candidate[..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).filter(|&c| c != '\0');
    }

    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "laquo" => '«',
        "raquo" => '»',
        "bull" => '•',
        "middot" => '·',
        "euro" => '€',
        "pound" => '£',
        "yen" => '¥',
        "cent" => '¢',
        "sect" => '§',
        "deg" => '°',
        "times" => '×',
        "divide" => '÷',
        "iexcl" => '¡',
        "iquest" => '¿',
        "aacute" => 'á',
        "eacute" => 'é',
        "iacute" => 'í',
        "oacute" => 'ó',
        "uacute" => 'ú',
        "ntilde" => 'ñ',
        "Ntilde" => 'Ñ',
        "uuml" => 'ü',
        "ouml" => 'ö',
        "auml" => 'ä',
        "Uuml" => 'Ü',
        "Ouml" => 'Ö',
        "Auml" => 'Ä',
        "szlig" => 'ß',
        "ccedil" => 'ç',
        "egrave" => 'è',
        "agrave" => 'à',
        _ => return None,
    };
    Some(ch)
}
