//! Page geometry, line wrapping and pagination for the PDF renderer.
//!
//! Everything here is pure: the renderer turns [`Page`]s into PDF content
//! streams. Line widths come from the advance widths of the style's font.

use std::sync::Arc;

use crate::export::font::Font;

/// Baseline-to-baseline distance, relative to the font size.
pub const LINE_HEIGHT_FACTOR: f32 = 1.2;

/// Vertical room taken by a horizontal rule.
const RULE_SPACING: f32 = 12.0;

const TAB_WIDTH: usize = 4;

/// Rounding slack when comparing summed glyph widths against the line width.
const WIDTH_EPSILON: f32 = 1e-3;

/// Supported paper sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// US Letter, 8.5 × 11 in.
    Letter,
    /// ISO A4, 210 × 297 mm.
    A4,
}

impl PageSize {
    /// Parse a config value (`"letter"`, `"a4"`), case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "letter" | "us-letter" => Some(Self::Letter),
            "a4" => Some(Self::A4),
            _ => None,
        }
    }

    /// Width and height in points.
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            Self::Letter => (612.0, 792.0),
            Self::A4 => (595.0, 842.0),
        }
    }
}

/// Resolved page settings.
#[derive(Debug, Clone)]
pub struct PdfStyle {
    pub page_size: PageSize,
    /// Margin on every side, in points.
    pub margin: f32,
    /// Body font size, in points.
    pub font_size: f32,
    /// Embedded font used for every text run.
    pub font: Arc<Font>,
}

impl Default for PdfStyle {
    fn default() -> Self {
        Self {
            page_size: PageSize::Letter,
            margin: 72.0,
            font_size: 10.0,
            font: Font::builtin(),
        }
    }
}

impl PdfStyle {
    pub fn text_width(&self) -> f32 {
        let (width, _) = self.page_size.dimensions();
        (width - 2.0 * self.margin).max(0.0)
    }

    pub fn title_size(&self) -> f32 {
        self.font_size + 4.0
    }

    pub fn manifest_size(&self) -> f32 {
        (self.font_size - 1.0).max(6.0)
    }
}

/// Font face of a text line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    Regular,
    Bold,
}

/// A piece of document content, before wrapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Text that is wrapped to the text width. Embedded newlines are kept.
    Text { face: Face, size: f32, text: String },
    /// Vertical gap in points.
    Space(f32),
    /// Full-width horizontal rule.
    Rule,
}

/// A positioned element on one page. Coordinates are PDF user space
/// (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub enum PageItem {
    Text {
        x: f32,
        y: f32,
        face: Face,
        size: f32,
        text: String,
    },
    Rule { x1: f32, x2: f32, y: f32 },
}

/// One page of positioned items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<PageItem>,
}

impl Page {
    /// Text lines on this page, top to bottom.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            PageItem::Text { text, .. } => Some(text.as_str()),
            PageItem::Rule { .. } => None,
        })
    }
}

/// Wrap `text` so no line is wider than `max_width`, measuring each
/// character with `width_of`.
///
/// Source newlines are kept, tabs expand to four spaces, lines break at the
/// last space that fits, and words longer than a line are split. Every line
/// holds at least one character, and no visible character is dropped.
pub fn wrap_text(text: &str, max_width: f32, width_of: impl Fn(char) -> f32) -> Vec<String> {
    let mut lines = Vec::new();

    for source_line in text.split('\n') {
        let chars: Vec<char> = expand_line(source_line).chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut start = 0;
        while start < chars.len() {
            // First index past what fits on this line
            let mut end = start;
            let mut width = 0.0;
            while end < chars.len() {
                let next = width + width_of(chars[end]);
                if next > max_width + WIDTH_EPSILON && end > start {
                    break;
                }
                width = next;
                end += 1;
            }

            if end == chars.len() {
                lines.push(chars[start..].iter().collect());
                break;
            }

            // A space right after the last fitting character is a clean break too
            let break_at = chars[start + 1..=end]
                .iter()
                .rposition(|&c| c == ' ')
                .map(|pos| start + 1 + pos);
            match break_at {
                Some(pos) => {
                    let line: String = chars[start..pos].iter().collect();
                    lines.push(line.trim_end().to_string());
                    start = pos + 1;
                }
                None => {
                    lines.push(chars[start..end].iter().collect());
                    start = end;
                }
            }
        }
    }

    lines
}

/// Expand tabs and replace other control characters with spaces.
fn expand_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut col = 0;
    for c in line.chars() {
        match c {
            '\t' => {
                let pad = TAB_WIDTH - col % TAB_WIDTH;
                out.extend(std::iter::repeat(' ').take(pad));
                col += pad;
            }
            '\r' => {}
            c if c.is_control() => {
                out.push(' ');
                col += 1;
            }
            c => {
                out.push(c);
                col += 1;
            }
        }
    }
    out
}

/// Lay blocks out top to bottom, starting a new page whenever the next line
/// would cross the bottom margin. Always returns at least one page.
pub fn paginate(blocks: &[Block], style: &PdfStyle) -> Vec<Page> {
    let (_, height) = style.page_size.dimensions();
    let top = height - style.margin;
    let bottom = style.margin;
    let left = style.margin;
    let right = left + style.text_width();

    let mut pages = vec![Page::default()];
    let mut y = top;

    for block in blocks {
        match block {
            Block::Text { face, size, text } => {
                let line_height = size * LINE_HEIGHT_FACTOR;
                let max_width = style.text_width();
                let width_of = |c: char| style.font.char_width(c, *size);
                for line in wrap_text(text, max_width, width_of) {
                    if y - line_height < bottom && y < top {
                        pages.push(Page::default());
                        y = top;
                    }
                    y -= line_height;
                    if !line.is_empty() {
                        if let Some(page) = pages.last_mut() {
                            page.items.push(PageItem::Text {
                                x: left,
                                y: y + (line_height - size),
                                face: *face,
                                size: *size,
                                text: line,
                            });
                        }
                    }
                }
            }
            Block::Space(gap) => {
                y = (y - gap).max(bottom);
            }
            Block::Rule => {
                if y - RULE_SPACING < bottom && y < top {
                    pages.push(Page::default());
                    y = top;
                }
                y -= RULE_SPACING;
                if let Some(page) = pages.last_mut() {
                    page.items.push(PageItem::Rule {
                        x1: left,
                        x2: right,
                        y: y + RULE_SPACING / 2.0,
                    });
                }
            }
        }
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character one unit wide, so widths read as character counts.
    fn wrap(text: &str, max_chars: usize) -> Vec<String> {
        wrap_text(text, max_chars as f32, |_| 1.0)
    }

    #[test]
    fn test_page_size_names() {
        assert_eq!(PageSize::from_name("Letter"), Some(PageSize::Letter));
        assert_eq!(PageSize::from_name(" a4 "), Some(PageSize::A4));
        assert_eq!(PageSize::from_name("legal"), None);
    }

    #[test]
    fn test_default_style_fits_77_glyphs() {
        let style = PdfStyle::default();
        // 468pt text width / 6.02pt per DejaVu Sans Mono glyph at 10pt
        let line = "x".repeat(80);
        let lines = wrap_text(&line, style.text_width(), |c| style.font.char_width(c, 10.0));
        assert_eq!(lines[0].chars().count(), 77);
        assert_eq!(lines[1].chars().count(), 3);
    }

    #[test]
    fn test_wrap_breaks_at_spaces() {
        assert_eq!(wrap("the quick brown fox", 10), vec!["the quick", "brown fox"]);
        assert_eq!(wrap("a\n\nb", 10), vec!["a", "", "b"]);
        assert_eq!(wrap("abc def", 3), vec!["abc", "def"]);
    }

    #[test]
    fn test_wrap_hard_breaks_long_words() {
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_wrap_keeps_every_character() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, \
                    sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. \
                    Averyveryverylongwordthatcannotfitanywhere at all.";
        let lines = wrap(text, 17);
        assert!(lines.iter().all(|l| l.chars().count() <= 17));
        let original: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let wrapped: String = lines.concat().chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(original, wrapped);
    }

    #[test]
    fn test_wrap_uses_character_widths() {
        // Wide characters count double
        let width_of = |c: char| if c == 'W' { 2.0 } else { 1.0 };
        assert_eq!(wrap_text("WWWab", 4.0, width_of), vec!["WW", "Wab"]);
        // A glyph wider than the line still gets a line of its own
        assert_eq!(wrap_text("WW", 1.0, width_of), vec!["W", "W"]);
    }

    #[test]
    fn test_wrap_very_long_line() {
        let word = "abcdefghij";
        let text = vec![word; 20_000].join(" ");
        let lines = wrap(&text, 78);
        // Seven words plus separators fill 76 of 78 columns
        assert_eq!(lines.len(), 20_000 / 7 + 1);
        assert!(lines.iter().all(|l| l.chars().count() <= 78));
        assert_eq!(lines[0], vec![word; 7].join(" "));
        let kept: usize = lines.iter().map(|l| l.matches(word).count()).sum();
        assert_eq!(kept, 20_000);

        let unbroken = "x".repeat(500_000);
        let lines = wrap(&unbroken, 100);
        assert_eq!(lines.len(), 5_000);
        assert!(lines.iter().all(|l| l.len() == 100));
    }

    #[test]
    fn test_tabs_expand() {
        assert_eq!(wrap("a\tb", 80), vec!["a   b"]);
        assert_eq!(wrap("\tx\r", 80), vec!["    x"]);
    }

    #[test]
    fn test_non_latin_text_wraps_by_width() {
        let style = PdfStyle::default();
        let text = "Привет мир ".repeat(20);
        let lines = wrap_text(&text, style.text_width(), |c| style.font.char_width(c, 10.0));
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(style.font.text_width(line, 10.0) <= style.text_width() + 1e-3);
        }
    }

    #[test]
    fn test_paginate_long_body_spans_pages() {
        let style = PdfStyle::default();
        let body = (1..=200).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let pages = paginate(
            &[Block::Text {
                face: Face::Regular,
                size: style.font_size,
                text: body,
            }],
            &style,
        );
        // 648pt of text height / 12pt per line = 54 lines per page
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0].lines().count(), 54);
        let all: Vec<&str> = pages.iter().flat_map(|p| p.lines()).collect();
        assert_eq!(all.len(), 200);
        assert_eq!(all[0], "line 1");
        assert_eq!(all[199], "line 200");
    }

    #[test]
    fn test_paginate_respects_margins() {
        let style = PdfStyle::default();
        let body = "x\n".repeat(120);
        let pages = paginate(
            &[
                Block::Text {
                    face: Face::Bold,
                    size: 14.0,
                    text: "Title".to_string(),
                },
                Block::Rule,
                Block::Text {
                    face: Face::Regular,
                    size: 10.0,
                    text: body,
                },
            ],
            &style,
        );
        for page in &pages {
            for item in &page.items {
                let y = match item {
                    PageItem::Text { y, .. } | PageItem::Rule { y, .. } => *y,
                };
                assert!(y >= style.margin, "item below bottom margin: {y}");
                assert!(y <= 792.0 - style.margin, "item above top margin: {y}");
            }
        }
    }

    #[test]
    fn test_paginate_empty_has_one_page() {
        assert_eq!(paginate(&[], &PdfStyle::default()).len(), 1);
    }
}
