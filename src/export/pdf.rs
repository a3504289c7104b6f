//! PDF rendering of one normalized message.
//!
//! Layout, top to bottom: title, header block, attachment manifest, rule,
//! body. Text is set in an embedded TrueType font (`Type0` / `CIDFontType2`
//! with `Identity-H`), so strings are glyph ids and a `ToUnicode` map keeps
//! the text searchable. Bold is the regular face filled and stroked.
//! The file is written to a temp file next to the target and renamed into
//! place, so a final path never holds a partial PDF.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use humansize::{format_size, BINARY};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::export::font::Font;
use crate::export::layout::{paginate, Block, Face, Page, PageItem, PdfStyle};
use crate::model::attachment::{PersistOutcome, PersistResult};
use crate::model::message::NormalizedMessage;

const FONT_RESOURCE: &str = "F1";

/// Stroke width of the faux bold face, relative to the font size.
const BOLD_STROKE: f32 = 0.03;

/// `bfchar` entries per block; readers reject larger blocks.
const CMAP_BLOCK: usize = 100;

/// What one render produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    pub pages: usize,
    /// Characters the font has no glyph for, drawn as the missing-glyph box.
    pub missing_glyphs: usize,
}

/// Render `message` with its attachment manifest to `output_path`.
///
/// Fails only when the document cannot be serialized or written.
pub fn render(
    message: &NormalizedMessage,
    manifest: &[PersistResult],
    output_path: &Path,
    style: &PdfStyle,
) -> Result<RenderSummary> {
    let blocks = document_blocks(message, manifest, style);
    let pages = paginate(&blocks, style);
    let (mut doc, missing_glyphs) = build_document(&pages, message.title(), style)
        .map_err(|e| ConvertError::render(output_path, e))?;

    let dir = match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".mbox2pdf-")
        .suffix(".pdf.tmp")
        .tempfile_in(dir)
        .map_err(|e| ConvertError::render(output_path, e))?;
    doc.save_to(&mut tmp)
        .map_err(|e| ConvertError::render(output_path, e))?;
    tmp.persist(output_path)
        .map_err(|e| ConvertError::render(output_path, e.error))?;

    debug!(
        path = %output_path.display(),
        pages = pages.len(),
        missing_glyphs,
        "Wrote PDF"
    );
    Ok(RenderSummary {
        pages: pages.len(),
        missing_glyphs,
    })
}

/// The content of one message as layout blocks.
pub fn document_blocks(
    message: &NormalizedMessage,
    manifest: &[PersistResult],
    style: &PdfStyle,
) -> Vec<Block> {
    let size = style.font_size;
    let mut blocks = vec![
        Block::Text {
            face: Face::Bold,
            size: style.title_size(),
            text: message.title().to_string(),
        },
        Block::Space(size * 0.6),
    ];

    let headers = &message.headers;
    let mut header_lines = vec![format!("From: {}", headers.from), format!("To:   {}", headers.to)];
    if !headers.cc.is_empty() {
        header_lines.push(format!("Cc:   {}", headers.cc));
    }
    header_lines.push(format!("Date: {}", headers.date));
    blocks.push(Block::Text {
        face: Face::Regular,
        size,
        text: header_lines.join("\n"),
    });

    if !manifest.is_empty() {
        let manifest_size = style.manifest_size();
        blocks.push(Block::Space(size * 0.6));
        blocks.push(Block::Text {
            face: Face::Bold,
            size: manifest_size,
            text: format!("Attachments ({})", manifest.len()),
        });
        blocks.push(Block::Text {
            face: Face::Regular,
            size: manifest_size,
            text: manifest.iter().map(manifest_line).collect::<Vec<_>>().join("\n"),
        });
    }

    blocks.push(Block::Space(size * 0.3));
    blocks.push(Block::Rule);
    blocks.push(Block::Space(size * 0.3));
    blocks.push(Block::Text {
        face: Face::Regular,
        size,
        text: message.body_text.clone(),
    });
    blocks
}

/// One manifest entry: `1. report.pdf (12 KiB) -> 0001_report.pdf`.
pub fn manifest_line(result: &PersistResult) -> String {
    let head = format!(
        "{}. {} ({})",
        result.index,
        result.display_name,
        format_size(result.byte_size, BINARY)
    );
    match &result.outcome {
        PersistOutcome::Saved { file_name } => format!("{head} -> {file_name}"),
        PersistOutcome::SkippedTooLarge { size, .. } => {
            format!("{head} skipped — too large ({size} bytes)")
        }
        PersistOutcome::Unreadable => format!("{head} unreadable"),
        PersistOutcome::NotExtracted => format!("{head} not extracted"),
        PersistOutcome::Failed { reason } => format!("{head} failed: {reason}"),
    }
}

/// Glyphs used by a document, for the width array and the `ToUnicode` map.
#[derive(Default)]
struct GlyphUsage {
    used: BTreeMap<u16, char>,
    missing: usize,
}

impl GlyphUsage {
    /// Big-endian glyph ids of `text`, the `Identity-H` string form.
    fn encode(&mut self, font: &Font, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() * 2);
        for c in text.chars() {
            let glyph = match font.glyph_id(c) {
                Some(glyph) => {
                    self.used.entry(glyph).or_insert(c);
                    glyph
                }
                None => {
                    self.missing += 1;
                    0
                }
            };
            out.extend_from_slice(&glyph.to_be_bytes());
        }
        out
    }
}

fn build_document(
    pages: &[Page],
    title: &str,
    style: &PdfStyle,
) -> lopdf::Result<(Document, usize)> {
    let (width, height) = style.page_size.dimensions();
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut usage = GlyphUsage::default();
    let contents: Vec<Content> = pages
        .iter()
        .map(|page| Content {
            operations: page_operations(page, &style.font, &mut usage),
        })
        .collect();

    let font_id = add_font(&mut doc, &style.font, &usage);
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            FONT_RESOURCE => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(contents.len());
    for content in contents {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "MediaBox" => vec![0_i64.into(), 0_i64.into(), width.into(), height.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(utf16_title(title), StringFormat::Hexadecimal),
        "Producer" => Object::string_literal(concat!("mbox2pdf ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    Ok((doc, usage.missing))
}

/// Embed `font` as a `Type0` font over a `CIDFontType2` descendant.
///
/// TODO: subset the font program to the used glyphs; the whole file is
/// embedded in every PDF today.
fn add_font(doc: &mut Document, font: &Font, usage: &GlyphUsage) -> ObjectId {
    let base_font = font.name().to_string();
    let program_id = doc.add_object(Stream::new(
        dictionary! { "Length1" => font.data().len() as i64 },
        font.data().to_vec(),
    ));

    let bbox: Vec<Object> = font.bbox().into_iter().map(Object::from).collect();
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => base_font.clone(),
        "Flags" => 4_i64,
        "FontBBox" => bbox,
        "ItalicAngle" => 0_i64,
        "Ascent" => font.ascent(),
        "Descent" => font.descent(),
        "CapHeight" => font.ascent(),
        "StemV" => 80_i64,
        "FontFile2" => program_id,
    });

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => base_font.clone(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0_i64,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => font.glyph_advance(0),
        "W" => glyph_widths(font, usage),
        "CIDToGIDMap" => "Identity",
    });

    let cmap = to_unicode_cmap(usage);
    let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, cmap.into_bytes()));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => base_font,
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => to_unicode_id,
    })
}

/// `W` array of the used glyphs, consecutive ids sharing one entry:
/// `[3 [602 602] 40 [602]]`.
fn glyph_widths(font: &Font, usage: &GlyphUsage) -> Vec<Object> {
    let mut entries = Vec::new();
    let mut run: Vec<Object> = Vec::new();
    let mut run_start = 0u16;
    let mut previous: Option<u16> = None;

    for &glyph in usage.used.keys() {
        if previous.map_or(true, |p| p + 1 != glyph) {
            if !run.is_empty() {
                entries.push(Object::from(run_start));
                entries.push(Object::Array(std::mem::take(&mut run)));
            }
            run_start = glyph;
        }
        run.push(font.glyph_advance(glyph).into());
        previous = Some(glyph);
    }
    if !run.is_empty() {
        entries.push(Object::from(run_start));
        entries.push(Object::Array(run));
    }
    entries
}

/// `ToUnicode` CMap mapping each used glyph id back to its character.
fn to_unicode_cmap(usage: &GlyphUsage) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );

    let entries: Vec<(&u16, &char)> = usage.used.iter().collect();
    for block in entries.chunks(CMAP_BLOCK) {
        let _ = writeln!(cmap, "{} beginbfchar", block.len());
        for (glyph, c) in block {
            let mut units = [0u16; 2];
            let target: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|unit| format!("{unit:04X}"))
                .collect();
            let _ = writeln!(cmap, "<{glyph:04X}> <{target}>");
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

fn page_operations(page: &Page, font: &Font, usage: &mut GlyphUsage) -> Vec<Operation> {
    let mut ops = Vec::new();
    for item in &page.items {
        match item {
            PageItem::Text {
                x,
                y,
                face,
                size,
                text,
            } => {
                let bold = *face == Face::Bold;
                if bold {
                    ops.push(Operation::new("q", vec![]));
                    ops.push(Operation::new("w", vec![(size * BOLD_STROKE).into()]));
                }
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new("Tf", vec![FONT_RESOURCE.into(), (*size).into()]));
                if bold {
                    ops.push(Operation::new("Tr", vec![2_i64.into()]));
                }
                ops.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                ops.push(Operation::new(
                    "Tj",
                    vec![Object::String(usage.encode(font, text), StringFormat::Hexadecimal)],
                ));
                ops.push(Operation::new("ET", vec![]));
                if bold {
                    ops.push(Operation::new("Q", vec![]));
                }
            }
            PageItem::Rule { x1, x2, y } => {
                ops.push(Operation::new("w", vec![0.5_f32.into()]));
                ops.push(Operation::new("m", vec![(*x1).into(), (*y).into()]));
                ops.push(Operation::new("l", vec![(*x2).into(), (*y).into()]));
                ops.push(Operation::new("S", vec![]));
            }
        }
    }
    ops
}

/// UTF-16BE with a byte-order mark, the PDF text string form for non-Latin titles.
fn utf16_title(title: &str) -> Vec<u8> {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in title.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::{BodySource, MessageHeaders};

    fn message(subject: &str, body: &str) -> NormalizedMessage {
        NormalizedMessage {
            sequence: 1,
            headers: MessageHeaders {
                from: "Alice <alice@example.com>".to_string(),
                to: "bob@example.com".to_string(),
                cc: String::new(),
                subject: subject.to_string(),
                date: "Mon, 1 Jan 2024 10:00:00 +0000".to_string(),
            },
            body_text: body.to_string(),
            body_source: BodySource::Plain,
            attachments: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn result(index: usize, outcome: PersistOutcome) -> PersistResult {
        PersistResult {
            index,
            display_name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            byte_size: 2048,
            outcome,
        }
    }

    fn page_text(path: &Path) -> String {
        let doc = Document::load(path).unwrap();
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        doc.extract_text(&pages).unwrap()
    }

    #[test]
    fn test_glyph_encoding() {
        let font = Font::builtin();
        let mut usage = GlyphUsage::default();
        let encoded = usage.encode(&font, "aП漢");
        assert_eq!(encoded.len(), 6);
        assert_eq!(&encoded[0..2], &font.glyph_id('a').unwrap().to_be_bytes());
        assert_eq!(&encoded[2..4], &font.glyph_id('П').unwrap().to_be_bytes());
        assert_eq!(&encoded[4..6], &[0, 0]);
        assert_eq!(usage.missing, 1);
        assert_eq!(usage.used.len(), 2);
    }

    #[test]
    fn test_to_unicode_cmap_entries() {
        let font = Font::builtin();
        let mut usage = GlyphUsage::default();
        usage.encode(&font, "Aé");
        let cmap = to_unicode_cmap(&usage);
        let a = font.glyph_id('A').unwrap();
        assert!(cmap.contains(&format!("<{a:04X}> <0041>")));
        assert!(cmap.contains("2 beginbfchar"));
        assert!(cmap.contains("<0000> <FFFF>"));
    }

    #[test]
    fn test_glyph_widths_group_consecutive_ids() {
        let font = Font::builtin();
        let mut usage = GlyphUsage::default();
        // 'a' and 'b' are adjacent glyphs, 'z' is not
        usage.encode(&font, "abz");
        let widths = glyph_widths(&font, &usage);
        assert_eq!(widths.len(), 4);
        assert_eq!(widths[0], Object::from(font.glyph_id('a').unwrap()));
        assert_eq!(widths[1], Object::Array(vec![602.0_f32.into(), 602.0_f32.into()]));
    }

    #[test]
    fn test_manifest_lines() {
        let saved = result(
            1,
            PersistOutcome::Saved {
                file_name: "0001_report.pdf".to_string(),
            },
        );
        assert_eq!(manifest_line(&saved), "1. report.pdf (2 KiB) -> 0001_report.pdf");

        let skipped = result(2, PersistOutcome::SkippedTooLarge { size: 2048, ceiling: 1024 });
        assert_eq!(
            manifest_line(&skipped),
            "2. report.pdf (2 KiB) skipped — too large (2048 bytes)"
        );
        assert!(manifest_line(&result(3, PersistOutcome::NotExtracted)).ends_with("not extracted"));
    }

    #[test]
    fn test_blocks_include_cc_only_when_present() {
        let mut msg = message("Hi", "Body");
        let blocks = document_blocks(&msg, &[], &PdfStyle::default());
        let header = match &blocks[2] {
            Block::Text { text, .. } => text.clone(),
            other => panic!("unexpected block {other:?}"),
        };
        assert!(!header.contains("Cc:"));

        msg.headers.cc = "carol@example.com".to_string();
        let blocks = document_blocks(&msg, &[], &PdfStyle::default());
        assert!(matches!(&blocks[2], Block::Text { text, .. } if text.contains("Cc:   carol@example.com")));
    }

    #[test]
    fn test_render_writes_loadable_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001_hi.pdf");
        let manifest = [result(
            1,
            PersistOutcome::Saved {
                file_name: "0001_report.pdf".to_string(),
            },
        )];

        render(&message("Hi", "Hello Bob"), &manifest, &path, &PdfStyle::default()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        let text = page_text(&path);
        assert!(text.contains("Hello Bob"));
        assert!(text.contains("0001_report.pdf"));

        // Only the final file remains in the directory
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_long_body_is_paginated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.pdf");
        let body = (1..=300).map(|n| format!("Paragraph line number {n}")).collect::<Vec<_>>().join("\n");

        let summary = render(&message("Long", &body), &[], &path, &PdfStyle::default()).unwrap();

        let doc = Document::load(&path).unwrap();
        assert!(doc.get_pages().len() >= 5);
        assert_eq!(summary.pages, doc.get_pages().len());
        let text = page_text(&path);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"Paragraph line number 1"));
        assert!(lines.contains(&"Paragraph line number 300"));
    }

    #[test]
    fn test_non_latin_text_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001_privet.pdf");
        let msg = message("Привет", "Привет мир Ελληνικά\nÇa coûte 5 €");

        let summary = render(&msg, &[], &path, &PdfStyle::default()).unwrap();
        assert_eq!(summary.missing_glyphs, 0);

        let text = page_text(&path);
        assert!(text.contains("Привет"), "extracted: {text}");
        assert!(text.contains("Привет мир Ελληνικά"), "extracted: {text}");
        assert!(text.contains("Ça coûte 5 €"), "extracted: {text}");
        assert!(!text.contains('?'));
        assert!(!text.contains('\u{FFFD}'));

        let doc = Document::load(&path).unwrap();
        let fonts: Vec<_> = doc
            .objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .filter(|d| d.type_is(b"Font"))
            .filter_map(|d| d.get(b"Subtype").and_then(Object::as_name_str).ok())
            .collect();
        assert!(fonts.contains(&"Type0"));
        assert!(fonts.contains(&"CIDFontType2"));
    }

    #[test]
    fn test_uncovered_characters_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001_cjk.pdf");

        let summary = render(&message("漢字", "body"), &[], &path, &PdfStyle::default()).unwrap();

        assert_eq!(summary.missing_glyphs, 2);
        assert!(page_text(&path).contains("body"));
    }

    #[test]
    fn test_render_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.pdf");
        let err = render(&message("x", "y"), &[], &path, &PdfStyle::default()).unwrap_err();
        assert!(matches!(err, ConvertError::Render { .. }));
    }
}
