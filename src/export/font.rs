//! TrueType font metrics for the PDF renderer.
//!
//! Only the tables needed to place and embed text are read: `head`, `hhea`,
//! `maxp`, `hmtx`, `cmap` and `name`. The font program itself is embedded
//! unchanged as a `FontFile2` stream.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ConvertError, Result};

/// DejaVu Sans Mono: Latin, Greek, Cyrillic and symbol coverage. CJK needs a
/// font configured through `pdf.font_path`.
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono.ttf");

static BUILTIN: OnceLock<Arc<Font>> = OnceLock::new();

/// A parsed TrueType font.
pub struct Font {
    name: String,
    data: Cow<'static, [u8]>,
    units_per_em: u16,
    ascent: i16,
    descent: i16,
    bbox: [i16; 4],
    advances: Vec<u16>,
    glyphs: HashMap<char, u16>,
}

impl std::fmt::Debug for Font {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Font")
            .field("name", &self.name)
            .field("glyphs", &self.advances.len())
            .field("mapped_chars", &self.glyphs.len())
            .finish()
    }
}

impl Font {
    /// The bundled DejaVu Sans Mono, parsed once per process.
    pub fn builtin() -> Arc<Font> {
        BUILTIN
            .get_or_init(|| {
                Arc::new(Font::parse(Cow::Borrowed(BUNDLED_FONT)).expect("bundled font parses"))
            })
            .clone()
    }

    /// Load a TrueType (`.ttf`) font from disk.
    pub fn load(path: &Path) -> Result<Font> {
        let data = std::fs::read(path).map_err(|e| ConvertError::io(path, e))?;
        Font::parse(Cow::Owned(data))
    }

    /// Parse a TrueType font. OpenType fonts with CFF outlines and font
    /// collections are rejected.
    pub fn parse(data: Cow<'static, [u8]>) -> Result<Font> {
        let tables = TableDirectory::read(&data)?;

        let head = tables.get(&data, b"head")?;
        let units_per_em = read_u16(head, 18)?;
        if units_per_em == 0 {
            return Err(ConvertError::Font("unitsPerEm is zero".to_string()));
        }
        let bbox = [
            read_i16(head, 36)?,
            read_i16(head, 38)?,
            read_i16(head, 40)?,
            read_i16(head, 42)?,
        ];

        let hhea = tables.get(&data, b"hhea")?;
        let ascent = read_i16(hhea, 4)?;
        let descent = read_i16(hhea, 6)?;
        let metric_count = read_u16(hhea, 34)? as usize;

        let glyph_count = read_u16(tables.get(&data, b"maxp")?, 4)? as usize;
        let advances = read_advances(tables.get(&data, b"hmtx")?, metric_count, glyph_count)?;
        let glyphs = read_cmap(tables.get(&data, b"cmap")?, glyph_count)?;
        let name = tables
            .get(&data, b"name")
            .ok()
            .and_then(postscript_name)
            .unwrap_or_else(|| "EmbeddedFont".to_string());

        Ok(Font {
            name,
            data,
            units_per_em,
            ascent,
            descent,
            bbox,
            advances,
            glyphs,
        })
    }

    /// PostScript name, safe to use as a PDF name object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw font program.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Glyph for `c`, if the font covers it.
    pub fn glyph_id(&self, c: char) -> Option<u16> {
        self.glyphs.get(&c).copied()
    }

    /// Advance width of `glyph` in thousandths of an em.
    pub fn glyph_advance(&self, glyph: u16) -> f32 {
        let units = self
            .advances
            .get(glyph as usize)
            .or_else(|| self.advances.last())
            .copied()
            .unwrap_or(0);
        self.scale(units as i32)
    }

    /// Width of `c` set at `size` points. Uncovered characters take the
    /// width of the missing-glyph box.
    pub fn char_width(&self, c: char, size: f32) -> f32 {
        self.glyph_advance(self.glyph_id(c).unwrap_or(0)) * size / 1000.0
    }

    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c, size)).sum()
    }

    /// Ascent, descent and bounding box in thousandths of an em.
    pub fn ascent(&self) -> f32 {
        self.scale(self.ascent as i32)
    }

    pub fn descent(&self) -> f32 {
        self.scale(self.descent as i32)
    }

    pub fn bbox(&self) -> [f32; 4] {
        self.bbox.map(|v| self.scale(v as i32))
    }

    fn scale(&self, units: i32) -> f32 {
        (units as f32 * 1000.0 / self.units_per_em as f32).round()
    }
}

/// Table offsets of an sfnt file.
struct TableDirectory {
    tables: HashMap<[u8; 4], (usize, usize)>,
}

impl TableDirectory {
    fn read(data: &[u8]) -> Result<Self> {
        match read_u32(data, 0)? {
            0x0001_0000 | 0x7472_7565 => {}
            0x4F54_544F => {
                return Err(ConvertError::Font(
                    "CFF-flavored OpenType fonts are not supported, use a .ttf".to_string(),
                ))
            }
            0x7474_6366 => {
                return Err(ConvertError::Font(
                    "font collections (.ttc) are not supported".to_string(),
                ))
            }
            other => {
                return Err(ConvertError::Font(format!(
                    "not a TrueType font (signature {other:#010x})"
                )))
            }
        }

        let count = read_u16(data, 4)? as usize;
        let mut tables = HashMap::with_capacity(count);
        for i in 0..count {
            let record = 12 + i * 16;
            let tag = slice(data, record, 4)?;
            let offset = read_u32(data, record + 8)? as usize;
            let length = read_u32(data, record + 12)? as usize;
            tables.insert([tag[0], tag[1], tag[2], tag[3]], (offset, length));
        }
        Ok(Self { tables })
    }

    fn get<'a>(&self, data: &'a [u8], tag: &[u8; 4]) -> Result<&'a [u8]> {
        let (offset, length) = self.tables.get(tag).copied().ok_or_else(|| {
            ConvertError::Font(format!("missing '{}' table", String::from_utf8_lossy(tag)))
        })?;
        slice(data, offset, length)
    }
}

fn read_advances(hmtx: &[u8], metric_count: usize, glyph_count: usize) -> Result<Vec<u16>> {
    if metric_count == 0 {
        return Err(ConvertError::Font("no horizontal metrics".to_string()));
    }
    let mut advances = Vec::with_capacity(glyph_count.max(metric_count));
    for i in 0..metric_count {
        advances.push(read_u16(hmtx, i * 4)?);
    }
    // Monospaced fonts list one metric and repeat it for the rest
    let last = advances[metric_count - 1];
    advances.resize(glyph_count.max(metric_count), last);
    Ok(advances)
}

/// Character to glyph map from the best Unicode subtable: format 12 when
/// present, otherwise format 4.
fn read_cmap(cmap: &[u8], glyph_count: usize) -> Result<HashMap<char, u16>> {
    let count = read_u16(cmap, 2)? as usize;
    let mut best: Option<(u8, usize)> = None;
    for i in 0..count {
        let record = 4 + i * 8;
        let platform = read_u16(cmap, record)?;
        let encoding = read_u16(cmap, record + 2)?;
        let offset = read_u32(cmap, record + 4)? as usize;
        let unicode = platform == 0 || (platform == 3 && (encoding == 1 || encoding == 10));
        if !unicode {
            continue;
        }
        let rank = match read_u16(cmap, offset)? {
            12 => 2,
            4 => 1,
            _ => continue,
        };
        if best.map_or(true, |(r, _)| rank > r) {
            best = Some((rank, offset));
        }
    }

    let (_, offset) =
        best.ok_or_else(|| ConvertError::Font("no Unicode cmap subtable".to_string()))?;
    let subtable = cmap
        .get(offset..)
        .ok_or_else(|| ConvertError::Font("truncated font data".to_string()))?;
    let mut glyphs = match read_u16(subtable, 0)? {
        12 => read_cmap_format12(subtable)?,
        _ => read_cmap_format4(subtable)?,
    };
    glyphs.retain(|_, glyph| (*glyph as usize) < glyph_count);
    Ok(glyphs)
}

fn read_cmap_format4(table: &[u8]) -> Result<HashMap<char, u16>> {
    let seg_count = read_u16(table, 6)? as usize / 2;
    let ends = 14;
    let starts = ends + seg_count * 2 + 2;
    let deltas = starts + seg_count * 2;
    let range_offsets = deltas + seg_count * 2;

    let mut glyphs = HashMap::new();
    for seg in 0..seg_count {
        let end = read_u16(table, ends + seg * 2)?;
        let start = read_u16(table, starts + seg * 2)?;
        let delta = read_u16(table, deltas + seg * 2)?;
        let range_offset_at = range_offsets + seg * 2;
        let range_offset = read_u16(table, range_offset_at)? as usize;
        if start > end {
            continue;
        }
        for code in start..=end {
            if code == 0xFFFF {
                break;
            }
            let glyph = if range_offset == 0 {
                code.wrapping_add(delta)
            } else {
                let at = range_offset_at + range_offset + (code - start) as usize * 2;
                match read_u16(table, at)? {
                    0 => 0,
                    raw => raw.wrapping_add(delta),
                }
            };
            if let (Some(c), true) = (char::from_u32(code as u32), glyph != 0) {
                glyphs.insert(c, glyph);
            }
        }
    }
    Ok(glyphs)
}

fn read_cmap_format12(table: &[u8]) -> Result<HashMap<char, u16>> {
    let groups = read_u32(table, 12)? as usize;
    let mut glyphs = HashMap::new();
    for group in 0..groups {
        let record = 16 + group * 12;
        let start = read_u32(table, record)?;
        let end = read_u32(table, record + 4)?.min(0x10_FFFF);
        let first_glyph = read_u32(table, record + 8)?;
        if start > end {
            continue;
        }
        for code in start..=end {
            let Some(glyph) = first_glyph.checked_add(code - start) else {
                break;
            };
            let (Some(c), Ok(glyph)) = (char::from_u32(code), u16::try_from(glyph)) else {
                continue;
            };
            if glyph != 0 {
                glyphs.insert(c, glyph);
            }
        }
    }
    Ok(glyphs)
}

/// Name ID 6 from the `name` table, reduced to characters valid in a PDF name.
fn postscript_name(table: &[u8]) -> Option<String> {
    let count = read_u16(table, 2).ok()? as usize;
    let storage = read_u16(table, 4).ok()? as usize;
    for i in 0..count {
        let record = 6 + i * 12;
        let platform = read_u16(table, record).ok()?;
        let name_id = read_u16(table, record + 6).ok()?;
        if name_id != 6 {
            continue;
        }
        let length = read_u16(table, record + 8).ok()? as usize;
        let offset = read_u16(table, record + 10).ok()? as usize;
        let raw = slice(table, storage + offset, length).ok()?;
        let decoded = match platform {
            0 | 3 => {
                let units: Vec<u16> = raw.chunks_exact(2).map(BigEndian::read_u16).collect();
                String::from_utf16_lossy(&units)
            }
            _ => String::from_utf8_lossy(raw).into_owned(),
        };
        let name: String = decoded
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !name.is_empty() {
            return Some(name);
        }
    }
    None
}

fn slice(data: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| ConvertError::Font("truncated font data".to_string()))
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    slice(data, offset, 2).map(BigEndian::read_u16)
}

fn read_i16(data: &[u8], offset: usize) -> Result<i16> {
    slice(data, offset, 2).map(BigEndian::read_i16)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    slice(data, offset, 4).map(BigEndian::read_u32)
}
