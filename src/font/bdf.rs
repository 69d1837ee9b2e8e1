//! BDF bitmap font loader.
//!
//! Only the subset needed for a fixed cell font is understood:
//! `FONTBOUNDINGBOX`, `STARTCHAR`, `ENCODING`, `DWIDTH`, `BBX`, `BITMAP`
//! and `ENDCHAR`. Everything else is skipped. Each glyph's bounding box is
//! placed into the font bounding box so every bitmap ends up exactly one
//! cell tall.

use std::fs;
use std::path::Path;

use super::{pixel_mask, Glyph, GlyphTable, GlyphWidth};
use crate::error::{Result, TermError};

/// Load glyphs from a BDF file
pub fn load(path: &Path, cell_width: u32, cell_height: u32) -> Result<Vec<Glyph>> {
    let text = fs::read_to_string(path)?;
    parse(&text, cell_width, cell_height)
}

#[derive(Clone, Copy, Debug)]
struct BoundingBox {
    width: i32,
    height: i32,
    x: i32,
    y: i32,
}

#[derive(Debug, Default)]
struct PendingGlyph {
    encoding: Option<i64>,
    dwidth: Option<i32>,
    bbx: Option<BoundingBox>,
    rows: Vec<u64>,
    in_bitmap: bool,
}

/// Parse BDF text into glyphs sized for `cell_width` x `cell_height` cells
pub fn parse(text: &str, cell_width: u32, cell_height: u32) -> Result<Vec<Glyph>> {
    let mut font_box: Option<BoundingBox> = None;
    let mut pending: Option<PendingGlyph> = None;
    let mut glyphs = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };

        if let Some(glyph) = pending.as_mut() {
            if glyph.in_bitmap && keyword != "ENDCHAR" {
                glyph.rows.push(parse_hex_row(keyword, line_no)?);
                continue;
            }
        }

        match keyword {
            "FONTBOUNDINGBOX" => {
                let fbb = parse_box(words, line_no)?;
                if fbb.height as u32 != cell_height {
                    return Err(TermError::FontMetrics {
                        cell_width,
                        cell_height,
                        found_width: fbb.width.max(0) as u32,
                        found_height: fbb.height.max(0) as u32,
                    });
                }
                font_box = Some(fbb);
            }
            "STARTCHAR" => {
                if pending.is_some() {
                    return Err(parse_error(line_no, "STARTCHAR inside a glyph"));
                }
                pending = Some(PendingGlyph::default());
            }
            "ENCODING" => {
                let glyph = pending
                    .as_mut()
                    .ok_or_else(|| parse_error(line_no, "ENCODING outside a glyph"))?;
                glyph.encoding = Some(parse_number(words.next(), line_no)?);
            }
            "DWIDTH" => {
                let glyph = pending
                    .as_mut()
                    .ok_or_else(|| parse_error(line_no, "DWIDTH outside a glyph"))?;
                glyph.dwidth = Some(parse_number(words.next(), line_no)?);
            }
            "BBX" => {
                let glyph = pending
                    .as_mut()
                    .ok_or_else(|| parse_error(line_no, "BBX outside a glyph"))?;
                glyph.bbx = Some(parse_box(words, line_no)?);
            }
            "BITMAP" => {
                let glyph = pending
                    .as_mut()
                    .ok_or_else(|| parse_error(line_no, "BITMAP outside a glyph"))?;
                glyph.in_bitmap = true;
            }
            "ENDCHAR" => {
                let glyph = pending
                    .take()
                    .ok_or_else(|| parse_error(line_no, "ENDCHAR without STARTCHAR"))?;
                let fbb = font_box
                    .ok_or_else(|| parse_error(line_no, "glyph before FONTBOUNDINGBOX"))?;
                if let Some(glyph) = finish_glyph(glyph, fbb, cell_width, cell_height, line_no)? {
                    glyphs.push(glyph);
                }
            }
            _ => {}
        }
    }

    if pending.is_some() {
        return Err(parse_error(text.lines().count(), "unterminated glyph"));
    }
    if font_box.is_none() {
        return Err(parse_error(0, "missing FONTBOUNDINGBOX"));
    }

    Ok(glyphs)
}

fn finish_glyph(
    pending: PendingGlyph,
    fbb: BoundingBox,
    cell_width: u32,
    cell_height: u32,
    line_no: usize,
) -> Result<Option<Glyph>> {
    let Some(encoding) = pending.encoding.filter(|e| *e >= 0) else {
        return Ok(None);
    };
    let code = encoding as u32;
    if !GlyphTable::SUPPORTED.contains(&code) {
        tracing::debug!("Skipping U+{:04X}: outside the supported range", code);
        return Ok(None);
    }

    let bbx = pending.bbx.unwrap_or(fbb);
    let advance = pending.dwidth.unwrap_or(bbx.width);
    let width = if advance == cell_width as i32 {
        GlyphWidth::Half
    } else if advance == 2 * cell_width as i32 {
        GlyphWidth::Wide
    } else {
        tracing::warn!(
            "Skipping U+{:04X}: advance {} does not match the {}px cell",
            code,
            advance,
            cell_width
        );
        return Ok(None);
    };

    if pending.rows.len() != bbx.height.max(0) as usize {
        return Err(parse_error(
            line_no,
            &format!(
                "U+{:04X} has {} bitmap rows, BBX says {}",
                code,
                pending.rows.len(),
                bbx.height
            ),
        ));
    }

    if bbx.width > 64 {
        return Err(parse_error(
            line_no,
            &format!("U+{:04X}: BBX width {} exceeds 64 pixels", code, bbx.width),
        ));
    }

    let glyph_px = cell_width * width.cells() as u32;
    let row_bytes = (bbx.width.max(0) as u32 + 7) / 8;
    // BDF y grows upward from the baseline; rows grow downward from the top.
    let top = (fbb.height + fbb.y) - (bbx.height + bbx.y);
    let left = bbx.x - fbb.x;

    let mut glyph = Glyph::blank(code, width, cell_height);
    for (i, bits) in pending.rows.iter().enumerate() {
        let row = top + i as i32;
        if row < 0 || row >= cell_height as i32 {
            continue;
        }
        for x in 0..bbx.width.max(0) as u32 {
            let set = bits
                .checked_shr(row_bytes * 8 - 1 - x)
                .map_or(false, |b| b & 1 != 0);
            let px = left + x as i32;
            if set && px >= 0 && (px as u32) < glyph_px {
                glyph.bitmap[row as usize] |= pixel_mask(glyph_px, px as u32);
            }
        }
    }

    Ok(Some(glyph))
}

fn parse_box<'a>(mut words: impl Iterator<Item = &'a str>, line_no: usize) -> Result<BoundingBox> {
    Ok(BoundingBox {
        width: parse_number(words.next(), line_no)?,
        height: parse_number(words.next(), line_no)?,
        x: parse_number(words.next(), line_no)?,
        y: parse_number(words.next(), line_no)?,
    })
}

fn parse_number<T: std::str::FromStr>(word: Option<&str>, line_no: usize) -> Result<T> {
    let word = word.ok_or_else(|| parse_error(line_no, "missing number"))?;
    word.parse()
        .map_err(|_| parse_error(line_no, &format!("invalid number {:?}", word)))
}

fn parse_hex_row(word: &str, line_no: usize) -> Result<u64> {
    if word.len() > 16 {
        return Err(parse_error(line_no, "bitmap row wider than 64 pixels"));
    }
    u64::from_str_radix(word, 16)
        .map_err(|_| parse_error(line_no, &format!("invalid bitmap row {:?}", word)))
}

fn parse_error(line: usize, message: &str) -> TermError {
    TermError::FontParse {
        line,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FONT: &str = "\
STARTFONT 2.1
FONT -misc-test-medium-r-normal--4-40-75-75-c-20-iso10646-1
SIZE 4 75 75
FONTBOUNDINGBOX 4 4 0 -1
CHARS 3
STARTCHAR A
ENCODING 65
DWIDTH 4 0
BBX 4 4 0 -1
BITMAP
60
90
F0
90
ENDCHAR
STARTCHAR dot
ENCODING 46
DWIDTH 4 0
BBX 1 1 1 0
BITMAP
80
ENDCHAR
STARTCHAR kanji
ENCODING 19968
DWIDTH 8 0
BBX 8 1 0 1
BITMAP
FF
ENDCHAR
ENDFONT
";

    #[test]
    fn test_parse_full_box_glyph() {
        let glyphs = parse(FONT, 4, 4).unwrap();
        let a = glyphs.iter().find(|g| g.code == 0x41).unwrap();
        assert_eq!(a.width, GlyphWidth::Half);
        // 4px rows are padded by 4 bits, exactly as in the file
        assert_eq!(a.bitmap, vec![0x60, 0x90, 0xF0, 0x90]);
    }

    #[test]
    fn test_small_bbx_is_placed_in_cell() {
        let glyphs = parse(FONT, 4, 4).unwrap();
        let dot = glyphs.iter().find(|g| g.code == 0x2E).unwrap();
        // baseline sits one row above the bottom: y offset 0 lands on row 2
        assert!(dot.pixel(4, 2, 1));
        assert_eq!(dot.bitmap.iter().filter(|r| **r != 0).count(), 1);
    }

    #[test]
    fn test_double_advance_is_wide() {
        let glyphs = parse(FONT, 4, 4).unwrap();
        let kanji = glyphs.iter().find(|g| g.code == 0x4E00).unwrap();
        assert_eq!(kanji.width, GlyphWidth::Wide);
        assert_eq!(kanji.bitmap[1], 0xFF);
        assert_eq!(kanji.bitmap[0], 0);
    }

    #[test]
    fn test_cell_height_mismatch() {
        assert!(matches!(
            parse(FONT, 4, 8),
            Err(TermError::FontMetrics { found_height: 4, .. })
        ));
    }

    #[test]
    fn test_oversized_bbx_rejected() {
        let wide = FONT.replace("BBX 1 1 1 0\n", "BBX 72 1 0 0\n");
        match parse(&wide, 4, 4) {
            Err(TermError::FontParse { line, message }) => {
                assert_eq!(line, 22);
                assert!(message.contains("72"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_bitmap_row_reports_line() {
        let broken = FONT.replace("F0\n", "ZZ\n");
        match parse(&broken, 4, 4) {
            Err(TermError::FontParse { line, .. }) => assert_eq!(line, 13),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
