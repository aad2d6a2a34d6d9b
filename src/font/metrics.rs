//! Line metrics for mixed text/emoji runs
//!
//! A line mixing coverage glyphs and color emoji needs the taller of the two
//! metrics, and the text baseline moves when the emoji outgrow the text.

use log::trace;

use super::cache::GlyphMetrics;
use crate::error::Result;

/// What line metrics need to know about glyphs and fonts
pub trait GlyphSource {
    /// Metrics of `code` as it would be drawn (fallbacks included)
    fn glyph_node(&mut self, code: u32, font_id: u8, size: u8) -> Result<GlyphMetrics>;

    /// Nominal line height of `font_id` at `size` (pixels)
    fn line_height(&mut self, font_id: u8, size: u8) -> Result<u16>;

    /// Was `font_id` registered as a color (emoji) font
    fn is_color_font(&self, font_id: u8) -> bool;

    /// Registered fonts that render coverage glyphs
    fn plain_font_ids(&self) -> Vec<u8>;
}

/// Per-letter size override inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpan {
    pub font_id: u8,
    pub size: u8,
    /// Line height of the span, filled in on first use
    pub height: Option<u16>,
}

impl SizeSpan {
    pub fn new(font_id: u8, size: u8) -> Self {
        Self {
            font_id,
            size,
            height: None,
        }
    }
}

/// Baseline shift of a mixed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineOffset {
    pub offset: u16,
    /// Emoji are taller than the text (or the run is homogeneous)
    pub emoji_dominant: bool,
}

#[derive(Debug, Default)]
struct RunTally {
    text: u16,
    emoji: u16,
    /// Tallest line height among fonts that resolved text glyphs
    text_height: u16,
    tallest_emoji: Option<GlyphMetrics>,
    /// Line heights already queried, by font id
    seen: Vec<(u8, u16)>,
}

impl RunTally {
    fn resolved(&self) -> u16 {
        self.text + self.emoji
    }

    fn emoji_rows(&self) -> u16 {
        self.tallest_emoji.map_or(0, |m| m.rows)
    }

    fn add<S: GlyphSource + ?Sized>(&mut self, source: &mut S, code: u32, font_id: u8, size: u8) {
        let node = match source.glyph_node(code, font_id, size) {
            Ok(node) => node,
            Err(e) => {
                trace!("U+{:04X} unresolved in font {}: {}", code, font_id, e);
                return;
            }
        };
        // a color font's outline glyphs still count as emoji
        if source.is_color_font(node.font_id) {
            self.emoji = self.emoji.saturating_add(1);
            if self.tallest_emoji.map_or(true, |m| node.rows > m.rows) {
                self.tallest_emoji = Some(node);
            }
        } else {
            self.text = self.text.saturating_add(1);
            let height = self.font_height(source, node.font_id, size);
            self.text_height = self.text_height.max(height);
        }
    }

    fn font_height<S: GlyphSource + ?Sized>(&mut self, source: &mut S, font_id: u8, size: u8) -> u16 {
        if let Some(&(_, h)) = self.seen.iter().find(|(id, _)| *id == font_id) {
            return h;
        }
        let h = source.line_height(font_id, size).unwrap_or(0);
        self.seen.push((font_id, h));
        h
    }
}

fn tally_run<S, I>(source: &mut S, chars: I, font_id: u8, size: u8) -> RunTally
where
    S: GlyphSource + ?Sized,
    I: IntoIterator<Item = char>,
{
    let mut tally = RunTally::default();
    for c in chars {
        tally.add(source, c as u32, font_id, size);
    }
    tally
}

fn run_height<S: GlyphSource + ?Sized>(source: &mut S, tally: &RunTally, floor: u16, size: u8) -> u16 {
    if tally.resolved() == 0 {
        return floor;
    }
    if tally.emoji == 0 {
        return floor.max(tally.text_height);
    }
    if tally.text == 0 {
        return tally.emoji_rows();
    }
    // mixed: every plain font could end up on this line
    let plain = source
        .plain_font_ids()
        .into_iter()
        .filter_map(|id| source.line_height(id, size).ok())
        .max()
        .unwrap_or(0);
    floor
        .max(tally.text_height)
        .max(plain)
        .max(tally.emoji_rows())
}

/// Height of the line holding `text`
pub fn line_height<S: GlyphSource + ?Sized>(source: &mut S, text: &str, font_id: u8, size: u8) -> Result<u16> {
    let nominal = source.line_height(font_id, size)?;
    let tally = tally_run(source, text.chars(), font_id, size);
    let height = run_height(source, &tally, nominal, size);
    trace!(
        "Line height {} ({} text, {} emoji, nominal {})",
        height,
        tally.text,
        tally.emoji,
        nominal
    );
    Ok(height)
}

/// Height of the line starting at `text`, honoring size spans.
///
/// `spans[i]` overrides the size of letter `i` of the paragraph;
/// `letter_index` is the paragraph index of the first letter of `text` and
/// is advanced past every letter consumed. The line ends after the first
/// `\r` or `\n`.
pub fn line_height_with_spans<S: GlyphSource + ?Sized>(
    source: &mut S,
    text: &str,
    font_id: u8,
    size: u8,
    spans: &mut [Option<SizeSpan>],
    letter_index: &mut usize,
) -> Result<u16> {
    let nominal = source.line_height(font_id, size)?;
    let mut span_height = 0u16;
    let mut line = Vec::new();
    for c in text.chars() {
        line.push(c);
        if let Some(Some(span)) = spans.get_mut(*letter_index) {
            let height = match span.height {
                Some(h) => h,
                None => {
                    let h = source.line_height(span.font_id, span.size).unwrap_or(0);
                    span.height = Some(h);
                    h
                }
            };
            span_height = span_height.max(height);
        }
        *letter_index += 1;
        if c == '\r' || c == '\n' {
            break;
        }
    }
    let tally = tally_run(source, line, font_id, size);
    let height = run_height(source, &tally, nominal.max(span_height), size);
    Ok(height.max(span_height))
}

/// Baseline offset of the line holding `text`
pub fn baseline_offset<S: GlyphSource + ?Sized>(
    source: &mut S,
    text: &str,
    font_id: u8,
    size: u8,
) -> BaselineOffset {
    let tally = tally_run(source, text.chars(), font_id, size);
    if tally.emoji == tally.resolved() || tally.text == tally.resolved() {
        return BaselineOffset {
            offset: 0,
            emoji_dominant: true,
        };
    }
    let rows = tally.emoji_rows();
    let size = u16::from(size);
    let emoji_dominant = rows > size;
    BaselineOffset {
        offset: if emoji_dominant { rows - size } else { size - rows },
        emoji_dominant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FontError;
    use std::collections::HashMap;

    /// Font 0: text, font 1: emoji, font 2: tall text
    struct Fixture {
        glyphs: HashMap<u32, GlyphMetrics>,
        heights: HashMap<u8, u16>,
        queries: usize,
    }

    fn node(font_id: u8, rows: u16, bits_per_pixel: u8) -> GlyphMetrics {
        GlyphMetrics {
            advance: rows,
            left: 0,
            top: rows as i16,
            cols: rows,
            rows,
            bits_per_pixel,
            font_id,
        }
    }

    impl Fixture {
        fn new() -> Self {
            let glyphs = HashMap::from([
                ('a' as u32, node(0, 12, 8)),
                ('b' as u32, node(0, 14, 8)),
                ('\n' as u32, node(0, 0, 8)),
                (0x1F600, node(1, 30, 32)),
                (0x1F601, node(1, 10, 32)),
                (0x1F602, node(1, 30, 8)),
                (0x2460, node(0, 16, 32)),
                (0x0627, node(2, 16, 8)),
            ]);
            let heights = HashMap::from([(0, 20), (1, 34), (2, 26), (3, 40)]);
            Self {
                glyphs,
                heights,
                queries: 0,
            }
        }
    }

    impl GlyphSource for Fixture {
        fn glyph_node(&mut self, code: u32, _font_id: u8, _size: u8) -> Result<GlyphMetrics> {
            self.glyphs
                .get(&code)
                .copied()
                .ok_or(FontError::GlyphNotFound(code))
        }

        fn line_height(&mut self, font_id: u8, size: u8) -> Result<u16> {
            self.queries += 1;
            // font 3 only exists at size 40
            if font_id == 3 && size != 40 {
                return Err(FontError::InvalidSize(size));
            }
            self.heights
                .get(&font_id)
                .copied()
                .ok_or(FontError::InvalidFontId(font_id))
        }

        fn is_color_font(&self, font_id: u8) -> bool {
            font_id == 1
        }

        fn plain_font_ids(&self) -> Vec<u8> {
            vec![0, 2]
        }
    }

    #[test]
    fn test_plain_run() {
        let mut f = Fixture::new();
        assert_eq!(line_height(&mut f, "ab", 0, 18).unwrap(), 20);
        // a fallback font on the line raises it
        assert_eq!(line_height(&mut f, "a\u{0627}", 0, 18).unwrap(), 26);
    }

    #[test]
    fn test_emoji_run_uses_tallest_emoji() {
        let mut f = Fixture::new();
        assert_eq!(line_height(&mut f, "\u{1F601}\u{1F600}", 1, 18).unwrap(), 30);
    }

    #[test]
    fn test_mixed_run() {
        let mut f = Fixture::new();
        let height = line_height(&mut f, "a\u{1F600}", 0, 18).unwrap();
        // max of every plain font (26) and the tallest emoji (30)
        assert_eq!(height, 30);
        let height = line_height(&mut f, "a\u{1F601}", 0, 18).unwrap();
        assert_eq!(height, 26);
    }

    #[test]
    fn test_glyphs_classified_by_font_kind() {
        let mut f = Fixture::new();
        // coverage glyph from the color font: still emoji
        assert_eq!(line_height(&mut f, "\u{1F602}", 1, 18).unwrap(), 30);
        assert_eq!(
            baseline_offset(&mut f, "a\u{1F602}", 0, 18),
            BaselineOffset { offset: 12, emoji_dominant: true }
        );
        // deep glyph from a plain font: still text
        assert_eq!(line_height(&mut f, "\u{2460}", 0, 18).unwrap(), 20);
        assert_eq!(
            baseline_offset(&mut f, "a\u{2460}", 0, 18),
            BaselineOffset { offset: 0, emoji_dominant: true }
        );
    }

    #[test]
    fn test_unresolved_run_falls_back_to_nominal() {
        let mut f = Fixture::new();
        assert_eq!(line_height(&mut f, "zz", 0, 18).unwrap(), 20);
        assert_eq!(line_height(&mut f, "", 0, 18).unwrap(), 20);
        assert!(line_height(&mut f, "a", 9, 18).is_err());
    }

    #[test]
    fn test_baseline_offset() {
        let mut f = Fixture::new();
        // emoji taller than text
        assert_eq!(
            baseline_offset(&mut f, "a\u{1F600}", 0, 18),
            BaselineOffset { offset: 12, emoji_dominant: true }
        );
        // text taller than emoji
        assert_eq!(
            baseline_offset(&mut f, "a\u{1F601}", 0, 18),
            BaselineOffset { offset: 8, emoji_dominant: false }
        );
        // homogeneous runs
        assert_eq!(
            baseline_offset(&mut f, "ab", 0, 18),
            BaselineOffset { offset: 0, emoji_dominant: true }
        );
        assert_eq!(
            baseline_offset(&mut f, "\u{1F600}", 0, 18),
            BaselineOffset { offset: 0, emoji_dominant: true }
        );
    }

    #[test]
    fn test_spans_raise_height_and_memoise() {
        let mut f = Fixture::new();
        let mut spans = vec![None, Some(SizeSpan::new(3, 40)), None];
        let mut letter = 0;
        let height = line_height_with_spans(&mut f, "ab", 0, 18, &mut spans, &mut letter).unwrap();
        assert_eq!(height, 40);
        assert_eq!(letter, 2);
        assert_eq!(spans[1].unwrap().height, Some(40));

        let queries = f.queries;
        let mut letter = 1;
        line_height_with_spans(&mut f, "b", 0, 18, &mut spans, &mut letter).unwrap();
        // nominal + per-font text height, span height reused
        assert_eq!(f.queries, queries + 2);
    }

    #[test]
    fn test_spans_stop_at_newline() {
        let mut f = Fixture::new();
        let mut spans = vec![None, None, Some(SizeSpan::new(3, 40))];
        let mut letter = 0;
        let height = line_height_with_spans(&mut f, "a\nb", 0, 18, &mut spans, &mut letter).unwrap();
        assert_eq!(letter, 2);
        assert_eq!(height, 20);
        assert_eq!(spans[2].unwrap().height, None);
    }
}
