//! Glyph resolution
//!
//! Turns (code point, font, size, style) into a rendered glyph:
//! - tagged code points (font id in bits 24-28) carry shaper output
//! - color fonts pick the closest embedded strike instead of scaling
//! - bold/italic are synthesized when the font has no such face
//! - missing glyphs may fall back to fonts chosen by the shaping manager

use log::{debug, trace, warn};

use super::catalog::{FontCatalog, FontKind};
use super::engine::{FontFace, GlyphTarget, LoadRequest, Matrix, RenderedGlyph, SlotFormat};
use super::shaping::ShapingManager;
use super::Features;
use crate::constants::{
    BOLD_STRENGTH_DIVISOR, FONT_PIXEL_IN_POINT, GLYPH_TAG_FONT_MASK, GLYPH_TAG_PAYLOAD_MASK,
    GLYPH_TAG_SHIFT, ITALIC_LEAN, MAX_GLYPH_DIMENSION,
};
use crate::error::{FontError, Result};

/// Requested text style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextStyle {
    #[default]
    Normal,
    Bold,
    Italic,
    BoldItalic,
}

impl TextStyle {
    pub fn is_bold(self) -> bool {
        matches!(self, Self::Bold | Self::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, Self::Italic | Self::BoldItalic)
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "bold" => Self::Bold,
            "italic" => Self::Italic,
            "bold-italic" | "bolditalic" | "bold_italic" => Self::BoldItalic,
            _ => Self::Normal,
        }
    }
}

/// Split a code point into (tag font id, low 24-bit payload)
pub fn split_tag(code: u32) -> (u8, u32) {
    (
        ((code >> GLYPH_TAG_SHIFT) & GLYPH_TAG_FONT_MASK) as u8,
        code & GLYPH_TAG_PAYLOAD_MASK,
    )
}

/// Tag `payload` with `font_id`
pub fn tag_code_point(font_id: u8, payload: u32) -> u32 {
    ((u32::from(font_id) & GLYPH_TAG_FONT_MASK) << GLYPH_TAG_SHIFT) | (payload & GLYPH_TAG_PAYLOAD_MASK)
}

/// Tag target of `code` in `catalog`.
///
/// Tag 0 is plain Unicode; other tags count only while they address a
/// registered shaping font.
pub fn tagged_target<F: FontFace>(catalog: &FontCatalog<F>, code: u32) -> Option<(u8, u32)> {
    let (font_id, payload) = split_tag(code);
    if font_id == 0 {
        return None;
    }
    let record = catalog.tagged_font(code)?;
    (record.shaping != 0).then_some((font_id, payload))
}

/// Fixed-point multiply (16.16), rounding like FT_MulFix
pub fn mul_fix(a: i64, b: i64) -> i64 {
    let product = a * b;
    if product >= 0 {
        (product + 0x8000) >> 16
    } else {
        -((-product + 0x8000) >> 16)
    }
}

/// Index of the embedded strike whose width is closest to `size`.
///
/// Ties keep the earlier strike. `None` when the font has no strikes.
pub fn best_fixed_size(widths: &[i16], size: u8) -> Option<usize> {
    let size = i32::from(size);
    widths
        .iter()
        .enumerate()
        .min_by_key(|(i, w)| ((size - i32::from(**w)).abs(), *i))
        .map(|(i, _)| i)
}

/// Select a size on `face`: closest strike for color fonts, scaled outline otherwise
pub fn prepare_face<F: FontFace>(face: &mut F, kind: FontKind, size: u8) -> Result<()> {
    if size == 0 {
        return Err(FontError::InvalidSize(size));
    }
    match kind {
        FontKind::Color => {
            let widths = face.fixed_sizes();
            let index = best_fixed_size(&widths, size)
                .ok_or_else(|| FontError::EngineFailure("color font has no fixed sizes".into()))?;
            trace!("Strike {} ({}px) for {}px", index, widths[index], size);
            face.select_fixed_size(index)
        }
        FontKind::Plain => face.set_pixel_size(u32::from(size)),
    }
}

fn synthesize_italic<F: FontFace>(face: &mut F) {
    if face.slot_format() != SlotFormat::Outline {
        warn!("Synthetic italic needs an outline glyph");
        return;
    }
    face.transform_outline(&Matrix::shear(ITALIC_LEAN));
}

fn synthesize_bold<F: FontFace>(face: &mut F) {
    // em size in 26.6 pixels, divided down to a stroke width
    let strength = mul_fix(i64::from(face.units_per_em()), face.y_scale()) / BOLD_STRENGTH_DIVISOR;
    let result = match face.slot_format() {
        SlotFormat::Outline => face.embolden_outline(strength),
        SlotFormat::Bitmap => face.embolden_bitmap(strength, strength),
        SlotFormat::Other => return,
    };
    if let Err(e) = result {
        warn!("Synthetic bold failed: {}", e);
    }
}

/// Load, style and render one glyph on an already sized face
pub fn rasterize<F: FontFace>(
    face: &mut F,
    code: u32,
    request: LoadRequest,
    style: TextStyle,
) -> Result<RenderedGlyph> {
    let glyph_index = face.load_glyph(request)?;
    if glyph_index == 0 {
        return Err(FontError::GlyphNotFound(code));
    }

    if style.is_italic() {
        synthesize_italic(face);
    }
    if style.is_bold() {
        synthesize_bold(face);
    }
    if face.slot_format() != SlotFormat::Bitmap {
        face.render()?;
    }

    let glyph = face.rendered()?;
    if glyph.glyph_index == 0 {
        return Err(FontError::GlyphNotFound(code));
    }
    if glyph.cols > MAX_GLYPH_DIMENSION || glyph.rows > MAX_GLYPH_DIMENSION {
        warn!("Glyph too large ({}x{}), skipping", glyph.cols, glyph.rows);
        return Err(FontError::EngineFailure("glyph exceeds size limit".into()));
    }
    trace!(
        "Rasterized U+{:04X}: {}x{}, advance={}",
        code,
        glyph.cols,
        glyph.rows,
        glyph.advance / FONT_PIXEL_IN_POINT
    );
    Ok(glyph)
}

/// Outcome of a resolution: which font rendered the glyph, and the glyph
#[derive(Debug, Clone)]
pub struct Resolution {
    pub font_id: u8,
    pub glyph: RenderedGlyph,
}

/// Resolves glyph requests against a catalogue
pub struct GlyphResolver<'a, F> {
    catalog: &'a mut FontCatalog<F>,
    shaping: &'a dyn ShapingManager,
    features: Features,
}

impl<'a, F: FontFace> GlyphResolver<'a, F> {
    pub fn new(
        catalog: &'a mut FontCatalog<F>,
        shaping: &'a dyn ShapingManager,
        features: Features,
    ) -> Self {
        Self {
            catalog,
            shaping,
            features,
        }
    }

    /// Tag target of `code`, if the font it addresses is a registered
    /// shaping font. Untagged code points report `None`.
    pub fn tagged_target(&self, code: u32) -> Option<(u8, u32)> {
        tagged_target(&*self.catalog, code)
    }

    /// Render `code` at `size` in `font_id`, or a fallback font
    pub fn resolve(&mut self, code: u32, font_id: u8, size: u8, style: TextStyle) -> Result<Resolution> {
        if let Some((tag_font, payload)) = self.tagged_target(code) {
            if tag_font != font_id {
                debug!(
                    "Tagged glyph {:#010X} belongs to font {}, not {}",
                    code, tag_font, font_id
                );
                return Err(FontError::GlyphNotFound(code));
            }
            let glyph = self.render_in(font_id, code, GlyphTarget::Index(payload), size, style)?;
            return Ok(Resolution { font_id, glyph });
        }

        match self.render_in(font_id, code, GlyphTarget::Char(code), size, style) {
            Ok(glyph) => Ok(Resolution { font_id, glyph }),
            Err(FontError::GlyphNotFound(_)) if self.features.contains(Features::MULTI_FONT) => {
                self.resolve_fallback(code, font_id, size, style)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_fallback(&mut self, code: u32, font_id: u8, size: u8, style: TextStyle) -> Result<Resolution> {
        for candidate in self.shaping.search_fallback_fonts(font_id) {
            if candidate == font_id || self.catalog.get(candidate).is_none() {
                continue;
            }
            match self.render_in(candidate, code, GlyphTarget::Char(code), size, style) {
                Ok(glyph) => {
                    debug!("U+{:04X}: font {} -> fallback {}", code, font_id, candidate);
                    return Ok(Resolution {
                        font_id: candidate,
                        glyph,
                    });
                }
                Err(e) => trace!("Fallback font {} for U+{:04X}: {}", candidate, code, e),
            }
        }
        Err(FontError::GlyphNotFound(code))
    }

    fn render_in(
        &mut self,
        font_id: u8,
        code: u32,
        target: GlyphTarget,
        size: u8,
        style: TextStyle,
    ) -> Result<RenderedGlyph> {
        let kind = self
            .catalog
            .get(font_id)
            .ok_or(FontError::InvalidFontId(font_id))?
            .kind;
        let color = kind.is_color() && self.features.contains(Features::COLOR_FONTS);
        let style = if self.features.contains(Features::STYLE_SYNTHESIS) {
            style
        } else {
            TextStyle::Normal
        };
        let face = self
            .catalog
            .face_mut(font_id)
            .ok_or(FontError::InvalidFontId(font_id))?;
        prepare_face(face, if color { FontKind::Color } else { FontKind::Plain }, size)?;
        rasterize(face, code, LoadRequest { target, color }, style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::catalog::FontParam;
    use crate::font::engine::scripted::{
        build_sfnt, EngineCall, FaceScript, GlyphScript, ScriptedEngine, ScriptedFace,
    };
    use crate::font::engine::PixelMode;
    use crate::font::shaping::{FallbackTable, NoShaping};
    use crate::font::storage::MemoryStorage;

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag(0x0500_0041), (5, 0x41));
        assert_eq!(split_tag(0x0000_0041), (0, 0x41));
        assert_eq!(tag_code_point(5, 0x41), 0x0500_0041);
    }

    #[test]
    fn test_best_fixed_size() {
        assert_eq!(best_fixed_size(&[], 20), None);
        assert_eq!(best_fixed_size(&[109, 136], 20), Some(0));
        assert_eq!(best_fixed_size(&[16, 24, 32], 30), Some(2));
        // tie keeps the first strike
        assert_eq!(best_fixed_size(&[16, 24], 20), Some(0));
    }

    #[test]
    fn test_mul_fix() {
        assert_eq!(mul_fix(1000, 0x10000), 1000);
        assert_eq!(mul_fix(1000, 0x8000), 500);
        assert_eq!(mul_fix(-1000, 0x8000), -500);
    }

    fn catalog_with(
        engine: &ScriptedEngine,
        fonts: &[(&str, u8)],
    ) -> FontCatalog<ScriptedFace> {
        let mut storage = MemoryStorage::new();
        let mut catalog = FontCatalog::new();
        for (name, shaping) in fonts {
            storage.insert(name, build_sfnt(name, &[]));
            let param = FontParam::new(name, *shaping);
            catalog
                .register_font(engine, &storage, &param.name, param.shaping)
                .unwrap();
        }
        catalog
    }

    fn engine() -> ScriptedEngine {
        let sans = FaceScript::plain(4)
            .glyph('A' as u32, GlyphScript::new(36, 9, 7, 10))
            .glyph('B' as u32, GlyphScript::new(37, 9, 7, 10));
        let emoji = FaceScript::color(&[109, 136]).glyph(0x1F600, GlyphScript::new(900, 22, 20, 20));
        let arabic = FaceScript::plain(6).glyph(0x0627, GlyphScript::new(0x41, 5, 3, 12));
        ScriptedEngine::new()
            .with_face("Sans.ttf", sans)
            .with_face("Emoji.ttf", emoji)
            .with_face("Arabic.ttf", arabic)
    }

    #[test]
    fn test_resolve_plain_glyph() {
        let engine = engine();
        let mut catalog = catalog_with(&engine, &[("Sans.ttf", 0)]);
        let mut resolver = GlyphResolver::new(&mut catalog, &NoShaping, Features::all());
        let r = resolver.resolve('A' as u32, 0, 16, TextStyle::Normal).unwrap();
        assert_eq!(r.font_id, 0);
        assert_eq!(r.glyph.advance_px(), 9);
        assert_eq!(r.glyph.mode, PixelMode::Gray);
        assert_eq!(r.glyph.pixels.len(), 70);
        assert!(engine.calls().contains(&EngineCall::Render));
    }

    #[test]
    fn test_missing_glyph_is_not_found() {
        let engine = engine();
        let mut catalog = catalog_with(&engine, &[("Sans.ttf", 0)]);
        let mut resolver = GlyphResolver::new(&mut catalog, &NoShaping, Features::all());
        assert!(matches!(
            resolver.resolve('Z' as u32, 0, 16, TextStyle::Normal),
            Err(FontError::GlyphNotFound(0x5A))
        ));
    }

    #[test]
    fn test_color_font_selects_closest_strike() {
        let engine = engine();
        let mut catalog = catalog_with(&engine, &[("Sans.ttf", 0), ("Emoji.ttf", 0)]);
        let mut resolver = GlyphResolver::new(&mut catalog, &NoShaping, Features::all());
        let r = resolver.resolve(0x1F600, 1, 130, TextStyle::Normal).unwrap();
        assert_eq!(r.glyph.mode, PixelMode::Bgra);
        assert_eq!(r.glyph.pixels.len(), 20 * 20 * 4);
        let calls = engine.calls();
        assert!(calls.contains(&EngineCall::SelectFixedSize(1)));
        // bitmaps are not rendered again
        assert!(!calls.contains(&EngineCall::Render));
        assert!(calls.contains(&EngineCall::Load(LoadRequest {
            target: GlyphTarget::Char(0x1F600),
            color: true,
        })));
    }

    #[test]
    fn test_tagged_code_point() {
        let engine = engine();
        let mut catalog = catalog_with(
            &engine,
            &[("Sans.ttf", 0), ("Emoji.ttf", 0), ("Arabic.ttf", 3)],
        );
        let mut resolver = GlyphResolver::new(&mut catalog, &NoShaping, Features::all());
        let tagged = tag_code_point(2, 0x41);
        let r = resolver.resolve(tagged, 2, 16, TextStyle::Normal).unwrap();
        assert_eq!(r.font_id, 2);
        assert!(engine.calls().contains(&EngineCall::Load(LoadRequest {
            target: GlyphTarget::Index(0x41),
            color: false,
        })));

        // tag names font 2, request names font 0
        assert!(matches!(
            resolver.resolve(tagged, 0, 16, TextStyle::Normal),
            Err(FontError::GlyphNotFound(_))
        ));
    }

    #[test]
    fn test_italic_and_bold_synthesis() {
        let engine = engine();
        let mut catalog = catalog_with(&engine, &[("Sans.ttf", 0)]);
        let mut resolver = GlyphResolver::new(&mut catalog, &NoShaping, Features::all());
        let normal = resolver.resolve('A' as u32, 0, 20, TextStyle::Normal).unwrap();
        engine.clear_calls();
        let styled = resolver.resolve('A' as u32, 0, 20, TextStyle::BoldItalic).unwrap();
        let calls = engine.calls();
        assert!(calls.contains(&EngineCall::Transform(Matrix::shear(ITALIC_LEAN))));
        // 1000 units * (20px * 64 / 1000) / 24
        assert!(calls.contains(&EngineCall::EmboldenOutline(1280 / 24)));
        assert!(styled.glyph.cols > normal.glyph.cols);
    }

    #[test]
    fn test_style_synthesis_disabled() {
        let engine = engine();
        let mut catalog = catalog_with(&engine, &[("Sans.ttf", 0)]);
        let features = Features::all() - Features::STYLE_SYNTHESIS;
        let mut resolver = GlyphResolver::new(&mut catalog, &NoShaping, features);
        resolver.resolve('A' as u32, 0, 20, TextStyle::Bold).unwrap();
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::EmboldenOutline(_))));
    }

    #[test]
    fn test_fallback_through_shaping_manager() {
        let engine = engine();
        let mut catalog = catalog_with(&engine, &[("Sans.ttf", 0), ("Emoji.ttf", 0)]);
        let table = FallbackTable::new().with_fallbacks(0, &[1]);
        let mut resolver = GlyphResolver::new(&mut catalog, &table, Features::all());
        let r = resolver.resolve(0x1F600, 0, 20, TextStyle::Normal).unwrap();
        assert_eq!(r.font_id, 1);

        let mut resolver = GlyphResolver::new(
            &mut catalog,
            &table,
            Features::all() - Features::MULTI_FONT,
        );
        assert!(matches!(
            resolver.resolve(0x1F600, 0, 20, TextStyle::Normal),
            Err(FontError::GlyphNotFound(_))
        ));
    }
}
