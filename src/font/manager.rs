//! Font manager
//!
//! Owns the catalogue, the glyph cache and the rasterization engine, and
//! exposes the registration and glyph queries used by the layout pipeline.
//! Single threaded: callers serialize access.

use std::borrow::Cow;
use std::path::PathBuf;

use log::{debug, error, info, warn};

use super::cache::{CacheKey, CacheStats, GlyphCache, GlyphMetrics, GlyphView, ENTRY_HEADER_LEN};
use super::catalog::{FontCatalog, FontKind, FontParam, FontRecord};
use super::engine::{FontFace, RasterEngine};
use super::metrics::{self, BaselineOffset, GlyphSource, SizeSpan};
use super::resolver::{self, prepare_face, GlyphResolver, TextStyle};
use super::shaping::{NoShaping, ShapingManager};
use super::storage::{DirStorage, FontStorage};
use super::Features;
use crate::constants::{BPP_BIT_8, FONT_ID_MAX, FONT_PIXEL_IN_POINT};
use crate::error::{FontError, Result};

/// Construction options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerOptions {
    pub features: Features,
}

/// Scaled vertical metrics of a font at one size (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontHeader {
    pub ascender: i16,
    pub descender: i16,
    pub height: u16,
}

/// Font and script to shape a run with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapingTarget {
    pub font_id: u8,
    pub script: u32,
    /// Shaping flag of `font_id`
    pub shaping: u8,
}

/// A glyph returned to the caller: borrowed from the cache when it could be
/// stored there, owned otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph<'a> {
    pub metrics: GlyphMetrics,
    pub bitmap: Cow<'a, [u8]>,
}

impl Glyph<'_> {
    pub fn is_cached(&self) -> bool {
        matches!(self.bitmap, Cow::Borrowed(_))
    }
}

impl<'a> From<GlyphView<'a>> for Glyph<'a> {
    fn from(view: GlyphView<'a>) -> Self {
        Self {
            metrics: view.metrics,
            bitmap: Cow::Borrowed(view.bitmap),
        }
    }
}

fn to_px(v: i64) -> i64 {
    v / FONT_PIXEL_IN_POINT
}

/// Registration, resolution and cache front end
pub struct FontManager<E: RasterEngine> {
    engine: Option<E>,
    catalog: FontCatalog<E::Face>,
    storage: Box<dyn FontStorage>,
    shaping: Box<dyn ShapingManager>,
    cache: Option<GlyphCache>,
    features: Features,
}

impl<E: RasterEngine> FontManager<E> {
    /// `engine` is `None` when the rasterization engine failed to start;
    /// every operation needing it then fails with `NotInitialized`.
    pub fn new(engine: Option<E>, storage: Box<dyn FontStorage>, options: ManagerOptions) -> Self {
        if engine.is_none() {
            error!("Font manager created without a rasterization engine");
        }
        debug!("Font features: {:?}", options.features);
        Self {
            engine,
            catalog: FontCatalog::new(),
            storage,
            shaping: Box::new(NoShaping),
            cache: None,
            features: options.features,
        }
    }

    pub fn with_shaping(mut self, shaping: Box<dyn ShapingManager>) -> Self {
        self.shaping = shaping;
        self
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> Result<&E> {
        self.engine.as_ref().ok_or(FontError::NotInitialized)
    }

    /// Resolve font names under `dir` from now on
    pub fn set_font_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        info!("Font directory: {}", dir.display());
        self.storage = Box::new(DirStorage::new(dir));
    }

    pub fn set_storage(&mut self, storage: Box<dyn FontStorage>) {
        self.storage = storage;
    }

    // ---- registration ----

    /// Register a font file, returning its id
    pub fn register_font(&mut self, name: &str, shaping: u8) -> Result<u8> {
        let engine = self.engine.as_ref().ok_or(FontError::NotInitialized)?;
        let record = self
            .catalog
            .register_font(engine, self.storage.as_ref(), name, shaping)?;
        self.shaping.update_script(record);
        Ok(record.font_id)
    }

    /// Register every font in `fonts`, returning how many succeeded
    pub fn register_fonts(&mut self, fonts: &[FontParam]) -> usize {
        fonts
            .iter()
            .filter(|param| match self.register_font(&param.name, param.shaping) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Failed to register {}: {}", param.name, e);
                    false
                }
            })
            .count()
    }

    /// Open a collection and register its sub-fonts, returning the collection id
    pub fn register_collection(&mut self, name: &str, fonts: &[FontParam]) -> Result<u8> {
        let engine = self.engine.as_ref().ok_or(FontError::NotInitialized)?;
        let (collection_id, records) =
            self.catalog
                .register_collection(engine, self.storage.as_ref(), name, fonts)?;
        for record in &records {
            self.shaping.update_script(record);
        }
        Ok(collection_id)
    }

    /// Unregister a font and purge its cached glyphs
    pub fn unregister_font(&mut self, name: &str) -> Result<u8> {
        let font_id = self.catalog.unregister_font(name)?;
        self.forget_font(font_id);
        Ok(font_id)
    }

    /// Unregister every font in `fonts`, returning how many succeeded
    pub fn unregister_fonts(&mut self, fonts: &[FontParam]) -> usize {
        fonts
            .iter()
            .filter(|param| match self.unregister_font(&param.name) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Failed to unregister {}: {}", param.name, e);
                    false
                }
            })
            .count()
    }

    /// Close a collection and unregister its sub-fonts
    pub fn unregister_collection(&mut self, name: &str, fonts: &[FontParam]) -> Result<u8> {
        let (collection_id, released) = self.catalog.unregister_collection(name, fonts)?;
        for font_id in released {
            self.forget_font(font_id);
        }
        Ok(collection_id)
    }

    fn forget_font(&mut self, font_id: u8) {
        if let Some(cache) = self.cache.as_mut() {
            cache.invalidate_font(font_id);
        }
        self.shaping.forget(font_id);
    }

    // ---- lookups ----

    pub fn font_info(&self, font_id: u8) -> Option<&FontRecord> {
        self.catalog.get(font_id)
    }

    pub fn fonts(&self) -> impl Iterator<Item = &FontRecord> {
        self.catalog.records()
    }

    /// First registered font whose name contains `pattern`
    pub fn font_id(&self, pattern: &str) -> Option<u8> {
        self.catalog.find_by_name(pattern)
    }

    /// Font addressed by the tag bits of `code`
    pub fn font_id_for_tagged(&self, code: u32) -> Option<u8> {
        self.catalog.tagged_font(code).map(|record| record.font_id)
    }

    /// Bits per pixel of the font's glyphs (8 for unknown ids)
    pub fn font_weight(&self, font_id: u8) -> u8 {
        self.catalog
            .get(font_id)
            .map_or(BPP_BIT_8, |record| record.kind.bits_per_pixel())
    }

    pub fn is_color_font(&self, font_id: u8) -> bool {
        self.catalog.is_color(font_id)
    }

    /// Font and script to shape `text` with
    pub fn shaping_font_id(&self, text: &str, font_id: u8) -> ShapingTarget {
        let shaping = self.catalog.get(font_id).map_or(0, |record| record.shaping);
        if self.features.contains(Features::MULTI_FONT) {
            if let Some((shape_font, script)) = self.shaping.needs_shaping(text) {
                let shaping = self.catalog.get(shape_font).map_or(0, |record| record.shaping);
                return ShapingTarget {
                    font_id: shape_font,
                    script,
                    shaping,
                };
            }
        }
        ShapingTarget {
            font_id,
            script: self.shaping.script_for(font_id),
            shaping,
        }
    }

    /// Raw font stream of `font_id` (whole file, or the extracted sub-font)
    pub fn font_bytes(&mut self, font_id: u8, capacity: usize) -> Result<Vec<u8>> {
        self.catalog
            .font_bytes(self.storage.as_ref(), font_id, capacity)
    }

    // ---- cache ----

    /// Allocate the glyph cache region. Only the first call takes effect.
    pub fn configure_cache_memory(&mut self, size: usize) -> Result<()> {
        if self.cache.is_some() {
            debug!("Glyph cache already configured");
            return Ok(());
        }
        if size <= ENTRY_HEADER_LEN {
            return Err(FontError::CacheUnavailable);
        }
        self.cache = Some(GlyphCache::new(size));
        Ok(())
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(GlyphCache::stats)
    }

    // ---- glyphs ----

    fn check_request(&self, font_id: u8, size: u8) -> Result<()> {
        self.engine()?;
        if size == 0 {
            return Err(FontError::InvalidSize(size));
        }
        if font_id as usize >= FONT_ID_MAX || self.catalog.get(font_id).is_none() {
            return Err(FontError::InvalidFontId(font_id));
        }
        Ok(())
    }

    /// Glyph of `code` in `font_id` at `size`: cached copy if present,
    /// otherwise rendered (possibly by a fallback font) and cached.
    pub fn glyph(&mut self, code: u32, font_id: u8, size: u8, style: TextStyle) -> Result<Glyph<'_>> {
        self.check_request(font_id, size)?;
        let key = CacheKey::new(font_id, size, code, style);
        if self.cache.as_ref().ok_or(FontError::CacheUnavailable)?.get(&key).is_some() {
            let view = self
                .cache
                .as_ref()
                .and_then(|cache| cache.peek(&key))
                .ok_or(FontError::CacheUnavailable)?;
            return Ok(view.into());
        }

        let resolution = GlyphResolver::new(&mut self.catalog, self.shaping.as_ref(), self.features)
            .resolve(code, font_id, size, style)?;
        let metrics = GlyphMetrics::from_rendered(resolution.font_id, &resolution.glyph);
        let cache = self.cache.as_mut().ok_or(FontError::CacheUnavailable)?;
        match cache.insert(key, metrics, &resolution.glyph.pixels) {
            Some(view) => Ok(view.into()),
            None => {
                debug!("U+{:04X} served uncached", code);
                Ok(Glyph {
                    metrics,
                    bitmap: Cow::Owned(resolution.glyph.pixels),
                })
            }
        }
    }

    /// Placement metrics of a glyph without its bitmap
    pub fn glyph_node(&mut self, code: u32, font_id: u8, size: u8, style: TextStyle) -> Result<GlyphMetrics> {
        Ok(self.glyph(code, font_id, size, style)?.metrics)
    }

    /// Horizontal advance of a glyph (pixels)
    pub fn width(&mut self, code: u32, font_id: u8, size: u8, style: TextStyle) -> Result<u16> {
        Ok(self.glyph_node(code, font_id, size, style)?.advance)
    }

    // ---- font metrics ----

    /// Ascender, descender and line height of `font_id` at `size`
    pub fn font_header(&mut self, font_id: u8, size: u8) -> Result<FontHeader> {
        self.check_request(font_id, size)?;
        let kind = self
            .catalog
            .get(font_id)
            .ok_or(FontError::InvalidFontId(font_id))?
            .kind;
        let color = kind.is_color() && self.features.contains(Features::COLOR_FONTS);
        let face = self
            .catalog
            .face_mut(font_id)
            .ok_or(FontError::InvalidFontId(font_id))?;
        prepare_face(face, if color { kind } else { FontKind::Plain }, size)?;
        let metrics = face
            .size_metrics()
            .ok_or_else(|| FontError::EngineFailure("face has no size metrics".into()))?;
        Ok(FontHeader {
            ascender: to_px(metrics.ascender).clamp(i16::MIN.into(), i16::MAX.into()) as i16,
            descender: to_px(metrics.descender).clamp(i16::MIN.into(), i16::MAX.into()) as i16,
            height: to_px(metrics.height).clamp(0, u16::MAX.into()) as u16,
        })
    }

    pub fn line_height(&mut self, font_id: u8, size: u8) -> Result<u16> {
        Ok(self.font_header(font_id, size)?.height)
    }

    /// Height of the line holding `text`
    pub fn compute_line_height(&mut self, text: &str, font_id: u8, size: u8) -> Result<u16> {
        self.check_metrics_request(font_id, size)?;
        metrics::line_height(self, text, font_id, size)
    }

    /// Line height of the line starting at `text`, honoring per-letter size spans
    pub fn line_height_with_spans(
        &mut self,
        text: &str,
        font_id: u8,
        size: u8,
        spans: &mut [Option<SizeSpan>],
        letter_index: &mut usize,
    ) -> Result<u16> {
        self.check_metrics_request(font_id, size)?;
        metrics::line_height_with_spans(self, text, font_id, size, spans, letter_index)
    }

    /// Baseline shift of the line holding `text`
    pub fn compute_baseline_offset(&mut self, text: &str, font_id: u8, size: u8) -> Result<BaselineOffset> {
        self.check_metrics_request(font_id, size)?;
        Ok(metrics::baseline_offset(self, text, font_id, size))
    }

    /// Run metrics resolve glyphs through the cache
    fn check_metrics_request(&self, font_id: u8, size: u8) -> Result<()> {
        self.check_request(font_id, size)?;
        if self.cache.is_none() {
            return Err(FontError::CacheUnavailable);
        }
        Ok(())
    }

    /// Is `code` a tagged glyph index for a registered shaping font
    pub fn is_tagged_glyph(&self, code: u32) -> bool {
        resolver::tagged_target(&self.catalog, code).is_some()
    }

    // ---- teardown ----

    /// Close every font and container and release the cache region
    pub fn shutdown(&mut self) {
        if self.catalog.is_empty() && self.catalog.collection_count() == 0 && self.cache.is_none() {
            return;
        }
        for font_id in self.catalog.font_ids() {
            self.shaping.forget(font_id);
        }
        self.catalog.clear();
        self.cache = None;
        info!("Font manager shut down");
    }
}

impl<E: RasterEngine> GlyphSource for FontManager<E> {
    fn glyph_node(&mut self, code: u32, font_id: u8, size: u8) -> Result<GlyphMetrics> {
        FontManager::glyph_node(self, code, font_id, size, TextStyle::Normal)
    }

    fn line_height(&mut self, font_id: u8, size: u8) -> Result<u16> {
        FontManager::line_height(self, font_id, size)
    }

    fn is_color_font(&self, font_id: u8) -> bool {
        self.catalog.is_color(font_id)
    }

    fn plain_font_ids(&self) -> Vec<u8> {
        self.catalog
            .records()
            .filter(|record| !record.kind.is_color())
            .map(|record| record.font_id)
            .collect()
    }
}

impl<E: RasterEngine> Drop for FontManager<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
