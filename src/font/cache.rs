//! Glyph bitmap cache
//!
//! One fixed-size byte region, filled front to back. Each entry is a
//! 12-byte metrics header followed by the glyph's pixels. When the region
//! is full it is reset wholesale and a new generation starts; entries are
//! never moved, so a `GlyphView` stays valid until the next mutation.
//!
//! Header layout (little endian):
//!
//! ```text
//! 0  advance  u16
//! 2  left     i16
//! 4  top      i16
//! 6  cols     u16
//! 8  rows     u16
//! 10 bpp      u8   (8 or 32)
//! 11 font id  u8   (font that actually rendered the glyph)
//! ```

use std::cell::Cell;
use std::collections::HashMap;

use log::{debug, trace, warn};

use super::engine::{PixelMode, RenderedGlyph};
use super::resolver::TextStyle;
use crate::constants::{BPP_BIT_32, BPP_BIT_8};

/// Bytes in front of each cached bitmap
pub const ENTRY_HEADER_LEN: usize = 12;

/// Font and pixel size packed the way cache keys store them
pub fn face_key(font_id: u8, size: u8) -> u32 {
    (u32::from(font_id) << 24) | u32::from(size)
}

/// Cache lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// `font_id << 24 | size`
    pub face_key: u32,
    pub code_point: u32,
    pub style: TextStyle,
}

impl CacheKey {
    pub fn new(font_id: u8, size: u8, code_point: u32, style: TextStyle) -> Self {
        Self {
            face_key: face_key(font_id, size),
            code_point,
            style,
        }
    }

    /// Requested font (not necessarily the one that rendered the glyph)
    pub fn font_id(&self) -> u8 {
        (self.face_key >> 24) as u8
    }

    pub fn size(&self) -> u8 {
        (self.face_key & 0xFF) as u8
    }
}

/// Placement metrics of a cached glyph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphMetrics {
    /// Horizontal advance (pixels)
    pub advance: u16,
    pub left: i16,
    pub top: i16,
    pub cols: u16,
    pub rows: u16,
    /// 8 for coverage, 32 for BGRA
    pub bits_per_pixel: u8,
    /// Font that rendered the glyph
    pub font_id: u8,
}

impl GlyphMetrics {
    pub fn from_rendered(font_id: u8, glyph: &RenderedGlyph) -> Self {
        Self {
            advance: glyph.advance_px(),
            left: clamp_i16(glyph.left),
            top: clamp_i16(glyph.top),
            cols: glyph.cols.min(u32::from(u16::MAX)) as u16,
            rows: glyph.rows.min(u32::from(u16::MAX)) as u16,
            bits_per_pixel: match glyph.mode {
                PixelMode::Gray => BPP_BIT_8,
                PixelMode::Bgra => BPP_BIT_32,
            },
            font_id,
        }
    }

    /// Pixel bytes that follow the header
    pub fn bitmap_len(&self) -> usize {
        usize::from(self.cols) * usize::from(self.rows) * usize::from(self.bits_per_pixel / 8)
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.advance.to_le_bytes());
        out[2..4].copy_from_slice(&self.left.to_le_bytes());
        out[4..6].copy_from_slice(&self.top.to_le_bytes());
        out[6..8].copy_from_slice(&self.cols.to_le_bytes());
        out[8..10].copy_from_slice(&self.rows.to_le_bytes());
        out[10] = self.bits_per_pixel;
        out[11] = self.font_id;
    }

    fn decode(header: &[u8]) -> Option<Self> {
        let header = header.get(..ENTRY_HEADER_LEN)?;
        let u16_at = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]);
        Some(Self {
            advance: u16_at(0),
            left: u16_at(2) as i16,
            top: u16_at(4) as i16,
            cols: u16_at(6),
            rows: u16_at(8),
            bits_per_pixel: header[10],
            font_id: header[11],
        })
    }
}

fn clamp_i16(v: i32) -> i16 {
    v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Borrowed cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphView<'a> {
    pub metrics: GlyphMetrics,
    pub bitmap: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: usize,
    len: usize,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    /// Bytes in use in the current generation
    pub used: usize,
    pub capacity: usize,
    pub generation: u32,
}

/// Bump-allocated glyph cache
pub struct GlyphCache {
    region: Vec<u8>,
    used: usize,
    generation: u32,
    index: HashMap<CacheKey, Entry>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl GlyphCache {
    pub fn new(capacity: usize) -> Self {
        debug!("Glyph cache: {} bytes", capacity);
        Self {
            region: vec![0; capacity],
            used: 0,
            generation: 0,
            index: HashMap::new(),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Incremented every time the region is reset
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains_key(key)
    }

    /// Look up an entry, counting the hit or miss
    pub fn get(&self, key: &CacheKey) -> Option<GlyphView<'_>> {
        let Some(view) = self.peek(key) else {
            self.misses.set(self.misses.get() + 1);
            return None;
        };
        self.hits.set(self.hits.get() + 1);
        Some(view)
    }

    /// Look up an entry without touching the counters
    pub fn peek(&self, key: &CacheKey) -> Option<GlyphView<'_>> {
        self.index.get(key).and_then(|entry| self.view(*entry))
    }

    fn view(&self, entry: Entry) -> Option<GlyphView<'_>> {
        let bytes = self.region.get(entry.offset..entry.offset + entry.len)?;
        let metrics = GlyphMetrics::decode(bytes)?;
        let bitmap = bytes.get(ENTRY_HEADER_LEN..ENTRY_HEADER_LEN + metrics.bitmap_len())?;
        Some(GlyphView { metrics, bitmap })
    }

    /// Store a glyph and return a view of the stored copy.
    ///
    /// Returns `None` (nothing stored) when `pixels` does not match the
    /// metrics or the entry is larger than the whole region.
    pub fn insert(
        &mut self,
        key: CacheKey,
        metrics: GlyphMetrics,
        pixels: &[u8],
    ) -> Option<GlyphView<'_>> {
        if pixels.len() != metrics.bitmap_len() {
            warn!(
                "Glyph U+{:04X}: {} pixel bytes, expected {}",
                key.code_point,
                pixels.len(),
                metrics.bitmap_len()
            );
            return None;
        }
        let len = ENTRY_HEADER_LEN + pixels.len();
        let offset = self.allocate(len)?;

        let slot = &mut self.region[offset..offset + len];
        metrics.encode(&mut slot[..ENTRY_HEADER_LEN]);
        slot[ENTRY_HEADER_LEN..].copy_from_slice(pixels);
        self.index.insert(key, Entry { offset, len });
        trace!(
            "Cached U+{:04X} ({}x{}) at {}",
            key.code_point,
            metrics.cols,
            metrics.rows,
            offset
        );
        self.view(Entry { offset, len })
    }

    /// Reserve `len` bytes, resetting the region when it is full
    fn allocate(&mut self, len: usize) -> Option<usize> {
        if len > self.region.len() {
            debug!(
                "Glyph entry of {} bytes exceeds cache of {} bytes",
                len,
                self.region.len()
            );
            return None;
        }
        if self.used + len > self.region.len() {
            self.reset();
        }
        let offset = self.used;
        self.used += len;
        Some(offset)
    }

    fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        debug!(
            "Glyph cache full, dropping {} entries (generation {})",
            self.index.len(),
            self.generation
        );
        self.index.clear();
        self.used = 0;
    }

    /// Forget every entry requested from or rendered by `font_id`
    pub fn invalidate_font(&mut self, font_id: u8) {
        let region = &self.region;
        let before = self.index.len();
        self.index.retain(|key, entry| {
            let rendered_by = region.get(entry.offset + ENTRY_HEADER_LEN - 1).copied();
            key.font_id() != font_id && rendered_by != Some(font_id)
        });
        let dropped = before - self.index.len();
        if dropped > 0 {
            debug!("Dropped {} cached glyphs of font {}", dropped, font_id);
        }
    }

    /// Drop every entry, keeping the region
    pub fn clear(&mut self) {
        self.reset();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            entries: self.index.len(),
            used: self.used,
            capacity: self.region.len(),
            generation: self.generation,
        }
    }
}
