//! Rasterization engine interface
//!
//! The catalogue, resolver and cache only talk to faces through these traits.
//! `FreeTypeEngine` (see `font::freetype`) is the production implementation;
//! `scripted::ScriptedEngine` (tests and the `test-util` feature) replays
//! glyph scripts instead of reading font files.

use std::path::PathBuf;
use std::rc::Rc;

use crate::constants::{FIXED_ONE, FONT_PIXEL_IN_POINT};
use crate::error::Result;

/// Where a face's bytes come from
#[derive(Debug, Clone)]
pub enum FaceSource {
    /// Font file on disk
    Path(PathBuf),
    /// Font stream held in memory (ROM fonts, extracted sub-fonts)
    Memory(Rc<Vec<u8>>),
}

/// Glyph addressing mode for a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlyphTarget {
    /// Unicode code point, mapped through the font's cmap
    Char(u32),
    /// Glyph index produced by a shaper
    Index(u32),
}

/// One glyph load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub target: GlyphTarget,
    /// Ask for embedded color bitmaps (FT_LOAD_COLOR)
    pub color: bool,
}

/// Format of the glyph currently held by the face's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFormat {
    Outline,
    Bitmap,
    Other,
}

/// Pixel layout of a rendered bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelMode {
    /// 8-bit coverage
    Gray,
    /// 32-bit premultiplied BGRA (color emoji)
    Bgra,
}

impl PixelMode {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Bgra => 4,
        }
    }
}

/// 2x2 transform in 16.16 fixed point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matrix {
    pub xx: i64,
    pub xy: i64,
    pub yx: i64,
    pub yy: i64,
}

impl Matrix {
    /// Horizontal shear used for synthetic italics
    pub fn shear(lean: f32) -> Self {
        Self {
            xx: FIXED_ONE,
            xy: (lean * FIXED_ONE as f32) as i64,
            yx: 0,
            yy: FIXED_ONE,
        }
    }
}

/// Rendered glyph copied out of the engine's slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedGlyph {
    /// Glyph index inside the face (never 0 on success)
    pub glyph_index: u32,
    /// Horizontal advance (26.6)
    pub advance: i64,
    /// Bitmap origin: distance from pen position to the left edge
    pub left: i32,
    /// Bitmap origin: distance from baseline to the top edge
    pub top: i32,
    /// Bitmap width (pixels)
    pub cols: u32,
    /// Bitmap height (pixels)
    pub rows: u32,
    pub mode: PixelMode,
    /// Tightly packed rows, `cols * rows * mode.bytes_per_pixel()` bytes
    pub pixels: Vec<u8>,
}

impl RenderedGlyph {
    /// Advance in whole pixels
    pub fn advance_px(&self) -> u16 {
        (self.advance / FONT_PIXEL_IN_POINT).clamp(0, u16::MAX as i64) as u16
    }
}

/// Scaled face metrics for the current size (26.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMetrics {
    pub ascender: i64,
    pub descender: i64,
    pub height: i64,
}

/// One opened face. Dropping it closes the face.
pub trait FontFace {
    /// Does the face carry a CBDT color bitmap table
    fn has_color_table(&self) -> bool;

    /// Pixel widths of the embedded bitmap strikes
    fn fixed_sizes(&self) -> Vec<i16>;

    fn select_fixed_size(&mut self, index: usize) -> Result<()>;

    fn set_pixel_size(&mut self, size: u32) -> Result<()>;

    /// Load a glyph into the slot, returning its glyph index (0 = missing)
    fn load_glyph(&mut self, request: LoadRequest) -> Result<u32>;

    fn slot_format(&self) -> SlotFormat;

    fn transform_outline(&mut self, matrix: &Matrix);

    fn embolden_outline(&mut self, strength: i64) -> Result<()>;

    fn embolden_bitmap(&mut self, x_strength: i64, y_strength: i64) -> Result<()>;

    /// Rasterize an outline slot into a bitmap
    fn render(&mut self) -> Result<()>;

    /// Copy the slot's bitmap and metrics out of the engine
    fn rendered(&self) -> Result<RenderedGlyph>;

    fn size_metrics(&self) -> Option<SizeMetrics>;

    fn units_per_em(&self) -> u16;

    /// Current vertical scale (16.16)
    fn y_scale(&self) -> i64;
}

/// Face factory
pub trait RasterEngine {
    type Face: FontFace;

    fn open_face(&self, source: &FaceSource, index: u32) -> Result<Self::Face>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod scripted {
    //! In-memory engine driven by glyph scripts instead of font files
    //!
    //! Faces are looked up by file name for `FaceSource::Path` and by the
    //! contents of a `uifK` table for `FaceSource::Memory`. A memory stream
    //! holding a `ttcf` container resolves face index `i` through the table
    //! directory of sub-font `i`, with container-relative table offsets as
    //! real collections store them.

    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::*;
    use crate::error::FontError;

    /// Table tag carrying the script key inside synthetic sfnt streams
    pub const KEY_TAG: [u8; 4] = *b"uifK";

    /// One scripted glyph
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GlyphScript {
        pub glyph_index: u32,
        /// Advance (pixels)
        pub advance: i64,
        pub left: i32,
        pub top: i32,
        pub cols: u32,
        pub rows: u32,
    }

    impl GlyphScript {
        pub fn new(glyph_index: u32, advance: i64, cols: u32, rows: u32) -> Self {
            Self {
                glyph_index,
                advance,
                left: 0,
                top: rows as i32,
                cols,
                rows,
            }
        }
    }

    /// Behavior of one scripted face
    #[derive(Debug, Clone, Default)]
    pub struct FaceScript {
        pub color: bool,
        pub fixed_sizes: Vec<i16>,
        /// Extra line spacing on top of the pixel size
        pub line_gap: u32,
        chars: HashMap<u32, GlyphScript>,
    }

    impl FaceScript {
        pub fn plain(line_gap: u32) -> Self {
            Self {
                line_gap,
                ..Self::default()
            }
        }

        pub fn color(fixed_sizes: &[i16]) -> Self {
            Self {
                color: true,
                fixed_sizes: fixed_sizes.to_vec(),
                ..Self::default()
            }
        }

        pub fn glyph(mut self, code_point: u32, glyph: GlyphScript) -> Self {
            self.chars.insert(code_point, glyph);
            self
        }

        fn by_index(&self, glyph_index: u32) -> Option<GlyphScript> {
            self.chars
                .values()
                .find(|g| g.glyph_index == glyph_index)
                .copied()
        }
    }

    /// Engine calls observed by scripted faces
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum EngineCall {
        Load(LoadRequest),
        SelectFixedSize(usize),
        Transform(Matrix),
        EmboldenOutline(i64),
        EmboldenBitmap(i64, i64),
        Render,
    }

    #[derive(Debug, Default)]
    struct Shared {
        opened: Cell<usize>,
        closed: Cell<usize>,
        renders: Cell<usize>,
        calls: RefCell<Vec<EngineCall>>,
    }

    /// Engine whose faces replay `FaceScript`s.
    ///
    /// Clones share their counters and call log.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedEngine {
        scripts: HashMap<String, FaceScript>,
        shared: Rc<Shared>,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_face(mut self, key: &str, script: FaceScript) -> Self {
            self.scripts.insert(key.to_string(), script);
            self
        }

        /// Faces opened so far
        pub fn opened(&self) -> usize {
            self.shared.opened.get()
        }

        /// Faces dropped so far
        pub fn closed(&self) -> usize {
            self.shared.closed.get()
        }

        /// Glyph loads that reached the engine (cache misses)
        pub fn rasterizations(&self) -> usize {
            self.shared.renders.get()
        }

        pub fn calls(&self) -> Vec<EngineCall> {
            self.shared.calls.borrow().clone()
        }

        pub fn clear_calls(&self) {
            self.shared.calls.borrow_mut().clear();
        }

        fn key_for(source: &FaceSource, index: u32) -> Option<String> {
            match source {
                FaceSource::Path(path) if index == 0 => path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
                FaceSource::Path(_) => None,
                FaceSource::Memory(data) => {
                    let dir = directory_offset(data, index)?;
                    key_table(data, dir)
                }
            }
        }
    }

    impl RasterEngine for ScriptedEngine {
        type Face = ScriptedFace;

        fn open_face(&self, source: &FaceSource, index: u32) -> Result<ScriptedFace> {
            let key = Self::key_for(source, index).ok_or_else(|| {
                FontError::EngineFailure(format!("unrecognized font stream (face {index})"))
            })?;
            let script = self
                .scripts
                .get(&key)
                .cloned()
                .ok_or_else(|| FontError::EngineFailure(format!("no face script for {key}")))?;
            self.shared.opened.set(self.shared.opened.get() + 1);
            Ok(ScriptedFace {
                script,
                shared: Rc::clone(&self.shared),
                size: None,
                slot: None,
            })
        }
    }

    #[derive(Debug, Clone)]
    struct Slot {
        glyph: GlyphScript,
        format: SlotFormat,
        rendered: bool,
    }

    /// Face produced by `ScriptedEngine`
    #[derive(Debug)]
    pub struct ScriptedFace {
        script: FaceScript,
        shared: Rc<Shared>,
        size: Option<u32>,
        slot: Option<Slot>,
    }

    impl ScriptedFace {
        fn record(&self, call: EngineCall) {
            self.shared.calls.borrow_mut().push(call);
        }

        fn slot_mut(&mut self) -> Result<&mut Slot> {
            self.slot
                .as_mut()
                .ok_or_else(|| FontError::EngineFailure("no glyph loaded".into()))
        }
    }

    impl Drop for ScriptedFace {
        fn drop(&mut self) {
            self.shared.closed.set(self.shared.closed.get() + 1);
        }
    }

    impl FontFace for ScriptedFace {
        fn has_color_table(&self) -> bool {
            self.script.color
        }

        fn fixed_sizes(&self) -> Vec<i16> {
            self.script.fixed_sizes.clone()
        }

        fn select_fixed_size(&mut self, index: usize) -> Result<()> {
            let width = *self
                .script
                .fixed_sizes
                .get(index)
                .ok_or_else(|| FontError::EngineFailure(format!("no strike {index}")))?;
            self.record(EngineCall::SelectFixedSize(index));
            self.size = Some(width.max(0) as u32);
            Ok(())
        }

        fn set_pixel_size(&mut self, size: u32) -> Result<()> {
            if size == 0 {
                return Err(FontError::EngineFailure("zero pixel size".into()));
            }
            self.size = Some(size);
            Ok(())
        }

        fn load_glyph(&mut self, request: LoadRequest) -> Result<u32> {
            self.record(EngineCall::Load(request));
            if self.size.is_none() {
                return Err(FontError::EngineFailure("size not set".into()));
            }
            self.shared.renders.set(self.shared.renders.get() + 1);
            let glyph = match request.target {
                GlyphTarget::Char(code) => self.script.chars.get(&code).copied(),
                GlyphTarget::Index(index) => self.script.by_index(index),
            };
            let Some(glyph) = glyph else {
                self.slot = None;
                return Ok(0);
            };
            let format = if self.script.color {
                SlotFormat::Bitmap
            } else {
                SlotFormat::Outline
            };
            self.slot = Some(Slot {
                glyph,
                format,
                rendered: format == SlotFormat::Bitmap,
            });
            Ok(glyph.glyph_index)
        }

        fn slot_format(&self) -> SlotFormat {
            self.slot
                .as_ref()
                .map(|slot| slot.format)
                .unwrap_or(SlotFormat::Other)
        }

        fn transform_outline(&mut self, matrix: &Matrix) {
            self.record(EngineCall::Transform(*matrix));
            if let Some(slot) = self.slot.as_mut() {
                // shear widens the box by lean * rows
                let extra = (slot.glyph.rows as i64 * matrix.xy / FIXED_ONE) as u32;
                slot.glyph.cols += extra;
            }
        }

        fn embolden_outline(&mut self, strength: i64) -> Result<()> {
            self.record(EngineCall::EmboldenOutline(strength));
            let slot = self.slot_mut()?;
            slot.glyph.cols += 1;
            Ok(())
        }

        fn embolden_bitmap(&mut self, x_strength: i64, y_strength: i64) -> Result<()> {
            self.record(EngineCall::EmboldenBitmap(x_strength, y_strength));
            let slot = self.slot_mut()?;
            slot.glyph.cols += 1;
            slot.glyph.rows += 1;
            Ok(())
        }

        fn render(&mut self) -> Result<()> {
            self.record(EngineCall::Render);
            self.slot_mut()?.rendered = true;
            Ok(())
        }

        fn rendered(&self) -> Result<RenderedGlyph> {
            let slot = self
                .slot
                .as_ref()
                .filter(|slot| slot.rendered)
                .ok_or_else(|| FontError::EngineFailure("glyph not rendered".into()))?;
            let mode = if slot.format == SlotFormat::Bitmap {
                PixelMode::Bgra
            } else {
                PixelMode::Gray
            };
            let g = slot.glyph;
            let len = g.cols as usize * g.rows as usize * mode.bytes_per_pixel();
            let fill = (g.glyph_index & 0xFF) as u8;
            Ok(RenderedGlyph {
                glyph_index: g.glyph_index,
                advance: g.advance * FONT_PIXEL_IN_POINT,
                left: g.left,
                top: g.top,
                cols: g.cols,
                rows: g.rows,
                mode,
                pixels: vec![fill; len],
            })
        }

        fn size_metrics(&self) -> Option<SizeMetrics> {
            let size = self.size? as i64;
            Some(SizeMetrics {
                ascender: size * 4 / 5 * FONT_PIXEL_IN_POINT,
                descender: -(size / 5) * FONT_PIXEL_IN_POINT,
                height: (size + self.script.line_gap as i64) * FONT_PIXEL_IN_POINT,
            })
        }

        fn units_per_em(&self) -> u16 {
            1000
        }

        fn y_scale(&self) -> i64 {
            // 16.16 ratio of pixels*64 per font unit
            let size = self.size.unwrap_or(0) as i64;
            size * FONT_PIXEL_IN_POINT * FIXED_ONE / 1000
        }
    }

    /// Build a minimal sfnt stream: table directory followed by table data.
    ///
    /// Table offsets are relative to the start of the returned stream; the
    /// key table is always present so the stream resolves to `key`.
    pub fn build_sfnt(key: &str, extra_tables: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut tables: Vec<([u8; 4], Vec<u8>)> = vec![(KEY_TAG, key.as_bytes().to_vec())];
        tables.extend(extra_tables.iter().cloned());

        let num_tables = tables.len();
        let mut out = Vec::new();
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        out.extend_from_slice(&(num_tables as u16).to_be_bytes());
        out.extend_from_slice(&[0u8; 6]); // searchRange, entrySelector, rangeShift

        let mut data_offset = 12 + 16 * num_tables;
        let mut data = Vec::new();
        for (tag, body) in &tables {
            out.extend_from_slice(tag);
            out.extend_from_slice(&checksum(body).to_be_bytes());
            out.extend_from_slice(&(data_offset as u32).to_be_bytes());
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            let padded = (body.len() + 3) & !3;
            data.extend_from_slice(body);
            data.resize(data.len() + padded - body.len(), 0);
            data_offset += padded;
        }
        out.extend_from_slice(&data);
        out
    }

    /// Pack sfnt streams into a `ttcf` container, rebasing table offsets to
    /// the container as real collections store them.
    pub fn build_collection(fonts: &[Vec<u8>]) -> Vec<u8> {
        let header_len = 12 + 4 * fonts.len();
        let mut out = Vec::new();
        out.extend_from_slice(b"ttcf");
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(fonts.len() as u32).to_be_bytes());

        let mut offset = header_len;
        let mut offsets = Vec::new();
        for font in fonts {
            offsets.push(offset);
            offset += font.len();
        }
        for &off in &offsets {
            out.extend_from_slice(&(off as u32).to_be_bytes());
        }
        for (font, &base) in fonts.iter().zip(&offsets) {
            let mut font = font.clone();
            let num_tables = u16::from_be_bytes([font[4], font[5]]) as usize;
            for i in 0..num_tables {
                let at = 12 + 16 * i + 8;
                let rel = u32::from_be_bytes([font[at], font[at + 1], font[at + 2], font[at + 3]]);
                font[at..at + 4].copy_from_slice(&(rel + base as u32).to_be_bytes());
            }
            out.extend_from_slice(&font);
        }
        out
    }

    /// Pack fonts into a `ttcf` container the way font tools emit them:
    /// every table directory first, then the per-font key tables, then
    /// `shared` tables referenced by all directories.
    pub fn build_shared_collection(keys: &[&str], shared: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
        let num_tables = 1 + shared.len();
        let dir_len = 12 + 16 * num_tables;
        let header_len = 12 + 4 * keys.len();
        let mut data_offset = header_len + dir_len * keys.len();

        let padded = |len: usize| (len + 3) & !3;
        let mut key_offsets = Vec::new();
        for key in keys {
            key_offsets.push(data_offset);
            data_offset += padded(key.len());
        }
        let mut shared_offsets = Vec::new();
        for (_, body) in shared {
            shared_offsets.push(data_offset);
            data_offset += padded(body.len());
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"ttcf");
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(keys.len() as u32).to_be_bytes());
        for i in 0..keys.len() {
            out.extend_from_slice(&((header_len + dir_len * i) as u32).to_be_bytes());
        }
        let record = |out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8], offset: usize| {
            out.extend_from_slice(tag);
            out.extend_from_slice(&checksum(body).to_be_bytes());
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        };
        for (key, &key_offset) in keys.iter().zip(&key_offsets) {
            out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
            out.extend_from_slice(&(num_tables as u16).to_be_bytes());
            out.extend_from_slice(&[0u8; 6]);
            record(&mut out, &KEY_TAG, key.as_bytes(), key_offset);
            for ((tag, body), &offset) in shared.iter().zip(&shared_offsets) {
                record(&mut out, tag, body, offset);
            }
        }
        for body in keys.iter().map(|k| k.as_bytes()).chain(shared.iter().map(|(_, b)| b.as_slice())) {
            out.extend_from_slice(body);
            out.resize(out.len() + padded(body.len()) - body.len(), 0);
        }
        out
    }

    fn checksum(body: &[u8]) -> u32 {
        body.chunks(4).fold(0u32, |sum, chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            sum.wrapping_add(u32::from_be_bytes(word))
        })
    }

    /// Table directory of face `index`: the stream start for plain sfnt
    /// streams, the offset table entry for `ttcf` containers
    fn directory_offset(data: &[u8], index: u32) -> Option<usize> {
        if data.get(..4)? != b"ttcf" {
            return (index == 0).then_some(0);
        }
        let num_fonts = u32::from_be_bytes(data.get(8..12)?.try_into().ok()?);
        if index >= num_fonts {
            return None;
        }
        let at = 12 + 4 * index as usize;
        Some(u32::from_be_bytes(data.get(at..at + 4)?.try_into().ok()?) as usize)
    }

    /// Read the key table listed in the directory at `dir`
    fn key_table(data: &[u8], dir: usize) -> Option<String> {
        let num_tables = u16::from_be_bytes([*data.get(dir + 4)?, *data.get(dir + 5)?]) as usize;
        for i in 0..num_tables {
            let at = dir + 12 + 16 * i;
            let rec = data.get(at..at + 16)?;
            if rec[..4] != KEY_TAG {
                continue;
            }
            let offset = u32::from_be_bytes([rec[8], rec[9], rec[10], rec[11]]) as usize;
            let length = u32::from_be_bytes([rec[12], rec[13], rec[14], rec[15]]) as usize;
            let body = data.get(offset..offset.checked_add(length)?)?;
            return String::from_utf8(body.to_vec()).ok();
        }
        None
    }
}
