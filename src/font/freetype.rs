//! FreeType rasterization engine
//!
//! Outline fonts are scaled with `set_pixel_sizes`, color (CBDT) fonts pick
//! an embedded strike with `FT_Select_Size`. Style synthesis works on the
//! loaded slot before it is rendered.

use std::rc::Rc;

use freetype::bitmap::PixelMode as FtPixelMode;
use freetype::face::LoadFlag;
use freetype::ffi;
use freetype::render_mode::RenderMode;
use freetype::{Face, Library};
use log::{debug, info};

use super::engine::{
    FaceSource, FontFace, GlyphTarget, LoadRequest, Matrix, PixelMode, RasterEngine, RenderedGlyph,
    SizeMetrics, SlotFormat,
};
use crate::error::{FontError, Result};

// Directly declare functions not exported by freetype-sys
extern "C" {
    fn FT_Select_Size(face: ffi::FT_Face, strike_index: ffi::FT_Int) -> ffi::FT_Error;

    fn FT_Outline_Transform(outline: *const ffi::FT_Outline, matrix: *const ffi::FT_Matrix);

    fn FT_Outline_Embolden(outline: *mut ffi::FT_Outline, strength: ffi::FT_Pos) -> ffi::FT_Error;

    fn FT_Bitmap_Embolden(
        library: ffi::FT_Library,
        bitmap: *mut ffi::FT_Bitmap,
        x_strength: ffi::FT_Pos,
        y_strength: ffi::FT_Pos,
    ) -> ffi::FT_Error;

    fn FT_Load_Sfnt_Table(
        face: ffi::FT_Face,
        tag: ffi::FT_ULong,
        offset: ffi::FT_Long,
        buffer: *mut ffi::FT_Byte,
        length: *mut ffi::FT_ULong,
    ) -> ffi::FT_Error;
}

/// Color bitmap data table
const CBDT_TAG: u32 = u32::from_be_bytes(*b"CBDT");

/// FT_GLYPH_FORMAT_OUTLINE ('outl')
const FORMAT_OUTLINE: u32 = u32::from_be_bytes(*b"outl");

/// FT_GLYPH_FORMAT_BITMAP ('bits')
const FORMAT_BITMAP: u32 = u32::from_be_bytes(*b"bits");

fn ft_error(what: &str, e: freetype::Error) -> FontError {
    FontError::EngineFailure(format!("{}: {:?}", what, e))
}

fn check(what: &str, code: ffi::FT_Error) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(FontError::EngineFailure(format!("{} failed (error {})", what, code)))
    }
}

/// FreeType library handle; faces keep it alive
pub struct FreeTypeEngine {
    library: Rc<Library>,
}

impl FreeTypeEngine {
    pub fn init() -> Result<Self> {
        let library = Library::init()
            .map_err(|e| FontError::EngineFailure(format!("FreeType initialization failed: {:?}", e)))?;
        info!("FreeType initialized");
        Ok(Self {
            library: Rc::new(library),
        })
    }
}

impl RasterEngine for FreeTypeEngine {
    type Face = FreeTypeFace;

    fn open_face(&self, source: &FaceSource, index: u32) -> Result<FreeTypeFace> {
        let face = match source {
            FaceSource::Path(path) => self.library.new_face(path.as_os_str(), index as isize),
            FaceSource::Memory(data) => self.library.new_memory_face(Rc::clone(data), index as isize),
        }
        .map_err(|e| ft_error("FreeType font loading failed", e))?;

        let has_color = has_sfnt_table(&face, CBDT_TAG);
        let family = face.family_name().unwrap_or_else(|| "unknown".to_string());
        debug!(
            "FreeType face opened: {} (color={}, strikes={})",
            family,
            has_color,
            face.raw().num_fixed_sizes
        );

        Ok(FreeTypeFace {
            library: Rc::clone(&self.library),
            face,
            has_color,
            loaded: 0,
        })
    }
}

fn face_ptr(face: &Face) -> ffi::FT_Face {
    // FreeType mutates face state through const-appearing pointers
    face.raw() as *const ffi::FT_FaceRec as *mut ffi::FT_FaceRec
}

fn has_sfnt_table(face: &Face, tag: u32) -> bool {
    let mut length: ffi::FT_ULong = 0;
    let err = unsafe {
        FT_Load_Sfnt_Table(
            face_ptr(face),
            tag as ffi::FT_ULong,
            0,
            std::ptr::null_mut(),
            &mut length,
        )
    };
    err == 0 && length > 0
}

/// One open FreeType face
pub struct FreeTypeFace {
    library: Rc<Library>,
    face: Face,
    has_color: bool,
    /// Glyph index currently in the slot (0 = none)
    loaded: u32,
}

impl FreeTypeFace {
    fn slot(&self) -> ffi::FT_GlyphSlot {
        unsafe { (*face_ptr(&self.face)).glyph }
    }
}

impl FontFace for FreeTypeFace {
    fn has_color_table(&self) -> bool {
        self.has_color
    }

    fn fixed_sizes(&self) -> Vec<i16> {
        let raw = self.face.raw();
        if raw.available_sizes.is_null() || raw.num_fixed_sizes <= 0 {
            return Vec::new();
        }
        let sizes = unsafe {
            std::slice::from_raw_parts(raw.available_sizes, raw.num_fixed_sizes as usize)
        };
        sizes.iter().map(|size| size.width).collect()
    }

    fn select_fixed_size(&mut self, index: usize) -> Result<()> {
        let err = unsafe { FT_Select_Size(face_ptr(&self.face), index as ffi::FT_Int) };
        check("FT_Select_Size", err)
    }

    fn set_pixel_size(&mut self, size: u32) -> Result<()> {
        self.face
            .set_pixel_sizes(0, size)
            .map_err(|e| ft_error("FreeType size setting failed", e))
    }

    fn load_glyph(&mut self, request: LoadRequest) -> Result<u32> {
        let flags = if request.color {
            LoadFlag::DEFAULT | LoadFlag::COLOR
        } else {
            LoadFlag::DEFAULT
        };
        let index = match request.target {
            GlyphTarget::Char(code) => self.face.get_char_index(code as usize).unwrap_or(0),
            GlyphTarget::Index(index) => index,
        };
        self.loaded = 0;
        if index == 0 {
            return Ok(0);
        }
        self.face
            .load_glyph(index, flags)
            .map_err(|e| ft_error("FreeType glyph loading failed", e))?;
        self.loaded = index;
        Ok(index)
    }

    fn slot_format(&self) -> SlotFormat {
        if self.loaded == 0 {
            return SlotFormat::Other;
        }
        let format = unsafe { (*self.slot()).format } as u32;
        match format {
            FORMAT_OUTLINE => SlotFormat::Outline,
            FORMAT_BITMAP => SlotFormat::Bitmap,
            _ => SlotFormat::Other,
        }
    }

    fn transform_outline(&mut self, matrix: &Matrix) {
        let matrix = ffi::FT_Matrix {
            xx: matrix.xx as ffi::FT_Fixed,
            xy: matrix.xy as ffi::FT_Fixed,
            yx: matrix.yx as ffi::FT_Fixed,
            yy: matrix.yy as ffi::FT_Fixed,
        };
        unsafe {
            FT_Outline_Transform(&(*self.slot()).outline, &matrix);
        }
    }

    fn embolden_outline(&mut self, strength: i64) -> Result<()> {
        let err = unsafe { FT_Outline_Embolden(&mut (*self.slot()).outline, strength as ffi::FT_Pos) };
        check("FT_Outline_Embolden", err)
    }

    fn embolden_bitmap(&mut self, x_strength: i64, y_strength: i64) -> Result<()> {
        let err = unsafe {
            FT_Bitmap_Embolden(
                self.library.raw(),
                &mut (*self.slot()).bitmap,
                x_strength as ffi::FT_Pos,
                y_strength as ffi::FT_Pos,
            )
        };
        check("FT_Bitmap_Embolden", err)
    }

    fn render(&mut self) -> Result<()> {
        self.face
            .glyph()
            .render_glyph(RenderMode::Normal)
            .map_err(|e| ft_error("FreeType render failed", e))
    }

    fn rendered(&self) -> Result<RenderedGlyph> {
        if self.loaded == 0 {
            return Err(FontError::EngineFailure("no glyph loaded".into()));
        }
        let glyph = self.face.glyph();
        let bitmap = glyph.bitmap();
        let cols = bitmap.width().max(0) as u32;
        let rows = bitmap.rows().max(0) as u32;
        let ft_mode = bitmap
            .pixel_mode()
            .map_err(|e| ft_error("FreeType pixel mode", e))?;

        let (mode, pixels) = if cols == 0 || rows == 0 {
            // Empty glyph (e.g., space)
            let mode = match ft_mode {
                FtPixelMode::Bgra => PixelMode::Bgra,
                _ => PixelMode::Gray,
            };
            (mode, Vec::new())
        } else {
            let pitch = bitmap.pitch().unsigned_abs() as usize;
            let buffer = bitmap.buffer();
            match ft_mode {
                FtPixelMode::Gray => (PixelMode::Gray, copy_rows(buffer, pitch, cols, rows, 1)?),
                FtPixelMode::Bgra => (PixelMode::Bgra, copy_rows(buffer, pitch, cols, rows, 4)?),
                FtPixelMode::Mono => (PixelMode::Gray, expand_mono(buffer, pitch, cols, rows)?),
                _ => {
                    return Err(FontError::EngineFailure("unsupported pixel mode".into()));
                }
            }
        };

        Ok(RenderedGlyph {
            glyph_index: self.loaded,
            advance: glyph.advance().x as i64,
            left: glyph.bitmap_left(),
            top: glyph.bitmap_top(),
            cols,
            rows,
            mode,
            pixels,
        })
    }

    fn size_metrics(&self) -> Option<SizeMetrics> {
        self.face.size_metrics().map(|m| SizeMetrics {
            ascender: m.ascender as i64,
            descender: m.descender as i64,
            height: m.height as i64,
        })
    }

    fn units_per_em(&self) -> u16 {
        self.face.raw().units_per_EM as u16
    }

    fn y_scale(&self) -> i64 {
        self.face.size_metrics().map_or(0, |m| m.y_scale as i64)
    }
}

/// Copy `rows` rows of `cols * bytes_per_pixel` bytes out of a pitched buffer
fn copy_rows(buffer: &[u8], pitch: usize, cols: u32, rows: u32, bytes_per_pixel: usize) -> Result<Vec<u8>> {
    let row_len = cols as usize * bytes_per_pixel;
    let mut data = Vec::with_capacity(row_len * rows as usize);
    for y in 0..rows as usize {
        let row = buffer
            .get(y * pitch..y * pitch + row_len)
            .ok_or_else(|| FontError::EngineFailure("truncated glyph bitmap".into()))?;
        data.extend_from_slice(row);
    }
    Ok(data)
}

/// 1-bit bitmap strike to 8-bit coverage
fn expand_mono(buffer: &[u8], pitch: usize, cols: u32, rows: u32) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(cols as usize * rows as usize);
    for y in 0..rows as usize {
        for x in 0..cols as usize {
            let byte = *buffer
                .get(y * pitch + x / 8)
                .ok_or_else(|| FontError::EngineFailure("truncated glyph bitmap".into()))?;
            let on = byte & (0x80 >> (x % 8)) != 0;
            data.push(if on { 0xFF } else { 0 });
        }
    }
    Ok(data)
}
