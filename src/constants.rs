//! Global constants for uifont
//!
//! Consolidates catalogue capacities, fixed-point scales and the
//! tagged code point layout to eliminate magic numbers throughout the codebase.

// ============================================================================
// Catalogue Capacities
// ============================================================================

/// Maximum number of live font records.
///
/// Tagged code points address fonts with 5 bits, so this cannot exceed 32.
pub const FONT_ID_MAX: usize = 32;

/// Maximum number of open collection containers
pub const FONT_TTC_MAX: usize = 4;

/// Maximum significant length of a registered font name (bytes)
pub const FONT_NAME_LEN_MAX: usize = 256;

// ============================================================================
// Tagged Code Points
// ============================================================================

/// Bit position of the font id inside a tagged code point
pub const GLYPH_TAG_SHIFT: u32 = 24;

/// Font id mask (5 bits, applied after shifting)
pub const GLYPH_TAG_FONT_MASK: u32 = 0x1F;

/// Payload mask (low 24 bits)
pub const GLYPH_TAG_PAYLOAD_MASK: u32 = 0x00FF_FFFF;

// ============================================================================
// Fixed-Point Scales
// ============================================================================

/// 26.6 fixed point: one pixel
pub const FONT_PIXEL_IN_POINT: i64 = 64;

/// 16.16 fixed point: 1.0
pub const FIXED_ONE: i64 = 0x10000;

/// Synthetic italic slope (x shear per unit of y)
pub const ITALIC_LEAN: f32 = 0.2;

/// Synthetic bold strength divisor (em size in pixels / 24)
pub const BOLD_STRENGTH_DIVISOR: i64 = 24;

// ============================================================================
// Pixel Depths
// ============================================================================

/// Bits per pixel of plain (grayscale) fonts
pub const BPP_BIT_8: u8 = 8;

/// Bits per pixel of color (BGRA) fonts
pub const BPP_BIT_32: u8 = 32;

// ============================================================================
// Defaults
// ============================================================================

/// Default glyph cache region (bytes)
pub const DEFAULT_CACHE_SIZE: usize = 256 * 1024;

/// Default font directory
pub const DEFAULT_FONT_DIR: &str = "/usr/share/fonts/uifont/";

/// Default pixel size used by the diagnostic binary
pub const DEFAULT_FONT_SIZE: u8 = 18;

/// Largest glyph edge accepted from the engine (pixels)
pub const MAX_GLYPH_DIMENSION: u32 = 4096;
