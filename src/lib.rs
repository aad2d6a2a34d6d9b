//! uifont - vector font resources for embedded UI text
//!
//! Registers font files and TTC collections, resolves code points to
//! rasterized glyphs through FreeType, caches glyph bitmaps in one
//! pre-allocated region and computes line metrics for mixed text/emoji
//! runs.

pub mod config;
pub mod constants;
pub mod error;
pub mod font;

pub use config::Config;
pub use error::{FontError, Result};
pub use font::{
    BaselineOffset, Features, FontHeader, FontManager, FontParam, FontRecord, Glyph, GlyphMetrics,
    SizeSpan, TextStyle,
};
