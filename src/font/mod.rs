//! Font resources for UI text rendering
//!
//! Handles:
//! - Font and collection (TTC) registration
//! - Sub-font extraction from collection containers
//! - Glyph resolution with tagged code points and fallback fonts
//! - Color emoji strikes (CBDT) and bold/italic synthesis
//! - Glyph bitmap caching
//! - Line height and baseline for mixed text/emoji lines

pub mod cache;
pub mod catalog;
pub mod collection;
pub mod engine;
pub mod freetype;
pub mod manager;
pub mod metrics;
pub mod resolver;
pub mod shaping;
pub mod storage;

use bitflags::bitflags;

pub use cache::{CacheKey, CacheStats, GlyphCache, GlyphMetrics, GlyphView};
pub use catalog::{FontCatalog, FontKind, FontOrigin, FontParam, FontRecord};
pub use collection::{CollectionReader, SubFont, SubFontRange, TtcHeader};
pub use engine::{FaceSource, FontFace, RasterEngine, RenderedGlyph};
pub use self::freetype::{FreeTypeEngine, FreeTypeFace};
pub use manager::{FontHeader, FontManager, Glyph, ManagerOptions, ShapingTarget};
pub use metrics::{BaselineOffset, GlyphSource, SizeSpan};
pub use resolver::{GlyphResolver, TextStyle};
pub use shaping::{FallbackTable, NoShaping, ShapingManager};
pub use storage::{DirStorage, FontStorage, MemoryStorage};

bitflags! {
    /// Optional behaviors, all enabled by default
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u8 {
        /// Color emoji fonts render their embedded strikes
        const COLOR_FONTS = 1 << 0;
        /// Missing glyphs fall back to fonts chosen by the shaping manager
        const MULTI_FONT = 1 << 1;
        /// Bold and italic are synthesized from the regular face
        const STYLE_SYNTHESIS = 1 << 2;
    }
}

impl Default for Features {
    fn default() -> Self {
        Self::all()
    }
}

impl FontManager<FreeTypeEngine> {
    /// FreeType-backed manager reading fonts from the configured directory.
    ///
    /// A FreeType start-up failure is logged; the manager then reports
    /// `NotInitialized` for every operation that needs the engine.
    pub fn with_freetype(config: &crate::config::Config) -> Self {
        let engine = match FreeTypeEngine::init() {
            Ok(engine) => Some(engine),
            Err(e) => {
                log::error!("{}", e);
                None
            }
        };
        let storage = DirStorage::new(config.font.dir.clone());
        Self::new(engine, Box::new(storage), config.manager_options())
    }
}
