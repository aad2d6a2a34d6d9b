//! Error types shared by every font component

use thiserror::Error;

/// Failure of a catalogue, collection, resolver or cache operation
#[derive(Debug, Error)]
pub enum FontError {
    /// No free font or container slot left
    #[error("font catalogue is full")]
    CatalogFull,

    /// No registered font or container carries the requested name
    #[error("font not registered: {0}")]
    NameNotFound(String),

    /// Font id is out of range or the slot is empty
    #[error("invalid font id {0}")]
    InvalidFontId(u8),

    /// Requested pixel size is zero
    #[error("invalid pixel size {0}")]
    InvalidSize(u8),

    /// Collection container is malformed or the request does not fit it
    #[error("invalid font collection: {0}")]
    InvalidContainer(&'static str),

    /// Font stream does not fit the caller's buffer
    #[error("font stream of {needed} bytes exceeds buffer of {capacity} bytes")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// The rasterization engine rejected a call
    #[error("rasterization engine failure: {0}")]
    EngineFailure(String),

    /// The font has no glyph for the requested code point
    #[error("glyph not found: U+{0:04X}")]
    GlyphNotFound(u32),

    /// The rasterization engine failed to initialize
    #[error("rasterization engine not initialized")]
    NotInitialized,

    /// Glyph cache memory has not been configured
    #[error("glyph cache memory not configured")]
    CacheUnavailable,

    /// Font storage I/O failure
    #[error("font storage: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FontError>;
