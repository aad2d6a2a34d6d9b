//! Font collection (`ttcf`) reader
//!
//! Extracts one sub-font out of a collection container and rebases its
//! table directory so the result can be opened as a standalone font file.
//!
//! Container layout (all big endian):
//!
//! ```text
//! 0   tag        'ttcf'
//! 4   major/minor version (u16 each)
//! 8   numFonts   (u32)
//! 12  offsetTable[numFonts] (u32, container relative)
//! ```
//!
//! Each offset points at an sfnt header: `sfntVersion(u32) numTables(u16) ...`
//! followed by 16-byte table records `tag checksum offset length`.

use std::io::{self, Read, SeekFrom};

use log::{debug, warn};

use super::storage::ContainerStream;
use crate::error::{FontError, Result};

/// Collection signature
pub const TTC_TAG: u32 = u32::from_be_bytes(*b"ttcf");

/// sfnt header length before the first table record
const SFNT_HEADER_LEN: usize = 12;

/// Size of one table record
const TABLE_RECORD_LEN: usize = 16;

/// Offset of the `offset` field inside a table record
const TABLE_RECORD_OFFSET_FIELD: usize = 8;

/// Parsed collection header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtcHeader {
    pub tag: u32,
    pub major: u16,
    pub minor: u16,
    pub num_fonts: u32,
}

/// Location of a sub-font inside its container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFontRange {
    /// Container-relative start of the sub-font's table directory
    pub offset: u32,
    pub length: u32,
}

/// A sub-font copied out of its container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubFont {
    pub range: SubFontRange,
    /// Standalone sfnt stream with rebased table offsets
    pub data: Vec<u8>,
}

/// Reads sub-fonts out of one open collection stream
pub struct CollectionReader<'a> {
    stream: &'a mut dyn ContainerStream,
}

impl<'a> CollectionReader<'a> {
    pub fn new(stream: &'a mut dyn ContainerStream) -> Self {
        Self { stream }
    }

    /// Read and validate the collection header
    pub fn header(&mut self) -> Result<TtcHeader> {
        self.stream.seek(SeekFrom::Start(0)).map_err(truncated)?;
        let header = TtcHeader {
            tag: read_u32(&mut *self.stream)?,
            major: read_u16(&mut *self.stream)?,
            minor: read_u16(&mut *self.stream)?,
            num_fonts: read_u32(&mut *self.stream)?,
        };
        if header.tag != TTC_TAG {
            return Err(FontError::InvalidContainer("missing ttcf tag"));
        }
        if header.num_fonts == 0 {
            return Err(FontError::InvalidContainer("collection declares no fonts"));
        }
        Ok(header)
    }

    /// Byte range of sub-font `index`.
    ///
    /// Non-last sub-fonts end where the next one starts, the last one runs to
    /// the end of the container.
    pub fn sub_font_range(&mut self, index: u32) -> Result<SubFontRange> {
        let header = self.header()?;
        if index >= header.num_fonts {
            return Err(FontError::InvalidContainer("sub-font index out of range"));
        }

        // offset table follows the 12-byte header
        self.stream
            .seek(SeekFrom::Start(12 + 4 * u64::from(index)))
            .map_err(truncated)?;
        let offset = read_u32(&mut *self.stream)?;

        let end = if index + 1 == header.num_fonts {
            let len = self.stream.byte_len()?;
            u32::try_from(len).map_err(|_| FontError::InvalidContainer("container too large"))?
        } else {
            read_u32(&mut *self.stream)?
        };

        let length = end
            .checked_sub(offset)
            .ok_or(FontError::InvalidContainer("negative sub-font length"))?;
        if length < SFNT_HEADER_LEN as u32 {
            return Err(FontError::InvalidContainer("sub-font shorter than its header"));
        }
        Ok(SubFontRange { offset, length })
    }

    /// Copy sub-font `index` out of the container.
    ///
    /// Fails without producing any output when the sub-font is larger than
    /// `capacity` or its table directory does not fit the copied range.
    pub fn extract_sub_font(&mut self, index: u32, capacity: usize) -> Result<SubFont> {
        let range = self.sub_font_range(index)?;
        if range.length as usize > capacity {
            return Err(FontError::InvalidContainer("sub-font exceeds buffer capacity"));
        }

        self.stream
            .seek(SeekFrom::Start(u64::from(range.offset)))
            .map_err(truncated)?;
        let mut data = vec![0u8; range.length as usize];
        self.stream.read_exact(&mut data).map_err(truncated)?;

        rebase_table_directory(&mut data, range.offset)?;
        debug!(
            "Extracted sub-font {}: offset={}, length={}",
            index, range.offset, range.length
        );
        Ok(SubFont { range, data })
    }
}

/// Rewrite container-relative table offsets so they are relative to `data`.
///
/// Every table must lie inside the extracted range; tables shared with
/// other sub-fonts outside it cannot be represented and fail the extraction.
pub fn rebase_table_directory(data: &mut [u8], base: u32) -> Result<()> {
    let num_tables = read_be_u16(data, 4)
        .ok_or(FontError::InvalidContainer("truncated sfnt header"))? as usize;
    let dir_end = SFNT_HEADER_LEN + num_tables * TABLE_RECORD_LEN;
    if dir_end > data.len() {
        return Err(FontError::InvalidContainer("truncated table directory"));
    }

    // validate every record before touching any of them
    let mut rebased = Vec::with_capacity(num_tables);
    for i in 0..num_tables {
        let record = SFNT_HEADER_LEN + i * TABLE_RECORD_LEN;
        let at = record + TABLE_RECORD_OFFSET_FIELD;
        let offset = read_be_u32(data, at).unwrap_or(0);
        let length = read_be_u32(data, at + 4).unwrap_or(0);
        let relative = offset
            .checked_sub(base)
            .ok_or(FontError::InvalidContainer("table precedes sub-font"))?;
        let end = u64::from(relative) + u64::from(length);
        if end > data.len() as u64 {
            warn!(
                "Table {} extends past sub-font ({} > {})",
                i,
                end,
                data.len()
            );
            return Err(FontError::InvalidContainer("table outside sub-font range"));
        }
        rebased.push((at, relative));
    }
    for (at, relative) in rebased {
        data[at..at + 4].copy_from_slice(&relative.to_be_bytes());
    }
    Ok(())
}

// Helper functions
fn truncated(e: io::Error) -> FontError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FontError::InvalidContainer("truncated container")
    } else {
        FontError::Io(e)
    }
}

fn read_u16<R: Read + ?Sized>(stream: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).map_err(truncated)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32<R: Read + ?Sized>(stream: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_be_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*data.get(offset)?, *data.get(offset + 1)?]))
}

fn read_be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
