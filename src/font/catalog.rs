//! Font catalogue
//!
//! Fixed-capacity table of registered faces and open collection containers.
//! Font ids are slot indices: stable while registered, reused after
//! unregistration.

use log::{debug, info, warn};
use smol_str::SmolStr;

use super::collection::CollectionReader;
use super::engine::{FontFace, RasterEngine};
use super::storage::{ContainerStream, FontStorage};
use crate::constants::{
    BPP_BIT_32, BPP_BIT_8, FONT_ID_MAX, FONT_NAME_LEN_MAX, FONT_TTC_MAX, GLYPH_TAG_FONT_MASK,
    GLYPH_TAG_SHIFT,
};
use crate::error::{FontError, Result};

/// Glyph bitmap depth of a font
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontKind {
    /// 8-bit coverage glyphs
    Plain,
    /// 32-bit color glyphs (CBDT emoji)
    Color,
}

impl FontKind {
    pub fn bits_per_pixel(self) -> u8 {
        match self {
            Self::Plain => BPP_BIT_8,
            Self::Color => BPP_BIT_32,
        }
    }

    pub fn is_color(self) -> bool {
        self == Self::Color
    }
}

/// Where a registered face came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontOrigin {
    /// Its own font file
    Standalone,
    /// Sub-font `index` of collection `collection_id`
    Collection { collection_id: u8, index: u32 },
}

/// One registered font
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRecord {
    pub font_id: u8,
    pub name: SmolStr,
    /// Script this font shapes natively (0 = none)
    pub shaping: u8,
    pub kind: FontKind,
    pub origin: FontOrigin,
}

/// Font name + shaping flag, as listed in registration tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontParam {
    pub name: SmolStr,
    pub shaping: u8,
}

impl FontParam {
    pub fn new(name: &str, shaping: u8) -> Self {
        Self {
            name: name.into(),
            shaping,
        }
    }
}

struct FontSlot<F> {
    record: FontRecord,
    face: F,
}

struct CollectionSlot {
    name: SmolStr,
    stream: Box<dyn ContainerStream>,
}

/// Registered fonts and containers
pub struct FontCatalog<F> {
    fonts: Vec<Option<FontSlot<F>>>,
    collections: Vec<Option<CollectionSlot>>,
}

/// Names compare on their first `FONT_NAME_LEN_MAX` bytes
fn same_name(a: &str, b: &str) -> bool {
    let a = &a.as_bytes()[..a.len().min(FONT_NAME_LEN_MAX)];
    let b = &b.as_bytes()[..b.len().min(FONT_NAME_LEN_MAX)];
    a == b
}

fn kind_of<F: FontFace>(face: &F) -> FontKind {
    if face.has_color_table() {
        FontKind::Color
    } else {
        FontKind::Plain
    }
}

impl<F: FontFace> Default for FontCatalog<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FontFace> FontCatalog<F> {
    pub fn new() -> Self {
        Self {
            fonts: (0..FONT_ID_MAX).map(|_| None).collect(),
            collections: (0..FONT_TTC_MAX).map(|_| None).collect(),
        }
    }

    fn find_exact(&self, name: &str) -> Option<u8> {
        self.fonts
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| same_name(&s.record.name, name)))
            .map(|i| i as u8)
    }

    fn free_font_slot(&self) -> Option<usize> {
        self.fonts.iter().position(Option::is_none)
    }

    fn insert(
        &mut self,
        slot: usize,
        name: &str,
        shaping: u8,
        origin: FontOrigin,
        face: F,
    ) -> &FontRecord {
        let record = FontRecord {
            font_id: slot as u8,
            name: name.into(),
            shaping,
            kind: kind_of(&face),
            origin,
        };
        info!(
            "Font registered: {} (id={}, {:?}, {:?})",
            record.name, record.font_id, record.kind, record.origin
        );
        let entry = self.fonts[slot].insert(FontSlot { record, face });
        &entry.record
    }

    /// Register a standalone font file.
    ///
    /// Re-registering a name returns the id it already has.
    pub fn register_font<E>(
        &mut self,
        engine: &E,
        storage: &dyn FontStorage,
        name: &str,
        shaping: u8,
    ) -> Result<&FontRecord>
    where
        E: RasterEngine<Face = F>,
    {
        if let Some(id) = self.find_exact(name) {
            debug!("Font already registered: {} (id={})", name, id);
            return self.get(id).ok_or(FontError::InvalidFontId(id));
        }
        let slot = self.free_font_slot().ok_or(FontError::CatalogFull)?;
        let source = storage.face_source(name)?;
        let face = engine.open_face(&source, 0)?;
        Ok(self.insert(slot, name, shaping, FontOrigin::Standalone, face))
    }

    /// Open a collection container and register the listed sub-fonts.
    ///
    /// Sub-font `i` is opened from the whole container with face index `i`
    /// (sub-fonts share table data) and registered under `fonts[i]`.
    /// Descriptors past the container's font count, or whose face fails to
    /// open, are skipped. Returns the collection id and the records
    /// registered by this call.
    pub fn register_collection<E>(
        &mut self,
        engine: &E,
        storage: &dyn FontStorage,
        name: &str,
        fonts: &[FontParam],
    ) -> Result<(u8, Vec<FontRecord>)>
    where
        E: RasterEngine<Face = F>,
    {
        if let Some(id) = self.find_collection(name) {
            debug!("Collection already open: {} (id={})", name, id);
            return Ok((id, Vec::new()));
        }
        let collection_id = self
            .collections
            .iter()
            .position(Option::is_none)
            .ok_or(FontError::CatalogFull)?;
        let mut stream = storage.open_stream(name)?;
        let header = CollectionReader::new(stream.as_mut()).header()?;
        let source = storage.face_source(name)?;

        let mut registered = Vec::new();
        for (index, param) in fonts.iter().enumerate() {
            if index as u32 >= header.num_fonts {
                warn!(
                    "{} holds {} fonts, {} descriptors ignored",
                    name,
                    header.num_fonts,
                    fonts.len() - index
                );
                break;
            }
            if self.find_exact(&param.name).is_some() {
                warn!("Sub-font {} already registered, skipping", param.name);
                continue;
            }
            let Some(slot) = self.free_font_slot() else {
                warn!(
                    "Font catalogue full, {} sub-fonts of {} dropped",
                    fonts.len() - index,
                    name
                );
                break;
            };
            let face = match engine.open_face(&source, index as u32) {
                Ok(face) => face,
                Err(e) => {
                    warn!("Skipping sub-font {} of {}: {}", index, name, e);
                    continue;
                }
            };
            let origin = FontOrigin::Collection {
                collection_id: collection_id as u8,
                index: index as u32,
            };
            let record = self.insert(slot, &param.name, param.shaping, origin, face);
            registered.push(record.clone());
        }

        self.collections[collection_id] = Some(CollectionSlot {
            name: name.into(),
            stream,
        });
        info!(
            "Collection opened: {} (id={}, {}/{} sub-fonts)",
            name,
            collection_id,
            registered.len(),
            fonts.len()
        );
        Ok((collection_id as u8, registered))
    }

    /// Drop a font by exact name, closing its face
    pub fn unregister_font(&mut self, name: &str) -> Result<u8> {
        let id = self
            .find_exact(name)
            .ok_or_else(|| FontError::NameNotFound(name.to_string()))?;
        self.fonts[id as usize] = None;
        info!("Font unregistered: {} (id={})", name, id);
        Ok(id)
    }

    /// Close a container and unregister every sub-font it produced.
    ///
    /// `fonts` names the sub-fonts the caller expects; names that are not
    /// registered are reported, sub-fonts missing from the list are still
    /// released. Returns the collection id and the font ids released.
    pub fn unregister_collection(
        &mut self,
        name: &str,
        fonts: &[FontParam],
    ) -> Result<(u8, Vec<u8>)> {
        let id = self
            .find_collection(name)
            .ok_or_else(|| FontError::NameNotFound(name.to_string()))?;
        self.collections[id as usize] = None;
        for param in fonts {
            if self.find_exact(&param.name).is_none() {
                warn!("{}: sub-font {} not registered", name, param.name);
            }
        }
        let mut released = Vec::new();
        for slot in self.fonts.iter_mut() {
            let produced = slot.as_ref().is_some_and(|s| {
                matches!(s.record.origin, FontOrigin::Collection { collection_id, .. } if collection_id == id)
            });
            if !produced {
                continue;
            }
            if let Some(s) = slot.take() {
                info!("Font unregistered: {} (id={})", s.record.name, s.record.font_id);
                released.push(s.record.font_id);
            }
        }
        info!("Collection closed: {} (id={}, {} sub-fonts)", name, id, released.len());
        Ok((id, released))
    }

    fn find_collection(&self, name: &str) -> Option<u8> {
        self.collections
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|c| same_name(&c.name, name)))
            .map(|i| i as u8)
    }

    pub fn get(&self, font_id: u8) -> Option<&FontRecord> {
        self.fonts
            .get(font_id as usize)?
            .as_ref()
            .map(|slot| &slot.record)
    }

    pub fn face_mut(&mut self, font_id: u8) -> Option<&mut F> {
        self.fonts
            .get_mut(font_id as usize)?
            .as_mut()
            .map(|slot| &mut slot.face)
    }

    /// First font (in slot order) whose name contains `pattern`
    pub fn find_by_name(&self, pattern: &str) -> Option<u8> {
        self.records()
            .find(|record| record.name.contains(pattern))
            .map(|record| record.font_id)
    }

    /// Registered font addressed by the tag bits of `code`
    pub fn tagged_font(&self, code: u32) -> Option<&FontRecord> {
        let font_id = ((code >> GLYPH_TAG_SHIFT) & GLYPH_TAG_FONT_MASK) as u8;
        self.get(font_id)
    }

    pub fn is_color(&self, font_id: u8) -> bool {
        self.get(font_id).is_some_and(|r| r.kind.is_color())
    }

    pub fn records(&self) -> impl Iterator<Item = &FontRecord> {
        self.fonts
            .iter()
            .filter_map(|slot| slot.as_ref().map(|s| &s.record))
    }

    /// Live font ids in slot order
    pub fn font_ids(&self) -> Vec<u8> {
        self.records().map(|r| r.font_id).collect()
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collection_count(&self) -> usize {
        self.collections.iter().flatten().count()
    }

    /// Raw font stream of `font_id`: the whole file for standalone fonts,
    /// the extracted and rebased sub-font for collection members.
    pub fn font_bytes(
        &mut self,
        storage: &dyn FontStorage,
        font_id: u8,
        capacity: usize,
    ) -> Result<Vec<u8>> {
        if capacity == 0 {
            return Err(FontError::BufferTooSmall { needed: 1, capacity });
        }
        let record = self.get(font_id).ok_or(FontError::InvalidFontId(font_id))?;
        let (origin, name) = (record.origin, record.name.clone());
        match origin {
            FontOrigin::Standalone => {
                let data = storage.read(&name)?;
                if data.len() > capacity {
                    return Err(FontError::BufferTooSmall {
                        needed: data.len(),
                        capacity,
                    });
                }
                Ok(data)
            }
            FontOrigin::Collection {
                collection_id,
                index,
            } => {
                let slot = self
                    .collections
                    .get_mut(collection_id as usize)
                    .and_then(Option::as_mut)
                    .ok_or(FontError::InvalidContainer("collection closed"))?;
                let sub_font =
                    CollectionReader::new(slot.stream.as_mut()).extract_sub_font(index, capacity)?;
                Ok(sub_font.data)
            }
        }
    }

    /// Close every face and container
    pub fn clear(&mut self) {
        let fonts = self.len();
        let collections = self.collection_count();
        self.fonts.iter_mut().for_each(|slot| *slot = None);
        self.collections.iter_mut().for_each(|slot| *slot = None);
        if fonts + collections > 0 {
            info!("Font catalogue cleared: {} fonts, {} collections", fonts, collections);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::engine::scripted::{
        build_collection, build_sfnt, build_shared_collection, FaceScript, ScriptedEngine,
        ScriptedFace,
    };
    use crate::font::storage::MemoryStorage;

    fn setup() -> (ScriptedEngine, MemoryStorage) {
        let engine = ScriptedEngine::new()
            .with_face("Sans.ttf", FaceScript::plain(4))
            .with_face("Emoji.ttf", FaceScript::color(&[109, 136]))
            .with_face("CJK-JP", FaceScript::plain(6))
            .with_face("CJK-KR", FaceScript::plain(6));
        let collection = build_collection(&[
            build_sfnt("CJK-JP", &[(*b"glyf", vec![1; 32])]),
            build_sfnt("CJK-KR", &[(*b"glyf", vec![2; 48])]),
        ]);
        let storage = MemoryStorage::new()
            .with_file("Sans.ttf", build_sfnt("Sans.ttf", &[]))
            .with_file("Emoji.ttf", build_sfnt("Emoji.ttf", &[]))
            .with_file("CJK.ttc", collection);
        (engine, storage)
    }

    fn cjk_params() -> Vec<FontParam> {
        vec![FontParam::new("CJK-JP", 0), FontParam::new("CJK-KR", 0)]
    }

    #[test]
    fn test_register_is_idempotent() {
        let (engine, storage) = setup();
        let mut catalog: FontCatalog<ScriptedFace> = FontCatalog::new();
        let first = catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap().font_id;
        let second = catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap().font_id;
        assert_eq!(first, second);
        assert_eq!(engine.opened(), 1);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_color_capability_detected() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        let sans = catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap().font_id;
        let emoji = catalog.register_font(&engine, &storage, "Emoji.ttf", 0).unwrap().font_id;
        assert!(!catalog.is_color(sans));
        assert!(catalog.is_color(emoji));
        assert_eq!(catalog.get(emoji).unwrap().kind.bits_per_pixel(), 32);
    }

    #[test]
    fn test_missing_file_fails() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        assert!(matches!(
            catalog.register_font(&engine, &storage, "Missing.ttf", 0),
            Err(FontError::Io(_))
        ));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_full() {
        let mut engine = ScriptedEngine::new();
        let mut storage = MemoryStorage::new();
        for i in 0..=FONT_ID_MAX {
            let name = format!("F{i}.ttf");
            engine = engine.with_face(&name, FaceScript::plain(0));
            storage.insert(&name, build_sfnt(&name, &[]));
        }
        let mut catalog = FontCatalog::new();
        for i in 0..FONT_ID_MAX {
            let record = catalog
                .register_font(&engine, &storage, &format!("F{i}.ttf"), 0)
                .unwrap();
            assert_eq!(record.font_id as usize, i);
        }
        let name = format!("F{FONT_ID_MAX}.ttf");
        assert!(matches!(
            catalog.register_font(&engine, &storage, &name, 0),
            Err(FontError::CatalogFull)
        ));
    }

    #[test]
    fn test_unregister_frees_slot_and_closes_face() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap();
        let emoji = catalog.register_font(&engine, &storage, "Emoji.ttf", 0).unwrap().font_id;
        assert_eq!(catalog.unregister_font("Sans.ttf").unwrap(), 0);
        assert_eq!(engine.closed(), 1);
        assert!(catalog.get(0).is_none());
        assert!(matches!(
            catalog.unregister_font("Sans.ttf"),
            Err(FontError::NameNotFound(_))
        ));

        // freed slot is reused, live ids stay stable
        let again = catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap().font_id;
        assert_eq!(again, 0);
        assert_eq!(catalog.get(emoji).unwrap().name, "Emoji.ttf");
    }

    #[test]
    fn test_register_collection() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap();
        let (collection_id, records) = catalog
            .register_collection(&engine, &storage, "CJK.ttc", &cjk_params())
            .unwrap();
        assert_eq!(collection_id, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].font_id, 1);
        assert_eq!(
            records[1].origin,
            FontOrigin::Collection { collection_id: 0, index: 1 }
        );

        // second registration reuses the open container
        let (again, records) = catalog
            .register_collection(&engine, &storage, "CJK.ttc", &cjk_params())
            .unwrap();
        assert_eq!(again, 0);
        assert!(records.is_empty());
        assert_eq!(catalog.collection_count(), 1);
    }

    #[test]
    fn test_register_collection_skips_bad_sub_fonts() {
        let (engine, mut storage) = setup();
        // a third descriptor the container does not have
        let mut params = cjk_params();
        params.insert(0, FontParam::new("Unknown", 0));
        storage.insert(
            "Mixed.ttc",
            build_collection(&[
                build_sfnt("Nobody", &[]),
                build_sfnt("CJK-KR", &[]),
            ]),
        );
        let mut catalog = FontCatalog::new();
        let (_, records) = catalog
            .register_collection(&engine, &storage, "Mixed.ttc", &params)
            .unwrap();
        // index 0 has no face script, index 1 opens, index 2 is out of range
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "CJK-JP");
    }

    #[test]
    fn test_register_collection_with_shared_tables() {
        let (engine, mut storage) = setup();
        // both directories up front, one glyf table used by both fonts
        storage.insert(
            "Shared.ttc",
            build_shared_collection(&["CJK-JP", "CJK-KR"], &[(*b"glyf", vec![7; 64])]),
        );
        let mut catalog = FontCatalog::new();
        let (_, records) = catalog
            .register_collection(&engine, &storage, "Shared.ttc", &cjk_params())
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(engine.opened(), 2);
        assert_eq!(
            records[1].origin,
            FontOrigin::Collection { collection_id: 0, index: 1 }
        );

        // the first directory alone cannot be copied out as a standalone font
        assert!(matches!(
            catalog.font_bytes(&storage, 0, 1 << 20),
            Err(FontError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_unregister_collection_releases_unlisted_sub_fonts() {
        let (engine, mut storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog
            .register_collection(&engine, &storage, "CJK.ttc", &cjk_params())
            .unwrap();
        let (_, released) = catalog
            .unregister_collection("CJK.ttc", &[FontParam::new("CJK-JP", 0)])
            .unwrap();
        assert_eq!(released, vec![0, 1]);
        assert!(catalog.is_empty());
        assert_eq!(engine.closed(), 2);

        // the freed collection id goes to a different container
        storage.insert("Other.ttc", build_collection(&[build_sfnt("CJK-JP", &[])]));
        let (id, _) = catalog
            .register_collection(&engine, &storage, "Other.ttc", &[FontParam::new("CJK-JP", 0)])
            .unwrap();
        assert_eq!(id, 0);
        assert!(matches!(catalog.font_bytes(&storage, 1, 1 << 20), Err(FontError::InvalidFontId(1))));
    }

    #[test]
    fn test_unregister_collection() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog
            .register_collection(&engine, &storage, "CJK.ttc", &cjk_params())
            .unwrap();
        let (id, released) = catalog.unregister_collection("CJK.ttc", &cjk_params()).unwrap();
        assert_eq!(id, 0);
        assert_eq!(released, vec![0, 1]);
        assert!(catalog.is_empty());
        assert_eq!(catalog.collection_count(), 0);
        assert!(matches!(
            catalog.unregister_collection("CJK.ttc", &cjk_params()),
            Err(FontError::NameNotFound(_))
        ));
    }

    #[test]
    fn test_find_by_name_first_match_wins() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog
            .register_collection(&engine, &storage, "CJK.ttc", &cjk_params())
            .unwrap();
        assert_eq!(catalog.find_by_name("CJK"), Some(0));
        assert_eq!(catalog.find_by_name("KR"), Some(1));
        assert_eq!(catalog.find_by_name("Serif"), None);
    }

    #[test]
    fn test_font_bytes() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap();
        catalog
            .register_collection(&engine, &storage, "CJK.ttc", &cjk_params())
            .unwrap();

        let sans = catalog.font_bytes(&storage, 0, 1 << 20).unwrap();
        assert_eq!(sans, build_sfnt("Sans.ttf", &[]));
        let kr = catalog.font_bytes(&storage, 2, 1 << 20).unwrap();
        assert_eq!(kr, build_sfnt("CJK-KR", &[(*b"glyf", vec![2; 48])]));
        assert!(matches!(
            catalog.font_bytes(&storage, 0, 4),
            Err(FontError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            catalog.font_bytes(&storage, 2, 4),
            Err(FontError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_tagged_font() {
        let (engine, storage) = setup();
        let mut catalog = FontCatalog::new();
        catalog.register_font(&engine, &storage, "Sans.ttf", 0).unwrap();
        catalog.register_font(&engine, &storage, "Emoji.ttf", 0).unwrap();
        assert_eq!(catalog.tagged_font(0x0100_0041).map(|r| r.font_id), Some(1));
        assert!(catalog.tagged_font(0x0500_0041).is_none());
    }
}
