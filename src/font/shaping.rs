//! Multi-font shaping manager interface
//!
//! Decides which registered fonts may stand in for a font that cannot
//! render a code point. The resolver only consumes the answers.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use log::debug;

use super::catalog::FontRecord;

/// Script-aware fallback oracle
pub trait ShapingManager {
    /// If `text` must be shaped, the font and script to shape it with
    fn needs_shaping(&self, text: &str) -> Option<(u8, u32)>;

    /// Ordered fallback candidates for `font_id`
    fn search_fallback_fonts(&self, font_id: u8) -> Vec<u8>;

    /// Script assigned to `font_id` (0 = none)
    fn script_for(&self, font_id: u8) -> u32;

    /// Called after every successful registration
    fn update_script(&mut self, _record: &FontRecord) {}

    /// Called after a font is unregistered
    fn forget(&mut self, _font_id: u8) {}
}

/// No fallback, no shaping
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShaping;

impl ShapingManager for NoShaping {
    fn needs_shaping(&self, _text: &str) -> Option<(u8, u32)> {
        None
    }

    fn search_fallback_fonts(&self, _font_id: u8) -> Vec<u8> {
        Vec::new()
    }

    fn script_for(&self, _font_id: u8) -> u32 {
        0
    }
}

/// Table-driven shaping manager
///
/// Fallback order is configured per font. Scripts are learned from the
/// shaping flag of registered fonts; a code point range maps text onto the
/// script whose font must shape it.
#[derive(Debug, Clone, Default)]
pub struct FallbackTable {
    fallbacks: HashMap<u8, Vec<u8>>,
    scripts: HashMap<u8, u32>,
    ranges: Vec<(RangeInclusive<u32>, u32)>,
}

impl FallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search `candidates` (in order) when `font_id` lacks a glyph
    pub fn with_fallbacks(mut self, font_id: u8, candidates: &[u8]) -> Self {
        self.fallbacks.insert(font_id, candidates.to_vec());
        self
    }

    /// Text in `range` must be shaped with the font registered for `script`
    pub fn with_script_range(mut self, range: RangeInclusive<u32>, script: u32) -> Self {
        self.ranges.push((range, script));
        self
    }

    fn script_of(&self, c: char) -> Option<u32> {
        let cp = c as u32;
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(&cp))
            .map(|(_, script)| *script)
    }
}

impl ShapingManager for FallbackTable {
    fn needs_shaping(&self, text: &str) -> Option<(u8, u32)> {
        let script = text.chars().find_map(|c| self.script_of(c))?;
        // lowest font id serving the script
        self.scripts
            .iter()
            .filter(|(_, s)| **s == script)
            .map(|(id, _)| *id)
            .min()
            .map(|id| (id, script))
    }

    fn search_fallback_fonts(&self, font_id: u8) -> Vec<u8> {
        self.fallbacks.get(&font_id).cloned().unwrap_or_default()
    }

    fn script_for(&self, font_id: u8) -> u32 {
        self.scripts.get(&font_id).copied().unwrap_or(0)
    }

    fn update_script(&mut self, record: &FontRecord) {
        if record.shaping != 0 {
            debug!(
                "Font {} ({}) serves script {}",
                record.font_id, record.name, record.shaping
            );
            self.scripts.insert(record.font_id, u32::from(record.shaping));
        }
    }

    fn forget(&mut self, font_id: u8) {
        self.scripts.remove(&font_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::catalog::{FontKind, FontOrigin};

    fn record(font_id: u8, shaping: u8) -> FontRecord {
        FontRecord {
            font_id,
            name: "Arabic.ttf".into(),
            shaping,
            kind: FontKind::Plain,
            origin: FontOrigin::Standalone,
        }
    }

    #[test]
    fn test_fallback_table_scripts() {
        let mut table = FallbackTable::new()
            .with_fallbacks(0, &[2, 1])
            .with_script_range(0x0600..=0x06FF, 7);
        assert_eq!(table.search_fallback_fonts(0), vec![2, 1]);
        assert!(table.search_fallback_fonts(3).is_empty());

        assert_eq!(table.needs_shaping("\u{0627}"), None);
        table.update_script(&record(4, 7));
        assert_eq!(table.script_for(4), 7);
        assert_eq!(table.needs_shaping("abc \u{0627}"), Some((4, 7)));
        assert_eq!(table.needs_shaping("abc"), None);

        table.forget(4);
        assert_eq!(table.script_for(4), 0);
    }
}
