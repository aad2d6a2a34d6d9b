//! Configuration file management
//!
//! Loads TOML configuration files and provides font manager settings.
//! Search order: $UIFONT_CONFIG, ~/.config/uifont/config.toml,
//! /etc/uifont/config.toml, built-in defaults.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_CACHE_SIZE, DEFAULT_FONT_DIR, DEFAULT_FONT_SIZE};
use crate::font::cache::ENTRY_HEADER_LEN;
use crate::font::{FontParam, Features, ManagerOptions};

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Font settings
    pub font: FontConfig,
    /// Glyph cache settings
    pub cache: CacheConfig,
    /// Optional features
    pub features: FeatureConfig,
    /// Fonts registered at startup
    pub fonts: Vec<FontEntry>,
    /// Collections opened at startup
    pub collections: Vec<CollectionEntry>,
}

/// Font settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Directory font names are resolved in
    pub dir: PathBuf,
    /// Pixel size used when none is given
    pub default_size: u8,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_FONT_DIR),
            default_size: DEFAULT_FONT_SIZE,
        }
    }
}

/// Glyph cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backing memory (bytes)
    pub size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Optional features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Render CBDT emoji fonts as color strikes
    pub color_fonts: bool,
    /// Fall back to other fonts through the shaping manager
    pub multi_font: bool,
    /// Synthesize bold and italic
    pub style_synthesis: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            color_fonts: true,
            multi_font: true,
            style_synthesis: true,
        }
    }
}

impl FeatureConfig {
    pub fn to_features(&self) -> Features {
        let mut features = Features::empty();
        features.set(Features::COLOR_FONTS, self.color_fonts);
        features.set(Features::MULTI_FONT, self.multi_font);
        features.set(Features::STYLE_SYNTHESIS, self.style_synthesis);
        features
    }
}

/// One font file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontEntry {
    pub name: String,
    /// Script the font shapes natively (0 = none)
    #[serde(default)]
    pub shaping: u8,
}

impl FontEntry {
    pub fn to_param(&self) -> FontParam {
        FontParam::new(&self.name, self.shaping)
    }
}

/// One collection container and the names of its sub-fonts, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub name: String,
    #[serde(default)]
    pub fonts: Vec<FontEntry>,
}

impl CollectionEntry {
    pub fn params(&self) -> Vec<FontParam> {
        self.fonts.iter().map(FontEntry::to_param).collect()
    }
}

impl Config {
    /// Font directory override, applied after the file is read
    const FONT_DIR_ENV: &'static str = "UIFONT_FONT_DIR";

    /// Candidate config files, highest priority first
    fn candidates() -> impl Iterator<Item = PathBuf> {
        let env = std::env::var_os("UIFONT_CONFIG").map(PathBuf::from);
        let user = dirs::config_dir().map(|dir| dir.join("uifont").join("config.toml"));
        env.into_iter()
            .chain(user)
            .chain(std::iter::once(PathBuf::from("/etc/uifont/config.toml")))
    }

    /// First existing config file, `None` when the built-in defaults apply
    pub fn config_path() -> Option<PathBuf> {
        Self::candidates().find(|path| path.is_file())
    }

    /// Load the first config file found, falling back to the defaults.
    /// `UIFONT_FONT_DIR` overrides `font.dir` either way.
    pub fn load() -> Self {
        let config = match Self::config_path() {
            Some(path) => Self::load_from_file(&path).unwrap_or_else(|e| {
                warn!("Failed to load config {}: {:#}", path.display(), e);
                Self::default()
            }),
            None => {
                info!("Using built-in default config");
                Self::default()
            }
        };
        config.with_font_dir_override(std::env::var_os(Self::FONT_DIR_ENV))
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!("Loaded config: {}", path.display());
        Ok(config)
    }

    /// Parse and sanitize a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.validated())
    }

    /// Replace values the font manager would reject with their defaults
    pub fn validated(mut self) -> Self {
        if self.font.default_size == 0 {
            warn!("font.default_size = 0, using {}", DEFAULT_FONT_SIZE);
            self.font.default_size = DEFAULT_FONT_SIZE;
        }
        // the region must hold at least one entry header
        if self.cache.size <= ENTRY_HEADER_LEN {
            warn!(
                "cache.size = {} cannot hold a glyph, using {}",
                self.cache.size, DEFAULT_CACHE_SIZE
            );
            self.cache.size = DEFAULT_CACHE_SIZE;
        }
        self
    }

    fn with_font_dir_override(mut self, dir: Option<OsString>) -> Self {
        if let Some(dir) = dir.filter(|d| !d.is_empty()) {
            info!("Font dir from {}: {:?}", Self::FONT_DIR_ENV, dir);
            self.font.dir = PathBuf::from(dir);
        }
        self
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            features: self.features.to_features(),
        }
    }

    pub fn font_params(&self) -> Vec<FontParam> {
        self.fonts.iter().map(FontEntry::to_param).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.size, DEFAULT_CACHE_SIZE);
        assert_eq!(config.font.default_size, DEFAULT_FONT_SIZE);
        assert_eq!(config.features.to_features(), Features::all());
        assert!(config.fonts.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            [font]
            dir = "/opt/fonts"
            default_size = 24

            [cache]
            size = 65536

            [features]
            multi_font = false

            [[fonts]]
            name = "Sans.ttf"

            [[fonts]]
            name = "Arabic.ttf"
            shaping = 3

            [[collections]]
            name = "CJK.ttc"
            fonts = [{ name = "CJK-JP" }, { name = "CJK-KR" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.font.dir, PathBuf::from("/opt/fonts"));
        assert_eq!(config.cache.size, 65536);
        assert_eq!(
            config.features.to_features(),
            Features::COLOR_FONTS | Features::STYLE_SYNTHESIS
        );
        assert_eq!(
            config.font_params(),
            vec![FontParam::new("Sans.ttf", 0), FontParam::new("Arabic.ttf", 3)]
        );
        assert_eq!(config.collections[0].params()[1], FontParam::new("CJK-KR", 0));
        assert_eq!(config.manager_options().features, config.features.to_features());
    }

    #[test]
    fn test_parse_error() {
        assert!(Config::parse("[cache]\nsize = \"big\"").is_err());
    }

    #[test]
    fn test_unusable_values_fall_back_to_defaults() {
        let config = Config::parse("[font]\ndefault_size = 0\n[cache]\nsize = 12").unwrap();
        assert_eq!(config.font.default_size, DEFAULT_FONT_SIZE);
        assert_eq!(config.cache.size, DEFAULT_CACHE_SIZE);

        let config = Config::parse("[font]\ndefault_size = 9\n[cache]\nsize = 13").unwrap();
        assert_eq!(config.font.default_size, 9);
        assert_eq!(config.cache.size, 13);
    }

    #[test]
    fn test_font_dir_override() {
        let config = Config::default().with_font_dir_override(Some("/opt/ui-fonts".into()));
        assert_eq!(config.font.dir, PathBuf::from("/opt/ui-fonts"));

        // unset or empty keeps the configured dir
        let config = Config::default().with_font_dir_override(Some(OsString::new()));
        assert_eq!(config.font.dir, PathBuf::from(DEFAULT_FONT_DIR));
        let config = Config::default().with_font_dir_override(None);
        assert_eq!(config.font.dir, PathBuf::from(DEFAULT_FONT_DIR));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("uifont-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[font]\ndir = \"/srv/fonts\"\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.font.dir, PathBuf::from("/srv/fonts"));
        assert_eq!(config.cache.size, DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = Config::load_from_file(Path::new("/nonexistent/uifont.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
