//! uifont - font resource inspector
//!
//! Registers the configured fonts and collections, then prints line metrics
//! and per-glyph placement for each TEXT argument.

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use std::path::PathBuf;

use uifont::font::{FontManager, FreeTypeEngine};
use uifont::{Config, TextStyle};

/// Print help message
fn print_help() {
    println!(
        r#"uifont {} - vector font resource inspector

USAGE:
    uifont [OPTIONS] TEXT...

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    -c, --config PATH       Use this config file instead of the default search
    -f, --font NAME         Font to measure with (substring of a registered name)
    -s, --size PX           Pixel size (default: [font] default_size)
    --style STYLE           normal | bold | italic | bold-italic

CONFIG SEARCH ORDER:
    $UIFONT_CONFIG, ~/.config/uifont/config.toml, /etc/uifont/config.toml

EXAMPLES:
    uifont "Hello 😀"
    uifont --size 32 --style bold "Bold text""#,
        env!("CARGO_PKG_VERSION")
    );
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    font: Option<String>,
    size: Option<u8>,
    style: TextStyle,
    texts: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("{} requires a value", name))
        };
        match arg.as_str() {
            "-c" | "--config" => parsed.config = Some(PathBuf::from(value(arg)?)),
            "-f" | "--font" => parsed.font = Some(value(arg)?),
            "-s" | "--size" => {
                let size = value(arg)?;
                parsed.size = Some(
                    size.parse()
                        .with_context(|| format!("Invalid pixel size: {}", size))?,
                );
            }
            "--style" => parsed.style = TextStyle::from_str(&value(arg)?),
            other if other.starts_with('-') && other.len() > 1 => bail!("Unknown option: {}", other),
            text => parsed.texts.push(text.to_string()),
        }
    }
    Ok(parsed)
}

fn register_configured(manager: &mut FontManager<FreeTypeEngine>, config: &Config) {
    let params = config.font_params();
    let registered = manager.register_fonts(&params);
    info!("Registered {}/{} fonts", registered, params.len());
    for collection in &config.collections {
        if let Err(e) = manager.register_collection(&collection.name, &collection.params()) {
            warn!("Failed to open collection {}: {}", collection.name, e);
        }
    }
}

fn inspect(manager: &mut FontManager<FreeTypeEngine>, text: &str, font_id: u8, size: u8, style: TextStyle) -> Result<()> {
    let height = manager.compute_line_height(text, font_id, size)?;
    let baseline = manager.compute_baseline_offset(text, font_id, size)?;
    println!(
        "{:?}: line height {}px, baseline offset {}px{}",
        text,
        height,
        baseline.offset,
        if baseline.emoji_dominant { " (emoji dominant)" } else { "" }
    );
    for c in text.chars() {
        match manager.glyph_node(c as u32, font_id, size, style) {
            Ok(node) => println!(
                "  U+{:04X} font={} advance={} box={}x{} at ({}, {}) bpp={}",
                c as u32, node.font_id, node.advance, node.cols, node.rows, node.left, node.top, node.bits_per_pixel
            ),
            Err(e) => println!("  U+{:04X} {}", c as u32, e),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Check command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("uifont {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let args = parse_args(&args)?;
    if args.texts.is_empty() {
        print_help();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load(),
    };

    let mut manager = FontManager::with_freetype(&config);
    manager
        .configure_cache_memory(config.cache.size)
        .context("Failed to configure glyph cache")?;
    register_configured(&mut manager, &config);

    let font_id = match &args.font {
        Some(name) => manager
            .font_id(name)
            .ok_or_else(|| anyhow!("No registered font matches {}", name))?,
        None => manager
            .fonts()
            .next()
            .map(|record| record.font_id)
            .ok_or_else(|| anyhow!("No fonts registered (font dir: {})", config.font.dir.display()))?,
    };
    let size = args.size.unwrap_or(config.font.default_size);

    for text in &args.texts {
        inspect(&mut manager, text, font_id, size, args.style)
            .with_context(|| format!("Failed to measure {:?}", text))?;
    }

    if let Some(stats) = manager.cache_stats() {
        info!(
            "Glyph cache: {} entries, {}/{} bytes, {} hits, {} misses, generation {}",
            stats.entries, stats.used, stats.capacity, stats.hits, stats.misses, stats.generation
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&["-s", "24", "--style", "bold", "--font", "CJK", "abc", "def"])).unwrap();
        assert_eq!(parsed.size, Some(24));
        assert_eq!(parsed.style, TextStyle::Bold);
        assert_eq!(parsed.font.as_deref(), Some("CJK"));
        assert_eq!(parsed.texts, vec!["abc", "def"]);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["--size"])).is_err());
        assert!(parse_args(&args(&["--size", "300"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
