//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOX2PDF_CONFIG` (environment variable)
//! 2. `~/.config/mbox2pdf/config.toml` (Linux/macOS)
//!    `%APPDATA%\mbox2pdf\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags override whatever is loaded here.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::export::font::Font;
use crate::export::layout::{PageSize, PdfStyle};

/// Default attachment size ceiling in bytes (25 MiB).
pub const DEFAULT_SIZE_CEILING: u64 = 25 * 1024 * 1024;

/// Default glob used to select archives in batch mode.
pub const DEFAULT_GLOB_PATTERN: &str = "*.mbox";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Conversion policy.
    pub conversion: ConversionConfig,
    /// PDF page settings.
    pub pdf: PdfConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the diagnostic log file.
    pub log_dir: Option<PathBuf>,
    /// Hide the progress bar.
    pub quiet: bool,
}

/// Conversion policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Do not write attachments at all.
    pub skip_attachments: bool,
    /// Attachment directory (default: `<output>/attachments`).
    pub attachments_dir: Option<PathBuf>,
    /// Archive selection pattern for batch mode.
    pub glob_pattern: String,
    /// Attachments larger than this many bytes are skipped.
    pub size_ceiling: u64,
    /// Consecutive PDF write failures before a run is aborted.
    pub max_consecutive_failures: u32,
}

/// PDF page settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// "letter" or "a4".
    pub page_size: String,
    /// Margin on every side, in points.
    pub margin: f32,
    /// Body font size, in points.
    pub font_size: f32,
    /// TrueType font to embed instead of the bundled DejaVu Sans Mono,
    /// e.g. a CJK font.
    pub font_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
            quiet: false,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            skip_attachments: false,
            attachments_dir: None,
            glob_pattern: DEFAULT_GLOB_PATTERN.to_string(),
            size_ceiling: DEFAULT_SIZE_CEILING,
            max_consecutive_failures: 5,
        }
    }
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            page_size: "letter".to_string(),
            margin: 72.0,
            font_size: 10.0,
            font_path: None,
        }
    }
}

impl PdfConfig {
    /// Resolve into a renderer style. Unknown page sizes fall back to letter,
    /// an unusable font file to the bundled font.
    pub fn style(&self) -> PdfStyle {
        let page_size = PageSize::from_name(&self.page_size).unwrap_or_else(|| {
            tracing::warn!(page_size = %self.page_size, "Unknown page size, using letter");
            PageSize::Letter
        });
        let font = match &self.font_path {
            Some(path) => match Font::load(path) {
                Ok(font) => {
                    tracing::info!(path = %path.display(), font = font.name(), "Loaded font");
                    Arc::new(font)
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Cannot use font, falling back to the bundled one"
                    );
                    Font::builtin()
                }
            },
            None => Font::builtin(),
        };
        PdfStyle {
            page_size,
            margin: self.margin.clamp(18.0, 144.0),
            font_size: self.font_size.clamp(6.0, 18.0),
            font,
        }
    }
}

/// Resolved options handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub skip_attachments: bool,
    pub attachments_dir: Option<PathBuf>,
    pub glob_pattern: String,
    pub size_ceiling: u64,
    pub max_consecutive_failures: u32,
    pub pdf: PdfStyle,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ConvertOptions {
    /// Build options from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            skip_attachments: config.conversion.skip_attachments,
            attachments_dir: config.conversion.attachments_dir.clone(),
            glob_pattern: config.conversion.glob_pattern.clone(),
            size_ceiling: config.conversion.size_ceiling,
            max_consecutive_failures: config.conversion.max_consecutive_failures.max(1),
            pdf: config.pdf.style(),
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOX2PDF_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mbox2pdf").join("config.toml"))
}

/// Directory for the diagnostic log file.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mbox2pdf")
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix (binary units).
///
/// `"10M"` → 10485760, `"512"` → 512, `"1.5K"` → 1536.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty size".to_string());
    }
    let upper = trimmed.to_ascii_uppercase();
    let upper = upper
        .strip_suffix("IB")
        .or_else(|| upper.strip_suffix('B'))
        .unwrap_or(&upper);

    let (number, multiplier) = match upper.chars().last() {
        Some('K') => (&upper[..upper.len() - 1], 1024u64),
        Some('M') => (&upper[..upper.len() - 1], 1024 * 1024),
        Some('G') => (&upper[..upper.len() - 1], 1024 * 1024 * 1024),
        _ => (upper, 1),
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{input}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid size '{input}'"));
    }
    Ok((value * multiplier as f64).round() as u64)
}
