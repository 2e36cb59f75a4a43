//! Configuration management with serde serialization/deserialization
//!
//! This module provides the single value object consumed by every stage of a
//! capture: browser identity, viewport and padding, output format, timing and
//! the profile directory policy. It also assembles the browser launch flags.

use crate::ScreenshotError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted viewport dimension, in pixels.
pub const MIN_VIEWPORT_DIMENSION: u32 = 50;

/// Largest accepted viewport dimension, in pixels (8K).
pub const MAX_VIEWPORT_DIMENSION: u32 = 8192;

/// Baseline launch flags for headless capture.
///
/// This is a template: every launch copies it into its own argument list, so
/// per-call flags never leak into other calls.
///
/// See <https://peter.sh/experiments/chromium-command-line-switches/>.
pub const DEFAULT_FLAGS: &[&str] = &[
    "--autoplay-policy=document-user-activation-required",
    "--disable-client-side-phishing-detection",
    "--disable-cloud-import",
    "--disable-default-apps",
    "--disable-dinosaur-easter-egg",
    "--disable-gpu",
    "--disable-logging",
    "--disable-new-tab-first-run",
    "--disable-offer-upload-credit-cards",
    "--disable-signin-promo",
    "--disable-sync",
    "--disable-translate",
    "--headless",
    "--hide-scrollbars",
    "--ignore-certificate-errors",
    "--mute-audio",
    "--no-default-browser-check",
    "--no-first-run",
    "--no-pings",
    "--no-referrers",
    "--no-sandbox",
    "--password-store=basic",
];

/// Configuration for a single page capture
///
/// One `Config` drives exactly one browser launch, one page load and one
/// capture. It is never mutated by the capture itself.
///
/// # Examples
///
/// ```rust
/// use webpage_screenshot::{Config, OutputFormat};
///
/// let config = Config {
///     url: "https://example.com".to_string(),
///     full_page: true,
///     output_format: OutputFormat::Jpeg,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Page to capture
    pub url: String,

    /// Path to the Chrome/Chromium executable (default: /usr/bin/google-chrome-stable)
    pub chrome_path: PathBuf,

    /// Host the DevTools endpoint listens on (default: 127.0.0.1)
    pub host: String,

    /// DevTools port; 0 picks a free port at launch time (default: 0)
    pub port: u16,

    /// Where the browser keeps its user data (default: a fresh random directory)
    pub profile: ProfileDir,

    /// Requested viewport; clamped into [50, 8192] on both axes at launch
    pub viewport: Viewport,

    /// Extra space added to the capture clip
    pub padding: Padding,

    /// Capture the full scrollable content instead of one viewport (default: false)
    pub full_page: bool,

    /// Output image format (default: PNG)
    pub output_format: OutputFormat,

    /// JPEG quality, 0-100 (default: 90). Ignored for PNG.
    pub jpeg_quality: u8,

    /// Embed the base64 encoded URL as a JPEG comment segment (default: true)
    pub embed_url_comment: bool,

    /// Value for `--lang` (default: `*`); skipped when empty
    pub accept_language: Option<String>,

    /// Value for `--user-agent`; skipped when empty
    pub user_agent: Option<String>,

    /// Flags appended after the generated ones, verbatim and without deduplication
    pub extra_flags: Vec<String>,

    /// How long to let the page settle after load (default: 5 seconds)
    ///
    /// This is a ceiling: a network idle signal may end the wait early, and the
    /// wait is always cut short by the deadline.
    pub wait: Duration,

    /// Hard limit for the whole capture, from launch to image (default: 300 seconds)
    pub deadline: Duration,

    /// Watch network activity and stop waiting once it goes quiet (default: true)
    pub network_idle: bool,

    /// How long the network must stay quiet to count as idle (default: 500ms)
    pub network_idle_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            chrome_path: PathBuf::from("/usr/bin/google-chrome-stable"),
            host: "127.0.0.1".to_string(),
            port: 0,
            profile: ProfileDir::Random,
            viewport: Viewport::default(),
            padding: Padding::default(),
            full_page: false,
            output_format: OutputFormat::Png,
            jpeg_quality: 90,
            embed_url_comment: true,
            accept_language: Some("*".to_string()),
            user_agent: None,
            extra_flags: Vec::new(),
            wait: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
            network_idle: true,
            network_idle_window: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Default configuration pointed at `url`.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ScreenshotError> {
        if self.url.trim().is_empty() {
            return Err(ScreenshotError::ConfigurationError(
                "URL must not be empty".to_string(),
            ));
        }

        if crate::validate_url(&self.url).is_err() {
            return Err(ScreenshotError::InvalidUrl(self.url.clone()));
        }

        if self.chrome_path.as_os_str().is_empty() {
            return Err(ScreenshotError::ConfigurationError(
                "browser executable path must not be empty".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ScreenshotError::ConfigurationError(
                "DevTools host must not be empty".to_string(),
            ));
        }

        if self.deadline.is_zero() {
            return Err(ScreenshotError::ConfigurationError(
                "deadline must be greater than 0".to_string(),
            ));
        }

        if self.jpeg_quality > 100 {
            return Err(ScreenshotError::ConfigurationError(format!(
                "JPEG quality must be within 0..=100, got {}",
                self.jpeg_quality
            )));
        }

        Ok(())
    }

    pub fn is_jpeg(&self) -> bool {
        matches!(self.output_format, OutputFormat::Jpeg)
    }
}

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions clamped into [`MIN_VIEWPORT_DIMENSION`, `MAX_VIEWPORT_DIMENSION`].
    pub fn clamped(self) -> Self {
        Self {
            width: self
                .width
                .clamp(MIN_VIEWPORT_DIMENSION, MAX_VIEWPORT_DIMENSION),
            height: self
                .height
                .clamp(MIN_VIEWPORT_DIMENSION, MAX_VIEWPORT_DIMENSION),
        }
    }
}

/// Padding added to the capture clip, in pixels
///
/// Left and top shift the clip origin; right and bottom grow its size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Padding {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Where the browser profile lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileDir {
    /// A fresh directory under the system temp root, removed after the capture
    #[default]
    Random,
    /// A caller-owned directory, created if missing and never removed
    Fixed(PathBuf),
}

/// Supported output image formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG format - lossless compression
    #[default]
    Png,
    /// JPEG format - lossy compression, may carry the URL comment
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ScreenshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            other => Err(ScreenshotError::ConfigurationError(format!(
                "unsupported output format: {other}"
            ))),
        }
    }
}

/// Generate Chrome command-line arguments for one launch
///
/// Baseline flags come first, then the flags derived from `config` (debugging
/// port, clamped window size, language, user agent, profile directory), then
/// the caller's extra flags.
///
/// # Examples
///
/// ```rust
/// use std::path::Path;
/// use webpage_screenshot::{get_chrome_args, Config};
///
/// let config = Config::default();
/// let args = get_chrome_args(&config, 9222, Path::new("/tmp/cdp-profile"));
/// assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
/// ```
pub fn get_chrome_args(config: &Config, port: u16, profile_dir: &Path) -> Vec<String> {
    let viewport = config.viewport.clamped();

    let mut args: Vec<String> = DEFAULT_FLAGS.iter().map(|flag| flag.to_string()).collect();

    args.push(format!("--remote-debugging-port={port}"));
    args.push(format!(
        "--window-size={},{}",
        viewport.width, viewport.height
    ));

    if let Some(language) = non_empty(&config.accept_language) {
        args.push(format!("--lang={language}"));
    }

    if let Some(user_agent) = non_empty(&config.user_agent) {
        args.push(format!("--user-agent={user_agent}"));
    }

    if !profile_dir.as_os_str().is_empty() {
        args.push(format!("--user-data-dir={}", profile_dir.display()));
    }

    args.extend(config.extra_flags.iter().cloned());

    args
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
