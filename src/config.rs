//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the capture service,
//! the request/result types that flow through it, and the Chrome launch
//! arguments derived from the configuration.

use crate::{CaptureError, RenderError, ScreenshotError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default viewport width used by every capture entry point.
pub const DEFAULT_WIDTH: u32 = 1920;

/// Default viewport height for viewport-clipped captures.
pub const DEFAULT_HEIGHT: u32 = 1080;

/// Main configuration structure for the capture service
///
/// Built once at startup and handed to [`crate::ScreenshotService::new`] and
/// [`crate::LocalStorage::new`]. Nothing inside the library reads the
/// environment, so tests can construct isolated configurations freely.
///
/// # Examples
///
/// ```rust
/// use screenshot_share::Config;
///
/// let config = Config {
///     max_concurrent_sessions: 2,
///     storage_root: "/tmp/screenshots".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.viewport.width, 1920);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of browser sessions alive at the same time
    ///
    /// Batch items beyond this limit wait for a free slot instead of
    /// launching additional browsers.
    pub max_concurrent_sessions: usize,

    /// Upper bound for a single page navigation (default: 30 seconds)
    pub navigation_timeout: Duration,

    /// Default viewport used when a request does not specify one
    pub viewport: Viewport,

    /// Viewport height used before a full-page capture expands to the document height
    pub full_page_initial_height: u32,

    /// Directory the local storage gateway writes images into (default: `screenshots`)
    pub storage_root: PathBuf,

    /// Public base URL that stored images are served under, e.g. `https://shots.example.com/`
    pub public_base_url: Option<String>,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for page loads
    pub user_agent: Option<String>,

    /// Watermark drawn under the QR code of composite images
    pub watermark: WatermarkSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: num_cpus::get().clamp(4, 8),
            navigation_timeout: Duration::from_secs(30),
            viewport: Viewport::default(),
            full_page_initial_height: DEFAULT_HEIGHT,
            storage_root: PathBuf::from("screenshots"),
            public_base_url: None,
            chrome_path: None,
            user_agent: None,
            watermark: WatermarkSettings::default(),
        }
    }
}

impl Config {
    /// Checks the invariants the service relies on.
    pub fn validate(&self) -> Result<(), ScreenshotError> {
        if self.max_concurrent_sessions == 0 {
            return Err(ScreenshotError::InvalidInput(
                "max_concurrent_sessions must be greater than 0".to_string(),
            ));
        }

        if self.navigation_timeout.is_zero() {
            return Err(ScreenshotError::InvalidInput(
                "navigation_timeout must be greater than 0".to_string(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 || self.full_page_initial_height == 0 {
            return Err(ScreenshotError::InvalidInput(
                "viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if self.watermark.font_size <= 0.0 {
            return Err(ScreenshotError::InvalidInput(
                "watermark font_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Browser viewport dimensions
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
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

/// Watermark text and the font chain used to draw it
///
/// The preferred font is tried first, then each fallback path in order.
/// When none of them can be loaded the built-in bitmap font is used, so a
/// missing asset never fails a composition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatermarkSettings {
    pub text: String,
    pub font_path: PathBuf,
    pub fallback_font_paths: Vec<PathBuf>,
    /// Pixel height of outline-font glyphs
    pub font_size: f32,
    /// RGB fill of the watermark text
    pub color: [u8; 3],
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            text: "Powered by webbuilder.site".to_string(),
            font_path: PathBuf::from("assets/fonts/NotoSansSC-Regular.ttf"),
            fallback_font_paths: platform_font_paths(),
            font_size: 20.0,
            color: [128, 128, 128],
        }
    }
}

/// Well-known locations of a sans-serif system font on common platforms.
pub fn platform_font_paths() -> Vec<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/Library/Fonts/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// A single page capture
///
/// `height` is ignored when `full_page` is set: full-page captures start
/// from the configured initial height and expand to the document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureRequest {
    pub url: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub full_page: bool,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

impl CaptureRequest {
    pub fn viewport(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            full_page: false,
        }
    }

    pub fn full_page(url: impl Into<String>, width: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height: DEFAULT_HEIGHT,
            full_page: true,
        }
    }

    /// Rejects requests that must never reach a browser.
    ///
    /// The URL has to be absolute with an http or https scheme and both
    /// viewport dimensions must be positive. Height is not checked for
    /// full-page requests since it is never used.
    pub fn validate(&self) -> Result<Url, RenderError> {
        let url = crate::validate_url(&self.url).map_err(|_| RenderError::InvalidUrl(self.url.clone()))?;

        if self.width == 0 || (!self.full_page && self.height == 0) {
            return Err(RenderError::InvalidViewport {
                width: self.width,
                height: self.height,
            });
        }

        Ok(url)
    }
}

/// Full-page batch entry; width only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FullPageRequest {
    pub url: String,
    #[serde(default = "default_width")]
    pub width: u32,
}

impl From<FullPageRequest> for CaptureRequest {
    fn from(request: FullPageRequest) -> Self {
        CaptureRequest::full_page(request.url, request.width)
    }
}

/// Identifiers of the two images produced by one successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub source_url: String,
    pub raw_image_id: crate::ImageId,
    pub composite_image_id: crate::ImageId,
    pub captured_at: DateTime<Utc>,
    pub duration: Duration,
}

/// One entry per input request, in input order.
pub type BatchOutcome = Vec<Result<CaptureResult, CaptureError>>;

/// Generate Chrome command-line arguments for one browser session
///
/// Every session gets its own user data and temp directories so that
/// concurrently launched browsers never share a profile singleton.
///
/// # Examples
///
/// ```rust
/// use screenshot_share::{Config, get_chrome_args_with_session_id};
///
/// let config = Config::default();
/// let args = get_chrome_args_with_session_id(&config, "abc");
/// assert!(args.contains(&"--headless".to_string()));
/// ```
pub fn get_chrome_args_with_session_id(config: &Config, session_id: &str) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
        format!("--temp-dir={}", session_temp_dir(session_id).display()),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

/// Profile directory owned by a single browser session.
pub fn session_user_data_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("screenshot-share-profile-{}-{}", std::process::id(), session_id))
}

/// Scratch directory owned by a single browser session.
pub fn session_temp_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("screenshot-share-tmp-{}-{}", std::process::id(), session_id))
}

pub fn create_browser_config(
    config: &Config,
    session_id: &str,
    viewport: Viewport,
) -> Result<chromiumoxide::browser::BrowserConfig, RenderError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(viewport.width, viewport.height)
        .user_data_dir(session_user_data_dir(session_id))
        .args(get_chrome_args_with_session_id(config, session_id));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(RenderError::EngineCrashed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!((4..=8).contains(&config.max_concurrent_sessions));
        assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.viewport, Viewport { width: 1920, height: 1080 });
        assert_eq!(config.full_page_initial_height, 1080);
        assert_eq!(config.storage_root, PathBuf::from("screenshots"));
        assert_eq!(config.watermark.text, "Powered by webbuilder.site");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = Config {
            max_concurrent_sessions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            navigation_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            viewport: Viewport { width: 0, height: 10 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_file() {
        let config: Config = serde_json::from_str(r#"{"max_concurrent_sessions": 2}"#).unwrap();
        assert_eq!(config.max_concurrent_sessions, 2);
        assert_eq!(config.viewport.width, 1920);
    }

    #[test]
    fn test_request_validation() {
        assert!(CaptureRequest::viewport("https://example.com", 800, 600).validate().is_ok());
        assert!(CaptureRequest::full_page("http://example.com/a?b=c", 800).validate().is_ok());

        assert!(matches!(
            CaptureRequest::viewport("not a url", 800, 600).validate(),
            Err(RenderError::InvalidUrl(_))
        ));
        assert!(matches!(
            CaptureRequest::viewport("ftp://example.com", 800, 600).validate(),
            Err(RenderError::InvalidUrl(_))
        ));
        assert!(matches!(
            CaptureRequest::viewport("https://example.com", 0, 600).validate(),
            Err(RenderError::InvalidViewport { width: 0, height: 600 })
        ));
        assert!(matches!(
            CaptureRequest::viewport("https://example.com", 800, 0).validate(),
            Err(RenderError::InvalidViewport { .. })
        ));
    }

    #[test]
    fn test_full_page_ignores_height() {
        let request = CaptureRequest {
            url: "https://example.com".to_string(),
            width: 1024,
            height: 0,
            full_page: true,
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let requests: Vec<CaptureRequest> =
            serde_json::from_str(r#"[{"url": "https://a.example"}, {"url": "https://b.example", "width": 375, "height": 667}]"#)
                .unwrap();
        assert_eq!(requests[0], CaptureRequest::viewport("https://a.example", 1920, 1080));
        assert_eq!(requests[1], CaptureRequest::viewport("https://b.example", 375, 667));

        let full_page: FullPageRequest = serde_json::from_str(r#"{"url": "https://c.example"}"#).unwrap();
        let request = CaptureRequest::from(full_page);
        assert!(request.full_page);
        assert_eq!(request.width, 1920);
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config {
            user_agent: Some("shots/1.0".to_string()),
            ..Default::default()
        };
        let args = get_chrome_args_with_session_id(&config, "s1");

        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--user-agent=shots/1.0".to_string()));
        assert!(args.iter().any(|arg| arg.starts_with("--temp-dir=") && arg.ends_with("-s1")));
    }

    #[test]
    fn test_session_dirs_are_distinct() {
        assert_ne!(session_user_data_dir("a"), session_user_data_dir("b"));
        assert_ne!(session_user_data_dir("a"), session_temp_dir("a"));
    }
}
