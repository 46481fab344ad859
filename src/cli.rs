use crate::{
    format_duration, public_image_url, BatchOutcome, CaptureError, CaptureRequest, CaptureResult, Config, ErrorKind,
    ImageId, ScreenshotService,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{error, info};

/// Environment variable overriding the storage root directory.
pub const STORAGE_ROOT_ENV: &str = "STORAGE_BASE_URL";
/// Environment variable overriding the public base URL of stored images.
pub const PUBLIC_BASE_URL_ENV: &str = "SERVICE_HOST";

#[derive(Parser)]
#[command(name = "screenshot-share")]
#[command(about = "Capture web pages and compose shareable images with a QR code")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Maximum concurrent browser sessions")]
    pub max_concurrent: Option<usize>,

    #[arg(long, global = true, help = "Navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Directory images are stored in")]
    pub storage_root: Option<PathBuf>,

    #[arg(long, global = true, help = "Public base URL images are served under")]
    pub public_base_url: Option<String>,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Print the report as JSON")]
    pub json: bool,

    #[arg(long, global = true, help = "Print Prometheus metrics when done")]
    pub metrics: bool,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture the visible viewport of a URL
    Single {
        #[arg(short, long, help = "URL to capture")]
        url: String,

        #[arg(long, help = "Viewport width")]
        width: Option<u32>,

        #[arg(long, help = "Viewport height")]
        height: Option<u32>,
    },

    /// Capture the whole scrollable page of a URL
    FullPage {
        #[arg(short, long, help = "URL to capture")]
        url: String,

        #[arg(long, help = "Viewport width")]
        width: Option<u32>,
    },

    /// Capture every URL listed in a file
    Batch {
        #[arg(short, long, help = "File with one URL per line, or a JSON array of requests")]
        input: PathBuf,

        #[arg(long, help = "Capture full pages")]
        full_page: bool,

        #[arg(long, help = "Default viewport width")]
        width: Option<u32>,

        #[arg(long, help = "Default viewport height")]
        height: Option<u32>,
    },

    /// Validate the file given with --config
    Validate,
}

/// Entry of a JSON batch file; missing dimensions fall back to the defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Defaults applied to every request of a batch file.
#[derive(Debug, Clone, Copy)]
pub struct RequestDefaults {
    pub width: u32,
    pub height: u32,
    pub full_page: bool,
}

/// One line of the capture report.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportItem {
    Captured {
        source_url: String,
        raw_image_id: ImageId,
        composite_image_id: ImageId,
        raw_image_link: String,
        composite_image_link: String,
        duration_ms: u64,
    },
    Failed {
        source_url: String,
        kind: ErrorKind,
        message: String,
    },
}

/// Turns stored image ids into links a user can open.
#[derive(Debug, Clone)]
pub enum ImageLinks {
    Public(String),
    Local(PathBuf),
}

impl ImageLinks {
    pub fn from_config(config: &Config) -> Self {
        match &config.public_base_url {
            Some(base_url) => ImageLinks::Public(base_url.clone()),
            None => ImageLinks::Local(config.storage_root.clone()),
        }
    }

    pub fn link(&self, id: &ImageId) -> String {
        match self {
            ImageLinks::Public(base_url) => public_image_url(base_url, id),
            ImageLinks::Local(root) => root.join(id.as_str()).display().to_string(),
        }
    }

    pub fn captured(&self, result: &CaptureResult) -> ReportItem {
        ReportItem::Captured {
            source_url: result.source_url.clone(),
            raw_image_id: result.raw_image_id.clone(),
            composite_image_id: result.composite_image_id.clone(),
            raw_image_link: self.link(&result.raw_image_id),
            composite_image_link: self.link(&result.composite_image_id),
            duration_ms: result.duration.as_millis() as u64,
        }
    }

    pub fn report(&self, outcome: &BatchOutcome) -> Vec<ReportItem> {
        outcome
            .iter()
            .map(|item| match item {
                Ok(result) => self.captured(result),
                Err(e) => failed(e),
            })
            .collect()
    }
}

fn failed(error: &CaptureError) -> ReportItem {
    ReportItem::Failed {
        source_url: error.source_url.clone(),
        kind: error.kind,
        message: error.message.clone(),
    }
}

pub struct CliRunner {
    pub config: Config,
    pub service: ScreenshotService,
    links: ImageLinks,
    json: bool,
}

impl CliRunner {
    pub async fn new(config: Config, json: bool) -> anyhow::Result<Self> {
        let service = ScreenshotService::new(config.clone())
            .await
            .context("failed to initialise capture service")?;

        Ok(Self::with_service(config, service, json))
    }

    pub fn with_service(config: Config, service: ScreenshotService, json: bool) -> Self {
        let links = ImageLinks::from_config(&config);
        Self {
            config,
            service,
            links,
            json,
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Single { url, width, height } => {
                let request = CaptureRequest::viewport(
                    url,
                    width.unwrap_or(self.config.viewport.width),
                    height.unwrap_or(self.config.viewport.height),
                );
                self.run_single(request).await
            }
            Commands::FullPage { url, width } => {
                let request = CaptureRequest::full_page(url, width.unwrap_or(self.config.viewport.width));
                self.run_single(request).await
            }
            Commands::Batch {
                input,
                full_page,
                width,
                height,
            } => {
                let defaults = RequestDefaults {
                    width: width.unwrap_or(self.config.viewport.width),
                    height: height.unwrap_or(self.config.viewport.height),
                    full_page,
                };
                self.run_batch(&input, defaults).await
            }
            Commands::Validate => {
                self.config.validate()?;
                describe_config(&self.config);
                Ok(())
            }
        }
    }

    pub async fn run_single(&self, request: CaptureRequest) -> anyhow::Result<()> {
        info!("Taking screenshot of: {}", request.url);
        let url = request.url.clone();

        match self.service.capture(request).await {
            Ok(result) => {
                let item = self.links.captured(&result);
                self.print_report(std::slice::from_ref(&item))?;
                Ok(())
            }
            Err(e) => {
                let capture_error = CaptureError::new(url, &e);
                if self.json {
                    self.print_report(&[failed(&capture_error)])?;
                }
                error!("Failed to take screenshot: {}", capture_error);
                Err(anyhow::Error::new(e).context(format!("capture of {} failed", capture_error.source_url)))
            }
        }
    }

    pub async fn run_batch(&self, input: &Path, defaults: RequestDefaults) -> anyhow::Result<()> {
        let content = fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        let requests = parse_batch_input(&content, defaults)?;
        info!("Loaded {} URLs from {}", requests.len(), input.display());

        let outcome = self.service.capture_batch(requests).await;
        self.print_report(&self.links.report(&outcome))
    }

    fn print_report(&self, items: &[ReportItem]) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(items)?);
            return Ok(());
        }

        for item in items {
            match item {
                ReportItem::Captured {
                    source_url,
                    raw_image_link,
                    composite_image_link,
                    duration_ms,
                    ..
                } => {
                    println!("✅ {source_url}");
                    println!("  Screenshot: {raw_image_link}");
                    println!("  Composite:  {composite_image_link}");
                    println!("  Duration:   {}", format_duration(Duration::from_millis(*duration_ms)));
                }
                ReportItem::Failed {
                    source_url,
                    kind,
                    message,
                } => {
                    println!("❌ {source_url}");
                    println!("  Error ({kind:?}): {message}");
                }
            }
        }

        Ok(())
    }
}

/// Parses a batch file: a JSON array of requests, or one URL per line with
/// `#` comments and blank lines ignored.
pub fn parse_batch_input(content: &str, defaults: RequestDefaults) -> anyhow::Result<Vec<CaptureRequest>> {
    let to_request = |url: String, width: Option<u32>, height: Option<u32>| CaptureRequest {
        url,
        width: width.unwrap_or(defaults.width),
        height: height.unwrap_or(defaults.height),
        full_page: defaults.full_page,
    };

    if content.trim_start().starts_with('[') {
        let entries: Vec<BatchEntry> = serde_json::from_str(content).context("invalid JSON batch file")?;
        return Ok(entries
            .into_iter()
            .map(|entry| to_request(entry.url, entry.width, entry.height))
            .collect());
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| to_request(line.to_string(), None, None))
        .collect())
}

/// Applies `STORAGE_BASE_URL` and `SERVICE_HOST` style overrides.
pub fn apply_env_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = var(STORAGE_ROOT_ENV).filter(|value| !value.is_empty()) {
        config.storage_root = PathBuf::from(root);
    }

    if let Some(host) = var(PUBLIC_BASE_URL_ENV).filter(|value| !value.is_empty()) {
        config.public_base_url = Some(host);
    }
}

pub fn apply_cli_overrides(config: &mut Config, args: &Cli) {
    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent_sessions = max_concurrent;
    }
    if let Some(timeout) = args.timeout {
        config.navigation_timeout = Duration::from_secs(timeout);
    }
    if let Some(storage_root) = &args.storage_root {
        config.storage_root = storage_root.clone();
    }
    if let Some(public_base_url) = &args.public_base_url {
        config.public_base_url = Some(public_base_url.clone());
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }
}

pub async fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid configuration in {}", path.display()))
}

pub async fn validate_config_file(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = read_config_file(path).await?;
    if let Err(e) = config.validate() {
        bail!("configuration is invalid: {e}");
    }

    describe_config(&config);
    Ok(())
}

fn describe_config(config: &Config) {
    println!("Configuration is valid:");
    println!("  Max concurrent sessions: {}", config.max_concurrent_sessions);
    println!("  Navigation timeout: {:?}", config.navigation_timeout);
    println!("  Viewport: {}x{}", config.viewport.width, config.viewport.height);
    println!("  Storage root: {}", config.storage_root.display());
    if let Some(base_url) = &config.public_base_url {
        println!("  Public base URL: {base_url}");
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn defaults() -> RequestDefaults {
        RequestDefaults {
            width: 1280,
            height: 720,
            full_page: false,
        }
    }

    #[test]
    fn test_parse_url_lines() {
        let content = "# landing pages\nhttps://a.example\n\n  https://b.example/path  \n#https://skipped.example\n";
        let requests = parse_batch_input(content, defaults()).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], CaptureRequest::viewport("https://a.example", 1280, 720));
        assert_eq!(requests[1].url, "https://b.example/path");
    }

    #[test]
    fn test_parse_json_batch() {
        let content = r#"[
            {"url": "https://a.example", "width": 800, "height": 600},
            {"url": "https://b.example"}
        ]"#;
        let mut full_page = defaults();
        full_page.full_page = true;

        let requests = parse_batch_input(content, full_page).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!((requests[0].width, requests[0].height), (800, 600));
        assert_eq!((requests[1].width, requests[1].height), (1280, 720));
        assert!(requests.iter().all(|r| r.full_page));
    }

    #[test]
    fn test_parse_malformed_json_batch() {
        assert!(parse_batch_input("[{\"href\": 1}]", defaults()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [(STORAGE_ROOT_ENV, "/data/shots"), (PUBLIC_BASE_URL_ENV, "https://cdn.example/")]
            .into_iter()
            .collect();
        let mut config = Config::default();

        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage_root, PathBuf::from("/data/shots"));
        assert_eq!(config.public_base_url.as_deref(), Some("https://cdn.example/"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let args = Cli::parse_from([
            "screenshot-share",
            "--max-concurrent",
            "2",
            "--timeout",
            "5",
            "--public-base-url",
            "https://override.example/",
            "single",
            "--url",
            "https://example.com",
        ]);
        let mut config = Config {
            public_base_url: Some("https://env.example/".to_string()),
            ..Default::default()
        };

        apply_cli_overrides(&mut config, &args);

        assert_eq!(config.max_concurrent_sessions, 2);
        assert_eq!(config.navigation_timeout, Duration::from_secs(5));
        assert_eq!(config.public_base_url.as_deref(), Some("https://override.example/"));
        assert!(matches!(args.command, Commands::Single { width: None, height: None, .. }));
    }

    #[test]
    fn test_image_links() {
        let id = ImageId::parse("abc.png").unwrap();

        let public = ImageLinks::Public("https://shots.example/".to_string());
        assert_eq!(public.link(&id), "https://shots.example/static/screenshots/abc.png");

        let local = ImageLinks::Local(PathBuf::from("screenshots"));
        assert_eq!(local.link(&id), PathBuf::from("screenshots").join("abc.png").display().to_string());
    }

    #[test]
    fn test_failed_report_item_serializes_kind() {
        let item = failed(&CaptureError {
            source_url: "https://x.example".to_string(),
            kind: ErrorKind::Render,
            message: "navigation timed out".to_string(),
        });

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "render");
        assert_eq!(json["source_url"], "https://x.example");
    }

    #[tokio::test]
    async fn test_validate_config_file() {
        let dir = tempfile::tempdir().unwrap();

        let valid = dir.path().join("valid.json");
        fs::write(&valid, r#"{"max_concurrent_sessions": 3}"#).await.unwrap();
        assert!(validate_config_file(&valid).await.is_ok());

        let invalid = dir.path().join("invalid.json");
        fs::write(&invalid, r#"{"max_concurrent_sessions": 0}"#).await.unwrap();
        assert!(validate_config_file(&invalid).await.is_err());
    }
}
