//! # Screenshot Share
//!
//! Batch web-page capture that produces shareable images. Each page is
//! rendered in its own headless Chrome session, the raw PNG is stored, and a
//! composite is built from it: the screenshot on a white canvas with a QR
//! code of the page URL and a watermark line underneath. That composite is
//! stored too, and callers get back the identifiers of both images.
//!
//! ## Pipeline
//!
//! | Stage | Component | Output |
//! |-------|-----------|--------|
//! | Render | [`ChromeRenderer`] in a scoped [`BrowserSession`] | raw PNG bytes |
//! | Store raw | [`StorageGateway`] | raw [`ImageId`] |
//! | Compose | [`CompositeRenderer`] | composite PNG bytes |
//! | Store composite | [`StorageGateway`] | composite [`ImageId`] |
//!
//! ## Features
//!
//! - **Session isolation**: one Chrome process per capture, torn down on every exit path
//! - **Bounded concurrency**: semaphore-capped number of live browser sessions
//! - **Per-item error isolation**: a failed batch item never affects its siblings
//! - **Ordered batches**: results come back in input order whatever the completion order
//! - **Full-page capture**: expands to the whole scrollable document
//! - **Robust watermark**: outline font with fallbacks down to a built-in bitmap font
//!
//! ## Benchmarks
//! ```bash
//! # Layout, QR and composition benchmarks (no Chrome required)
//! cargo bench
//!
//! # Including real browser captures
//! cargo bench --features integration_benchmarks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshot_share::{CaptureRequest, Config, ScreenshotService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ScreenshotService::new(Config::default()).await?;
//!
//!     let outcome = service
//!         .capture_batch(vec![
//!             CaptureRequest::viewport("https://example.com", 1920, 1080),
//!             CaptureRequest::full_page("https://www.rust-lang.org", 1280),
//!         ])
//!         .await;
//!
//!     for item in outcome {
//!         match item {
//!             Ok(result) => println!("{} -> {}", result.source_url, result.composite_image_id),
//!             Err(e) => eprintln!("{e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! screenshot-share single --url https://example.com --width 1280 --height 720
//! screenshot-share full-page --url https://example.com
//! screenshot-share batch --input urls.txt --json
//! ```

/// Configuration, request and result types
pub mod config;

/// Error types and error classification
pub mod error;

/// Image storage gateway and identifiers
pub mod storage;

/// Headless Chrome sessions and page rendering
pub mod browser_session;

/// Composite image layout, QR code generation and composition
pub mod composite;

/// Watermark fonts and text drawing
pub mod watermark;

/// Capture service orchestrating the pipeline
pub mod screenshot_service;

/// Command-line interface implementation
pub mod cli;

/// Capture metrics and Prometheus export
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use browser_session::*;
pub use cli::*;
pub use composite::*;
pub use config::*;
pub use error::*;
pub use self::metrics::*;
pub use screenshot_service::*;
pub use storage::*;
pub use utils::*;
pub use watermark::*;
