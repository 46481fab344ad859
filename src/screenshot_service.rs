//! Capture service orchestrating the screenshot pipeline
//!
//! For every request the service renders the page, stores the raw capture,
//! composes the shareable image and stores that too. Batches fan out over
//! tokio tasks; the number of live browser sessions is capped by a
//! semaphore and every item's failure is reported in its own slot.

use crate::{
    format_duration, BatchOutcome, CaptureError, CaptureRequest, CaptureResult, ChromeRenderer, CompositeRenderer,
    Config, ErrorKind, FullPageRequest, LocalStorage, Metrics, ProgressTracker, Renderer, ScreenshotError,
    StorageGateway,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Screenshot capture service
///
/// # Examples
///
/// ```rust,no_run
/// use screenshot_share::{Config, ScreenshotService};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = ScreenshotService::new(Config::default()).await?;
///
///     let result = service.capture_viewport("https://example.com", 1920, 1080).await?;
///     println!("raw: {}, composite: {}", result.raw_image_id, result.composite_image_id);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ScreenshotService {
    config: Arc<Config>,
    renderer: Arc<dyn Renderer>,
    storage: Arc<dyn StorageGateway>,
    compositor: CompositeRenderer,
    session_limiter: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl ScreenshotService {
    /// Service backed by headless Chrome and local disk storage.
    pub async fn new(config: Config) -> Result<Self, ScreenshotError> {
        config.validate()?;

        let storage = Arc::new(LocalStorage::new(&config).await?);
        let config = Arc::new(config);
        let renderer = Arc::new(ChromeRenderer::new(config.clone()));

        Ok(Self::assemble(config, renderer, storage))
    }

    /// Service with caller-supplied renderer and storage.
    pub fn with_components(config: Config, renderer: Arc<dyn Renderer>, storage: Arc<dyn StorageGateway>) -> Self {
        Self::assemble(Arc::new(config), renderer, storage)
    }

    fn assemble(config: Arc<Config>, renderer: Arc<dyn Renderer>, storage: Arc<dyn StorageGateway>) -> Self {
        let compositor = CompositeRenderer::new(storage.clone(), config.watermark.clone());
        let session_limiter = Arc::new(Semaphore::new(config.max_concurrent_sessions.max(1)));

        info!(
            "Capture service ready: max {} concurrent sessions, navigation timeout {:?}",
            config.max_concurrent_sessions, config.navigation_timeout
        );

        Self {
            config,
            renderer,
            storage,
            compositor,
            session_limiter,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn StorageGateway> {
        self.storage.clone()
    }

    /// Browser session slots currently free.
    pub fn available_sessions(&self) -> usize {
        self.session_limiter.available_permits()
    }

    /// Viewport-clipped capture of `url`.
    pub async fn capture_viewport(&self, url: &str, width: u32, height: u32) -> Result<CaptureResult, ScreenshotError> {
        self.capture(CaptureRequest::viewport(url, width, height)).await
    }

    /// Capture of the whole scrollable document at the given width.
    pub async fn capture_full_page(&self, url: &str, width: u32) -> Result<CaptureResult, ScreenshotError> {
        self.capture(CaptureRequest::full_page(url, width)).await
    }

    /// Renders, stores and composes one request.
    ///
    /// Invalid requests are rejected before a browser session is acquired.
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult, ScreenshotError> {
        let start_time = Instant::now();

        let result = self.run_pipeline(&request, start_time).await;

        match &result {
            Ok(capture) => {
                self.metrics.record_capture(start_time.elapsed(), true);
                info!(
                    "Captured {} -> raw {}, composite {} in {:?}",
                    request.url, capture.raw_image_id, capture.composite_image_id, capture.duration
                );
            }
            Err(e) => {
                self.metrics.record_capture(start_time.elapsed(), false);
                self.metrics.record_error(e);
                warn!("Capture of {} failed ({:?}): {}", request.url, e.kind(), e);
            }
        }

        result
    }

    async fn run_pipeline(&self, request: &CaptureRequest, start_time: Instant) -> Result<CaptureResult, ScreenshotError> {
        request.validate()?;

        let raw = {
            let _permit = self.session_limiter.acquire().await?;
            let _active = self.metrics.track_session();
            debug!(
                "Session slot acquired for {} ({} left)",
                request.url,
                self.session_limiter.available_permits()
            );

            let render_start = Instant::now();
            let raw = self.renderer.render(request).await?;
            self.metrics.record_render(render_start.elapsed());
            raw
        };

        let raw_image_id = self.storage.save(raw).await?;

        let compose_start = Instant::now();
        let composite_image_id = self.compositor.compose(&raw_image_id, &request.url).await?;
        self.metrics.record_composition(compose_start.elapsed());

        Ok(CaptureResult {
            source_url: request.url.clone(),
            raw_image_id,
            composite_image_id,
            captured_at: Utc::now(),
            duration: start_time.elapsed(),
        })
    }

    /// Captures every request concurrently.
    ///
    /// The outcome has exactly one entry per request, in input order,
    /// whatever order the captures finish in. Dropping the returned future
    /// aborts every in-flight capture and tears down its browser.
    pub async fn capture_batch(&self, requests: Vec<CaptureRequest>) -> BatchOutcome {
        let total = requests.len();
        info!("Processing batch of {} requests", total);

        let progress = Arc::new(ProgressTracker::new(total));
        let mut slots: Vec<Option<Result<CaptureResult, CaptureError>>> = vec![None; total];
        let urls: Vec<String> = requests.iter().map(|request| request.url.clone()).collect();

        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let service = self.clone();
            let progress = progress.clone();

            tasks.spawn(async move {
                let url = request.url.clone();
                let outcome = service
                    .capture(request)
                    .await
                    .map_err(|e| CaptureError::new(url, &e));

                progress.record_completion(outcome.is_ok());
                let snapshot = progress.get_progress();
                debug!(
                    "Batch progress: {}/{} (success: {}, errors: {}, eta: {})",
                    snapshot.completed,
                    snapshot.total,
                    snapshot.success,
                    snapshot.errors,
                    snapshot.eta.map(format_duration).unwrap_or_else(|| "-".to_string())
                );

                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("Batch capture task failed: {}", e),
            }
        }

        let outcome: BatchOutcome = slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| {
                    Err(CaptureError {
                        source_url: url,
                        kind: ErrorKind::Internal,
                        message: "capture task did not complete".to_string(),
                    })
                })
            })
            .collect();

        let summary = progress.get_progress();
        info!(
            "Batch processing completed in {} ({:.2} items/s). Success: {}, Errors: {}",
            format_duration(summary.elapsed),
            summary.rate,
            outcome.iter().filter(|item| item.is_ok()).count(),
            outcome.iter().filter(|item| item.is_err()).count()
        );

        outcome
    }

    /// Full-page variant of [`ScreenshotService::capture_batch`].
    pub async fn capture_full_page_batch(&self, requests: Vec<FullPageRequest>) -> BatchOutcome {
        self.capture_batch(requests.into_iter().map(CaptureRequest::from).collect())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockStorageGateway;
    use crate::{CompositionLayout, ImageId, MemoryStorage, RenderError, StorageError, WatermarkSettings};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Renderer producing a solid PNG of the requested viewport size.
    ///
    /// URLs containing `timeout` fail with a navigation timeout, and the
    /// `delay=<ms>` query parameter slows a render down.
    #[derive(Default)]
    struct FakeRenderer {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(&self, request: &CaptureRequest) -> Result<Vec<u8>, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);

            let delay = url::Url::parse(&request.url)
                .ok()
                .and_then(|url| {
                    url.query_pairs()
                        .find(|(key, _)| key == "delay")
                        .and_then(|(_, value)| value.parse::<u64>().ok())
                })
                .unwrap_or(5);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.active.fetch_sub(1, Ordering::SeqCst);

            if request.url.contains("timeout") {
                return Err(RenderError::NavigationTimeout(Duration::from_secs(30)));
            }

            let height = if request.full_page { 900 } else { request.height };
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(request.width, height, Rgb([20, 120, 220])));
            let mut data = Vec::new();
            img.write_to(&mut Cursor::new(&mut data), ImageFormat::Png).unwrap();
            Ok(data)
        }
    }

    fn test_config(max_concurrent_sessions: usize) -> Config {
        Config {
            max_concurrent_sessions,
            watermark: WatermarkSettings {
                font_path: PathBuf::from("/nonexistent/font.ttf"),
                fallback_font_paths: Vec::new(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn test_service(max_concurrent_sessions: usize) -> (ScreenshotService, Arc<FakeRenderer>, Arc<MemoryStorage>) {
        let renderer = Arc::new(FakeRenderer::default());
        let storage = Arc::new(MemoryStorage::new());
        let service = ScreenshotService::with_components(
            test_config(max_concurrent_sessions),
            renderer.clone(),
            storage.clone(),
        );
        (service, renderer, storage)
    }

    #[tokio::test]
    async fn test_capture_stores_raw_and_composite() {
        let (service, renderer, storage) = test_service(4);

        let result = service.capture_viewport("https://example.com", 320, 200).await.unwrap();

        assert_eq!(result.source_url, "https://example.com");
        assert_ne!(result.raw_image_id, result.composite_image_id);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.len(), 2);

        let raw = image::load_from_memory(&storage.resolve(&result.raw_image_id).await.unwrap()).unwrap();
        assert_eq!((raw.width(), raw.height()), (320, 200));

        let composite = image::load_from_memory(&storage.resolve(&result.composite_image_id).await.unwrap()).unwrap();
        let layout = CompositionLayout::for_screenshot(320, 200);
        assert_eq!((composite.width(), composite.height()), (layout.canvas_width, layout.canvas_height));
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_renderer() {
        let (service, renderer, storage) = test_service(4);

        let err = service.capture_viewport("not a url", 800, 600).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = service.capture_viewport("https://example.com", 800, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_single_capture_propagates_render_error() {
        let (service, _, storage) = test_service(4);

        let err = service.capture_viewport("https://timeout.example", 800, 600).await.unwrap_err();
        assert!(matches!(err, ScreenshotError::Render(RenderError::NavigationTimeout(_))));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_full_page_capture() {
        let (service, _, storage) = test_service(4);

        let result = service.capture_full_page("https://example.com/long", 1024).await.unwrap();
        let raw = image::load_from_memory(&storage.resolve(&result.raw_image_id).await.unwrap()).unwrap();
        assert_eq!((raw.width(), raw.height()), (1024, 900));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let (service, _, _) = test_service(4);

        let outcome = service
            .capture_batch(vec![
                CaptureRequest::viewport("https://one.example", 400, 300),
                CaptureRequest::viewport("https://timeout.example", 400, 300),
                CaptureRequest::viewport("https://three.example", 400, 300),
            ])
            .await;

        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome[0].as_ref().unwrap().source_url, "https://one.example");
        assert_eq!(outcome[2].as_ref().unwrap().source_url, "https://three.example");

        let failure = outcome[1].as_ref().unwrap_err();
        assert_eq!(failure.source_url, "https://timeout.example");
        assert_eq!(failure.kind, ErrorKind::Render);
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let (service, _, _) = test_service(8);

        // earlier items finish last
        let requests: Vec<CaptureRequest> = (0..6)
            .map(|i| CaptureRequest::viewport(format!("https://site{i}.example/?delay={}", (6 - i) * 20), 240, 100))
            .collect();
        let urls: Vec<String> = requests.iter().map(|r| r.url.clone()).collect();

        let outcome = service.capture_batch(requests).await;

        let returned: Vec<String> = outcome.iter().map(|item| item.as_ref().unwrap().source_url.clone()).collect();
        assert_eq!(returned, urls);
    }

    #[tokio::test]
    async fn test_batch_reports_invalid_items_in_place() {
        let (service, renderer, _) = test_service(4);

        let outcome = service
            .capture_batch(vec![
                CaptureRequest::viewport("not a url", 400, 300),
                CaptureRequest::viewport("https://ok.example", 400, 300),
                CaptureRequest::viewport("https://zero.example", 0, 300),
            ])
            .await;

        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome[0].as_ref().unwrap_err().kind, ErrorKind::InvalidInput);
        assert!(outcome[1].is_ok());
        assert_eq!(outcome[2].as_ref().unwrap_err().kind, ErrorKind::InvalidInput);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_respects_session_cap() {
        let (service, renderer, _) = test_service(2);

        let requests = (0..8)
            .map(|i| CaptureRequest::viewport(format!("https://cap{i}.example/?delay=30"), 240, 100))
            .collect();
        let outcome = service.capture_batch(requests).await;

        assert_eq!(outcome.len(), 8);
        assert!(outcome.iter().all(|item| item.is_ok()));
        assert!(renderer.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(service.available_sessions(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (service, _, _) = test_service(4);
        assert!(service.capture_batch(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_page_batch() {
        let (service, _, _) = test_service(4);

        let outcome = service
            .capture_full_page_batch(vec![
                FullPageRequest {
                    url: "https://a.example".to_string(),
                    width: 800,
                },
                FullPageRequest {
                    url: "ftp://b.example".to_string(),
                    width: 800,
                },
            ])
            .await;

        assert_eq!(outcome.len(), 2);
        assert!(outcome[0].is_ok());
        assert_eq!(outcome[1].as_ref().unwrap_err().kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_cancelled_batch_releases_session_slots() {
        let (service, _, _) = test_service(2);

        let requests = (0..4)
            .map(|i| CaptureRequest::viewport(format!("https://slow{i}.example/?delay=5000"), 240, 100))
            .collect();

        let cancelled = tokio::time::timeout(Duration::from_millis(50), service.capture_batch(requests)).await;
        assert!(cancelled.is_err());

        // aborted tasks drop their permits once the runtime reaps them
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.available_sessions(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_as_storage_error() {
        let mut storage = MockStorageGateway::new();
        storage
            .expect_save()
            .returning(|_| Err(StorageError::Io("disk full".to_string())));
        storage
            .expect_resolve()
            .returning(|id: &ImageId| Err(StorageError::NotFound(id.to_string())));

        let service = ScreenshotService::with_components(
            test_config(2),
            Arc::new(FakeRenderer::default()),
            Arc::new(storage),
        );

        let err = service.capture_viewport("https://example.com", 300, 200).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        let outcome = service
            .capture_batch(vec![CaptureRequest::viewport("https://example.com", 300, 200)])
            .await;
        assert_eq!(outcome[0].as_ref().unwrap_err().kind, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_composition_failure_withholds_composite() {
        let (service, _, storage) = test_service(2);

        let url = format!("https://example.com/{}", "q".repeat(4000));
        let err = service.capture_viewport(&url, 300, 200).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Composition);
        // only the raw capture was stored
        assert_eq!(storage.len(), 1);
    }
}
