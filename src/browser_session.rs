//! Headless Chrome rendering
//!
//! Every capture runs in its own [`BrowserSession`]: a dedicated Chrome
//! process with a private profile directory. A page that hangs or crashes
//! the engine therefore only takes down its own capture. Sessions are torn
//! down on every exit path, including when the surrounding future is
//! dropped mid-navigation.

use crate::{
    create_browser_config, session_temp_dir, session_user_data_dir, CaptureRequest, Config, RenderError,
    Viewport,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Upper bound on each step of an orderly session shutdown.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces raw PNG bytes for a capture request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &CaptureRequest) -> Result<Vec<u8>, RenderError>;
}

/// A single Chrome process owned by exactly one capture.
///
/// Call [`BrowserSession::close`] for an orderly shutdown. If the session is
/// dropped instead, the browser process is killed and the CDP handler task
/// aborted, so no process or profile directory outlives its capture.
pub struct BrowserSession {
    id: String,
    browser: Option<Browser>,
    handler: JoinHandle<Result<(), CdpError>>,
    started_at: Instant,
}

impl BrowserSession {
    pub async fn launch(config: &Config, viewport: Viewport) -> Result<Self, RenderError> {
        let id = uuid::Uuid::new_v4().simple().to_string();

        for dir in [session_user_data_dir(&id), session_temp_dir(&id)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| RenderError::EngineCrashed(format!("Failed to create {}: {}", dir.display(), e)))?;
        }

        let launched = match create_browser_config(config, &id, viewport) {
            Ok(browser_config) => Browser::launch(browser_config)
                .await
                .map_err(|e| RenderError::EngineCrashed(format!("Browser launch failed: {e}"))),
            Err(e) => Err(e),
        };

        let (browser, mut handler) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                remove_session_dirs(&id);
                return Err(e);
            }
        };

        // The handler must be polled for the CDP connection to make progress
        let session_id = id.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Browser session {} handler error: {}", session_id, e);
                    return Err(e);
                }
            }
            debug!("Browser session {} handler stream ended", session_id);
            Ok(())
        });

        debug!("Browser session {} launched", id);

        Ok(Self {
            id,
            browser: Some(browser),
            handler: handler_task,
            started_at: Instant::now(),
        })
    }

    pub async fn new_page(&self) -> Result<Page, RenderError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| RenderError::EngineCrashed(format!("session {} already closed", self.id)))?;

        browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::EngineCrashed(e.to_string()))
    }

    /// Closes the browser and waits for the process to exit.
    ///
    /// Each step is bounded by [`SESSION_SHUTDOWN_TIMEOUT`]. A browser that
    /// refuses to close or exit in time is killed.
    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            let closed = shutdown_step(&self.id, "close", browser.close(), SESSION_SHUTDOWN_TIMEOUT).await;
            let exited = closed && shutdown_step(&self.id, "exit", browser.wait(), SESSION_SHUTDOWN_TIMEOUT).await;

            if !exited {
                warn!("Killing browser session {}", self.id);
                if let Some(Err(e)) = browser.kill().await {
                    error!("Failed to kill browser session {}: {}", self.id, e);
                }
            }
        }

        debug!("Browser session {} closed after {:?}", self.id, self.started_at.elapsed());
    }
}

/// Awaits one shutdown step for at most `limit`, reporting whether it succeeded.
async fn shutdown_step<F, T, E>(session_id: &str, step: &str, fut: F, limit: Duration) -> bool
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match timeout(limit, fut).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!("Browser session {} {} failed: {}", session_id, step, e);
            false
        }
        Err(_) => {
            warn!("Browser session {} {} timed out after {:?}", session_id, step, limit);
            false
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!("Browser session {} dropped while open, killing browser", self.id);
        }

        // Dropping the browser kills a still-running child process
        self.browser.take();
        self.handler.abort();
        remove_session_dirs(&self.id);
    }
}

fn remove_session_dirs(session_id: &str) {
    for dir in [session_user_data_dir(session_id), session_temp_dir(session_id)] {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Failed to remove {}: {}", dir.display(), e);
            }
        }
    }
}

/// Maps CDP failures onto the render error taxonomy.
fn classify_cdp_error(err: CdpError, navigation_timeout: Duration) -> RenderError {
    match &err {
        CdpError::Timeout => RenderError::NavigationTimeout(navigation_timeout),
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            RenderError::EngineCrashed(err.to_string())
        }
        _ => RenderError::NavigationFailed(err.to_string()),
    }
}

/// Renders pages with one fresh headless Chrome per call.
#[derive(Clone)]
pub struct ChromeRenderer {
    config: Arc<Config>,
}

impl ChromeRenderer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Initial browser viewport for a request. Full-page captures ignore the
    /// requested height and start from the configured initial height.
    pub fn initial_viewport(&self, request: &CaptureRequest) -> Viewport {
        let height = if request.full_page {
            self.config.full_page_initial_height
        } else {
            request.height
        };

        Viewport {
            width: request.width,
            height,
        }
    }

    async fn capture(&self, session: &BrowserSession, url: &str, viewport: Viewport, full_page: bool) -> Result<Vec<u8>, RenderError> {
        let page = session.new_page().await?;

        let result = self.capture_with_timeout(&page, url, viewport, full_page).await;

        shutdown_step(&session.id, "page close", page.close(), SESSION_SHUTDOWN_TIMEOUT).await;

        result
    }

    async fn capture_with_timeout(
        &self,
        page: &Page,
        url: &str,
        viewport: Viewport,
        full_page: bool,
    ) -> Result<Vec<u8>, RenderError> {
        let navigation_timeout = self.config.navigation_timeout;

        match timeout(navigation_timeout, self.navigate_and_capture(page, url, viewport, full_page)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::NavigationTimeout(navigation_timeout)),
        }
    }

    async fn navigate_and_capture(
        &self,
        page: &Page,
        url: &str,
        viewport: Viewport,
        full_page: bool,
    ) -> Result<Vec<u8>, RenderError> {
        let navigation_timeout = self.config.navigation_timeout;

        let emulation_params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(RenderError::EngineCrashed)?;

        page.execute(emulation_params)
            .await
            .map_err(|e| classify_cdp_error(e, navigation_timeout))?;

        // goto resolves once the page fires its load event
        page.goto(url)
            .await
            .map_err(|e| classify_cdp_error(e, navigation_timeout))?;

        let screenshot_params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();

        page.screenshot(screenshot_params)
            .await
            .map_err(|e| classify_cdp_error(e, navigation_timeout))
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, request: &CaptureRequest) -> Result<Vec<u8>, RenderError> {
        let url = request.validate()?;
        let viewport = self.initial_viewport(request);
        let start_time = Instant::now();

        let session = BrowserSession::launch(&self.config, viewport).await?;
        let result = self.capture(&session, url.as_str(), viewport, request.full_page).await;
        session.close().await;

        match &result {
            Ok(data) => info!(
                "Rendered {} ({}x{}, full_page={}) into {} bytes in {:?}",
                request.url,
                viewport.width,
                viewport.height,
                request.full_page,
                data.len(),
                start_time.elapsed()
            ),
            Err(e) => warn!("Rendering {} failed: {}", request.url, e),
        }

        result
    }
}
