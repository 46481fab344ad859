use crate::{RenderError, ScreenshotError};
use metrics::{Counter, Gauge, Histogram, Key, Recorder};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub struct Metrics {
    pub captures_succeeded: Counter,
    pub captures_failed: Counter,
    pub capture_duration: Histogram,
    pub render_duration: Histogram,
    pub composition_duration: Histogram,
    pub active_sessions: Gauge,
    pub invalid_requests: Counter,
    pub timeout_errors: Counter,
    pub engine_errors: Counter,
    pub render_errors: Counter,
    pub storage_errors: Counter,
    pub composition_errors: Counter,
    pub internal_errors: Counter,
}

impl Metrics {
    /// Handles bound to the globally installed recorder, no-ops if none is.
    pub fn new() -> Self {
        Self::from_recorder(metrics::recorder())
    }

    pub fn from_recorder<R: Recorder + ?Sized>(recorder: &R) -> Self {
        let counter = |name: &'static str| recorder.register_counter(&Key::from_static_name(name));
        let histogram = |name: &'static str| recorder.register_histogram(&Key::from_static_name(name));

        Self {
            captures_succeeded: counter("screenshot_captures_succeeded_total"),
            captures_failed: counter("screenshot_captures_failed_total"),
            capture_duration: histogram("screenshot_capture_duration_seconds"),
            render_duration: histogram("screenshot_render_duration_seconds"),
            composition_duration: histogram("screenshot_composition_duration_seconds"),
            active_sessions: recorder.register_gauge(&Key::from_static_name("screenshot_active_sessions")),
            invalid_requests: counter("screenshot_invalid_requests_total"),
            timeout_errors: counter("screenshot_timeout_errors_total"),
            engine_errors: counter("screenshot_engine_errors_total"),
            render_errors: counter("screenshot_render_errors_total"),
            storage_errors: counter("screenshot_storage_errors_total"),
            composition_errors: counter("screenshot_composition_errors_total"),
            internal_errors: counter("screenshot_internal_errors_total"),
        }
    }

    pub fn record_capture(&self, duration: Duration, success: bool) {
        if success {
            self.captures_succeeded.increment(1);
        } else {
            self.captures_failed.increment(1);
        }

        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_render(&self, duration: Duration) {
        self.render_duration.record(duration.as_secs_f64());
    }

    pub fn record_composition(&self, duration: Duration) {
        self.composition_duration.record(duration.as_secs_f64());
    }

    pub fn record_error(&self, error: &ScreenshotError) {
        let counter = match error {
            ScreenshotError::InvalidInput(_)
            | ScreenshotError::Render(RenderError::InvalidUrl(_))
            | ScreenshotError::Render(RenderError::InvalidViewport { .. }) => &self.invalid_requests,
            ScreenshotError::Render(RenderError::NavigationTimeout(_)) => &self.timeout_errors,
            ScreenshotError::Render(RenderError::EngineCrashed(_)) => &self.engine_errors,
            ScreenshotError::Render(RenderError::NavigationFailed(_)) => &self.render_errors,
            ScreenshotError::Composition(_) => &self.composition_errors,
            ScreenshotError::Storage(_) => &self.storage_errors,
            ScreenshotError::TaskFailed(_) => &self.internal_errors,
        };
        counter.increment(1);
    }

    /// Counts a live browser session until the guard is dropped.
    pub fn track_session(&self) -> SessionGuard<'_> {
        self.active_sessions.increment(1.0);
        SessionGuard { metrics: self }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionGuard<'a> {
    metrics: &'a Metrics,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.metrics.active_sessions.decrement(1.0);
    }
}

/// Installs a process-wide Prometheus recorder.
///
/// Must run before any [`Metrics`] is created for its handles to report
/// to the exporter.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus recorder installed");
    Ok(handle)
}
