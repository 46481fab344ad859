use crate::ImageId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use url::Url;

/// Path segment under which stored images are published.
pub const PUBLIC_IMAGE_PATH: &str = "static/screenshots/";

/// Tracks completion of a batch as its items finish in any order.
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed).min(completed);
        let elapsed = self.start_time.elapsed();
        let seconds = elapsed.as_secs_f64();

        let rate = if seconds > 0.0 { completed as f64 / seconds } else { 0.0 };
        let eta = if completed > 0 && rate > 0.0 {
            let remaining = self.total.saturating_sub(completed);
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed - errors,
            elapsed,
            rate,
            eta,
        }
    }

}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}

/// Public link of a stored image below `base_url`.
pub fn public_image_url(base_url: &str, id: &ImageId) -> String {
    let separator = if base_url.ends_with('/') { "" } else { "/" };
    format!("{base_url}{separator}{PUBLIC_IMAGE_PATH}{id}")
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

/// Parses an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<Url, url::ParseError> {
    let parsed = Url::parse(url)?;

    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        "http" | "https" => Err(url::ParseError::EmptyHost),
        _ => Err(url::ParseError::RelativeUrlWithoutBase),
    }
}
