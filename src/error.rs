use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

/// Failures raised while driving the browser for a single capture.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Browser engine crashed: {0}")]
    EngineCrashed(String),
}

#[derive(Debug, Clone, Error)]
pub enum CompositionError {
    #[error("Source image not found: {0}")]
    SourceNotFound(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Error)]
pub enum ScreenshotError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Capture task failed: {0}")]
    TaskFailed(String),
}

/// Coarse classification reported for each failed batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Render,
    Composition,
    Storage,
    Internal,
}

impl ScreenshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScreenshotError::InvalidInput(_) => ErrorKind::InvalidInput,
            ScreenshotError::Render(RenderError::InvalidUrl(_))
            | ScreenshotError::Render(RenderError::InvalidViewport { .. }) => ErrorKind::InvalidInput,
            ScreenshotError::Render(_) => ErrorKind::Render,
            ScreenshotError::Composition(_) => ErrorKind::Composition,
            ScreenshotError::Storage(_) => ErrorKind::Storage,
            ScreenshotError::TaskFailed(_) => ErrorKind::Internal,
        }
    }
}

/// Per-item failure inside a batch outcome.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{source_url}: {message}")]
pub struct CaptureError {
    pub source_url: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl CaptureError {
    pub fn new(source_url: impl Into<String>, error: &ScreenshotError) -> Self {
        Self {
            source_url: source_url.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<AcquireError> for ScreenshotError {
    fn from(err: AcquireError) -> Self {
        ScreenshotError::TaskFailed(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_render_inputs_report_invalid_input() {
        let err: ScreenshotError = RenderError::InvalidUrl("nope".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err: ScreenshotError = RenderError::InvalidViewport { width: 0, height: 10 }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn error_kinds() {
        let timeout: ScreenshotError = RenderError::NavigationTimeout(Duration::from_secs(1)).into();
        assert_eq!(timeout.kind(), ErrorKind::Render);

        let missing: ScreenshotError = CompositionError::SourceNotFound("a.png".to_string()).into();
        assert_eq!(missing.kind(), ErrorKind::Composition);

        let io: ScreenshotError = StorageError::Io("disk full".to_string()).into();
        assert_eq!(io.kind(), ErrorKind::Storage);
    }

    #[test]
    fn capture_error_carries_url_and_message() {
        let err: ScreenshotError = RenderError::NavigationFailed("net::ERR_NAME_NOT_RESOLVED".to_string()).into();
        let capture_error = CaptureError::new("https://example.invalid", &err);

        assert_eq!(capture_error.source_url, "https://example.invalid");
        assert_eq!(capture_error.kind, ErrorKind::Render);
        assert!(capture_error.message.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidInput).unwrap();
        assert_eq!(json, "\"invalid_input\"");
    }
}
