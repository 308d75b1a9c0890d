//! Device capabilities commands may need from the host.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{0} is not supported on this device")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encoded screen capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub data: Vec<u8>,
    /// Image format, e.g. `png`.
    pub format: String,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn capture_screenshot(&self) -> Result<Screenshot, PlatformError>;
}

/// Platform for devices without a display server to capture from.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessPlatform;

#[async_trait]
impl Platform for HeadlessPlatform {
    async fn capture_screenshot(&self) -> Result<Screenshot, PlatformError> {
        Err(PlatformError::Unsupported("Screenshot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_screenshot_unsupported() {
        let err = HeadlessPlatform.capture_screenshot().await.unwrap_err();
        assert_eq!(err.to_string(), "Screenshot is not supported on this device");
    }
}
