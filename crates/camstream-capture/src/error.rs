use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Failed to enumerate capture devices: {0}")]
    Enumeration(String),

    #[error("Failed to set device: {0}")]
    SetDeviceFailed(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedFormat(String),

    #[error("Capture backend error: {0}")]
    Backend(String),

    #[error("Capture session already released")]
    Released,
}

pub type CaptureResult<T> = Result<T, CaptureError>;
