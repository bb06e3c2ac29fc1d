use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Source buffer too short: need {needed} bytes, got {actual}")]
    SourceTooShort { needed: usize, actual: usize },

    #[error("Destination is {dst_width}x{dst_height}, frame is {width}x{height}")]
    DimensionMismatch {
        dst_width: u32,
        dst_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Invalid pitch {pitch} for a row of {row_bytes} bytes")]
    InvalidPitch { pitch: i32, row_bytes: usize },

    #[error("Unsupported format: {0}")]
    Unsupported(String),
}

pub type ConvertResult<T> = Result<T, ConvertError>;
