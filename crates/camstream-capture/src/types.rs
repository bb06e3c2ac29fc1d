//! Capture pipeline data model.

use std::fmt;

use camstream_convert::{FourCc, RawFrameType};
use serde::Serialize;

/// Backend-specific way to reopen a device from an enumeration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceHandle {
    Index(u32),
    Name(String),
}

/// One entry of an enumeration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Stable identifier, unchanged across enumerations while the device
    /// stays attached.
    pub path: String,
    /// Human readable name.
    pub name: String,
    pub handle: DeviceHandle,
}

impl DeviceDescriptor {
    pub fn new(path: impl Into<String>, name: impl Into<String>, handle: DeviceHandle) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            handle,
        }
    }
}

/// A media type offered by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    /// Declared row stride in bytes. Negative for bottom-up images,
    /// `None` when the driver does not report one.
    pub stride: Option<i32>,
    pub frame_rate: u32,
}

impl MediaType {
    pub fn new(fourcc: FourCc, width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            fourcc,
            width,
            height,
            stride: None,
            frame_rate,
        }
    }

    pub fn with_stride(mut self, stride: i32) -> Self {
        self.stride = Some(stride);
        self
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{} @ {} fps", self.fourcc, self.width, self.height, self.frame_rate)?;
        if let Some(stride) = self.stride {
            write!(f, " (stride {stride})")?;
        }
        Ok(())
    }
}

/// Layout of frames delivered under the active media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    /// Source bytes per row. May exceed `width * bytes_per_pixel`.
    pub pitch: i32,
    pub raw_type: RawFrameType,
    pub fourcc: FourCc,
}

/// Read/convert cycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ReadRequested,
    Converting,
    Released,
}

/// Per-session settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Format to negotiate first; falls back to the device's first
    /// supported type when the device does not offer it.
    pub preferred_format: Option<RawFrameType>,
    /// Log every converted frame at debug level, not just the first few.
    pub verbose_frames: bool,
}

/// How to pick a device from an enumeration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(usize),
    Path(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::Index(0)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Path(p) => write!(f, "`{p}`"),
        }
    }
}
