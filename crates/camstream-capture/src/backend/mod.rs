//! Platform media subsystem seam.
//!
//! A backend enumerates devices and opens them; an open device lists its
//! media types and starts a stream bound to one of them. Reads are
//! pull-based: every [`SampleReader::request_read`] produces exactly one
//! completion on a thread owned by the backend.

use std::sync::Arc;

use crate::error::CaptureResult;
use crate::types::{DeviceDescriptor, MediaType};

pub mod synthetic;

#[cfg(feature = "native")]
pub mod native;

/// Outcome of one armed read.
#[derive(Debug)]
pub enum ReadCompletion<'a> {
    /// A frame encoded in the stream's media type.
    Sample { data: &'a [u8] },
    /// The read finished without data (stream tick, flush, format change).
    NoSample,
    /// The device or driver reported an error, e.g. the camera was unplugged.
    Failed(String),
}

/// Invoked by the backend once per completed read.
///
/// Completions for one stream are delivered one at a time, never
/// concurrently.
pub type CompletionHandler = Arc<dyn Fn(ReadCompletion<'_>) + Send + Sync>;

/// Entry point of a capture platform.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Snapshot of the devices currently attached, in platform order.
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>>;

    /// Open a device from a snapshot entry.
    fn open(&self, device: &DeviceDescriptor) -> CaptureResult<Box<dyn CaptureDevice>>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// An open device connection.
///
/// Dropping it releases the device. Drop must not wait for the backend's
/// completion thread, since the last owner may be running on it.
pub trait CaptureDevice: Send {
    /// Supported media types in the order the device exposes them.
    fn media_types(&mut self) -> CaptureResult<Vec<MediaType>>;

    /// Bind the stream to `media_type` and route completions to `handler`.
    ///
    /// Starting a new stream supersedes the previous one; completions already
    /// queued for the old stream may still arrive at the old handler.
    ///
    /// # Arguments
    /// * `media_type` - One of the entries returned by [`Self::media_types`]
    /// * `handler` - Receives every completion of the new stream
    fn start(
        &mut self,
        media_type: &MediaType,
        handler: CompletionHandler,
    ) -> CaptureResult<Arc<dyn SampleReader>>;
}

/// Arms reads on a started stream.
pub trait SampleReader: Send + Sync {
    /// Arm one read. Must return without waiting for the frame and must not
    /// invoke the completion handler on the calling thread.
    fn request_read(&self) -> CaptureResult<()>;

    /// Stop the stream. Idempotent; later `request_read` calls fail or no-op.
    fn shutdown(&self);
}
