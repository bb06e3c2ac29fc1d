//! Camera capture sessions.
//!
//! A [`WebCam`] enumerates devices through a [`CaptureBackend`], negotiates
//! a media type the converter catalog understands and streams frames into a
//! canonical RGBA bitmap on request.

pub mod backend;
pub mod enumerate;
pub mod error;
pub mod negotiate;
pub mod session;
pub mod types;
pub mod webcam;

pub use backend::synthetic::{SyntheticBackend, SyntheticDevice};
pub use backend::{CaptureBackend, CaptureDevice, CompletionHandler, ReadCompletion, SampleReader};
pub use enumerate::DeviceEnumerator;
pub use error::{CaptureError, CaptureResult};
pub use session::{CaptureSession, FrameCallback};
pub use types::*;
pub use webcam::{WebCam, WebCamBuilder, WebCamCallback};

#[cfg(feature = "native")]
pub use backend::native::NativeBackend;
