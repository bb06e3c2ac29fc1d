//! Public camera handle.
//!
//! [`WebCam`] is a cheap, clonable reference to one active capture session.
//! It selects a device on construction, forwards completions to the user's
//! callback and can switch devices or formats at runtime. The session slot
//! lock is only held long enough to clone the session out, so callbacks may
//! freely call back into the handle.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use camstream_convert::{RawFrameType, RgbaBitmap};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::backend::CaptureBackend;
use crate::enumerate::DeviceEnumerator;
use crate::error::{CaptureError, CaptureResult};
use crate::session::{CaptureSession, FrameCallback};
use crate::types::{DeviceDescriptor, DeviceSelector, FrameDescriptor, SessionOptions};

/// Frame callback of a [`WebCam`]: the handle that produced the delivery and
/// whether it carried a new frame.
pub type WebCamCallback = Arc<dyn Fn(&WebCam, bool) + Send + Sync>;

struct WebCamInner {
    enumerator: DeviceEnumerator,
    backend: Arc<dyn CaptureBackend>,
    session: Mutex<Option<Arc<CaptureSession>>>,
    options: Mutex<SessionOptions>,
    on_frame: Option<WebCamCallback>,
}

impl Drop for WebCamInner {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(session) = session {
            session.close();
        }
    }
}

/// Reference-counted camera handle. Dropping the last clone closes the
/// session.
#[derive(Clone)]
pub struct WebCam {
    inner: Arc<WebCamInner>,
}

/// Configures and opens a [`WebCam`].
pub struct WebCamBuilder {
    backend: Arc<dyn CaptureBackend>,
    selector: DeviceSelector,
    options: SessionOptions,
    on_frame: Option<WebCamCallback>,
}

impl WebCamBuilder {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            selector: DeviceSelector::default(),
            options: SessionOptions::default(),
            on_frame: None,
        }
    }

    pub fn device(mut self, selector: DeviceSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn preferred_format(mut self, raw_type: RawFrameType) -> Self {
        self.options.preferred_format = Some(raw_type).filter(|t| *t != RawFrameType::Unknown);
        self
    }

    pub fn verbose_frames(mut self, verbose: bool) -> Self {
        self.options.verbose_frames = verbose;
        self
    }

    pub fn on_frame(mut self, callback: impl Fn(&WebCam, bool) + Send + Sync + 'static) -> Self {
        self.on_frame = Some(Arc::new(callback));
        self
    }

    /// Enumerate, select the configured device and start streaming.
    pub fn build(self) -> CaptureResult<WebCam> {
        let cam = WebCam {
            inner: Arc::new(WebCamInner {
                enumerator: DeviceEnumerator::new(Arc::clone(&self.backend)),
                backend: self.backend,
                session: Mutex::new(None),
                options: Mutex::new(self.options),
                on_frame: self.on_frame,
            }),
        };
        cam.select(&self.selector)?;
        Ok(cam)
    }
}

impl WebCam {
    /// Open the first device with the default options.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        on_frame: impl Fn(&WebCam, bool) + Send + Sync + 'static,
    ) -> CaptureResult<Self> {
        Self::builder(backend).on_frame(on_frame).build()
    }

    pub fn builder(backend: Arc<dyn CaptureBackend>) -> WebCamBuilder {
        WebCamBuilder::new(backend)
    }

    fn session(&self) -> Option<Arc<CaptureSession>> {
        lock(&self.inner.session).clone()
    }

    /// Snapshot of the attached devices.
    pub fn enumerate_devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        self.inner.enumerator.enumerate()
    }

    /// Stable identifiers of the attached devices.
    pub fn devices(&self) -> CaptureResult<Vec<String>> {
        self.inner.enumerator.paths()
    }

    /// Switch to the device at `index` of a fresh enumeration.
    ///
    /// On failure the current session keeps streaming untouched. A read
    /// still armed on the previous device is armed again on the new one.
    pub fn set_device(&self, index: usize) -> CaptureResult<()> {
        self.select(&DeviceSelector::Index(index))
    }

    /// Switch to the device with the given stable identifier.
    pub fn set_device_by_path(&self, path: &str) -> CaptureResult<()> {
        self.select(&DeviceSelector::Path(path.to_string()))
    }

    fn select(&self, selector: &DeviceSelector) -> CaptureResult<()> {
        let device = self.inner.enumerator.select(selector)?;
        let options = lock(&self.inner.options).clone();

        if let Some(current) = self.session() {
            if current.device().path == device.path && !current.is_released() {
                info!("WEBCAM: Renegotiating {}", device.path);
                return current.renegotiate(options.preferred_format);
            }
        }

        let session = Arc::new(CaptureSession::open(
            self.inner.backend.as_ref(),
            &device,
            options,
            self.session_callback(),
        )?);
        let previous = lock(&self.inner.session).replace(Arc::clone(&session));
        info!("WEBCAM: Active device is {} ({})", device.name, device.path);
        if previous.is_some_and(|p| p.release()) {
            session.resume_read();
        }
        Ok(())
    }

    fn session_callback(&self) -> FrameCallback {
        let weak: Weak<WebCamInner> = Arc::downgrade(&self.inner);
        Arc::new(move |updated| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let cam = WebCam { inner };
            if let Some(on_frame) = cam.inner.on_frame.clone() {
                on_frame(&cam, updated);
            }
        })
    }

    /// Arm the next frame. Never blocks; the frame callback fires later.
    pub fn query_frame(&self) -> CaptureResult<()> {
        match self.session() {
            Some(session) => session.query_frame(),
            None => Ok(()),
        }
    }

    pub fn is_frame_updated(&self) -> bool {
        self.session().is_some_and(|s| s.is_frame_updated())
    }

    pub fn set_frame_updated(&self, updated: bool) {
        if let Some(session) = self.session() {
            session.set_frame_updated(updated);
        }
    }

    /// Borrow the canonical frame buffer for the duration of `f`.
    ///
    /// Returns `None` once the handle is closed.
    pub fn with_frame_buffer<R>(&self, f: impl FnOnce(&RgbaBitmap) -> R) -> Option<R> {
        self.session().map(|s| s.with_frame_buffer(f))
    }

    /// Run `f` against the frame buffer if it changed since the flag was
    /// last cleared, and clear the flag. Same locking rules as
    /// [`with_frame_buffer`](Self::with_frame_buffer).
    pub fn with_updated_frame<R>(&self, f: impl FnOnce(&RgbaBitmap) -> R) -> Option<R> {
        self.session().and_then(|s| s.with_updated_frame(f))
    }

    /// Copy of the frame buffer if it changed since the flag was last
    /// cleared. Clears the flag.
    pub fn take_updated_frame(&self) -> Option<RgbaBitmap> {
        self.session().and_then(|s| s.take_updated_frame())
    }

    pub fn snapshot_frame(&self) -> Option<RgbaBitmap> {
        self.session().map(|s| s.snapshot_frame())
    }

    pub fn frame_descriptor(&self) -> Option<FrameDescriptor> {
        self.session().and_then(|s| s.frame_descriptor())
    }

    pub fn current_raw_frame_type(&self) -> RawFrameType {
        self.session()
            .map(|s| s.current_raw_frame_type())
            .unwrap_or_default()
    }

    pub fn raw_frame_type_name(&self) -> &'static str {
        self.current_raw_frame_type().as_str()
    }

    pub fn set_raw_frame_type_rgb32(&self) -> bool {
        self.set_raw_frame_type(RawFrameType::Rgb32)
    }

    pub fn set_raw_frame_type_rgb24(&self) -> bool {
        self.set_raw_frame_type(RawFrameType::Rgb24)
    }

    pub fn set_raw_frame_type_yuy2(&self) -> bool {
        self.set_raw_frame_type(RawFrameType::Yuy2)
    }

    pub fn set_raw_frame_type_nv12(&self) -> bool {
        self.set_raw_frame_type(RawFrameType::Nv12)
    }

    /// Go back to the device's first supported format.
    pub fn set_native_raw_frame_type(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        match session.set_native_raw_frame_type() {
            Ok(()) => {
                lock(&self.inner.options).preferred_format = None;
                true
            }
            Err(e) => {
                warn!("WEBCAM: Cannot restore native format: {e}");
                false
            }
        }
    }

    /// Switch to the first media type decoding to `raw_type`. Returns
    /// `false` when the device does not offer it; the choice sticks across
    /// later `set_device` calls.
    pub fn set_raw_frame_type(&self, raw_type: RawFrameType) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        match session.set_raw_frame_type(raw_type) {
            Ok(()) => {
                lock(&self.inner.options).preferred_format = Some(raw_type);
                true
            }
            Err(e) => {
                warn!("WEBCAM: Cannot force {}: {e}", raw_type);
                false
            }
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.session().and_then(|s| s.last_error())
    }

    pub fn frame_count(&self) -> u64 {
        self.session().map_or(0, |s| s.frame_count())
    }

    /// When the last frame was converted.
    pub fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        self.session().and_then(|s| s.last_frame_at())
    }

    /// Stable identifier of the active device.
    pub fn device_path(&self) -> Option<String> {
        self.session().map(|s| s.device().path.clone())
    }

    pub fn device_name(&self) -> Option<String> {
        self.session().map(|s| s.device().name.clone())
    }

    /// Close the session now instead of when the last clone drops.
    pub fn close(&self) {
        let session = lock(&self.inner.session).take();
        if let Some(session) = session {
            session.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.session().is_none()
    }

    /// Fails with `Released` once closed.
    pub fn ensure_open(&self) -> CaptureResult<()> {
        match self.session() {
            Some(s) if !s.is_released() => Ok(()),
            _ => Err(CaptureError::Released),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::{SyntheticBackend, SyntheticDevice};
    use crate::types::MediaType;
    use camstream_convert::FourCc;
    use std::sync::mpsc;
    use std::time::Duration;

    fn backend() -> SyntheticBackend {
        SyntheticBackend::new(vec![
            SyntheticDevice::new(
                "usb#0",
                "Front",
                vec![
                    MediaType::new(FourCc::YUY2, 32, 16, 30),
                    MediaType::new(FourCc::XRGB32, 32, 16, 30),
                ],
            )
            .unpaced(),
            SyntheticDevice::new("usb#1", "Rear", vec![MediaType::new(FourCc::NV12, 16, 8, 30)])
                .unpaced(),
        ])
    }

    #[test]
    fn test_opens_first_device() {
        let cam = WebCam::new(Arc::new(backend()), |_, _| {}).unwrap();
        assert_eq!(cam.device_path().as_deref(), Some("usb#0"));
        assert_eq!(cam.raw_frame_type_name(), "YUY2");
        assert_eq!(cam.devices().unwrap(), vec!["usb#0", "usb#1"]);
    }

    #[test]
    fn test_switch_device_and_format() {
        let cam = WebCam::new(Arc::new(backend()), |_, _| {}).unwrap();

        assert!(cam.set_raw_frame_type_rgb32());
        assert_eq!(cam.current_raw_frame_type(), RawFrameType::Rgb32);
        assert!(!cam.set_raw_frame_type_nv12());
        assert_eq!(cam.current_raw_frame_type(), RawFrameType::Rgb32);

        cam.set_device(1).unwrap();
        assert_eq!(cam.device_name().as_deref(), Some("Rear"));
        // Rear has no RGB32, so the preference falls back to native order
        assert_eq!(cam.current_raw_frame_type(), RawFrameType::Nv12);
        assert_eq!(cam.with_frame_buffer(|b| b.width()), Some(16));

        assert!(cam.set_device(5).is_err());
        assert_eq!(cam.device_path().as_deref(), Some("usb#1"));
    }

    #[test]
    fn test_callback_can_requery() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let cam = WebCam::builder(Arc::new(backend()))
            .on_frame(move |cam, updated| {
                let count = cam.frame_count();
                let _ = tx.lock().unwrap().send((updated, count));
                if count < 3 {
                    cam.query_frame().unwrap();
                }
            })
            .build()
            .unwrap();

        cam.query_frame().unwrap();
        for expected in 1..=3 {
            let (updated, count) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(updated);
            assert_eq!(count, expected);
        }
        assert!(cam.take_updated_frame().is_some());
        assert!(!cam.is_frame_updated());
    }

    #[test]
    fn test_close_through_clone() {
        let cam = WebCam::new(Arc::new(backend()), |_, _| {}).unwrap();
        let other = cam.clone();
        other.close();
        assert!(cam.is_closed());
        assert!(matches!(cam.ensure_open(), Err(CaptureError::Released)));
        cam.query_frame().unwrap();
        assert!(cam.with_frame_buffer(|_| ()).is_none());
    }

    #[test]
    fn test_no_devices() {
        let result = WebCam::new(Arc::new(SyntheticBackend::new(Vec::new())), |_, _| {});
        assert!(matches!(result, Err(CaptureError::SetDeviceFailed(_))));
    }
}
