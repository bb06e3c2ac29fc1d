//! Capture session: one open device, its negotiated stream, and the
//! canonical frame buffer.
//!
//! Reads are pull-based. [`CaptureSession::query_frame`] arms exactly one
//! read; the backend later invokes the completion handler on its own thread,
//! which converts the sample into the frame buffer under the session lock,
//! raises the update flag and then calls the user's frame callback outside
//! the lock. Nothing re-arms automatically.
//!
//! The completion handler holds a strong reference to the shared session
//! state. [`CaptureSession::close`] breaks that cycle by taking the reader
//! and device out of the session, and marks it `Released` first so late
//! completions return without touching the buffer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use camstream_convert::{RawFrameType, RgbaBitmap};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::backend::{
    CaptureBackend, CaptureDevice, CompletionHandler, ReadCompletion, SampleReader,
};
use crate::error::{CaptureError, CaptureResult};
use crate::negotiate::{find_exact, negotiate, Negotiated};
use crate::types::{DeviceDescriptor, FrameDescriptor, MediaType, SessionOptions, SessionState};

/// User callback invoked after every completed read, with `true` when the
/// read produced a new frame.
///
/// A `false` delivery means the device had nothing (or failed); callers that
/// want to keep streaming should re-arm with `query_frame`, ideally with a
/// retry budget so a failing device does not busy-loop.
pub type FrameCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Number of frames logged at info level after each (re)negotiation.
const LOGGED_FRAMES: u64 = 3;

struct SessionInner {
    state: SessionState,
    device: Option<Box<dyn CaptureDevice>>,
    reader: Option<Arc<dyn SampleReader>>,
    media_types: Vec<MediaType>,
    active: Option<Negotiated>,
    /// Bumped on every stream start; completions of older streams are dropped.
    epoch: u64,
    /// Reads armed so far; lets a finished completion tell whether the
    /// callback armed another one.
    armed: u64,
    bitmap: RgbaBitmap,
    updated: bool,
    frames: u64,
    stream_frames: u64,
    last_error: Option<String>,
    last_frame_at: Option<DateTime<Utc>>,
}

struct SessionShared {
    released: AtomicBool,
    inner: Mutex<SessionInner>,
    on_frame: FrameCallback,
    options: SessionOptions,
    device: DeviceDescriptor,
}

/// An open capture device with a negotiated stream.
pub struct CaptureSession {
    shared: Arc<SessionShared>,
}

impl CaptureSession {
    /// Open `device`, negotiate a media type and start its stream.
    ///
    /// # Arguments
    /// * `backend` - Platform used to open the device
    /// * `device` - Entry from an enumeration snapshot
    /// * `options` - Preferred format and logging settings
    /// * `on_frame` - Called after every completed read
    pub fn open(
        backend: &dyn CaptureBackend,
        device: &DeviceDescriptor,
        options: SessionOptions,
        on_frame: FrameCallback,
    ) -> CaptureResult<Self> {
        info!("SESSION: Opening {} ({}) via {}", device.name, device.path, backend.name());

        let mut opened = backend.open(device).map_err(|e| {
            CaptureError::SetDeviceFailed(format!("cannot open `{}`: {e}", device.path))
        })?;
        let media_types = opened.media_types().map_err(|e| {
            CaptureError::SetDeviceFailed(format!(
                "cannot list media types of `{}`: {e}",
                device.path
            ))
        })?;
        for (i, mt) in media_types.iter().enumerate() {
            debug!("SESSION: Media type {}: {}", i, mt);
        }
        let negotiated = negotiate(&media_types, options.preferred_format)?;

        let session = Self {
            shared: Arc::new(SessionShared {
                released: AtomicBool::new(false),
                inner: Mutex::new(SessionInner {
                    state: SessionState::Idle,
                    device: Some(opened),
                    reader: None,
                    media_types,
                    active: None,
                    epoch: 0,
                    armed: 0,
                    bitmap: RgbaBitmap::default(),
                    updated: false,
                    frames: 0,
                    stream_frames: 0,
                    last_error: None,
                    last_frame_at: None,
                }),
                on_frame,
                options,
                device: device.clone(),
            }),
        };

        session.commit(negotiated).map_err(|e| match e {
            CaptureError::Backend(msg) => CaptureError::SetDeviceFailed(msg),
            other => other,
        })?;
        Ok(session)
    }

    /// The device this session was opened on.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.shared.device
    }

    /// Arm one read. No-op when released or when a read is already armed.
    pub fn query_frame(&self) -> CaptureResult<()> {
        if self.shared.released.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut inner = self.shared.lock();
        match inner.state {
            SessionState::Released => return Ok(()),
            SessionState::ReadRequested => {
                debug!("SESSION: Read already armed");
                return Ok(());
            }
            SessionState::Idle | SessionState::Converting => {}
        }

        let Some(reader) = inner.reader.clone() else {
            return Ok(());
        };
        inner.state = SessionState::ReadRequested;
        inner.armed += 1;
        if let Err(e) = reader.request_read() {
            warn!("SESSION: Failed to arm read: {e}");
            inner.state = SessionState::Idle;
            inner.last_error = Some(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    pub fn is_frame_updated(&self) -> bool {
        self.shared.lock().updated
    }

    pub fn set_frame_updated(&self, updated: bool) {
        self.shared.lock().updated = updated;
    }

    /// Run `f` against the frame buffer while holding the session lock.
    ///
    /// Completions block until `f` returns, so keep it short (a texture
    /// upload or a copy).
    pub fn with_frame_buffer<R>(&self, f: impl FnOnce(&RgbaBitmap) -> R) -> R {
        let inner = self.shared.lock();
        f(&inner.bitmap)
    }

    /// Run `f` against the frame buffer only if a new frame arrived,
    /// clearing the flag in the same critical section so no frame is lost
    /// between reading it and clearing the flag.
    pub fn with_updated_frame<R>(&self, f: impl FnOnce(&RgbaBitmap) -> R) -> Option<R> {
        let mut inner = self.shared.lock();
        if !inner.updated {
            return None;
        }
        inner.updated = false;
        Some(f(&inner.bitmap))
    }

    /// Copy of the frame buffer if a new frame arrived, clearing the flag.
    pub fn take_updated_frame(&self) -> Option<RgbaBitmap> {
        self.with_updated_frame(RgbaBitmap::clone)
    }

    /// Copy of the frame buffer regardless of the update flag.
    pub fn snapshot_frame(&self) -> RgbaBitmap {
        self.shared.lock().bitmap.clone()
    }

    pub fn frame_descriptor(&self) -> Option<FrameDescriptor> {
        self.shared.lock().active.as_ref().map(|a| a.descriptor)
    }

    /// Active media type, as offered by the device.
    pub fn media_type(&self) -> Option<MediaType> {
        self.shared.lock().active.as_ref().map(|a| a.media_type.clone())
    }

    pub fn current_raw_frame_type(&self) -> RawFrameType {
        self.shared
            .lock()
            .active
            .as_ref()
            .map(|a| a.descriptor.raw_type)
            .unwrap_or_default()
    }

    /// Media types the device offered when it was opened.
    pub fn media_types(&self) -> Vec<MediaType> {
        self.shared.lock().media_types.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Message of the last failed completion, conversion or read request.
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Frames converted since the session was opened.
    pub fn frame_count(&self) -> u64 {
        self.shared.lock().frames
    }

    pub fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_frame_at
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Switch to the first media type decoding to `raw_type`.
    ///
    /// Fails with `UnsupportedFormat` when the device does not offer it; the
    /// current stream keeps running in that case.
    pub fn set_raw_frame_type(&self, raw_type: RawFrameType) -> CaptureResult<()> {
        let negotiated = {
            let inner = self.shared.lock();
            find_exact(&inner.media_types, raw_type)?
        };
        self.commit(negotiated)
    }

    /// Re-run negotiation with an optional preference, falling back to the
    /// device's native order.
    pub fn renegotiate(&self, preferred: Option<RawFrameType>) -> CaptureResult<()> {
        let negotiated = {
            let inner = self.shared.lock();
            negotiate(&inner.media_types, preferred)?
        };
        self.commit(negotiated)
    }

    /// Switch to the device's first supported media type.
    pub fn set_native_raw_frame_type(&self) -> CaptureResult<()> {
        self.renegotiate(None)
    }

    /// Start a stream on `negotiated`, replacing the current one.
    ///
    /// Buffer, descriptor and reader change together under the lock; on
    /// failure nothing changes. A read armed on the old stream is armed
    /// again on the new one, since its completion will be dropped.
    fn commit(&self, negotiated: Negotiated) -> CaptureResult<()> {
        let (old_reader, was_armed) = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Released {
                return Err(CaptureError::Released);
            }
            let epoch = inner.epoch + 1;
            let handler = completion_handler(&self.shared, epoch);
            let device = inner.device.as_mut().ok_or(CaptureError::Released)?;
            let reader = device.start(&negotiated.media_type, handler)?;

            let d = negotiated.descriptor;
            let was_armed = inner.state == SessionState::ReadRequested;
            inner.epoch = epoch;
            if inner.bitmap.reallocate(d.width, d.height) {
                debug!("SESSION: Frame buffer now {}x{}", d.width, d.height);
            }
            inner.updated = false;
            inner.stream_frames = 0;
            inner.state = SessionState::Idle;
            info!(
                "SESSION: Streaming {} as {} (pitch {})",
                negotiated.media_type, d.raw_type, d.pitch
            );
            inner.active = Some(negotiated);
            (inner.reader.replace(reader), was_armed)
        };

        if let Some(old) = old_reader {
            old.shutdown();
        }
        if was_armed {
            self.resume_read();
        }
        Ok(())
    }

    /// Arm a read carried over from a replaced stream or session.
    ///
    /// The caller is waiting for a callback, so a failure to arm is
    /// delivered as a "no update" instead of being returned.
    pub(crate) fn resume_read(&self) {
        debug!("SESSION: Carrying armed read over to the new stream");
        if self.query_frame().is_err() && !self.is_released() {
            self.shared.notify(false);
        }
    }

    /// Release the device. Idempotent and safe while a completion is
    /// running on the backend thread.
    pub fn close(&self) {
        self.release();
    }

    /// Like [`close`](Self::close), reporting whether a read was still
    /// outstanding, so a replacement session can take it over.
    pub(crate) fn release(&self) -> bool {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let (reader, device, pending) = {
            let mut inner = self.shared.lock();
            let pending = matches!(
                inner.state,
                SessionState::ReadRequested | SessionState::Converting
            );
            inner.state = SessionState::Released;
            (inner.reader.take(), inner.device.take(), pending)
        };
        if let Some(reader) = reader {
            reader.shutdown();
        }
        drop(device);
        info!("SESSION: Closed {}", self.shared.device.path);
        pending
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn completion_handler(shared: &Arc<SessionShared>, epoch: u64) -> CompletionHandler {
    let shared = Arc::clone(shared);
    Arc::new(move |completion: ReadCompletion<'_>| {
        shared.on_read_complete(epoch, completion)
    })
}

impl SessionShared {
    /// Lock for consumer-side operations. A panic while holding the lock
    /// cannot leave the buffer shorter than its descriptor, so recover.
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, updated: bool) {
        if panic::catch_unwind(AssertUnwindSafe(|| (self.on_frame)(updated))).is_err() {
            error!("SESSION: Frame callback panicked");
        }
    }

    fn on_read_complete(&self, epoch: u64, completion: ReadCompletion<'_>) {
        if self.released.load(Ordering::Acquire) {
            return;
        }

        let (updated, armed) = {
            let Ok(mut guard) = self.inner.lock() else {
                warn!("SESSION: Lock poisoned, dropping completion");
                return;
            };
            let inner = &mut *guard;
            if inner.state == SessionState::Released {
                return;
            }
            if inner.epoch != epoch {
                debug!("SESSION: Dropping completion of superseded stream {}", epoch);
                return;
            }
            inner.state = SessionState::Converting;

            let updated = match completion {
                ReadCompletion::Sample { data } => match inner.active.as_ref() {
                    Some(active) => {
                        let d = active.descriptor;
                        let converted = (active.entry.converter)(
                            &mut inner.bitmap,
                            data,
                            d.pitch,
                            d.width,
                            d.height,
                        );
                        match converted {
                            Ok(()) => {
                                inner.updated = true;
                                inner.frames += 1;
                                inner.stream_frames += 1;
                                inner.last_frame_at = Some(Utc::now());
                                if inner.stream_frames <= LOGGED_FRAMES {
                                    info!(
                                        "SESSION: Converted frame {} ({}x{} {})",
                                        inner.stream_frames, d.width, d.height, d.raw_type
                                    );
                                } else if self.options.verbose_frames {
                                    debug!("SESSION: Converted frame {}", inner.frames);
                                }
                                true
                            }
                            Err(e) => {
                                warn!("SESSION: Failed to convert frame: {e}");
                                inner.last_error = Some(e.to_string());
                                false
                            }
                        }
                    }
                    None => false,
                },
                ReadCompletion::NoSample => {
                    debug!("SESSION: Read completed without a sample");
                    false
                }
                ReadCompletion::Failed(msg) => {
                    warn!("SESSION: Read failed: {msg}");
                    inner.last_error = Some(msg);
                    false
                }
            };
            (updated, inner.armed)
        };

        if self.released.load(Ordering::Acquire) {
            return;
        }
        self.notify(updated);

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.epoch == epoch
            && inner.armed == armed
            && inner.state == SessionState::Converting
        {
            inner.state = SessionState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::{SyntheticBackend, SyntheticDevice};
    use camstream_convert::FourCc;
    use std::sync::mpsc;
    use std::time::Duration;

    fn backend() -> SyntheticBackend {
        SyntheticBackend::new(vec![SyntheticDevice::new(
            "cam/0",
            "Test",
            vec![
                MediaType::new(FourCc::MJPG, 32, 16, 30),
                MediaType::new(FourCc::YUY2, 32, 16, 30),
                MediaType::new(FourCc::BGR24, 8, 4, 30),
            ],
        )
        .unpaced()])
    }

    fn open(backend: &SyntheticBackend, on_frame: FrameCallback) -> CaptureSession {
        let device = backend.enumerate().unwrap().remove(0);
        CaptureSession::open(backend, &device, SessionOptions::default(), on_frame).unwrap()
    }

    fn notifier() -> (FrameCallback, mpsc::Receiver<bool>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let cb: FrameCallback = Arc::new(move |updated| {
            let _ = tx.lock().unwrap().send(updated);
        });
        (cb, rx)
    }

    #[test]
    fn test_open_negotiates_first_supported() {
        let backend = backend();
        let (cb, _rx) = notifier();
        let session = open(&backend, cb);
        assert_eq!(session.current_raw_frame_type(), RawFrameType::Yuy2);
        assert_eq!(session.state(), SessionState::Idle);
        session.with_frame_buffer(|b| assert_eq!((b.width(), b.height()), (32, 16)));
    }

    #[test]
    fn test_query_converts_one_frame() {
        let backend = backend();
        let (cb, rx) = notifier();
        let session = open(&backend, cb);

        assert!(!session.is_frame_updated());
        session.query_frame().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(session.is_frame_updated());
        assert_eq!(session.frame_count(), 1);
        assert!(session.last_frame_at().is_some());

        // no auto re-arm
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        session.set_frame_updated(false);
        assert!(session.take_updated_frame().is_none());
    }

    #[test]
    fn test_with_updated_frame_clears_flag() {
        let backend = backend();
        let (cb, rx) = notifier();
        let session = open(&backend, cb);

        assert_eq!(session.with_updated_frame(|b| b.width()), None);
        session.query_frame().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        assert_eq!(session.with_updated_frame(|b| (b.width(), b.height())), Some((32, 16)));
        assert!(!session.is_frame_updated());
        assert_eq!(session.with_updated_frame(|b| b.width()), None);
    }

    #[test]
    fn test_format_override() {
        let backend = backend();
        let (cb, _rx) = notifier();
        let session = open(&backend, cb);

        assert!(session.set_raw_frame_type(RawFrameType::Nv12).is_err());
        assert_eq!(session.current_raw_frame_type(), RawFrameType::Yuy2);

        session.set_raw_frame_type(RawFrameType::Rgb24).unwrap();
        let d = session.frame_descriptor().unwrap();
        assert_eq!((d.width, d.height, d.pitch), (8, 4, 24));
        session.with_frame_buffer(|b| assert_eq!(b.width(), 8));

        session.set_native_raw_frame_type().unwrap();
        assert_eq!(session.current_raw_frame_type(), RawFrameType::Yuy2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = backend();
        let (cb, rx) = notifier();
        let session = open(&backend, cb);
        session.close();
        session.close();
        assert!(session.is_released());
        assert_eq!(session.state(), SessionState::Released);
        session.query_frame().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(matches!(
            session.set_native_raw_frame_type(),
            Err(CaptureError::Released)
        ));
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let backend = backend();
        let session = open(&backend, Arc::new(|_| panic!("boom")));
        session.query_frame().unwrap();
        for _ in 0..100 {
            if session.state() == SessionState::Idle && session.frame_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.frame_count(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_unsupported_device_fails() {
        let backend = SyntheticBackend::new(vec![SyntheticDevice::new(
            "cam/0",
            "Mjpeg only",
            vec![MediaType::new(FourCc::MJPG, 32, 16, 30)],
        )]);
        let device = backend.enumerate().unwrap().remove(0);
        let result =
            CaptureSession::open(&backend, &device, SessionOptions::default(), Arc::new(|_| {}));
        assert!(matches!(result, Err(CaptureError::SetDeviceFailed(_))));
    }
}
