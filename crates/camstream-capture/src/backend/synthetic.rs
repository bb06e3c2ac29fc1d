//! Test-pattern capture backend.
//!
//! Devices are described up front; each open device runs a worker thread
//! that answers read requests with moving color bars encoded in the
//! negotiated media type. Devices can be detached at runtime to simulate a
//! camera being unplugged mid-stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camstream_convert::format::lookup;
use camstream_convert::pattern::{color_bars, encode_rgb};
use camstream_convert::FourCc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{CaptureBackend, CaptureDevice, CompletionHandler, ReadCompletion, SampleReader};
use crate::error::{CaptureError, CaptureResult};
use crate::types::{DeviceDescriptor, DeviceHandle, MediaType};

/// Default synthetic resolution.
pub const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
pub const DEFAULT_SYNTHETIC_HEIGHT: u32 = 480;
pub const DEFAULT_SYNTHETIC_FPS: u32 = 30;

/// Description of one synthetic camera.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    pub path: String,
    pub name: String,
    pub media_types: Vec<MediaType>,
    /// Sleep between frames according to the media type's frame rate.
    pub paced: bool,
    attached: Arc<AtomicBool>,
}

impl SyntheticDevice {
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        media_types: Vec<MediaType>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            media_types,
            paced: true,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A webcam-like device: MJPEG first (unsupported), then YUY2, NV12
    /// and the two RGB layouts.
    pub fn webcam(path: impl Into<String>, name: impl Into<String>) -> Self {
        let (w, h, fps) = (
            DEFAULT_SYNTHETIC_WIDTH,
            DEFAULT_SYNTHETIC_HEIGHT,
            DEFAULT_SYNTHETIC_FPS,
        );
        Self::new(
            path,
            name,
            vec![
                MediaType::new(FourCc::MJPG, w, h, fps),
                MediaType::new(FourCc::YUY2, w, h, fps),
                MediaType::new(FourCc::NV12, w, h, fps),
                MediaType::new(FourCc::BGR24, w, h, fps),
                MediaType::new(FourCc::XRGB32, w, h, fps).with_stride(-(w as i32 * 4)),
            ],
        )
    }

    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

/// Backend serving [`SyntheticDevice`]s.
#[derive(Clone)]
pub struct SyntheticBackend {
    devices: Arc<Mutex<Vec<SyntheticDevice>>>,
    available: bool,
}

impl SyntheticBackend {
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
            available: true,
        }
    }

    /// One webcam-like device.
    pub fn single() -> Self {
        Self::new(vec![SyntheticDevice::webcam(
            "synthetic://camera/0",
            "Synthetic Camera",
        )])
    }

    /// A backend whose capture service cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            devices: Arc::new(Mutex::new(Vec::new())),
            available: false,
        }
    }

    /// Simulate unplugging a device. Open streams start failing their reads
    /// and the device disappears from later enumerations.
    pub fn detach(&self, path: &str) -> bool {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        match devices.iter().position(|d| d.path == path) {
            Some(i) => {
                let dev = devices.remove(i);
                dev.attached.store(false, Ordering::Release);
                info!("SYNTHETIC: Detached {}", dev.path);
                true
            }
            None => false,
        }
    }

    pub fn attach(&self, device: SyntheticDevice) {
        device.attached.store(true, Ordering::Release);
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.push(device);
    }
}

impl CaptureBackend for SyntheticBackend {
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        if !self.available {
            return Err(CaptureError::Enumeration(
                "synthetic capture service unavailable".into(),
            ));
        }
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        Ok(devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceDescriptor::new(&d.path, &d.name, DeviceHandle::Index(i as u32)))
            .collect())
    }

    fn open(&self, device: &DeviceDescriptor) -> CaptureResult<Box<dyn CaptureDevice>> {
        let profile = {
            let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
            devices
                .iter()
                .find(|d| d.path == device.path)
                .cloned()
                .ok_or_else(|| CaptureError::Backend(format!("device `{}` is gone", device.path)))?
        };
        Ok(Box::new(SyntheticCaptureDevice::spawn(profile)?))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

enum WorkerCommand {
    Start {
        stream: u64,
        media_type: MediaType,
        handler: CompletionHandler,
    },
    Read {
        stream: u64,
    },
    Stop {
        stream: u64,
    },
}

struct SyntheticCaptureDevice {
    profile: SyntheticDevice,
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    next_stream: AtomicU64,
}

impl SyntheticCaptureDevice {
    fn spawn(profile: SyntheticDevice) -> CaptureResult<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let worker_profile = profile.clone();
        thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || worker_loop(worker_profile, cmd_rx))
            .map_err(|e| CaptureError::Backend(format!("Failed to spawn capture thread: {e}")))?;

        info!("SYNTHETIC: Opened {} ({})", profile.name, profile.path);
        Ok(Self {
            profile,
            cmd_tx,
            next_stream: AtomicU64::new(1),
        })
    }
}

impl CaptureDevice for SyntheticCaptureDevice {
    fn media_types(&mut self) -> CaptureResult<Vec<MediaType>> {
        Ok(self.profile.media_types.clone())
    }

    fn start(
        &mut self,
        media_type: &MediaType,
        handler: CompletionHandler,
    ) -> CaptureResult<Arc<dyn SampleReader>> {
        if !self.profile.attached.load(Ordering::Acquire) {
            return Err(CaptureError::Backend(format!("`{}` is disconnected", self.profile.path)));
        }
        if !self.profile.media_types.contains(media_type) {
            return Err(CaptureError::Backend(format!("media type {media_type} not offered")));
        }
        let stream = self.next_stream.fetch_add(1, Ordering::Relaxed);
        self.cmd_tx
            .send(WorkerCommand::Start {
                stream,
                media_type: media_type.clone(),
                handler,
            })
            .map_err(|_| CaptureError::Backend("capture thread exited".into()))?;
        debug!("SYNTHETIC: Stream {} started with {}", stream, media_type);

        Ok(Arc::new(SyntheticReader {
            stream,
            cmd_tx: self.cmd_tx.clone(),
            stopped: AtomicBool::new(false),
        }))
    }
}

struct SyntheticReader {
    stream: u64,
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    stopped: AtomicBool,
}

impl SampleReader for SyntheticReader {
    fn request_read(&self) -> CaptureResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CaptureError::Backend("stream stopped".into()));
        }
        self.cmd_tx
            .send(WorkerCommand::Read {
                stream: self.stream,
            })
            .map_err(|_| CaptureError::Backend("capture thread exited".into()))
    }

    fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.cmd_tx.send(WorkerCommand::Stop {
                stream: self.stream,
            });
        }
    }
}

struct ActiveStream {
    id: u64,
    media_type: MediaType,
    handler: CompletionHandler,
}

/// Runs until every sender (device and readers) is dropped.
fn worker_loop(profile: SyntheticDevice, mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    let mut active: Option<ActiveStream> = None;
    let mut phase = 0u32;
    let mut last_frame = Instant::now();

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            WorkerCommand::Start {
                stream,
                media_type,
                handler,
            } => {
                active = Some(ActiveStream {
                    id: stream,
                    media_type,
                    handler,
                });
            }
            WorkerCommand::Stop { stream } => {
                if active.as_ref().is_some_and(|a| a.id == stream) {
                    active = None;
                    debug!("SYNTHETIC: Stream {} stopped", stream);
                }
            }
            WorkerCommand::Read { stream } => {
                let Some(current) = active.as_ref().filter(|a| a.id == stream) else {
                    continue;
                };

                if !profile.attached.load(Ordering::Acquire) {
                    (current.handler)(ReadCompletion::Failed(format!(
                        "device `{}` disconnected",
                        profile.path
                    )));
                    continue;
                }

                if profile.paced && current.media_type.frame_rate > 0 {
                    let interval = Duration::from_secs(1) / current.media_type.frame_rate;
                    let elapsed = last_frame.elapsed();
                    if elapsed < interval {
                        thread::sleep(interval - elapsed);
                    }
                }
                last_frame = Instant::now();

                match render_frame(&current.media_type, phase) {
                    Ok(data) => (current.handler)(ReadCompletion::Sample { data: &data }),
                    Err(e) => {
                        warn!("SYNTHETIC: Cannot render {}: {e}", current.media_type);
                        (current.handler)(ReadCompletion::Failed(e.to_string()));
                    }
                }
                phase = phase.wrapping_add(4);
            }
        }
    }

    debug!("SYNTHETIC: Worker for {} exited", profile.path);
}

/// Color bars in the media type's layout, honoring its stride (a negative
/// stride produces bottom-up rows).
fn render_frame(media_type: &MediaType, phase: u32) -> CaptureResult<Vec<u8>> {
    let entry = lookup(media_type.fourcc).ok_or_else(|| {
        CaptureError::UnsupportedFormat(format!("no encoder for {}", media_type.fourcc))
    })?;
    let (w, h) = (media_type.width, media_type.height);
    // A zero stride counts as undeclared, as in negotiation.
    let stride = media_type
        .stride
        .filter(|s| *s != 0)
        .unwrap_or(entry.layout.min_pitch(w) as i32);
    let pitch = stride.unsigned_abs() as usize;

    let rgb = color_bars(w, h, phase);
    let data = encode_rgb(entry.layout, &rgb, w, h, pitch)
        .map_err(|e| CaptureError::Backend(e.to_string()))?;

    if stride >= 0 {
        return Ok(data);
    }
    let mut flipped = Vec::with_capacity(data.len());
    for row in data.chunks_exact(pitch).rev() {
        flipped.extend_from_slice(row);
    }
    Ok(flipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_enumerate_and_detach() {
        let backend = SyntheticBackend::new(vec![
            SyntheticDevice::webcam("cam/0", "A"),
            SyntheticDevice::webcam("cam/1", "B"),
        ]);
        let devices = backend.enumerate().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].path, "cam/1");

        assert!(backend.detach("cam/0"));
        assert!(!backend.detach("cam/0"));
        let devices = backend.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "B");
    }

    #[test]
    fn test_unavailable_backend() {
        assert!(matches!(
            SyntheticBackend::unavailable().enumerate(),
            Err(CaptureError::Enumeration(_))
        ));
    }

    #[test]
    fn test_read_delivers_one_completion() {
        let media = MediaType::new(FourCc::NV12, 16, 8, 30);
        let backend = SyntheticBackend::new(vec![SyntheticDevice::new(
            "cam/0",
            "A",
            vec![media.clone()],
        )
        .unpaced()]);
        let desc = backend.enumerate().unwrap().remove(0);
        let mut device = backend.open(&desc).unwrap();

        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: CompletionHandler = Arc::new(move |c: ReadCompletion<'_>| {
            let len = match c {
                ReadCompletion::Sample { data } => data.len(),
                _ => 0,
            };
            let _ = tx.lock().unwrap().send(len);
        });
        let reader = device.start(&media, handler).unwrap();
        reader.request_read().unwrap();

        let len = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(len, 16 * 8 * 3 / 2);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        reader.shutdown();
        assert!(reader.request_read().is_err());
    }

    #[test]
    fn test_bottom_up_render() {
        let media = MediaType::new(FourCc::XRGB32, 16, 2, 30).with_stride(-64);
        let data = render_frame(&media, 0).unwrap();
        let top_down = render_frame(&MediaType::new(FourCc::XRGB32, 16, 2, 30), 0).unwrap();
        assert_eq!(&data[0..64], &top_down[64..128]);
    }

    #[test]
    fn test_zero_stride_renders_tight_rows() {
        let media = MediaType::new(FourCc::YUY2, 16, 4, 30).with_stride(0);
        let data = render_frame(&media, 0).unwrap();
        assert_eq!(data.len(), 32 * 4);
        assert_eq!(data, render_frame(&MediaType::new(FourCc::YUY2, 16, 4, 30), 0).unwrap());

        let n = crate::negotiate::resolve(&media).unwrap();
        assert_eq!(n.descriptor.pitch, 32);
        let mut bitmap = camstream_convert::RgbaBitmap::new(16, 4);
        (n.entry.converter)(&mut bitmap, &data, n.descriptor.pitch, 16, 4).unwrap();
    }
}
