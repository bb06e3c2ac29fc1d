//! Camera backend using nokhwa.
//!
//! `nokhwa::Camera` is not `Send`, so each open device owns a camera thread
//! that holds it and services commands. Captured buffers are handed to a
//! second dispatcher thread that runs the completion handler, so a slow
//! consumer never stalls the camera and a handler that re-arms or
//! renegotiates never waits on the thread it is running on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;

use camstream_convert::FourCc;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CaptureBackend, CaptureDevice, CompletionHandler, ReadCompletion, SampleReader};
use crate::error::{CaptureError, CaptureResult};
use crate::types::{DeviceDescriptor, DeviceHandle, MediaType};

const GREY: FourCc = FourCc::new(*b"GREY");

/// Backend over the platform camera API picked by nokhwa.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for NativeBackend {
    fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        let cameras = nokhwa::query(nokhwa::utils::ApiBackend::Auto)
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?;

        let devices: Vec<DeviceDescriptor> = cameras
            .iter()
            .map(|info| {
                let handle = match info.index() {
                    CameraIndex::Index(i) => DeviceHandle::Index(*i),
                    CameraIndex::String(s) => DeviceHandle::Name(s.clone()),
                };
                let misc = info.misc();
                let path = if misc.is_empty() {
                    info.index().to_string()
                } else {
                    misc
                };
                DeviceDescriptor::new(path, info.human_name(), handle)
            })
            .collect();

        for (idx, dev) in devices.iter().enumerate() {
            info!("CAMERA: Device {}: {} ({})", idx, dev.name, dev.path);
        }
        Ok(devices)
    }

    fn open(&self, device: &DeviceDescriptor) -> CaptureResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(NativeDevice::spawn(device)?))
    }

    fn name(&self) -> &str {
        "native"
    }
}

fn to_media_type(format: &CameraFormat) -> MediaType {
    let fourcc = match format.format() {
        FrameFormat::YUYV => FourCc::YUYV,
        FrameFormat::NV12 => FourCc::NV12,
        FrameFormat::RAWRGB => FourCc::RGB24,
        FrameFormat::MJPEG => FourCc::MJPG,
        FrameFormat::GRAY => GREY,
        #[allow(unreachable_patterns)]
        _ => FourCc::new(*b"????"),
    };
    MediaType::new(fourcc, format.width(), format.height(), format.frame_rate())
}

fn camera_index(handle: &DeviceHandle) -> CameraIndex {
    match handle {
        DeviceHandle::Index(i) => CameraIndex::Index(*i),
        DeviceHandle::Name(s) => CameraIndex::String(s.clone()),
    }
}

enum CameraCommand {
    Start {
        stream: u64,
        media_type: MediaType,
        handler: CompletionHandler,
        reply: std_mpsc::SyncSender<CaptureResult<()>>,
    },
    Read {
        stream: u64,
    },
    Stop {
        stream: u64,
    },
    Shutdown,
}

enum Delivery {
    Sample(Vec<u8>),
    NoSample,
    Failed(String),
}

struct Dispatch {
    handler: CompletionHandler,
    delivery: Delivery,
}

struct NativeDevice {
    path: String,
    media_types: Vec<MediaType>,
    cmd_tx: mpsc::UnboundedSender<CameraCommand>,
    next_stream: AtomicU64,
}

impl NativeDevice {
    fn spawn(device: &DeviceDescriptor) -> CaptureResult<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<Dispatch>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        thread::Builder::new()
            .name("camera-dispatch".into())
            .spawn(move || dispatch_loop(dispatch_rx))
            .map_err(|e| CaptureError::Backend(format!("Failed to spawn dispatch thread: {e}")))?;

        let index = camera_index(&device.handle);
        thread::Builder::new()
            .name("video-capture".into())
            .spawn(move || camera_loop(index, cmd_rx, dispatch_tx, ready_tx))
            .map_err(|e| CaptureError::Backend(format!("Failed to spawn capture thread: {e}")))?;

        let media_types = ready_rx
            .recv()
            .map_err(|_| CaptureError::Backend("capture thread exited".into()))??;

        info!("CAMERA: Opened {} with {} formats", device.path, media_types.len());
        Ok(Self {
            path: device.path.clone(),
            media_types,
            cmd_tx,
            next_stream: AtomicU64::new(1),
        })
    }
}

impl CaptureDevice for NativeDevice {
    fn media_types(&mut self) -> CaptureResult<Vec<MediaType>> {
        Ok(self.media_types.clone())
    }

    fn start(
        &mut self,
        media_type: &MediaType,
        handler: CompletionHandler,
    ) -> CaptureResult<Arc<dyn SampleReader>> {
        let stream = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let (reply, reply_rx) = std_mpsc::sync_channel(1);
        self.cmd_tx
            .send(CameraCommand::Start {
                stream,
                media_type: media_type.clone(),
                handler,
                reply,
            })
            .map_err(|_| CaptureError::Backend("capture thread exited".into()))?;
        reply_rx
            .recv()
            .map_err(|_| CaptureError::Backend("capture thread exited".into()))??;

        Ok(Arc::new(NativeReader {
            stream,
            cmd_tx: self.cmd_tx.clone(),
            stopped: AtomicBool::new(false),
        }))
    }
}

impl Drop for NativeDevice {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(CameraCommand::Shutdown);
        info!("CAMERA: Released {}", self.path);
    }
}

struct NativeReader {
    stream: u64,
    cmd_tx: mpsc::UnboundedSender<CameraCommand>,
    stopped: AtomicBool,
}

impl SampleReader for NativeReader {
    fn request_read(&self) -> CaptureResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CaptureError::Backend("stream stopped".into()));
        }
        self.cmd_tx
            .send(CameraCommand::Read {
                stream: self.stream,
            })
            .map_err(|_| CaptureError::Backend("capture thread exited".into()))
    }

    fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.cmd_tx.send(CameraCommand::Stop {
                stream: self.stream,
            });
        }
    }
}

struct Stream {
    id: u64,
    handler: CompletionHandler,
}

fn open_camera(index: &CameraIndex, requested: RequestedFormatType) -> CaptureResult<Camera> {
    Camera::new(index.clone(), RequestedFormat::new::<RgbFormat>(requested))
        .map_err(|e| CaptureError::Backend(format!("Failed to open camera: {e}")))
}

fn open_stream(index: &CameraIndex, format: CameraFormat) -> CaptureResult<Camera> {
    let mut camera = open_camera(index, RequestedFormatType::Exact(format))?;
    camera
        .open_stream()
        .map_err(|e| CaptureError::Backend(format!("Failed to open camera stream: {e}")))?;
    Ok(camera)
}

fn camera_loop(
    index: CameraIndex,
    mut cmd_rx: mpsc::UnboundedReceiver<CameraCommand>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    ready_tx: std_mpsc::SyncSender<CaptureResult<Vec<MediaType>>>,
) {
    info!("CAMERA: Opening camera {}", index);
    let mut camera = match open_camera(&index, RequestedFormatType::None) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let formats: Vec<(MediaType, CameraFormat)> = match camera.compatible_camera_formats() {
        Ok(list) => list.into_iter().map(|f| (to_media_type(&f), f)).collect(),
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::Backend(format!(
                "Failed to query camera formats: {e}"
            ))));
            return;
        }
    };
    if ready_tx
        .send(Ok(formats.iter().map(|(mt, _)| mt.clone()).collect()))
        .is_err()
    {
        return;
    }

    let mut camera = Some(camera);
    let mut current: Option<CameraFormat> = None;
    let mut active: Option<Stream> = None;

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            CameraCommand::Start {
                stream,
                media_type,
                handler,
                reply,
            } => {
                let Some((_, format)) = formats.iter().find(|(mt, _)| *mt == media_type) else {
                    let _ = reply.send(Err(CaptureError::Backend(format!(
                        "media type {media_type} not offered"
                    ))));
                    continue;
                };

                // The device can only be held once, so release it before reopening.
                if let Some(mut old) = camera.take() {
                    if old.is_stream_open() {
                        if let Err(e) = old.stop_stream() {
                            warn!("CAMERA: Failed to stop stream: {e}");
                        }
                    }
                }
                info!("CAMERA: Starting stream {} with {}", stream, media_type);
                match open_stream(&index, *format) {
                    Ok(c) => {
                        camera = Some(c);
                        current = Some(*format);
                        active = Some(Stream { id: stream, handler });
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        error!("CAMERA: {e}");
                        if let Some(previous) = current {
                            match open_stream(&index, previous) {
                                Ok(c) => camera = Some(c),
                                Err(e) => error!("CAMERA: Failed to restore stream: {e}"),
                            }
                        }
                        let _ = reply.send(Err(e));
                    }
                }
            }
            CameraCommand::Read { stream } => {
                let Some(current) = active.as_ref().filter(|s| s.id == stream) else {
                    continue;
                };
                let delivery = match camera.as_mut().map(|c| c.frame()) {
                    Some(Ok(buffer)) if buffer.buffer().is_empty() => Delivery::NoSample,
                    Some(Ok(buffer)) => Delivery::Sample(buffer.buffer().to_vec()),
                    Some(Err(e)) => {
                        warn!("CAMERA: Failed to capture frame: {e}");
                        Delivery::Failed(e.to_string())
                    }
                    None => Delivery::Failed("camera is not open".into()),
                };
                let dispatch = Dispatch {
                    handler: Arc::clone(&current.handler),
                    delivery,
                };
                if dispatch_tx.send(dispatch).is_err() {
                    info!("CAMERA: Dispatcher gone, stopping capture");
                    break;
                }
            }
            CameraCommand::Stop { stream } => {
                if active.as_ref().is_some_and(|s| s.id == stream) {
                    active = None;
                    if let Some(c) = camera.as_mut() {
                        if let Err(e) = c.stop_stream() {
                            debug!("CAMERA: Failed to stop stream: {e}");
                        }
                    }
                }
            }
            CameraCommand::Shutdown => break,
        }
    }

    if let Some(mut c) = camera {
        if c.is_stream_open() {
            let _ = c.stop_stream();
        }
    }
    info!("Video capture loop ended");
}

fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(Dispatch { handler, delivery }) = rx.blocking_recv() {
        match &delivery {
            Delivery::Sample(data) => handler(ReadCompletion::Sample { data }),
            Delivery::NoSample => handler(ReadCompletion::NoSample),
            Delivery::Failed(msg) => handler(ReadCompletion::Failed(msg.clone())),
        }
    }
    debug!("CAMERA: Dispatcher exited");
}
