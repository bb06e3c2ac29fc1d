//! The viewer: keeps one read armed, uploads every new frame to the texture
//! stream and saves stills on request.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use camstream_capture::{CaptureBackend, WebCam};
use camstream_convert::RgbaBitmap;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ViewerConfig;
use crate::export::{save_frame, still_path};
use crate::main_loop::MainLoop;
use crate::texture::TexStream;

/// Consecutive deliveries without a frame before the viewer stops re-arming.
pub const MAX_EMPTY_DELIVERIES: u32 = 30;

pub struct Viewer {
    cam: WebCam,
    texture: TexStream,
    config: ViewerConfig,
    received: u64,
    saved: u64,
    stalled: Arc<AtomicBool>,
    failed: bool,
}

#[derive(Debug, Clone)]
pub struct ViewerSummary {
    pub device: Option<String>,
    pub format: &'static str,
    pub received: u64,
    pub saved: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

impl Viewer {
    /// Open the configured device and apply the format override.
    pub fn open(backend: Arc<dyn CaptureBackend>, config: ViewerConfig) -> Result<Self> {
        let stalled = Arc::new(AtomicBool::new(false));
        let empty = Arc::new(AtomicU32::new(0));

        let stalled_flag = stalled.clone();
        let cam = WebCam::builder(backend)
            .device(config.selector())
            .verbose_frames(config.verbose)
            .on_frame(move |cam, updated| {
                if updated {
                    empty.store(0, Ordering::Relaxed);
                } else {
                    let misses = empty.fetch_add(1, Ordering::Relaxed) + 1;
                    if misses >= MAX_EMPTY_DELIVERIES {
                        warn!(
                            "VIEWER: {} deliveries without a frame, giving up ({})",
                            misses,
                            cam.last_error().unwrap_or_else(|| "no error reported".into())
                        );
                        stalled_flag.store(true, Ordering::Release);
                        return;
                    }
                }
                if let Err(e) = cam.query_frame() {
                    warn!("VIEWER: Failed to re-arm capture: {e}");
                    stalled_flag.store(true, Ordering::Release);
                }
            })
            .build()
            .with_context(|| format!("failed to open camera {}", config.selector()))?;

        if let Some(format) = config.format {
            if !cam.set_raw_frame_type(format) {
                warn!(
                    "VIEWER: Device does not offer {}, staying on {}",
                    format,
                    cam.raw_frame_type_name()
                );
            }
        }

        let descriptor = cam.frame_descriptor();
        if let Some(d) = descriptor {
            info!(
                "VIEWER: {} {}x{} pitch {} from {}",
                d.raw_type,
                d.width,
                d.height,
                d.pitch,
                cam.device_name().unwrap_or_default()
            );
        }
        let (width, height) = descriptor.map_or((0, 0), |d| (d.width, d.height));

        Ok(Self {
            cam,
            texture: TexStream::new(width, height),
            config,
            received: 0,
            saved: 0,
            stalled,
            failed: false,
        })
    }

    /// Arm the first read; the frame callback keeps it going.
    pub fn start(&self) -> Result<()> {
        self.cam.query_frame().context("failed to start capture")
    }

    pub fn texture(&self) -> &TexStream {
        &self.texture
    }

    /// Close the camera and report what happened.
    pub fn finish(self) -> ViewerSummary {
        let failure = self
            .failed
            .then(|| self.cam.last_error().unwrap_or_else(|| "capture stalled".into()));
        let summary = ViewerSummary {
            device: self.cam.device_path(),
            format: self.cam.raw_frame_type_name(),
            received: self.received,
            saved: self.saved,
            last_frame_at: self.cam.last_frame_at(),
            failure,
        };
        self.cam.close();
        summary
    }

    fn save_still(&mut self, frame: &RgbaBitmap) {
        let path = still_path(&self.config.out, self.received, self.config.still_extension());
        match save_frame(frame, &path, self.config.jpeg_quality) {
            Ok(()) => {
                self.saved += 1;
                debug!("VIEWER: Saved {}", path.display());
            }
            Err(e) => warn!("VIEWER: Failed to save {}: {e:#}", path.display()),
        }
    }
}

impl MainLoop for Viewer {
    fn on_main_loop(&mut self, _width: u32, _height: u32, time: f64) -> bool {
        if self.stalled.load(Ordering::Acquire) {
            self.failed = true;
            return false;
        }

        let save_every = self.config.save_every;
        let save_due = save_every > 0 && (self.received + 1) % save_every == 0;
        let texture = &mut self.texture;
        // Upload straight from the shared buffer; only stills take a copy.
        let Some((resized, still)) = self
            .cam
            .with_updated_frame(|frame| (texture.update(frame), save_due.then(|| frame.clone())))
        else {
            return true;
        };
        self.received += 1;
        if resized {
            info!("VIEWER: Texture now {}x{}", self.texture.width(), self.texture.height());
        }
        if self.received <= 3 {
            info!("VIEWER: Frame {} at {:.2}s", self.received, time);
        }

        if let Some(frame) = still {
            self.save_still(&frame);
        }

        self.config.frames == 0 || self.received < self.config.frames
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::main_loop::run_main_loop;
    use camstream_capture::{MediaType, SyntheticBackend, SyntheticDevice};
    use camstream_convert::{FourCc, RawFrameType};

    fn backend() -> SyntheticBackend {
        SyntheticBackend::new(vec![SyntheticDevice::new(
            "synthetic://0",
            "Bars",
            vec![
                MediaType::new(FourCc::YUY2, 32, 24, 30),
                MediaType::new(FourCc::NV12, 32, 24, 30),
            ],
        )
        .unpaced()])
    }

    fn config(frames: u64) -> ViewerConfig {
        ViewerConfig {
            frames,
            fps: 500,
            backend: BackendKind::Synthetic,
            ..ViewerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_streams_requested_frames() {
        let mut viewer = Viewer::open(Arc::new(backend()), config(4)).unwrap();
        viewer.start().unwrap();
        run_main_loop(&mut viewer, 500).await;

        assert_eq!(viewer.texture().uploads(), 4);
        assert_eq!(viewer.surface_size(), (32, 24));
        let summary = viewer.finish();
        assert_eq!(summary.received, 4);
        assert_eq!(summary.format, "YUY2");
        assert!(summary.failure.is_none());
    }

    #[tokio::test]
    async fn test_saves_every_nth_frame() {
        let out = std::env::temp_dir().join(format!("camstream-stills-{}", std::process::id()));
        std::fs::create_dir_all(&out).unwrap();
        let cfg = ViewerConfig {
            save_every: 2,
            out: out.clone(),
            png: true,
            ..config(5)
        };
        let mut viewer = Viewer::open(Arc::new(backend()), cfg).unwrap();
        viewer.start().unwrap();
        run_main_loop(&mut viewer, 500).await;

        assert_eq!(viewer.texture().uploads(), 5);
        let summary = viewer.finish();
        assert_eq!(summary.saved, 2);
        assert!(out.join("frame_00002.png").exists());
        assert!(out.join("frame_00004.png").exists());
        assert!(!out.join("frame_00005.png").exists());
        std::fs::remove_dir_all(&out).ok();
    }

    #[tokio::test]
    async fn test_format_override() {
        let cfg = ViewerConfig {
            format: Some(RawFrameType::Nv12),
            ..config(1)
        };
        let mut viewer = Viewer::open(Arc::new(backend()), cfg).unwrap();
        viewer.start().unwrap();
        run_main_loop(&mut viewer, 500).await;
        assert_eq!(viewer.finish().format, "NV12");
    }

    #[tokio::test]
    async fn test_unplugged_device_stalls() {
        let backend = backend();
        let mut viewer = Viewer::open(Arc::new(backend.clone()), config(0)).unwrap();
        assert!(backend.detach("synthetic://0"));
        viewer.start().unwrap();
        run_main_loop(&mut viewer, 500).await;

        let summary = viewer.finish();
        assert_eq!(summary.received, 0);
        assert!(summary.failure.unwrap().contains("disconnected"));
    }
}
