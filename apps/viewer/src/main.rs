mod app;
mod config;
mod export;
mod main_loop;
mod texture;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use camstream_capture::{CaptureBackend, DeviceEnumerator, SyntheticBackend};
use clap::Parser;
use tracing::{error, info};

use app::Viewer;
use config::{BackendKind, Cli, ViewerConfig};
use main_loop::run_main_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ViewerConfig::try_from(Cli::parse())?;

    let default_filter = if config.verbose {
        "camstream=debug,camstream_capture=debug"
    } else {
        "camstream=info,camstream_capture=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let backend = make_backend(config.backend)?;

    if config.list {
        return list_devices(backend);
    }

    if config.save_every > 0 {
        std::fs::create_dir_all(&config.out)
            .with_context(|| format!("failed to create {}", config.out.display()))?;
    }

    let fps = config.fps;
    let mut viewer = Viewer::open(backend, config)?;
    viewer.start()?;

    let stats = run_main_loop(&mut viewer, fps).await;
    let texture = viewer.texture();
    info!(
        "Texture {}x{} (pitch {}): {} uploads, {} byte staging buffer",
        texture.width(),
        texture.height(),
        texture.pitch(),
        texture.uploads(),
        texture.staging().len()
    );
    let summary = viewer.finish();

    if stats.interrupted {
        info!("Stopped by user");
    }
    info!(
        "Received {} frames ({} saved) from {} as {} in {:.1}s over {} ticks",
        summary.received,
        summary.saved,
        summary.device.as_deref().unwrap_or("?"),
        summary.format,
        stats.elapsed.as_secs_f64(),
        stats.ticks
    );
    if let Some(at) = summary.last_frame_at {
        info!("Last frame at {}", at.to_rfc3339());
    }
    if let Some(failure) = summary.failure {
        error!("Capture failed: {failure}");
        bail!("capture failed: {failure}");
    }
    Ok(())
}

fn make_backend(kind: BackendKind) -> Result<Arc<dyn CaptureBackend>> {
    match kind {
        BackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::single())),
        #[cfg(feature = "native")]
        BackendKind::Native => Ok(Arc::new(camstream_capture::NativeBackend::new())),
        #[cfg(not(feature = "native"))]
        BackendKind::Native => bail!("built without the `native` feature; use --backend synthetic"),
    }
}

fn list_devices(backend: Arc<dyn CaptureBackend>) -> Result<()> {
    let devices = DeviceEnumerator::new(backend)
        .enumerate()
        .context("failed to enumerate devices")?;
    if devices.is_empty() {
        println!("No capture devices found");
    }
    for (idx, device) in devices.iter().enumerate() {
        println!("{idx}: {}\n   {}", device.name, device.path);
    }
    Ok(())
}
