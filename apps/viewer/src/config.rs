//! Viewer configuration: an optional JSON file overridden by command-line
//! flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use camstream_capture::DeviceSelector;
use camstream_convert::RawFrameType;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

pub const DEFAULT_FRAMES: u64 = 100;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Platform cameras (requires the `native` feature).
    Native,
    /// Generated color bars.
    Synthetic,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "native") {
            Self::Native
        } else {
            Self::Synthetic
        }
    }
}

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "camstream", about = "Stream a camera into an RGBA frame buffer")]
pub struct Cli {
    /// JSON config file; flags override its values.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Device index or stable device path.
    #[arg(long, value_name = "INDEX|PATH")]
    pub device: Option<String>,
    /// Force a raw frame type (rgb32, rgb24, yuy2, nv12).
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,
    /// Stop after this many frames (0 runs until interrupted).
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,
    /// Main loop cadence.
    #[arg(long, value_name = "HZ")]
    pub fps: Option<u32>,
    /// Save every Nth frame as a still (0 disables).
    #[arg(long = "save-every", value_name = "N")]
    pub save_every: Option<u64>,
    /// Directory for saved stills.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// JPEG quality (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
    /// Save stills as PNG instead of JPEG.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub png: bool,
    /// List devices and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub list: bool,
    /// Debug logging, including every converted frame.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Resolved viewer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Device index or stable path; the first device when unset.
    pub device: Option<String>,
    pub format: Option<RawFrameType>,
    pub frames: u64,
    pub fps: u32,
    #[serde(alias = "saveEvery")]
    pub save_every: u64,
    #[serde(alias = "outDir")]
    pub out: PathBuf,
    pub backend: BackendKind,
    #[serde(alias = "jpegQuality")]
    pub jpeg_quality: u8,
    pub png: bool,
    pub verbose: bool,
    #[serde(skip)]
    pub list: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            device: None,
            format: None,
            frames: DEFAULT_FRAMES,
            fps: DEFAULT_FPS,
            save_every: 0,
            out: PathBuf::from("captures"),
            backend: BackendKind::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            png: false,
            verbose: false,
            list: false,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid viewer config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Device selector; digits select by index, anything else by path.
    pub fn selector(&self) -> DeviceSelector {
        match self.device.as_deref() {
            None => DeviceSelector::default(),
            Some(s) => match s.parse::<usize>() {
                Ok(index) => DeviceSelector::Index(index),
                Err(_) => DeviceSelector::Path(s.to_string()),
            },
        }
    }

    /// File extension of saved stills.
    pub fn still_extension(&self) -> &'static str {
        if self.png {
            "png"
        } else {
            "jpg"
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            bail!("--fps must be a positive integer");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if self.format == Some(RawFrameType::Unknown) {
            bail!("--format must be one of rgb32, rgb24, yuy2, nv12");
        }
        Ok(())
    }
}

impl TryFrom<Cli> for ViewerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(device) = cli.device {
            config.device = Some(device);
        }
        if let Some(format) = cli.format {
            config.format = Some(format.parse::<RawFrameType>().with_context(|| {
                "--format must be one of rgb32, rgb24, yuy2, nv12".to_string()
            })?);
        }
        if let Some(frames) = cli.frames {
            config.frames = frames;
        }
        if let Some(fps) = cli.fps {
            config.fps = fps;
        }
        if let Some(save_every) = cli.save_every {
            config.save_every = save_every;
        }
        if let Some(out) = cli.out {
            config.out = out;
        }
        if let Some(backend) = cli.backend {
            config.backend = backend;
        }
        if let Some(quality) = cli.jpeg_quality {
            config.jpeg_quality = quality;
        }
        config.png |= cli.png;
        config.verbose |= cli.verbose;
        config.list = cli.list;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ViewerConfig> {
        let cli = Cli::try_parse_from(std::iter::once("camstream").chain(args.iter().copied()))?;
        ViewerConfig::try_from(cli)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.frames, DEFAULT_FRAMES);
        assert_eq!(config.fps, DEFAULT_FPS);
        assert_eq!(config.selector(), DeviceSelector::Index(0));
        assert_eq!(config.still_extension(), "jpg");
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--device",
            "2",
            "--format",
            "YUYV",
            "--frames",
            "5",
            "--backend",
            "synthetic",
            "--save-every",
            "2",
            "--png",
        ])
        .unwrap();
        assert_eq!(config.selector(), DeviceSelector::Index(2));
        assert_eq!(config.format, Some(RawFrameType::Yuy2));
        assert_eq!(config.frames, 5);
        assert_eq!(config.backend, BackendKind::Synthetic);
        assert_eq!(config.save_every, 2);
        assert_eq!(config.still_extension(), "png");
    }

    #[test]
    fn test_device_path_selector() {
        let config = parse(&["--device", r"\\?\usb#vid_046d"]).unwrap();
        assert_eq!(
            config.selector(),
            DeviceSelector::Path(r"\\?\usb#vid_046d".into())
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse(&["--format", "mjpg"]).is_err());
        assert!(parse(&["--fps", "0"]).is_err());
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--backend", "v4l"]).is_err());
    }

    #[test]
    fn test_json_with_aliases() {
        let config = ViewerConfig::from_json(
            r#"{
                "device": "1",
                "format": "nv12",
                "saveEvery": 10,
                "outDir": "shots",
                "backend": "synthetic"
            }"#,
        )
        .unwrap();
        assert_eq!(config.format, Some(RawFrameType::Nv12));
        assert_eq!(config.save_every, 10);
        assert_eq!(config.out, PathBuf::from("shots"));
        assert_eq!(config.frames, DEFAULT_FRAMES);
        assert_eq!(config.backend, BackendKind::Synthetic);
    }

    #[test]
    fn test_flags_override_file() {
        let path =
            std::env::temp_dir().join(format!("camstream-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "frames": 7, "fps": 15 }"#).unwrap();
        let config = parse(&["--config", path.to_str().unwrap(), "--fps", "60"]).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.frames, 7);
        assert_eq!(config.fps, 60);
    }
}
