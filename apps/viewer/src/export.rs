//! Still-image export of the frame buffer.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use camstream_convert::RgbaBitmap;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

/// Encode a frame to JPEG bytes. Alpha is dropped.
pub fn encode_jpeg(frame: &RgbaBitmap, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(to_image(frame)?).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Save a frame, picking the encoding from the file extension
/// (`jpg`/`jpeg` or `png`).
pub fn save_frame(frame: &RgbaBitmap, path: &Path, jpeg_quality: u8) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => {
            let bytes = encode_jpeg(frame, jpeg_quality)?;
            std::fs::write(path, bytes)
                .with_context(|| format!("failed to write {}", path.display()))
        }
        "png" => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            to_image(frame)?
                .write_to(&mut BufWriter::new(file), ImageFormat::Png)
                .map_err(|err| anyhow!("PNG encode failed: {err}"))
        }
        other => bail!("unsupported still format `{other}`"),
    }
}

/// `dir/frame_00042.ext`
pub fn still_path(dir: &Path, index: u64, extension: &str) -> PathBuf {
    dir.join(format!("frame_{index:05}.{extension}"))
}

fn to_image(frame: &RgbaBitmap) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
    if frame.is_empty() {
        bail!("frame buffer is empty");
    }
    ImageBuffer::<Rgba<u8>, Vec<u8>>::from_vec(frame.width(), frame.height(), frame.to_packed())
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red(width: u32, height: u32) -> RgbaBitmap {
        let mut frame = RgbaBitmap::new(width, height);
        frame.fill([255, 0, 0, 255]);
        frame
    }

    #[test]
    fn test_jpeg_magic() {
        let bytes = encode_jpeg(&red(5, 3), 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_png_round_trip_dimensions() {
        let path =
            std::env::temp_dir().join(format!("camstream-export-{}.png", std::process::id()));
        save_frame(&red(7, 4), &path, 90).unwrap();
        let decoded = image::open(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!((decoded.width(), decoded.height()), (7, 4));
        assert_eq!(decoded.to_rgba8().get_pixel(6, 3).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_rejects_unknown_extension_and_empty() {
        assert!(save_frame(&red(2, 2), Path::new("frame.bmp"), 90).is_err());
        assert!(encode_jpeg(&RgbaBitmap::default(), 90).is_err());
    }

    #[test]
    fn test_still_path() {
        assert_eq!(
            still_path(Path::new("out"), 42, "jpg"),
            PathBuf::from("out/frame_00042.jpg")
        );
    }
}
