//! Media type selection.

use camstream_convert::format::{entries_for, lookup, FormatEntry};
use camstream_convert::RawFrameType;
use tracing::debug;

use crate::error::{CaptureError, CaptureResult};
use crate::types::{FrameDescriptor, MediaType};

/// A media type the converter catalog can decode, with its resolved layout.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub media_type: MediaType,
    pub descriptor: FrameDescriptor,
    pub entry: &'static FormatEntry,
}

/// Resolve a media type against the catalog.
///
/// Uses the declared stride when the device reports one, otherwise the
/// tightest pitch for the layout. Fails with `UnsupportedFormat` when the
/// identifier is unknown or the geometry cannot be decoded.
pub fn resolve(media_type: &MediaType) -> CaptureResult<Negotiated> {
    let entry = lookup(media_type.fourcc).ok_or_else(|| {
        CaptureError::UnsupportedFormat(format!("{} has no converter", media_type.fourcc))
    })?;
    if media_type.width == 0 || media_type.height == 0 {
        return Err(CaptureError::UnsupportedFormat(format!(
            "{media_type} has an empty frame"
        )));
    }

    let min_pitch = entry.layout.min_pitch(media_type.width);
    let pitch = match media_type.stride {
        Some(stride) if stride != 0 => {
            if (stride.unsigned_abs() as usize) < min_pitch
                || (stride < 0 && !entry.layout.allows_bottom_up())
            {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "{media_type} declares an invalid stride (row needs {min_pitch} bytes)"
                )));
            }
            stride
        }
        _ => i32::try_from(min_pitch).map_err(|_| {
            CaptureError::UnsupportedFormat(format!("{media_type} is too wide"))
        })?,
    };

    Ok(Negotiated {
        media_type: media_type.clone(),
        descriptor: FrameDescriptor {
            width: media_type.width,
            height: media_type.height,
            pitch,
            raw_type: entry.raw_type,
            fourcc: media_type.fourcc,
        },
        entry,
    })
}

/// Pick the stream format.
///
/// The first media type decoding to `preferred` wins; without a match (or
/// without a preference) the first recognized media type in device order is
/// used. Fails with `SetDeviceFailed` when nothing is recognized.
pub fn negotiate(
    media_types: &[MediaType],
    preferred: Option<RawFrameType>,
) -> CaptureResult<Negotiated> {
    if let Some(raw_type) = preferred.filter(|t| *t != RawFrameType::Unknown) {
        if let Ok(found) = find_exact(media_types, raw_type) {
            return Ok(found);
        }
        debug!("NEGOTIATE: {} not offered, using native order", raw_type);
    }

    media_types
        .iter()
        .find_map(|mt| match resolve(mt) {
            Ok(n) => Some(n),
            Err(e) => {
                debug!("NEGOTIATE: Skipping {}: {}", mt, e);
                None
            }
        })
        .ok_or_else(|| {
            CaptureError::SetDeviceFailed(format!(
                "none of {} media types is supported",
                media_types.len()
            ))
        })
}

/// The first media type decoding to `raw_type`, with no fallback.
pub fn find_exact(media_types: &[MediaType], raw_type: RawFrameType) -> CaptureResult<Negotiated> {
    media_types
        .iter()
        .filter(|mt| entries_for(raw_type).any(|e| e.fourcc == mt.fourcc))
        .find_map(|mt| resolve(mt).ok())
        .ok_or_else(|| {
            CaptureError::UnsupportedFormat(format!("device does not offer {raw_type}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camstream_convert::FourCc;

    fn offered() -> Vec<MediaType> {
        vec![
            MediaType::new(FourCc::MJPG, 640, 480, 30),
            MediaType::new(FourCc::YUY2, 640, 480, 30),
            MediaType::new(FourCc::NV12, 640, 480, 30),
            MediaType::new(FourCc::BGR24, 320, 240, 15).with_stride(964),
        ]
    }

    #[test]
    fn test_first_recognized_wins() {
        let n = negotiate(&offered(), None).unwrap();
        assert_eq!(n.descriptor.raw_type, RawFrameType::Yuy2);
        assert_eq!(n.descriptor.pitch, 1280);
    }

    #[test]
    fn test_preference_honored() {
        let n = negotiate(&offered(), Some(RawFrameType::Rgb24)).unwrap();
        assert_eq!(n.descriptor.fourcc, FourCc::BGR24);
        assert_eq!(n.descriptor.width, 320);
        assert_eq!(n.descriptor.pitch, 964);
    }

    #[test]
    fn test_missing_preference_falls_back() {
        let n = negotiate(&offered(), Some(RawFrameType::Rgb32)).unwrap();
        assert_eq!(n.descriptor.raw_type, RawFrameType::Yuy2);
    }

    #[test]
    fn test_nothing_recognized() {
        let types = vec![MediaType::new(FourCc::MJPG, 640, 480, 30)];
        assert!(matches!(
            negotiate(&types, None),
            Err(CaptureError::SetDeviceFailed(_))
        ));
        assert!(matches!(
            negotiate(&[], Some(RawFrameType::Nv12)),
            Err(CaptureError::SetDeviceFailed(_))
        ));
    }

    #[test]
    fn test_find_exact_has_no_fallback() {
        assert!(find_exact(&offered(), RawFrameType::Rgb32).is_err());
        assert_eq!(
            find_exact(&offered(), RawFrameType::Nv12).unwrap().descriptor.fourcc,
            FourCc::NV12
        );
    }

    #[test]
    fn test_find_exact_takes_any_identifier_of_the_type() {
        let types = vec![
            MediaType::new(FourCc::BGR24, 100, 10, 30).with_stride(200),
            MediaType::new(FourCc::YUY2, 100, 10, 30),
            MediaType::new(FourCc::RGB24, 100, 10, 30),
        ];
        let n = find_exact(&types, RawFrameType::Rgb24).unwrap();
        assert_eq!(n.descriptor.fourcc, FourCc::RGB24);
        assert!(find_exact(&types, RawFrameType::Unknown).is_err());
    }

    #[test]
    fn test_bad_strides_skipped() {
        let types = vec![
            MediaType::new(FourCc::BGR24, 100, 10, 30).with_stride(200),
            MediaType::new(FourCc::NV12, 100, 10, 30).with_stride(-100),
            MediaType::new(FourCc::YUY2, 0, 10, 30),
            MediaType::new(FourCc::XRGB32, 100, 10, 30).with_stride(-400),
        ];
        let n = negotiate(&types, None).unwrap();
        assert_eq!(n.descriptor.fourcc, FourCc::XRGB32);
        assert_eq!(n.descriptor.pitch, -400);
    }

    #[test]
    fn test_deterministic() {
        let a = negotiate(&offered(), Some(RawFrameType::Nv12)).unwrap();
        let b = negotiate(&offered(), Some(RawFrameType::Nv12)).unwrap();
        assert_eq!(a.descriptor, b.descriptor);
    }
}
