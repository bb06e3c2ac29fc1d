//! Device discovery.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::CaptureBackend;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{DeviceDescriptor, DeviceSelector};

/// Lists the capture devices of a backend as snapshots.
///
/// Holds no device state; every call asks the backend again.
#[derive(Clone)]
pub struct DeviceEnumerator {
    backend: Arc<dyn CaptureBackend>,
}

impl DeviceEnumerator {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    /// Attached devices in platform order.
    pub fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        let devices = self.backend.enumerate().map_err(|e| match e {
            CaptureError::Enumeration(_) => e,
            other => CaptureError::Enumeration(other.to_string()),
        })?;
        debug!("ENUM: {} devices via {}", devices.len(), self.backend.name());
        Ok(devices)
    }

    /// Stable identifiers of the attached devices.
    pub fn paths(&self) -> CaptureResult<Vec<String>> {
        Ok(self.enumerate()?.into_iter().map(|d| d.path).collect())
    }

    /// Resolve a selector against a fresh snapshot.
    pub fn select(&self, selector: &DeviceSelector) -> CaptureResult<DeviceDescriptor> {
        let devices = self.enumerate()?;
        select_from(&devices, selector)
    }
}

/// Resolve a selector against an existing snapshot.
pub fn select_from(
    devices: &[DeviceDescriptor],
    selector: &DeviceSelector,
) -> CaptureResult<DeviceDescriptor> {
    let found = match selector {
        DeviceSelector::Index(i) => devices.get(*i),
        DeviceSelector::Path(path) => devices.iter().find(|d| d.path == *path),
    };
    found.cloned().ok_or_else(|| {
        warn!("ENUM: No device matches {} among {}", selector, devices.len());
        CaptureError::SetDeviceFailed(format!(
            "no device {} among {} attached",
            selector,
            devices.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::{SyntheticBackend, SyntheticDevice};

    fn enumerator() -> DeviceEnumerator {
        DeviceEnumerator::new(Arc::new(SyntheticBackend::new(vec![
            SyntheticDevice::webcam("usb#0", "Front"),
            SyntheticDevice::webcam("usb#1", "Rear"),
        ])))
    }

    #[test]
    fn test_paths_in_order() {
        assert_eq!(enumerator().paths().unwrap(), vec!["usb#0", "usb#1"]);
    }

    #[test]
    fn test_select_by_index_and_path() {
        let e = enumerator();
        assert_eq!(e.select(&DeviceSelector::Index(1)).unwrap().name, "Rear");
        assert_eq!(
            e.select(&DeviceSelector::Path("usb#0".into())).unwrap().name,
            "Front"
        );
    }

    #[test]
    fn test_select_misses() {
        let e = enumerator();
        assert!(matches!(
            e.select(&DeviceSelector::Index(2)),
            Err(CaptureError::SetDeviceFailed(_))
        ));
        assert!(matches!(
            e.select(&DeviceSelector::Path("usb#9".into())),
            Err(CaptureError::SetDeviceFailed(_))
        ));
    }

    #[test]
    fn test_unreachable_service() {
        let e = DeviceEnumerator::new(Arc::new(SyntheticBackend::unavailable()));
        assert!(matches!(e.enumerate(), Err(CaptureError::Enumeration(_))));
        assert!(matches!(
            e.select(&DeviceSelector::default()),
            Err(CaptureError::Enumeration(_))
        ));
    }
}
