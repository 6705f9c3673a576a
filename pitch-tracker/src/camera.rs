use std::collections::BTreeMap;

use nalgebra::Vector3;
use pitch_types::CameraGeometry;

/// Calibration for all known cameras, keyed by camera id.
///
/// Written only by the ingress path between ticks; every filter reads it by
/// shared reference during a tick.
#[derive(Debug, Clone, Default)]
pub struct CameraInfo {
    positions: BTreeMap<u32, Vector3<f64>>,
    focal_lengths: BTreeMap<u32, f64>,
    senders: BTreeMap<u32, String>,
}

impl CameraInfo {
    /// Apply one geometry message. Returns a warning when the same camera id
    /// arrives from a second sender; the new data is accepted regardless.
    pub fn update(&mut self, calib: &CameraGeometry, sender: &str) -> Option<String> {
        let warning = match self.senders.get(&calib.camera_id) {
            Some(prev) if prev != sender => Some(format!(
                "camera {} is being sent from two different vision sources: {} and {}",
                calib.camera_id, prev, sender
            )),
            _ => None,
        };

        // vision axes are swapped relative to the tracker convention
        let pos = Vector3::new(
            -calib.derived_camera_world_ty / 1000.0,
            calib.derived_camera_world_tx / 1000.0,
            calib.derived_camera_world_tz / 1000.0,
        );
        self.positions.insert(calib.camera_id, pos);
        self.focal_lengths
            .insert(calib.camera_id, calib.focal_length);
        self.senders.insert(calib.camera_id, sender.to_string());
        warning
    }

    pub fn position(&self, camera_id: u32) -> Option<Vector3<f64>> {
        self.positions.get(&camera_id).copied()
    }

    pub fn focal_length(&self, camera_id: u32) -> Option<f64> {
        self.focal_lengths.get(&camera_id).copied()
    }

    pub fn has_camera(&self, camera_id: u32) -> bool {
        self.positions.contains_key(&camera_id)
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.focal_lengths.clear();
        self.senders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calib(camera_id: u32) -> CameraGeometry {
        CameraGeometry {
            camera_id,
            derived_camera_world_tx: 1000.0,
            derived_camera_world_ty: -2000.0,
            derived_camera_world_tz: 4000.0,
            focal_length: 580.0,
        }
    }

    #[test]
    fn converts_axes_and_millimeters() {
        let mut info = CameraInfo::default();
        assert!(info.update(&calib(0), "vision-a").is_none());
        assert_eq!(info.position(0), Some(Vector3::new(2.0, 1.0, 4.0)));
        assert_eq!(info.focal_length(0), Some(580.0));
    }

    #[test]
    fn warns_on_second_sender_but_accepts() {
        let mut info = CameraInfo::default();
        assert!(info.update(&calib(3), "vision-a").is_none());
        assert!(info.update(&calib(3), "vision-a").is_none());
        let warning = info.update(&calib(3), "vision-b");
        assert!(warning.is_some_and(|w| w.contains("vision-a") && w.contains("vision-b")));
        assert!(info.has_camera(3));
    }
}
