use nalgebra::Vector2;
use pitch_types::{DebugShape, DebugValue, TrackingDebug};

/// Per-filter debug sink, merged upwards into the world frame.
///
/// Keys are prefixed with the owning filter's primary camera id so overlapping
/// filters stay distinguishable. Everything here is behaviorally neutral.
#[derive(Debug, Clone, Default)]
pub(crate) struct DebugLog {
    inner: TrackingDebug,
}

impl DebugLog {
    pub fn value(&mut self, camera_id: u32, key: &str, value: f64) {
        self.inner
            .values
            .push((format!("{camera_id}/{key}"), DebugValue::Float(value)));
    }

    pub fn text(&mut self, camera_id: u32, key: &str, value: &str) {
        self.inner
            .values
            .push((format!("{camera_id}/{key}"), DebugValue::Text(value.into())));
    }

    pub fn plot(&mut self, key: &str, value: f64) {
        self.inner.plots.push((key.to_string(), value));
    }

    pub fn circle(&mut self, name: &str, center: Vector2<f64>, radius: f64) {
        self.inner.shapes.push(DebugShape::Circle {
            name: name.to_string(),
            center,
            radius,
        });
    }

    pub fn line(&mut self, name: &str, from: Vector2<f64>, to: Vector2<f64>) {
        self.inner.shapes.push(DebugShape::Line {
            name: name.to_string(),
            from,
            to,
        });
    }

    /// Move everything from `other` into this log.
    pub fn merge_from(&mut self, other: &mut DebugLog) {
        self.inner.values.append(&mut other.inner.values);
        self.inner.plots.append(&mut other.inner.plots);
        self.inner.shapes.append(&mut other.inner.shapes);
    }

    pub fn take(&mut self) -> TrackingDebug {
        std::mem::take(&mut self.inner)
    }
}
