use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Affine field transform applied at egress: a 2x2 matrix plus translation,
/// with an optional flip that mirrors the field through the origin (used to
/// exchange the team sides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTransform {
    matrix: Matrix2<f64>,
    offset: Vector2<f64>,
    flip: bool,
}

impl Default for FieldTransform {
    fn default() -> Self {
        Self {
            matrix: Matrix2::identity(),
            offset: Vector2::zeros(),
            flip: false,
        }
    }
}

impl FieldTransform {
    pub fn set_flip(&mut self, flip: bool) {
        self.flip = flip;
    }

    pub fn flip(&self) -> bool {
        self.flip
    }

    /// Row-major [a11, a12, a21, a22, offset_x, offset_y].
    pub fn set_transform(&mut self, t: [f64; 6]) {
        self.matrix = Matrix2::new(t[0], t[1], t[2], t[3]);
        self.offset = Vector2::new(t[4], t[5]);
    }

    pub fn reset_transform(&mut self) {
        self.matrix = Matrix2::identity();
        self.offset = Vector2::zeros();
    }

    fn sign(&self) -> f64 {
        if self.flip { -1.0 } else { 1.0 }
    }

    pub fn apply_pos(&self, pos: Vector2<f64>) -> Vector2<f64> {
        self.matrix * (self.sign() * pos) + self.offset
    }

    pub fn apply_speed(&self, speed: Vector2<f64>) -> Vector2<f64> {
        self.matrix * (self.sign() * speed)
    }

    pub fn apply_angle(&self, angle: f64) -> f64 {
        if self.flip {
            angle + std::f64::consts::PI
        } else {
            angle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_by_default() {
        let t = FieldTransform::default();
        let p = Vector2::new(1.5, -0.5);
        assert_eq!(t.apply_pos(p), p);
        assert_eq!(t.apply_speed(p), p);
        assert_eq!(t.apply_angle(0.7), 0.7);
    }

    #[test]
    fn flip_mirrors_positions_and_speeds() {
        let mut t = FieldTransform::default();
        t.set_flip(true);
        assert_eq!(t.apply_pos(Vector2::new(2.0, -1.0)), Vector2::new(-2.0, 1.0));
        assert_eq!(t.apply_speed(Vector2::new(3.0, 0.0)), Vector2::new(-3.0, 0.0));
        assert_relative_eq!(t.apply_angle(0.0), std::f64::consts::PI);
    }

    #[test]
    fn translation_only_affects_positions() {
        let mut t = FieldTransform::default();
        t.set_transform([1.0, 0.0, 0.0, 1.0, 0.25, -0.25]);
        assert_eq!(t.apply_pos(Vector2::zeros()), Vector2::new(0.25, -0.25));
        assert_eq!(t.apply_speed(Vector2::new(1.0, 1.0)), Vector2::new(1.0, 1.0));
    }
}
