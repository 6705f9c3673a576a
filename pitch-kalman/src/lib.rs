//! Discrete linear Kalman filter with explicit control input.
//!
//! The filter is parameterized by the state dimension `N` and the observation
//! dimension `M`. Unlike trait-based formulations, the transition, control and
//! noise matrices are plain public fields: the calling filter reconfigures
//! them on every prediction step from the elapsed time, which is how all the
//! motion models in this workspace are written.

use nalgebra::{SMatrix, SVector};

#[derive(Debug, Clone)]
pub struct KalmanFilter<const N: usize, const M: usize> {
    /// state transition model
    pub f: SMatrix<f64, N, N>,
    /// state transition jacobian
    pub b: SMatrix<f64, N, N>,
    /// control input
    pub u: SVector<f64, N>,
    /// covariance of the process noise
    pub q: SMatrix<f64, N, N>,
    /// observation model
    pub h: SMatrix<f64, M, N>,
    /// covariance of the observation noise
    pub r: SMatrix<f64, M, M>,
    /// observation
    pub z: SVector<f64, M>,

    x_pre: SVector<f64, N>,
    p_pre: SMatrix<f64, N, N>,
    x: SVector<f64, N>,
    p: SMatrix<f64, N, N>,
}

impl<const N: usize, const M: usize> KalmanFilter<N, M> {
    pub fn new(x: SVector<f64, N>) -> Self {
        Self {
            f: SMatrix::identity(),
            b: SMatrix::identity(),
            u: SVector::zeros(),
            q: SMatrix::zeros(),
            h: SMatrix::zeros(),
            r: SMatrix::zeros(),
            z: SVector::zeros(),
            x_pre: x,
            p_pre: SMatrix::identity(),
            x,
            p: SMatrix::identity(),
        }
    }

    /// Propagate the state one step: `x_pre = F*x + u`, `P_pre = B*P*B' + Q`.
    ///
    /// With `permanent_update` the predicted state is committed as the new
    /// base state; otherwise the base state is left untouched so the same
    /// filter can be predicted to several lookahead times.
    pub fn predict(&mut self, permanent_update: bool) {
        self.x_pre = self.f * self.x + self.u;
        self.p_pre = self.b * self.p * self.b.transpose() + self.q;
        if permanent_update {
            self.x = self.x_pre;
            self.p = self.p_pre;
        }
    }

    /// Fuse the current observation `z` into the predicted state.
    ///
    /// A numerically singular innovation covariance leaves the filter at the
    /// prediction; callers treat that tick as having no usable measurement.
    pub fn update(&mut self) {
        let y = self.z - self.h * self.x_pre;
        let s = self.h * self.p_pre * self.h.transpose() + self.r;
        let Some(s_inv) = s.try_inverse() else {
            self.x = self.x_pre;
            self.p = self.p_pre;
            return;
        };
        let k = self.p_pre * self.h.transpose() * s_inv;
        self.x = self.x_pre + k * y;
        self.p = (SMatrix::identity() - k * self.h) * self.p_pre;
    }

    /// The predicted state from the last `predict` call.
    pub fn state(&self) -> &SVector<f64, N> {
        &self.x_pre
    }

    /// The committed base state (post-update or post-permanent-predict).
    pub fn base_state(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn predicted_covariance(&self) -> &SMatrix<f64, N, N> {
        &self.p_pre
    }

    pub fn covariance(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    /// Directly poke one component of the predicted state.
    ///
    /// Callers must state why: legitimate uses are speed injection after a
    /// collision reset and orientation re-wrapping.
    pub fn modify_state(&mut self, index: usize, value: f64) {
        self.x_pre[index] = value;
    }

    /// Replace state and covariance wholesale, as done on a filter reset.
    pub fn reset(&mut self, x: SVector<f64, N>) {
        self.x_pre = x;
        self.x = x;
        self.p_pre = SMatrix::identity();
        self.p = SMatrix::identity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn max_asymmetry<const N: usize>(m: &SMatrix<f64, N, N>) -> f64 {
        let d = m - m.transpose();
        d.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }

    /// Set up a 1D constant velocity filter observing position only.
    fn cv_filter(dt: f64) -> KalmanFilter<2, 1> {
        let mut k = KalmanFilter::<2, 1>::new(SVector::<f64, 2>::zeros());
        k.f[(0, 1)] = dt;
        k.b = k.f;
        k.h[(0, 0)] = 1.0;
        k.r[(0, 0)] = 1e-4;
        let g = SVector::<f64, 2>::new(dt * dt / 2.0 * 4.0, dt * 4.0);
        k.q = g * g.transpose();
        k
    }

    #[test]
    fn covariance_stays_symmetric_and_nonnegative() {
        let mut k = cv_filter(0.016);
        for i in 0..200 {
            k.predict(true);
            k.z[0] = (i as f64) * 0.03;
            k.update();
            assert!(max_asymmetry(k.covariance()) <= 1e-9);
            assert!(max_asymmetry(k.predicted_covariance()) <= 1e-9);
            for d in 0..2 {
                assert!(k.covariance()[(d, d)] >= 0.0);
            }
        }
    }

    #[test]
    fn converges_on_constant_velocity_track() {
        let dt = 0.016;
        let mut k = cv_filter(dt);
        let v_true = 2.0;
        for i in 1..=50 {
            k.predict(true);
            k.z[0] = v_true * dt * i as f64;
            k.update();
        }
        assert_relative_eq!(k.base_state()[0], v_true * dt * 50.0, epsilon = 1e-2);
        assert_relative_eq!(k.base_state()[1], v_true, epsilon = 0.05);
    }

    #[test]
    fn nonpermanent_predict_leaves_base_state() {
        let mut k = cv_filter(0.5);
        k.predict(true);
        k.z[0] = 1.0;
        k.update();
        let base = *k.base_state();
        assert!(base[1].abs() > 1e-3, "update must produce a velocity estimate");
        k.predict(false);
        assert_eq!(*k.base_state(), base);
        assert_ne!(*k.state(), base);
    }

    #[test]
    fn control_input_shifts_prediction() {
        let mut k = cv_filter(0.1);
        k.u[1] = -0.5;
        k.predict(false);
        assert_relative_eq!(k.state()[1], -0.5);
    }

    #[test]
    fn singular_innovation_is_a_no_op_update() {
        let mut k = KalmanFilter::<2, 1>::new(SVector::<f64, 2>::new(1.0, 0.0));
        // H and R both zero make S singular.
        k.predict(true);
        let before = *k.state();
        k.z[0] = 42.0;
        k.update();
        assert_eq!(*k.base_state(), before);
    }
}
