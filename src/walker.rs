//! Random-walk state: current and proposed positions, integration bounds,
//! per-dimension step sizes and the box volume.
//!
//! Positions are kept inside `[lbound, ubound]` by periodic wrap-around
//! (repeated addition/subtraction of the range, not modulo), so a proposal
//! that straddles a boundary re-enters from the other side.

use rand::rngs::SmallRng;
use rand::Rng;

/// Default per-dimension proposal step before any tuning has run.
pub const DEFAULT_STEP: f64 = 0.1;

/// The M(RT)^2 walker: a pair of position buffers (current and proposed)
/// plus the box geometry the walk lives in.
///
/// The walker owns no randomness; the engine threads its single RNG stream
/// through [`propose`](Walker::propose) and
/// [`new_random_x`](Walker::new_random_x).
#[derive(Debug, Clone)]
pub struct Walker {
    xold: Vec<f64>,
    xnew: Vec<f64>,
    lbound: Vec<f64>,
    ubound: Vec<f64>,
    step: Vec<f64>,
    vol: f64,
}

impl Walker {
    /// Creates a walker at the origin with unbounded range, zero volume and
    /// the default step size in every dimension.
    ///
    /// # Panics
    ///
    /// Panics if `ndim` is zero.
    pub fn new(ndim: usize) -> Self {
        assert!(ndim > 0, "walker dimensionality must be at least 1");
        Self {
            xold: vec![0.0; ndim],
            xnew: vec![0.0; ndim],
            lbound: vec![-f64::MAX; ndim],
            ubound: vec![f64::MAX; ndim],
            step: vec![DEFAULT_STEP; ndim],
            vol: 0.0,
        }
    }

    /// Number of walk dimensions.
    pub fn ndim(&self) -> usize {
        self.xold.len()
    }

    /// Current position.
    pub fn x(&self) -> &[f64] {
        &self.xold
    }

    /// Proposed position (only meaningful after [`propose`](Walker::propose)).
    pub fn x_proposed(&self) -> &[f64] {
        &self.xnew
    }

    /// Per-dimension lower bounds.
    pub fn lbound(&self) -> &[f64] {
        &self.lbound
    }

    /// Per-dimension upper bounds.
    pub fn ubound(&self) -> &[f64] {
        &self.ubound
    }

    /// Per-dimension proposal step sizes.
    pub fn step(&self) -> &[f64] {
        &self.step
    }

    /// Integration volume, the product of all bound ranges. Zero until a
    /// range has been set.
    pub fn volume(&self) -> f64 {
        self.vol
    }

    /// Sets the current position, wrapping it into the bounds.
    ///
    /// # Panics
    ///
    /// Panics if `x.len()` does not match the walk dimensionality.
    pub fn set_x(&mut self, x: &[f64]) {
        assert_eq!(x.len(), self.ndim(), "position length must match ndim");
        self.xold.copy_from_slice(x);
        apply_pbc(&mut self.xold, &self.lbound, &self.ubound);
    }

    /// Sets the same `[lbound, ubound]` range for every dimension, updates
    /// the volume and wraps the current position into the new bounds.
    ///
    /// # Panics
    ///
    /// Panics if `ubound <= lbound`.
    pub fn set_range(&mut self, lbound: f64, ubound: f64) {
        assert!(ubound > lbound, "range must have positive extent");
        self.lbound.fill(lbound);
        self.ubound.fill(ubound);
        self.update_volume();
        apply_pbc(&mut self.xold, &self.lbound, &self.ubound);
    }

    /// Per-dimension form of [`set_range`](Walker::set_range).
    ///
    /// # Panics
    ///
    /// Panics if the slice lengths do not match the walk dimensionality or
    /// any dimension has `ubound[d] <= lbound[d]`.
    pub fn set_range_per_dim(&mut self, lbound: &[f64], ubound: &[f64]) {
        assert_eq!(lbound.len(), self.ndim(), "lbound length must match ndim");
        assert_eq!(ubound.len(), self.ndim(), "ubound length must match ndim");
        for (lb, ub) in lbound.iter().zip(ubound.iter()) {
            assert!(ub > lb, "range must have positive extent in every dimension");
        }
        self.lbound.copy_from_slice(lbound);
        self.ubound.copy_from_slice(ubound);
        self.update_volume();
        apply_pbc(&mut self.xold, &self.lbound, &self.ubound);
    }

    /// Sets the per-dimension proposal step sizes.
    ///
    /// # Panics
    ///
    /// Panics if `step.len()` does not match the walk dimensionality.
    pub fn set_step(&mut self, step: &[f64]) {
        assert_eq!(step.len(), self.ndim(), "step length must match ndim");
        self.step.copy_from_slice(step);
    }

    /// Rescales every step dimension by `factor`, clamping each result to
    /// the box range from above and `floor` from below.
    pub fn scale_step(&mut self, factor: f64, floor: f64) {
        for i in 0..self.step.len() {
            self.step[i] *= factor;
            let range = self.ubound[i] - self.lbound[i];
            if self.step[i] > range {
                self.step[i] = range;
            }
            if self.step[i] < floor {
                self.step[i] = floor;
            }
        }
    }

    /// Fills the proposed position with `old + step*(U(0,1)-0.5)` per
    /// dimension and wraps it into the bounds.
    pub fn propose(&mut self, rng: &mut SmallRng) {
        for i in 0..self.xnew.len() {
            self.xnew[i] = self.xold[i] + self.step[i] * (rng.gen::<f64>() - 0.5);
        }
        apply_pbc(&mut self.xnew, &self.lbound, &self.ubound);
    }

    /// Commits the proposed position by swapping the two position buffers.
    pub fn accept_move(&mut self) {
        std::mem::swap(&mut self.xold, &mut self.xnew);
    }

    /// Redraws the current position uniformly inside the bounds. Used by
    /// the density-free sampling mode, where every step is a fresh draw.
    pub fn new_random_x(&mut self, rng: &mut SmallRng) {
        for i in 0..self.xold.len() {
            self.xold[i] = self.lbound[i] + (self.ubound[i] - self.lbound[i]) * rng.gen::<f64>();
        }
    }

    fn update_volume(&mut self) {
        self.vol = self
            .lbound
            .iter()
            .zip(self.ubound.iter())
            .map(|(lb, ub)| ub - lb)
            .product();
    }
}

/// Wraps every component of `v` into `[lbound, ubound]` by repeatedly
/// adding or subtracting the range.
fn apply_pbc(v: &mut [f64], lbound: &[f64], ubound: &[f64]) {
    for i in 0..v.len() {
        let range = ubound[i] - lbound[i];
        while v[i] < lbound[i] {
            v[i] += range;
        }
        while v[i] > ubound[i] {
            v[i] -= range;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn test_range_round_trip_scalar() {
        let mut walker = Walker::new(3);
        walker.set_range(-2.5, 4.0);
        for d in 0..3 {
            assert_eq!(walker.lbound()[d], -2.5);
            assert_eq!(walker.ubound()[d], 4.0);
        }
        assert_abs_diff_eq!(walker.volume(), 6.5f64.powi(3), epsilon = 1e-12);
    }

    #[test]
    fn test_range_round_trip_per_dim() {
        let mut walker = Walker::new(3);
        let lb = [0.0, -1.0, 2.0];
        let ub = [2.0, 3.0, 6.0];
        walker.set_range_per_dim(&lb, &ub);
        assert_eq!(walker.lbound(), &lb);
        assert_eq!(walker.ubound(), &ub);
        assert_abs_diff_eq!(walker.volume(), 2.0 * 4.0 * 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_x_wraps_into_bounds() {
        let mut walker = Walker::new(2);
        walker.set_range(0.0, 1.0);
        walker.set_x(&[1.25, -0.25]);
        assert_abs_diff_eq!(walker.x()[0], 0.25, epsilon = 1e-15);
        assert_abs_diff_eq!(walker.x()[1], 0.75, epsilon = 1e-15);
    }

    #[test]
    fn test_proposals_stay_in_bounds() {
        let mut walker = Walker::new(3);
        walker.set_range(0.0, 1.0);
        walker.set_step(&[0.7, 0.7, 0.7]);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1000 {
            walker.propose(&mut rng);
            walker.accept_move();
            for d in 0..3 {
                assert!(
                    walker.x()[d] >= walker.lbound()[d] && walker.x()[d] <= walker.ubound()[d],
                    "position escaped the box"
                );
            }
        }
    }

    #[test]
    fn test_uniform_redraw_stays_in_bounds() {
        let mut walker = Walker::new(2);
        walker.set_range_per_dim(&[-1.0, 3.0], &[1.0, 5.0]);
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..500 {
            walker.new_random_x(&mut rng);
            for d in 0..2 {
                assert!(walker.x()[d] >= walker.lbound()[d]);
                assert!(walker.x()[d] <= walker.ubound()[d]);
            }
        }
    }

    #[test]
    fn test_accept_move_swaps_buffers() {
        let mut walker = Walker::new(2);
        walker.set_range(0.0, 1.0);
        walker.set_x(&[0.5, 0.5]);
        let mut rng = SmallRng::seed_from_u64(3);
        walker.propose(&mut rng);
        let proposed = walker.x_proposed().to_vec();
        walker.accept_move();
        assert_eq!(walker.x(), proposed.as_slice());
    }

    #[test]
    fn test_step_scaling_clamps_to_range_and_floor() {
        let mut walker = Walker::new(2);
        walker.set_range(0.0, 1.0);
        walker.set_step(&[0.8, 1e-51]);
        walker.scale_step(2.0, 1e-50);
        assert_eq!(walker.step()[0], 1.0);
        assert_eq!(walker.step()[1], 1e-50);
    }
}
