/*!
The Monte Carlo integration engine.

## Overview

[`MonteCarloIntegrator`] drives an M(RT)^2 random walk through a fixed-size
box, feeds every step to the registered observables and turns their
accumulated samples into per-dimension averages and error bars.

A run proceeds through up to four phases: optional step-size tuning toward
a target acceptance rate, optional initial decorrelation of the walker,
the main sampling phase and the final estimation. Walker position, tuned
step sizes and bounds persist across runs, so repeated
[`integrate`](MonteCarloIntegrator::integrate) calls continue the same
walk; only the accumulated data is cleared.

With at least one registered sampling function the walk samples the target
density and observable averages are importance-weighted. Without one, each
step redraws the position uniformly in the box and the final result is
rescaled by the box volume.

## Example

Plain uniform integration of a constant over the unit square:

```
use mcint::integrator::MonteCarloIntegrator;
use mcint::observables::ObservableFunction;

#[derive(Clone)]
struct One;

impl ObservableFunction for One {
    fn ndim(&self) -> usize {
        2
    }

    fn nobs(&self) -> usize {
        1
    }

    fn compute_values(&self, _x: &[f64], _changed: &[bool], out: &mut [f64]) {
        out[0] = 1.0;
    }

    fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
        Box::new(self.clone())
    }
}

let mut mci = MonteCarloIntegrator::new(2).set_seed(42);
mci.set_range(0.0, 1.0);
mci.add_observable_default(One)?;

let result = mci.integrate(1000, false, false)?;
assert!((result.average[0] - 1.0).abs() < 1e-12);
# Ok::<(), mcint::error::McintError>(())
```
*/

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use tracing::{debug, warn};

use crate::accumulators::{create_accumulator, FullAccumulator};
use crate::error::McintError;
use crate::estimators::{create_estimator, multidim_correlated_estimate, EstimatorFn};
use crate::io::{FileSink, TraceSink};
use crate::observables::{ObservableContainer, ObservableFunction};
use crate::sampling::{SamplingFunction, SamplingFunctionContainer};
use crate::walker::Walker;

/// A listener invoked on every sampling step with the current position and
/// whether the step was accepted. Listeners run synchronously in
/// registration order.
pub trait MoveCallback {
    /// Input dimensionality the listener expects.
    fn ndim(&self) -> usize;

    /// Called after each step with the (possibly unchanged) position.
    fn on_move(&mut self, x: &[f64], accepted: bool);

    /// Returns an independent copy with identical configuration.
    fn clone_boxed(&self) -> Box<dyn MoveCallback>;
}

/**
Per-observable registration parameters.

The defaults store the full post-skip sample history with the
autocorrelation-aware estimator and track the observable during automatic
decorrelation, which is the safest (and heaviest) configuration:

```
use mcint::integrator::ObservableSettings;

let settings = ObservableSettings::default();
assert_eq!(settings.blocksize, 1);
assert_eq!(settings.nskip, 1);
assert!(settings.needs_equilibration);
assert!(settings.correlated_estimator);
```
*/
#[derive(Debug, Clone, Copy)]
pub struct ObservableSettings {
    /// Storage policy: 0 keeps a running mean without error bars, 1 the
    /// full sample history, larger values one mean per block of this size.
    pub blocksize: usize,
    /// Take one sample every `nskip` steps. Must be nonzero.
    pub nskip: usize,
    /// Track this observable when the walker is decorrelated
    /// automatically. Requires a blocksize above zero.
    pub needs_equilibration: bool,
    /// Estimate errors with automatic blocking instead of assuming
    /// independent samples. Ignored when `blocksize` is zero.
    pub correlated_estimator: bool,
}

impl Default for ObservableSettings {
    fn default() -> Self {
        Self {
            blocksize: 1,
            nskip: 1,
            needs_equilibration: true,
            correlated_estimator: true,
        }
    }
}

/// Final result of an integration run: one average and one error bar per
/// observable output dimension, in registration order.
#[derive(Debug, Clone)]
pub struct IntegralResult {
    pub average: Array1<f64>,
    pub error: Array1<f64>,
}

/**
Monte Carlo integrator around an M(RT)^2 random walk.

Construct with the walk dimensionality, configure bounds and seeds,
register sampling functions and observables, then call
[`integrate`](MonteCarloIntegrator::integrate).

```
use mcint::integrator::MonteCarloIntegrator;

let mut mci = MonteCarloIntegrator::new(3).set_seed(1234);
mci.set_range(-1.0, 1.0);
assert_eq!(mci.ndim(), 3);
assert!((mci.volume() - 8.0).abs() < 1e-12);
```
*/
pub struct MonteCarloIntegrator {
    walker: Walker,
    rng: SmallRng,
    seed: u64,
    pdfcont: SamplingFunctionContainer,
    obscont: ObservableContainer,
    cbacks: Vec<Box<dyn MoveCallback>>,
    target_acceptance_rate: f64,
    tuning_iterations: Option<usize>,
    decorrelation_steps: Option<usize>,
    acc: usize,
    rej: usize,
    ridx: usize,
    all_changed: Vec<bool>,
    obs_sink: Option<(Box<dyn TraceSink>, usize)>,
    wlk_sink: Option<(Box<dyn TraceSink>, usize)>,
    trace_buf: Vec<f64>,
}

impl MonteCarloIntegrator {
    /// Creates an engine for an `ndim`-dimensional walk with unbounded
    /// range, the walker at the origin and a random seed.
    ///
    /// # Panics
    ///
    /// Panics if `ndim` is zero.
    pub fn new(ndim: usize) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            walker: Walker::new(ndim),
            rng: SmallRng::seed_from_u64(seed),
            seed,
            pdfcont: SamplingFunctionContainer::default(),
            obscont: ObservableContainer::default(),
            cbacks: Vec::new(),
            target_acceptance_rate: 0.5,
            tuning_iterations: None,
            decorrelation_steps: None,
            acc: 0,
            rej: 0,
            ridx: 0,
            all_changed: vec![true; ndim],
            obs_sink: None,
            wlk_sink: None,
            trace_buf: Vec::new(),
        }
    }

    /// Reseeds the engine's random stream.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcint::integrator::MonteCarloIntegrator;
    ///
    /// let mci = MonteCarloIntegrator::new(2).set_seed(42);
    /// assert_eq!(mci.seed(), 42);
    /// ```
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    // --- Configuration

    /// Sets the same integration range for every dimension and wraps the
    /// walker into the new bounds.
    pub fn set_range(&mut self, lbound: f64, ubound: f64) {
        self.walker.set_range(lbound, ubound);
    }

    /// Per-dimension form of [`set_range`](MonteCarloIntegrator::set_range).
    pub fn set_range_per_dim(&mut self, lbound: &[f64], ubound: &[f64]) {
        self.walker.set_range_per_dim(lbound, ubound);
    }

    /// Places the walker, wrapping the position into the bounds.
    pub fn set_x(&mut self, x: &[f64]) {
        self.walker.set_x(x);
    }

    /// Sets the per-dimension proposal step sizes directly, bypassing
    /// tuning.
    pub fn set_mrt2_step(&mut self, step: &[f64]) {
        self.walker.set_step(step);
    }

    /// Sets the acceptance rate the step-size tuning aims for.
    pub fn set_target_acceptance_rate(&mut self, rate: f64) {
        self.target_acceptance_rate = rate;
    }

    /// Fixes the number of step-size tuning iterations; `None` tunes
    /// automatically until the acceptance rate stabilizes.
    pub fn set_tuning_iterations(&mut self, iterations: Option<usize>) {
        self.tuning_iterations = iterations;
    }

    /// Fixes the number of decorrelation steps burned before sampling;
    /// `None` decorrelates automatically by tracking the equilibration
    /// observables until their estimates stabilize.
    pub fn set_decorrelation_steps(&mut self, steps: Option<usize>) {
        self.decorrelation_steps = steps;
    }

    /// Writes the observable values to `path` every `freq`-th step of the
    /// main sampling phase.
    pub fn store_observables_on_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        freq: usize,
    ) -> Result<(), McintError> {
        self.set_observable_sink(Box::new(FileSink::create(path)?), freq);
        Ok(())
    }

    /// Writes the walker position to `path` every `freq`-th step of the
    /// main sampling phase.
    pub fn store_walker_positions_on_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        freq: usize,
    ) -> Result<(), McintError> {
        self.set_walker_sink(Box::new(FileSink::create(path)?), freq);
        Ok(())
    }

    /// Sends the observable values to an arbitrary sink instead of a file.
    pub fn set_observable_sink(&mut self, sink: Box<dyn TraceSink>, freq: usize) {
        self.obs_sink = Some((sink, freq.max(1)));
    }

    /// Sends the walker positions to an arbitrary sink instead of a file.
    pub fn set_walker_sink(&mut self, sink: Box<dyn TraceSink>, freq: usize) {
        self.wlk_sink = Some((sink, freq.max(1)));
    }

    // --- Registration

    /// Registers a factor of the target density.
    ///
    /// # Errors
    ///
    /// Fails if the function's dimensionality does not match the walk's.
    pub fn add_sampling_function<S: SamplingFunction + 'static>(
        &mut self,
        sf: S,
    ) -> Result<(), McintError> {
        if sf.ndim() != self.ndim() {
            return Err(McintError::DimensionMismatch {
                kind: "sampling function",
                expected: self.ndim(),
                found: sf.ndim(),
            });
        }
        self.pdfcont.add_sampling_function(Box::new(sf));
        Ok(())
    }

    /// Registers an observable with explicit settings.
    ///
    /// # Errors
    ///
    /// Fails if the observable's dimensionality does not match the walk's,
    /// if `nskip` is zero, or if equilibration tracking is requested for a
    /// blocksize of zero (which cannot produce the error bars the
    /// stabilization criterion needs).
    pub fn add_observable<O: ObservableFunction + 'static>(
        &mut self,
        obs: O,
        settings: ObservableSettings,
    ) -> Result<(), McintError> {
        if obs.ndim() != self.ndim() {
            return Err(McintError::DimensionMismatch {
                kind: "observable",
                expected: self.ndim(),
                found: obs.ndim(),
            });
        }
        let flag_error = settings.blocksize > 0;
        if settings.needs_equilibration && !flag_error {
            return Err(McintError::EquilibrationNeedsErrorBars);
        }
        let accu = create_accumulator(Box::new(obs), settings.blocksize, settings.nskip)?;
        let estim = create_estimator(settings.correlated_estimator, flag_error);
        self.obscont
            .add_observable(accu, estim, settings.needs_equilibration);
        Ok(())
    }

    /// Registers an observable with [`ObservableSettings::default`].
    pub fn add_observable_default<O: ObservableFunction + 'static>(
        &mut self,
        obs: O,
    ) -> Result<(), McintError> {
        self.add_observable(obs, ObservableSettings::default())
    }

    /// Registers an on-move listener.
    ///
    /// # Errors
    ///
    /// Fails if the listener's dimensionality does not match the walk's.
    pub fn add_callback<C: MoveCallback + 'static>(&mut self, cback: C) -> Result<(), McintError> {
        if cback.ndim() != self.ndim() {
            return Err(McintError::DimensionMismatch {
                kind: "callback",
                expected: self.ndim(),
                found: cback.ndim(),
            });
        }
        self.cbacks.push(Box::new(cback));
        Ok(())
    }

    /// Drops all registered observables.
    pub fn clear_observables(&mut self) {
        self.obscont.clear();
    }

    /// Drops all registered sampling functions.
    pub fn clear_sampling_functions(&mut self) {
        self.pdfcont.clear();
    }

    /// Drops all registered on-move listeners.
    pub fn clear_callbacks(&mut self) {
        self.cbacks.clear();
    }

    // --- Getters

    /// Walk dimensionality.
    pub fn ndim(&self) -> usize {
        self.walker.ndim()
    }

    /// Current walker position.
    pub fn x(&self) -> &[f64] {
        self.walker.x()
    }

    /// Current per-dimension proposal step sizes.
    pub fn mrt2_step(&self) -> &[f64] {
        self.walker.step()
    }

    /// Per-dimension lower bounds.
    pub fn lbound(&self) -> &[f64] {
        self.walker.lbound()
    }

    /// Per-dimension upper bounds.
    pub fn ubound(&self) -> &[f64] {
        self.walker.ubound()
    }

    /// Integration volume, zero until a range has been set.
    pub fn volume(&self) -> f64 {
        self.walker.volume()
    }

    /// Acceptance rate of the most recent sampling phase, zero before any
    /// step was taken.
    pub fn acceptance_rate(&self) -> f64 {
        let total = self.acc + self.rej;
        if total == 0 {
            return 0.0;
        }
        self.acc as f64 / total as f64
    }

    /// The configured tuning target.
    pub fn target_acceptance_rate(&self) -> f64 {
        self.target_acceptance_rate
    }

    /// Number of registered observables.
    pub fn n_observables(&self) -> usize {
        self.obscont.len()
    }

    /// Total observable output dimension.
    pub fn obs_dim(&self) -> usize {
        self.obscont.nobs_dim()
    }

    /// Number of registered sampling functions.
    pub fn n_sampling_functions(&self) -> usize {
        self.pdfcont.len()
    }

    /// The seed the random stream was last seeded with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    // --- Integration

    /// Runs a full integration: optional step-size tuning and initial
    /// decorrelation (both skipped when no sampling function is
    /// registered), `nsteps` of observed sampling, then estimation.
    ///
    /// Without a sampling function the averages and errors are scaled by
    /// the box volume, so a range must have been set for a meaningful
    /// result.
    ///
    /// # Errors
    ///
    /// Fails on accumulation protocol violations and on sink I/O errors.
    pub fn integrate(
        &mut self,
        nsteps: usize,
        tune_step: bool,
        decorrelate: bool,
    ) -> Result<IntegralResult, McintError> {
        self.integrate_impl(nsteps, tune_step, decorrelate, None)
    }

    /// Like [`integrate`](MonteCarloIntegrator::integrate), rendering a
    /// progress bar over the main sampling phase.
    pub fn integrate_progress(
        &mut self,
        nsteps: usize,
        tune_step: bool,
        decorrelate: bool,
    ) -> Result<IntegralResult, McintError> {
        let pb = ProgressBar::new(nsteps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("##-"),
        );
        pb.set_prefix("Sampling");
        let result = self.integrate_impl(nsteps, tune_step, decorrelate, Some(&pb));
        pb.finish_with_message("Done!");
        result
    }

    fn integrate_impl(
        &mut self,
        nsteps: usize,
        tune_step: bool,
        decorrelate: bool,
        pb: Option<&ProgressBar>,
    ) -> Result<IntegralResult, McintError> {
        if !self.pdfcont.is_empty() {
            if tune_step {
                self.find_mrt2_step()?;
            }
            if decorrelate {
                self.initial_decorrelation()?;
            }
        }

        self.obscont.allocate(nsteps)?;

        // the container moves out for the sampling run so the engine can
        // hand out disjoint borrows of itself
        let mut cont = std::mem::take(&mut self.obscont);
        let sampled = self.run_sampling(nsteps, Some(&mut cont), true, pb);
        self.obscont = cont;
        sampled?;

        let (mut average, mut error) = self.obscont.estimate()?;
        if self.pdfcont.is_empty() {
            let vol = self.walker.volume();
            average.mapv_inplace(|v| v * vol);
            error.mapv_inplace(|v| v * vol);
        }
        self.obscont.deallocate();

        if let Some((sink, _)) = self.obs_sink.as_mut() {
            sink.flush()?;
        }
        if let Some((sink, _)) = self.wlk_sink.as_mut() {
            sink.flush()?;
        }

        Ok(IntegralResult { average, error })
    }

    /// Adapts the step sizes until the acceptance rate matches the target.
    fn find_mrt2_step(&mut self) -> Result<(), McintError> {
        const MIN_STAT: usize = 200;
        const MIN_CONS: usize = 5;
        const TOLERANCE: f64 = 0.05;
        const MAX_NUM_ATTEMPTS: usize = 50;
        const SMALLEST_STEP: f64 = 1.0e-50;

        let automatic = self.tuning_iterations.is_none();
        let fixed_iterations = self.tuning_iterations.unwrap_or(0);
        let mut cons_count = 0;
        let mut counter = 0;
        while (automatic && cons_count < MIN_CONS) || counter < fixed_iterations {
            self.run_sampling(MIN_STAT, None, false, None)?;

            let rate = self.acceptance_rate();
            if (rate - self.target_acceptance_rate).abs() < TOLERANCE {
                cons_count += 1;
            } else {
                cons_count = 0;
                let fact = (rate / self.target_acceptance_rate).clamp(0.5, 2.0);
                self.walker.scale_step(fact, SMALLEST_STEP);
            }
            counter += 1;

            if automatic && counter >= MAX_NUM_ATTEMPTS {
                warn!(
                    attempts = counter,
                    rate, "step size tuning stopped without convergence"
                );
                break;
            }
        }
        Ok(())
    }

    /// Equilibrates the walker before the main run, either by burning a
    /// fixed number of steps or by sampling in batches until the tracked
    /// observables stabilize within twice their combined errors.
    fn initial_decorrelation(&mut self) -> Result<(), McintError> {
        const MIN_NMC: usize = 100;

        match self.decorrelation_steps {
            Some(0) => {}
            Some(nsteps) => self.run_sampling(nsteps, None, false, None)?,
            None => {
                let mut equil = ObservableContainer::default();
                for func in self.obscont.equilibration_functions() {
                    let accu = FullAccumulator::new(func, 1)?;
                    equil.add_observable(
                        Box::new(accu),
                        multidim_correlated_estimate as EstimatorFn,
                        true,
                    );
                }
                let nobsdim = equil.nobs_dim();
                equil.allocate(MIN_NMC)?;

                self.run_sampling(MIN_NMC, Some(&mut equil), false, None)?;
                let (mut old_avg, mut old_err) = equil.estimate()?;

                let mut batches = 1;
                loop {
                    self.run_sampling(MIN_NMC, Some(&mut equil), false, None)?;
                    let (new_avg, new_err) = equil.estimate()?;
                    batches += 1;

                    let stable = (0..nobsdim).all(|i| {
                        (old_avg[i] - new_avg[i]).abs()
                            <= 2.0 * (old_err[i] * old_err[i] + new_err[i] * new_err[i]).sqrt()
                    });
                    old_avg = new_avg;
                    old_err = new_err;
                    if stable {
                        break;
                    }
                }
                debug!(batches, "walker decorrelated");
            }
        }
        Ok(())
    }

    /// Advances the walk by `npoints` steps. With a container the run is
    /// observed: callbacks fire, every step is accumulated and, for the
    /// main phase, trace sinks are served. Without one the steps are
    /// plain burn-in.
    fn run_sampling(
        &mut self,
        npoints: usize,
        mut container: Option<&mut ObservableContainer>,
        use_sinks: bool,
        pb: Option<&ProgressBar>,
    ) -> Result<(), McintError> {
        self.acc = 0;
        self.rej = 0;
        if let Some(cont) = container.as_deref_mut() {
            cont.reset();
        }
        self.pdfcont.compute_old(self.walker.x());
        if container.is_some() {
            for cback in &mut self.cbacks {
                cback.on_move(self.walker.x(), true);
            }
        }

        let flagpdf = !self.pdfcont.is_empty();
        for ridx in 0..npoints {
            self.ridx = ridx;
            let moved = if flagpdf {
                Self::do_step_mrt2(
                    &mut self.walker,
                    &mut self.pdfcont,
                    &mut self.rng,
                    &self.all_changed,
                )
            } else {
                self.walker.new_random_x(&mut self.rng);
                true
            };
            if moved {
                self.acc += 1;
            } else {
                self.rej += 1;
            }

            if let Some(cont) = container.as_deref_mut() {
                for cback in &mut self.cbacks {
                    cback.on_move(self.walker.x(), moved);
                }
                cont.accumulate(self.walker.x(), moved, &self.all_changed)?;
                if use_sinks {
                    self.write_traces(cont)?;
                }
            }
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }

        if let Some(cont) = container {
            cont.finalize()?;
        }
        Ok(())
    }

    /// One M(RT)^2 step: propose, evaluate the acceptance from the cached
    /// proto-values and either commit or discard. Returns whether the
    /// walker moved.
    fn do_step_mrt2(
        walker: &mut Walker,
        pdfcont: &mut SamplingFunctionContainer,
        rng: &mut SmallRng,
        all_changed: &[bool],
    ) -> bool {
        walker.propose(rng);
        pdfcont.compute_new(walker.x(), walker.x_proposed(), all_changed);
        if rng.gen::<f64>() <= pdfcont.acceptance() {
            walker.accept_move();
            pdfcont.commit();
            true
        } else {
            false
        }
    }

    fn write_traces(&mut self, cont: &ObservableContainer) -> Result<(), McintError> {
        if let Some((sink, freq)) = self.obs_sink.as_mut() {
            if self.ridx % *freq == 0 {
                cont.collect_obs_values(&mut self.trace_buf);
                sink.write_record(self.ridx, &self.trace_buf)?;
            }
        }
        if let Some((sink, freq)) = self.wlk_sink.as_mut() {
            if self.ridx % *freq == 0 {
                sink.write_record(self.ridx, self.walker.x())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SEED: u64 = 5649871;

    #[derive(Clone)]
    struct One {
        ndim: usize,
    }

    impl ObservableFunction for One {
        fn ndim(&self) -> usize {
            self.ndim
        }

        fn nobs(&self) -> usize {
            1
        }

        fn compute_values(&self, _x: &[f64], _changed: &[bool], out: &mut [f64]) {
            out[0] = 1.0;
        }

        fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
            Box::new(self.clone())
        }
    }

    #[derive(Clone)]
    struct XSquared {
        ndim: usize,
    }

    impl ObservableFunction for XSquared {
        fn ndim(&self) -> usize {
            self.ndim
        }

        fn nobs(&self) -> usize {
            1
        }

        fn compute_values(&self, x: &[f64], _changed: &[bool], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }

        fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
            Box::new(self.clone())
        }
    }

    #[derive(Clone)]
    struct Gaussian {
        ndim: usize,
    }

    impl SamplingFunction for Gaussian {
        fn ndim(&self) -> usize {
            self.ndim
        }

        fn nproto(&self) -> usize {
            1
        }

        fn proto_values(&self, x: &[f64], proto: &mut [f64]) {
            proto[0] = x.iter().map(|v| v * v).sum();
        }

        fn acceptance(&self, proto_old: &[f64], proto_new: &[f64]) -> f64 {
            (proto_old[0] - proto_new[0]).exp()
        }

        fn clone_boxed(&self) -> Box<dyn SamplingFunction> {
            Box::new(self.clone())
        }
    }

    #[derive(Clone)]
    struct CountingCallback {
        ndim: usize,
        calls: Rc<RefCell<(usize, usize)>>, // (total, accepted)
    }

    impl MoveCallback for CountingCallback {
        fn ndim(&self) -> usize {
            self.ndim
        }

        fn on_move(&mut self, _x: &[f64], accepted: bool) {
            let mut calls = self.calls.borrow_mut();
            calls.0 += 1;
            if accepted {
                calls.1 += 1;
            }
        }

        fn clone_boxed(&self) -> Box<dyn MoveCallback> {
            Box::new(self.clone())
        }
    }

    #[derive(Clone)]
    struct VecSink {
        records: Rc<RefCell<Vec<(usize, Vec<f64>)>>>,
    }

    impl TraceSink for VecSink {
        fn write_record(&mut self, step: usize, values: &[f64]) -> Result<(), McintError> {
            self.records.borrow_mut().push((step, values.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_uniform_integration_of_constant_gives_volume() {
        let mut mci = MonteCarloIntegrator::new(2).set_seed(SEED);
        mci.set_range(0.0, 2.0);
        mci.add_observable_default(One { ndim: 2 }).unwrap();

        let result = mci.integrate(1000, false, false).unwrap();
        assert_abs_diff_eq!(result.average[0], 4.0, epsilon = 1e-10);
        assert_abs_diff_eq!(result.error[0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_uniform_integration_of_x_squared() {
        let mut mci = MonteCarloIntegrator::new(1).set_seed(SEED);
        mci.set_range(-1.0, 1.0);
        mci.add_observable_default(XSquared { ndim: 1 }).unwrap();

        // volume 2 times the mean of x^2 over [-1, 1], which is 1/3
        let result = mci.integrate(20_000, false, false).unwrap();
        assert!(result.error[0] > 0.0);
        assert!(
            (result.average[0] - 2.0 / 3.0).abs() < 3.0 * result.error[0],
            "estimate {} +- {} is off the exact 2/3",
            result.average[0],
            result.error[0]
        );
    }

    #[test]
    fn test_tuning_reaches_target_acceptance_rate() {
        let mut mci = MonteCarloIntegrator::new(1).set_seed(SEED);
        mci.set_range(-10.0, 10.0);
        mci.add_sampling_function(Gaussian { ndim: 1 }).unwrap();
        mci.add_observable_default(XSquared { ndim: 1 }).unwrap();

        mci.integrate(1000, true, false).unwrap();
        let rate = mci.acceptance_rate();
        assert!(
            (rate - mci.target_acceptance_rate()).abs() < 0.1,
            "main run acceptance rate {} missed the target {}",
            rate,
            mci.target_acceptance_rate()
        );
    }

    #[test]
    fn test_configuration_round_trips() {
        let mut mci = MonteCarloIntegrator::new(3).set_seed(7);
        assert_eq!(mci.seed(), 7);
        assert_eq!(mci.ndim(), 3);

        mci.set_range_per_dim(&[0.0, -1.0, 2.0], &[1.0, 1.0, 4.0]);
        assert_eq!(mci.lbound(), &[0.0, -1.0, 2.0]);
        assert_eq!(mci.ubound(), &[1.0, 1.0, 4.0]);
        assert_abs_diff_eq!(mci.volume(), 4.0, epsilon = 1e-12);

        mci.set_mrt2_step(&[0.2, 0.3, 0.4]);
        assert_eq!(mci.mrt2_step(), &[0.2, 0.3, 0.4]);

        mci.set_target_acceptance_rate(0.35);
        assert_abs_diff_eq!(mci.target_acceptance_rate(), 0.35, epsilon = 1e-15);

        mci.set_x(&[0.5, 0.0, 3.0]);
        assert_eq!(mci.x(), &[0.5, 0.0, 3.0]);

        assert_eq!(mci.acceptance_rate(), 0.0, "no steps taken yet");
    }

    #[test]
    fn test_registration_validates_dimensions() {
        let mut mci = MonteCarloIntegrator::new(2);
        let err = mci.add_sampling_function(Gaussian { ndim: 3 }).unwrap_err();
        assert!(matches!(
            err,
            McintError::DimensionMismatch {
                kind: "sampling function",
                expected: 2,
                found: 3
            }
        ));
        let err = mci.add_observable_default(XSquared { ndim: 1 }).unwrap_err();
        assert!(matches!(
            err,
            McintError::DimensionMismatch {
                kind: "observable",
                ..
            }
        ));
        let err = mci
            .add_callback(CountingCallback {
                ndim: 5,
                calls: Rc::new(RefCell::new((0, 0))),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            McintError::DimensionMismatch { kind: "callback", .. }
        ));
    }

    #[test]
    fn test_equilibration_requires_error_bars() {
        let mut mci = MonteCarloIntegrator::new(1);
        let err = mci
            .add_observable(
                XSquared { ndim: 1 },
                ObservableSettings {
                    blocksize: 0,
                    ..ObservableSettings::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, McintError::EquilibrationNeedsErrorBars));
    }

    #[test]
    fn test_callbacks_fire_once_per_step_plus_initial() {
        let calls = Rc::new(RefCell::new((0, 0)));
        let mut mci = MonteCarloIntegrator::new(1).set_seed(SEED);
        mci.set_range(-5.0, 5.0);
        mci.add_sampling_function(Gaussian { ndim: 1 }).unwrap();
        mci.add_observable_default(XSquared { ndim: 1 }).unwrap();
        mci.add_callback(CountingCallback {
            ndim: 1,
            calls: Rc::clone(&calls),
        })
        .unwrap();

        mci.integrate(100, false, false).unwrap();
        let (total, accepted) = *calls.borrow();
        assert_eq!(total, 101, "one initial call plus one per step");
        assert!(accepted >= 1, "the initial call always reports a move");
    }

    #[test]
    fn test_trace_sinks_respect_frequency() {
        let obs_records = Rc::new(RefCell::new(Vec::new()));
        let wlk_records = Rc::new(RefCell::new(Vec::new()));

        let mut mci = MonteCarloIntegrator::new(2).set_seed(SEED);
        mci.set_range(0.0, 1.0);
        mci.add_observable_default(One { ndim: 2 }).unwrap();
        mci.set_observable_sink(
            Box::new(VecSink {
                records: Rc::clone(&obs_records),
            }),
            3,
        );
        mci.set_walker_sink(
            Box::new(VecSink {
                records: Rc::clone(&wlk_records),
            }),
            5,
        );

        mci.integrate(10, false, false).unwrap();

        let obs = obs_records.borrow();
        let steps: Vec<usize> = obs.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![0, 3, 6, 9]);
        assert!(obs.iter().all(|(_, v)| v.len() == 1));

        let wlk = wlk_records.borrow();
        let steps: Vec<usize> = wlk.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![0, 5]);
        assert!(wlk.iter().all(|(_, v)| v.len() == 2));
    }

    #[test]
    fn test_walk_state_persists_across_runs() {
        let mut mci = MonteCarloIntegrator::new(2).set_seed(SEED);
        mci.set_range(-3.0, 3.0);
        mci.add_sampling_function(Gaussian { ndim: 2 }).unwrap();
        mci.add_observable_default(XSquared { ndim: 2 }).unwrap();
        mci.set_mrt2_step(&[0.5, 0.5]);

        mci.integrate(200, false, false).unwrap();
        let x_after_first = mci.x().to_vec();
        mci.integrate(200, false, false).unwrap();
        assert_ne!(
            mci.x(),
            x_after_first.as_slice(),
            "the second run continues the walk"
        );
        for d in 0..2 {
            assert!(mci.x()[d] >= mci.lbound()[d] && mci.x()[d] <= mci.ubound()[d]);
        }
    }

    #[test]
    fn test_clear_operations_empty_the_registries() {
        let mut mci = MonteCarloIntegrator::new(1);
        mci.add_sampling_function(Gaussian { ndim: 1 }).unwrap();
        mci.add_observable_default(XSquared { ndim: 1 }).unwrap();
        mci.add_callback(CountingCallback {
            ndim: 1,
            calls: Rc::new(RefCell::new((0, 0))),
        })
        .unwrap();
        assert_eq!(mci.n_sampling_functions(), 1);
        assert_eq!(mci.n_observables(), 1);
        assert_eq!(mci.obs_dim(), 1);

        mci.clear_sampling_functions();
        mci.clear_observables();
        mci.clear_callbacks();
        assert_eq!(mci.n_sampling_functions(), 0);
        assert_eq!(mci.n_observables(), 0);
        assert_eq!(mci.obs_dim(), 0);
    }

    #[test]
    fn test_fixed_decorrelation_burns_without_accumulating() {
        let mut mci = MonteCarloIntegrator::new(1).set_seed(SEED);
        mci.set_range(-5.0, 5.0);
        mci.add_sampling_function(Gaussian { ndim: 1 }).unwrap();
        mci.add_observable_default(XSquared { ndim: 1 }).unwrap();
        mci.set_decorrelation_steps(Some(500));
        mci.set_x(&[4.0]);

        let result = mci.integrate(2000, true, true).unwrap();
        // after tuning and a 500 step burn the walk samples the Gaussian
        assert!(
            (result.average[0] - 0.5).abs() < 4.0 * result.error[0],
            "estimate {} +- {} is far from 0.5",
            result.average[0],
            result.error[0]
        );
    }
}
