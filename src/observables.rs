/*!
Observable plugins and the container that aggregates their accumulators.

## Overview

An observable maps the walker position to an `nobs`-length result vector.
Each registered observable is bound to one accumulator (the storage policy)
and one estimator (the statistical model); the container owns these
bindings, fans the per-step protocol out to every entry and assembles the
final per-dimension averages and errors at cumulative offsets in
registration order.
*/

use ndarray::{s, Array1};

use crate::accumulators::Accumulator;
use crate::error::McintError;
use crate::estimators::EstimatorFn;

/**
A function of the walker position, evaluated during sampling.

The engine owns registered observables outright;
[`clone_boxed`](ObservableFunction::clone_boxed) produces the independent
copies it needs, for example when tracking equilibration.

# Examples

```
use mcint::observables::ObservableFunction;

#[derive(Clone)]
struct XSquared;

impl ObservableFunction for XSquared {
    fn ndim(&self) -> usize {
        1
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

let obs = XSquared;
let mut out = [0.0];
obs.compute_values(&[3.0], &[true], &mut out);
assert_eq!(out[0], 9.0);
```
*/
pub trait ObservableFunction {
    /// Input dimensionality the observable expects.
    fn ndim(&self) -> usize;

    /// Output dimensionality of the observable.
    fn nobs(&self) -> usize;

    /// Evaluates the observable at `x`, writing into `out`.
    ///
    /// `out` still holds the previously computed values and `changed` marks
    /// the input dimensions that moved since then, so implementations may
    /// update only the affected outputs.
    fn compute_values(&self, x: &[f64], changed: &[bool], out: &mut [f64]);

    /// Returns an independent copy with identical configuration.
    fn clone_boxed(&self) -> Box<dyn ObservableFunction>;
}

struct ObservableEntry {
    accu: Box<dyn Accumulator>,
    estim: EstimatorFn,
    flag_equil: bool,
}

/// Ordered collection of (accumulator, estimator, equilibration flag)
/// bindings, one per registered observable.
#[derive(Default)]
pub struct ObservableContainer {
    entries: Vec<ObservableEntry>,
    nobsdim: usize,
}

impl ObservableContainer {
    /// Number of registered observables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no observable is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total output dimension, the sum over all entries.
    pub fn nobs_dim(&self) -> usize {
        self.nobsdim
    }

    /// Stores a new (accumulator, estimator, equilibration) binding.
    pub fn add_observable(
        &mut self,
        accu: Box<dyn Accumulator>,
        estim: EstimatorFn,
        needs_equilibration: bool,
    ) {
        self.nobsdim += accu.nobs();
        self.entries.push(ObservableEntry {
            accu,
            estim,
            flag_equil: needs_equilibration,
        });
    }

    /// Allocates every accumulator for `nsteps` sampling steps.
    pub fn allocate(&mut self, nsteps: usize) -> Result<(), McintError> {
        for entry in &mut self.entries {
            entry.accu.allocate(nsteps)?;
        }
        Ok(())
    }

    /// Feeds one sampling step to every accumulator.
    pub fn accumulate(&mut self, x: &[f64], moved: bool, changed: &[bool]) -> Result<(), McintError> {
        for entry in &mut self.entries {
            entry.accu.accumulate(x, moved, changed)?;
        }
        Ok(())
    }

    /// Finalizes every accumulator.
    pub fn finalize(&mut self) -> Result<(), McintError> {
        for entry in &mut self.entries {
            entry.accu.finalize()?;
        }
        Ok(())
    }

    /// Applies each entry's estimator to its finalized storage and collects
    /// averages and errors at cumulative dimension offsets.
    pub fn estimate(&self) -> Result<(Array1<f64>, Array1<f64>), McintError> {
        let mut avg = Array1::zeros(self.nobsdim);
        let mut err = Array1::zeros(self.nobsdim);
        let mut offset = 0;
        for entry in &self.entries {
            if !entry.accu.finalized() {
                return Err(McintError::NotFinalized);
            }
            let (obs_avg, obs_err) = (entry.estim)(entry.accu.stored_data());
            let nobs = entry.accu.nobs();
            avg.slice_mut(s![offset..offset + nobs]).assign(&obs_avg);
            err.slice_mut(s![offset..offset + nobs]).assign(&obs_err);
            offset += nobs;
        }
        Ok((avg, err))
    }

    /// Appends the most recently evaluated values of every observable to
    /// `buf`, in registration order.
    pub fn collect_obs_values(&self, buf: &mut Vec<f64>) {
        buf.clear();
        for entry in &self.entries {
            buf.extend_from_slice(entry.accu.obs_values());
        }
    }

    /// Independent copies of the observables flagged as needing
    /// equilibration tracking.
    pub fn equilibration_functions(&self) -> Vec<Box<dyn ObservableFunction>> {
        self.entries
            .iter()
            .filter(|entry| entry.flag_equil)
            .map(|entry| entry.accu.obs_function().clone_boxed())
            .collect()
    }

    /// Resets every accumulator to its post-allocate state.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.accu.reset();
        }
    }

    /// Frees every accumulator's storage.
    pub fn deallocate(&mut self) {
        for entry in &mut self.entries {
            entry.accu.deallocate();
        }
    }

    /// Drops all registered observables.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.nobsdim = 0;
    }
}
