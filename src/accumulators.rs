/*!
Sample accumulation for registered observables.

## Overview

An accumulator sits between the random walk and the estimators. It receives
every sampling step, including rejected ones, decides from its skip cadence
`nskip` whether the step counts, re-evaluates its observable only when an
input dimension actually changed since the last evaluation, and stores the
result according to its storage policy:

* [`SimpleAccumulator`] keeps a running sum only, O(1) memory, no error
  estimation possible.
* [`FullAccumulator`] stores every post-skip sample, O(N) memory, enables
  any estimator.
* [`BlockAccumulator`] aggregates consecutive samples into fixed-size
  blocks, one stored value per block.

The accumulation protocol is strict: `allocate(N)` must precede exactly `N`
calls to `accumulate`, after which `finalize` performs the end-of-run
normalization once. Violations are reported as
[`McintError`](crate::error::McintError) protocol errors.
*/

use ndarray::{aview1, s, Array2, ArrayView2};

use crate::error::McintError;
use crate::observables::ObservableFunction;

/// Common contract of all accumulator variants.
pub trait Accumulator {
    /// Reserves storage for exactly `nsteps` future sampling steps and
    /// resets all per-run state. Any previous allocation is dropped.
    fn allocate(&mut self, nsteps: usize) -> Result<(), McintError>;

    /// Feeds one sampling step. `moved` tells whether the walker actually
    /// moved, `changed` which dimensions did.
    fn accumulate(&mut self, x: &[f64], moved: bool, changed: &[bool]) -> Result<(), McintError>;

    /// Performs the end-of-run normalization. Legal only after exactly the
    /// allocated number of `accumulate` calls; repeated calls are no-ops.
    fn finalize(&mut self) -> Result<(), McintError>;

    /// Returns to the immediately-post-allocate state, keeping storage.
    fn reset(&mut self);

    /// Frees storage and resets. The accumulator must be allocated again
    /// before further use.
    fn deallocate(&mut self);

    /// Output dimension of the bound observable.
    fn nobs(&self) -> usize;

    /// Input dimension of the bound observable.
    fn ndim(&self) -> usize;

    /// Number of steps of the current allocation, zero when unallocated.
    fn nsteps(&self) -> usize;

    /// Skip cadence: every how many steps one sample is taken.
    fn nskip(&self) -> usize;

    /// Number of meaningful stored rows.
    fn n_stored(&self) -> usize;

    /// View of the stored rows, one row per stored sample or block.
    fn stored_data(&self) -> ArrayView2<'_, f64>;

    /// The bound observable function.
    fn obs_function(&self) -> &dyn ObservableFunction;

    /// Most recently evaluated observable values.
    fn obs_values(&self) -> &[f64];

    /// True once `finalize` has run for the current accumulation.
    fn finalized(&self) -> bool;
}

/// State shared by every variant: the bound observable, the step/skip
/// bookkeeping and the lazy-evaluation flags.
struct AccumulatorCore {
    obs: Box<dyn ObservableFunction>,
    nobs: usize,
    ndim: usize,
    nskip: usize,
    nsteps: usize,
    stepidx: usize,
    skipidx: usize,
    flag_eval: bool,
    flag_final: bool,
    flags_xchanged: Vec<bool>,
    obs_values: Vec<f64>,
}

impl AccumulatorCore {
    fn new(obs: Box<dyn ObservableFunction>, nskip: usize) -> Result<Self, McintError> {
        if nskip == 0 {
            return Err(McintError::ZeroSkip);
        }
        let nobs = obs.nobs();
        let ndim = obs.ndim();
        Ok(Self {
            obs,
            nobs,
            ndim,
            nskip,
            nsteps: 0,
            stepidx: 0,
            skipidx: 0,
            flag_eval: true,
            flag_final: false,
            flags_xchanged: Vec::new(),
            obs_values: vec![0.0; nobs],
        })
    }

    /// Accumulation events of the current allocation.
    fn naccu(&self) -> usize {
        self.nsteps.div_ceil(self.nskip)
    }

    /// Records the new allocation size and primes the change flags so the
    /// first step evaluates fully. Returns the number of accumulation
    /// events the variant must be able to store.
    fn begin_allocation(&mut self, nsteps: usize) -> Result<usize, McintError> {
        if nsteps == 0 {
            return Err(McintError::EmptyAllocation);
        }
        self.nsteps = nsteps;
        self.flags_xchanged = vec![true; self.ndim];
        Ok(self.naccu())
    }

    /// Advances the protocol by one step. Returns whether the variant must
    /// store the current observable values.
    fn step(&mut self, x: &[f64], moved: bool, changed: &[bool]) -> Result<bool, McintError> {
        if self.stepidx == self.nsteps {
            return Err(McintError::AccumulationOverflow);
        }

        if moved {
            // evaluation becomes due; remember which dimensions moved,
            // merging across skipped steps until the next evaluation
            self.flag_eval = true;
            for (flag, &c) in self.flags_xchanged.iter_mut().zip(changed.iter()) {
                *flag |= c;
            }
        }

        let store = self.skipidx == 0;
        if store && self.flag_eval {
            self.obs
                .compute_values(x, &self.flags_xchanged, &mut self.obs_values);
            self.flag_eval = false;
            self.flags_xchanged.fill(false);
        }

        self.stepidx += 1;
        self.skipidx += 1;
        if self.skipidx == self.nskip {
            self.skipidx = 0;
        }
        Ok(store)
    }

    /// Validates the finalize call. Returns whether the variant must run
    /// its normalization (once per accumulation, and only if allocated).
    fn check_finalize(&mut self) -> Result<bool, McintError> {
        if self.stepidx != self.nsteps {
            return Err(McintError::IncompleteAccumulation {
                accumulated: self.stepidx,
                allocated: self.nsteps,
            });
        }
        let run = !self.flag_final && self.nsteps > 0;
        self.flag_final = true;
        Ok(run)
    }

    fn reset_counters(&mut self) {
        // change flags are left alone: cached observable values stay valid
        // until the walker actually moves again
        self.stepidx = 0;
        self.skipidx = 0;
        self.flag_eval = true;
        self.flag_final = false;
    }

    fn clear_allocation(&mut self) {
        self.flags_xchanged = Vec::new();
        self.nsteps = 0;
    }
}

/// O(1)-memory accumulator keeping only a running sum, turned into the
/// sample mean at finalize. Reports no error bars.
pub struct SimpleAccumulator {
    core: AccumulatorCore,
    data: Array2<f64>,
}

impl std::fmt::Debug for SimpleAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleAccumulator").finish_non_exhaustive()
    }
}

impl SimpleAccumulator {
    pub fn new(obs: Box<dyn ObservableFunction>, nskip: usize) -> Result<Self, McintError> {
        Ok(Self {
            core: AccumulatorCore::new(obs, nskip)?,
            data: Array2::zeros((0, 0)),
        })
    }
}

impl Accumulator for SimpleAccumulator {
    fn allocate(&mut self, nsteps: usize) -> Result<(), McintError> {
        self.deallocate();
        self.core.begin_allocation(nsteps)?;
        self.data = Array2::zeros((1, self.core.nobs));
        Ok(())
    }

    fn accumulate(&mut self, x: &[f64], moved: bool, changed: &[bool]) -> Result<(), McintError> {
        if self.core.step(x, moved, changed)? {
            for (slot, v) in self
                .data
                .row_mut(0)
                .iter_mut()
                .zip(self.core.obs_values.iter())
            {
                *slot += v;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), McintError> {
        if self.core.check_finalize()? {
            let norm = 1.0 / self.core.naccu() as f64;
            self.data.row_mut(0).mapv_inplace(|v| v * norm);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.data.fill(0.0);
        self.core.reset_counters();
    }

    fn deallocate(&mut self) {
        self.reset();
        self.data = Array2::zeros((0, 0));
        self.core.clear_allocation();
    }

    fn nobs(&self) -> usize {
        self.core.nobs
    }

    fn ndim(&self) -> usize {
        self.core.ndim
    }

    fn nsteps(&self) -> usize {
        self.core.nsteps
    }

    fn nskip(&self) -> usize {
        self.core.nskip
    }

    fn n_stored(&self) -> usize {
        self.data.nrows()
    }

    fn stored_data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    fn obs_function(&self) -> &dyn ObservableFunction {
        &*self.core.obs
    }

    fn obs_values(&self) -> &[f64] {
        &self.core.obs_values
    }

    fn finalized(&self) -> bool {
        self.core.flag_final
    }
}

/// O(N)-memory accumulator storing every post-skip sample individually.
pub struct FullAccumulator {
    core: AccumulatorCore,
    data: Array2<f64>,
    storeidx: usize,
}

impl FullAccumulator {
    pub fn new(obs: Box<dyn ObservableFunction>, nskip: usize) -> Result<Self, McintError> {
        Ok(Self {
            core: AccumulatorCore::new(obs, nskip)?,
            data: Array2::zeros((0, 0)),
            storeidx: 0,
        })
    }
}

impl Accumulator for FullAccumulator {
    fn allocate(&mut self, nsteps: usize) -> Result<(), McintError> {
        self.deallocate();
        let naccu = self.core.begin_allocation(nsteps)?;
        self.data = Array2::zeros((naccu, self.core.nobs));
        Ok(())
    }

    fn accumulate(&mut self, x: &[f64], moved: bool, changed: &[bool]) -> Result<(), McintError> {
        if self.core.step(x, moved, changed)? {
            self.data
                .row_mut(self.storeidx)
                .assign(&aview1(&self.core.obs_values));
            self.storeidx += 1;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), McintError> {
        // raw samples are already final
        self.core.check_finalize()?;
        Ok(())
    }

    fn reset(&mut self) {
        self.data.fill(0.0);
        self.storeidx = 0;
        self.core.reset_counters();
    }

    fn deallocate(&mut self) {
        self.reset();
        self.data = Array2::zeros((0, 0));
        self.core.clear_allocation();
    }

    fn nobs(&self) -> usize {
        self.core.nobs
    }

    fn ndim(&self) -> usize {
        self.core.ndim
    }

    fn nsteps(&self) -> usize {
        self.core.nsteps
    }

    fn nskip(&self) -> usize {
        self.core.nskip
    }

    fn n_stored(&self) -> usize {
        self.storeidx
    }

    fn stored_data(&self) -> ArrayView2<'_, f64> {
        self.data.slice(s![..self.storeidx, ..])
    }

    fn obs_function(&self) -> &dyn ObservableFunction {
        &*self.core.obs
    }

    fn obs_values(&self) -> &[f64] {
        &self.core.obs_values
    }

    fn finalized(&self) -> bool {
        self.core.flag_final
    }
}

/// O(N/blocksize)-memory accumulator aggregating consecutive samples into
/// fixed-size blocks, storing one mean per block. A trailing partial block
/// is normalized by the number of samples it actually received.
pub struct BlockAccumulator {
    core: AccumulatorCore,
    blocksize: usize,
    data: Array2<f64>,
    blockidx: usize,
    in_block: usize,
}

impl std::fmt::Debug for BlockAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAccumulator").finish_non_exhaustive()
    }
}

impl BlockAccumulator {
    pub fn new(
        obs: Box<dyn ObservableFunction>,
        blocksize: usize,
        nskip: usize,
    ) -> Result<Self, McintError> {
        if blocksize == 0 {
            return Err(McintError::ZeroBlockSize);
        }
        Ok(Self {
            core: AccumulatorCore::new(obs, nskip)?,
            blocksize,
            data: Array2::zeros((0, 0)),
            blockidx: 0,
            in_block: 0,
        })
    }
}

impl Accumulator for BlockAccumulator {
    fn allocate(&mut self, nsteps: usize) -> Result<(), McintError> {
        self.deallocate();
        let naccu = self.core.begin_allocation(nsteps)?;
        let nblocks = naccu.div_ceil(self.blocksize);
        self.data = Array2::zeros((nblocks, self.core.nobs));
        Ok(())
    }

    fn accumulate(&mut self, x: &[f64], moved: bool, changed: &[bool]) -> Result<(), McintError> {
        if self.core.step(x, moved, changed)? {
            let mut row = self.data.row_mut(self.blockidx);
            for (slot, v) in row.iter_mut().zip(self.core.obs_values.iter()) {
                *slot += v;
            }
            self.in_block += 1;
            if self.in_block == self.blocksize {
                let norm = 1.0 / self.blocksize as f64;
                row.mapv_inplace(|v| v * norm);
                self.blockidx += 1;
                self.in_block = 0;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), McintError> {
        if self.core.check_finalize()? && self.in_block > 0 {
            let norm = 1.0 / self.in_block as f64;
            self.data.row_mut(self.blockidx).mapv_inplace(|v| v * norm);
            self.blockidx += 1;
            self.in_block = 0;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.data.fill(0.0);
        self.blockidx = 0;
        self.in_block = 0;
        self.core.reset_counters();
    }

    fn deallocate(&mut self) {
        self.reset();
        self.data = Array2::zeros((0, 0));
        self.core.clear_allocation();
    }

    fn nobs(&self) -> usize {
        self.core.nobs
    }

    fn ndim(&self) -> usize {
        self.core.ndim
    }

    fn nsteps(&self) -> usize {
        self.core.nsteps
    }

    fn nskip(&self) -> usize {
        self.core.nskip
    }

    fn n_stored(&self) -> usize {
        self.blockidx + usize::from(self.in_block > 0)
    }

    fn stored_data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    fn obs_function(&self) -> &dyn ObservableFunction {
        &*self.core.obs
    }

    fn obs_values(&self) -> &[f64] {
        &self.core.obs_values
    }

    fn finalized(&self) -> bool {
        self.core.flag_final
    }
}

/// Selects the accumulator variant from the registration parameters:
/// `blocksize` 0 gives a [`SimpleAccumulator`], 1 a [`FullAccumulator`]
/// and anything larger a [`BlockAccumulator`] of that block size.
pub fn create_accumulator(
    obs: Box<dyn ObservableFunction>,
    blocksize: usize,
    nskip: usize,
) -> Result<Box<dyn Accumulator>, McintError> {
    match blocksize {
        0 => Ok(Box::new(SimpleAccumulator::new(obs, nskip)?)),
        1 => Ok(Box::new(FullAccumulator::new(obs, nskip)?)),
        _ => Ok(Box::new(BlockAccumulator::new(obs, blocksize, nskip)?)),
    }
}
