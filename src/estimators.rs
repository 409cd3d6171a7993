/*!
Average and error estimation over accumulated samples.

## Overview

Three statistical models, each in a 1-D and a multi-dimensional form:

* **Uncorrelated**: `avg = mean(x)`, `err = sqrt(var / n)` with the
  unbiased variance. Valid for independent samples only.
* **Block**: the data is split into near-equal consecutive blocks;
  `avg = mean(block means)`, `err = std(block means) / sqrt(nblocks)`.
  Whether the block size exceeds the autocorrelation time is the caller's
  responsibility.
* **Correlated**: automatic blocking. Block sizes double from 1 upward and
  the blocked error is recomputed at every level; once it stabilizes the
  walk stops and the stabilized estimate is reported. The stabilization
  threshold ([`CORR_STABILITY_TOL`]) and the smallest number of blocks the
  ladder keeps ([`CORR_MIN_BLOCKS`]) are tunable constants; if no plateau
  is found the estimate from the largest tested block size is returned as
  the conservative choice.

All estimators accept the degenerate single-sample (or single-block) case
by reporting zero error, and panic on empty input.
*/

use ndarray::{Array1, ArrayView2};
use num_traits::Float;

/// Signature of the per-observable estimators bound at registration time.
pub type EstimatorFn = for<'a> fn(ArrayView2<'a, f64>) -> (Array1<f64>, Array1<f64>);

/// Smallest number of blocks the automatic blocking ladder descends to.
pub const CORR_MIN_BLOCKS: usize = 64;

/// Relative change of the blocked error between consecutive ladder levels
/// below which the error is considered stabilized.
pub const CORR_STABILITY_TOL: f64 = 0.1;

/// Mean and standard error of the mean, assuming independent samples.
///
/// # Panics
///
/// Panics if `x` is empty.
pub fn uncorrelated_estimate<T: Float>(x: &[T]) -> (T, T) {
    assert!(!x.is_empty(), "cannot estimate from an empty sample");
    let n = T::from(x.len()).unwrap();
    let avg = x.iter().fold(T::zero(), |acc, &v| acc + v) / n;
    if x.len() < 2 {
        return (avg, T::zero());
    }
    let dev2 = x
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - avg) * (v - avg));
    let err = (dev2 / ((n - T::one()) * n)).sqrt();
    (avg, err)
}

/// Blocked mean and error: the mean of `nblocks` near-equal consecutive
/// block means, with the standard error computed over the block means.
///
/// # Panics
///
/// Panics if `x` is empty, `nblocks` is zero or `nblocks` exceeds the
/// sample length.
pub fn block_estimate<T: Float>(x: &[T], nblocks: usize) -> (T, T) {
    assert!(!x.is_empty(), "cannot estimate from an empty sample");
    assert!(nblocks > 0, "need at least one block");
    assert!(
        nblocks <= x.len(),
        "cannot split {} samples into {} blocks",
        x.len(),
        nblocks
    );
    let means = block_means(x, nblocks);
    uncorrelated_estimate(&means)
}

/// Autocorrelation-aware mean and error via automatic blocking.
///
/// Doubles the block size from 1 while at least [`CORR_MIN_BLOCKS`] blocks
/// remain, stopping early once the blocked error changes by less than
/// [`CORR_STABILITY_TOL`] relative to the previous level.
///
/// # Panics
///
/// Panics if `x` is empty.
pub fn correlated_estimate<T: Float>(x: &[T]) -> (T, T) {
    let n = x.len();
    let tol = T::from(CORR_STABILITY_TOL).unwrap();

    // block size 1 is the plain uncorrelated estimate
    let (mut avg, mut err) = uncorrelated_estimate(x);
    let mut bs = 2;
    while n / bs >= CORR_MIN_BLOCKS {
        let (next_avg, next_err) = block_estimate(x, n / bs);
        let plateau = err > T::zero() && ((next_err - err) / err).abs() < tol;
        avg = next_avg;
        err = next_err;
        if plateau {
            return (avg, err);
        }
        bs *= 2;
    }
    (avg, err)
}

/// Column-wise [`uncorrelated_estimate`] over stored samples.
///
/// # Panics
///
/// Panics if `data` has no rows.
pub fn multidim_uncorrelated_estimate<T: Float>(data: ArrayView2<'_, T>) -> (Array1<T>, Array1<T>) {
    assert!(data.nrows() > 0, "cannot estimate from empty storage");
    let mut avg = Vec::with_capacity(data.ncols());
    let mut err = Vec::with_capacity(data.ncols());
    for col in data.columns() {
        let (a, e) = uncorrelated_estimate(&col.to_vec());
        avg.push(a);
        err.push(e);
    }
    (Array1::from_vec(avg), Array1::from_vec(err))
}

/// Column-wise [`block_estimate`] over stored samples.
///
/// # Panics
///
/// Panics under the same conditions as [`block_estimate`].
pub fn multidim_block_estimate<T: Float>(
    data: ArrayView2<'_, T>,
    nblocks: usize,
) -> (Array1<T>, Array1<T>) {
    assert!(data.nrows() > 0, "cannot estimate from empty storage");
    let mut avg = Vec::with_capacity(data.ncols());
    let mut err = Vec::with_capacity(data.ncols());
    for col in data.columns() {
        let (a, e) = block_estimate(&col.to_vec(), nblocks);
        avg.push(a);
        err.push(e);
    }
    (Array1::from_vec(avg), Array1::from_vec(err))
}

/// Column-wise [`correlated_estimate`] over stored samples.
///
/// # Panics
///
/// Panics if `data` has no rows.
pub fn multidim_correlated_estimate<T: Float>(data: ArrayView2<'_, T>) -> (Array1<T>, Array1<T>) {
    assert!(data.nrows() > 0, "cannot estimate from empty storage");
    let mut avg = Vec::with_capacity(data.ncols());
    let mut err = Vec::with_capacity(data.ncols());
    for col in data.columns() {
        let (a, e) = correlated_estimate(&col.to_vec());
        avg.push(a);
        err.push(e);
    }
    (Array1::from_vec(avg), Array1::from_vec(err))
}

/// Trivial estimator for storage that already holds the final result in
/// its first row, as the simple accumulator's does. Reports zero error.
///
/// # Panics
///
/// Panics if `data` has no rows.
pub fn simple_estimate<T: Float>(data: ArrayView2<'_, T>) -> (Array1<T>, Array1<T>) {
    assert!(data.nrows() > 0, "cannot estimate from empty storage");
    let avg = data.row(0).to_owned();
    let err = Array1::zeros(avg.len());
    (avg, err)
}

/// Binds the estimator matching an observable's registration: no error
/// bars gives the trivial estimator, otherwise the correlated flag picks
/// between automatic blocking and the plain uncorrelated model.
pub fn create_estimator(correlated: bool, with_errors: bool) -> EstimatorFn {
    if !with_errors {
        simple_estimate
    } else if correlated {
        multidim_correlated_estimate
    } else {
        multidim_uncorrelated_estimate
    }
}

/// Means of `nblocks` near-equal consecutive chunks covering all of `x`.
fn block_means<T: Float>(x: &[T], nblocks: usize) -> Vec<T> {
    let base = x.len() / nblocks;
    let rem = x.len() % nblocks;
    let mut means = Vec::with_capacity(nblocks);
    let mut start = 0;
    for b in 0..nblocks {
        let len = base + usize::from(b < rem);
        let block = &x[start..start + len];
        let sum = block.iter().fold(T::zero(), |acc, &v| acc + v);
        means.push(sum / T::from(len).unwrap());
        start += len;
    }
    means
}
