//! Error type shared across the crate.
//!
//! Configuration problems are reported at registration time and leave the
//! engine unchanged; protocol violations indicate misuse of the
//! allocate/accumulate/finalize lifecycle. Step-tuning non-convergence is
//! deliberately *not* an error: it is logged as a warning and the run
//! proceeds with the last computed step.

use thiserror::Error;

/// All failure modes of the integration engine and its containers.
#[derive(Error, Debug)]
pub enum McintError {
    /// A plugin declares a different input dimensionality than the walk.
    #[error("{kind} input dimension {found} does not match the walk dimension {expected}")]
    DimensionMismatch {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    /// The skip cadence of an observable must be at least 1.
    #[error("skip interval must be at least 1")]
    ZeroSkip,

    /// A blocked accumulator needs a block size of at least 1.
    #[error("block size must be at least 1")]
    ZeroBlockSize,

    /// Automatic equilibration needs error bars, i.e. a block size > 0.
    #[error("automatic equilibration requires an observable with error estimation (blocksize > 0)")]
    EquilibrationNeedsErrorBars,

    /// `allocate` was called with zero steps.
    #[error("number of steps to allocate must be at least 1")]
    EmptyAllocation,

    /// `accumulate` was called more often than the allocated step count.
    #[error("accumulate was called more times than the allocated number of steps")]
    AccumulationOverflow,

    /// `finalize` was called before every allocated step was accumulated.
    #[error("finalize was called after {accumulated} of {allocated} allocated steps")]
    IncompleteAccumulation { accumulated: usize, allocated: usize },

    /// `estimate` was called on data that has not been finalized.
    #[error("estimate requires finalized accumulator data")]
    NotFinalized,

    /// A trace sink failed to write or flush.
    #[error("trace sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}
