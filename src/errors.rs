//! Error types for configuration validation and failed integration runs.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while building a configuration or running an
/// integration.
///
/// Construction problems (misshaped tables, empty ranges) are reported before
/// any sampling happens. Runtime variants abort the affected block; degenerate
/// proposals and histogram underflow are handled locally and never surface
/// here.
#[derive(Error, Debug)]
pub enum McError {
    /// The degrees-of-freedom table does not match the variable tuple.
    #[error("degrees-of-freedom row {integrand} lists {found} pools but the configuration has {expected}")]
    DofShape {
        /// Index of the offending integrand.
        integrand: usize,
        /// Number of variable pools in the configuration.
        expected: usize,
        /// Number of entries found in the row.
        found: usize,
    },

    /// A pool was asked for more sample slots than it can hold.
    #[error("integrand {integrand} needs {needed} slots of pool {pool} but only {available} are available")]
    DofOverflow {
        /// Index of the offending integrand.
        integrand: usize,
        /// Index of the variable pool.
        pool: usize,
        /// Slots requested, reserved offset included.
        needed: usize,
        /// Slots the pool provides outside the scratch slot.
        available: usize,
    },

    /// The reserved offset leaves no room for samples and the scratch slot.
    #[error("offset {offset} must be smaller than the pool capacity minus one ({capacity} - 1)")]
    OffsetOutOfRange {
        /// Requested offset.
        offset: usize,
        /// Pool capacity.
        capacity: usize,
    },

    /// A configuration without variable pools cannot sample anything.
    #[error("the variable tuple is empty")]
    EmptyVariableTuple,

    /// A continuous pool over an empty or inverted interval.
    #[error("continuous range [{lower}, {upper}) is empty")]
    EmptyRange {
        /// Lower bound of the interval.
        lower: f64,
        /// Upper bound of the interval.
        upper: f64,
    },

    /// A discrete pool over an empty index set.
    #[error("discrete range [{lower}, {upper}] is empty")]
    EmptyDiscreteRange {
        /// Lower bound of the index set.
        lower: i64,
        /// Upper bound of the index set.
        upper: i64,
    },

    /// A momentum-shell pool with invalid physical parameters.
    #[error("momentum shell is invalid: dimension {dim}, Fermi momentum {k_fermi}, half width {delta_k}, cutoff {max_k}")]
    InvalidShell {
        /// Spatial dimension, 2 or 3.
        dim: usize,
        /// Center of the shell.
        k_fermi: f64,
        /// Half width of the shell.
        delta_k: f64,
        /// Magnitude cutoff.
        max_k: f64,
    },

    /// Composite pools require children that share offset and capacity.
    #[error("composite children disagree on offset or capacity")]
    CompositeShape,

    /// The normalization estimate of a block must be positive before any
    /// integrand estimate is divided by it.
    #[error("normalization estimate {value} is not positive after {neval} evaluations")]
    NonPositiveNormalization {
        /// Value of the normalization accumulator.
        value: f64,
        /// Evaluations performed in the block.
        neval: u64,
    },

    /// An integrand returned `inf` or `nan`; the block is aborted so that the
    /// adaptive maps are not poisoned.
    #[error("integrand {integrand} returned a non-finite value after {neval} evaluations")]
    NonFiniteIntegrand {
        /// Index of the offending integrand.
        integrand: usize,
        /// Evaluations performed when the value was seen.
        neval: u64,
    },

    /// The workers disagreed on the block layout during reduction.
    #[error("block reduction mismatch: expected {expected} blocks, reduced {found}")]
    BlockMismatch {
        /// Blocks the controller distributed.
        expected: usize,
        /// Blocks that reached the reduction.
        found: usize,
    },

    /// Invalid controller settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Writing a configuration snapshot failed.
    #[error("failed to persist the configuration snapshot to {path}: {reason}")]
    Snapshot {
        /// Target path of the snapshot.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

/// Convenience alias for results produced by this crate.
pub type McResult<T> = Result<T, McError>;
