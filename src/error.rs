//! Error types for celltwin
//!
//! Two failure classes matter in the hot path: configuration errors are
//! fatal at construction time, while estimation failures are recoverable
//! and handled locally by the learning loop (the twin keeps its previous
//! parameters and the stream continues).

use crate::grid::RegionCell;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Celltwin error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid construction-time configuration (missing bin edges, zero
    /// batch size, inverted parameter bounds, ...)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Measurement arrays of unequal length
    #[error("measurement stream mismatch: current has {current} samples, {name} has {other}")]
    StreamMismatch {
        /// Length of the current array (the reference input)
        current: usize,
        /// Name of the mismatched array
        name: &'static str,
        /// Length of the mismatched array
        other: usize,
    },

    /// A fit was requested on a window with no samples
    #[error("measurement window [{start}, {end}) is empty")]
    EmptyWindow {
        /// Window start index (inclusive)
        start: usize,
        /// Window end index (exclusive)
        end: usize,
    },

    /// Every restart of a multi-start fit was discarded (non-convergent or
    /// non-physical). Recoverable: callers keep the previous parameters.
    #[error("estimation failed: all {restarts} restarts discarded ({reason})")]
    EstimationFailed {
        /// Number of restarts attempted
        restarts: usize,
        /// Why the last inspected restart was discarded
        reason: String,
    },

    /// Centroid/covariance query against a region cell with no samples
    #[error("region cell {0} has no samples; add at least one fit before querying statistics")]
    EmptyCell(RegionCell),

    /// NaN or infinity propagated out of the twin state (fatal)
    #[error("numerical divergence: {0}")]
    NumericalDivergence(String),

    /// Report serialization error
    #[error("report serialization failed: {0}")]
    Report(#[from] serde_json::Error),
}
