//! Post-run reporting
//!
//! The loop performs no presentation side effects; this module turns a
//! terminated run's recorded history and region statistics into a
//! serializable summary for external plotting, printing or persistence.

use serde::Serialize;

use crate::learning::LoopOutcome;
use crate::model::Theta;
use crate::stats::{Centroid, CovarianceMatrix};
use crate::Result;

/// Per-cell summary of the accumulated parameter distribution.
#[derive(Debug, Clone, Serialize)]
pub struct CellSummary {
    /// Region cell as `(soc bin, temperature bin)`
    pub cell: [usize; 2],
    /// Number of fits recorded in this cell
    pub sample_count: usize,
    /// Sample mean of the fitted vectors
    pub centroid: Centroid,
    /// Sample covariance of the fitted vectors
    pub covariance: CovarianceMatrix,
    /// The raw fitted vectors, insertion order preserved
    pub samples: Vec<Theta>,
}

/// Serializable summary of one identification run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Samples the loop processed
    pub samples_processed: usize,
    /// Fits attempted
    pub triggers: usize,
    /// Fits that failed and were skipped
    pub fit_failures: usize,
    /// The last applied parameter vector, if any fit succeeded
    pub final_theta: Option<Theta>,
    /// Full fit history in order
    pub theta_history: Vec<Theta>,
    /// Per-region distributions, sorted by cell for stable output
    pub cells: Vec<CellSummary>,
}

impl RunReport {
    /// Summarize a terminated run.
    ///
    /// # Errors
    ///
    /// Propagates statistics errors; cannot occur in practice because only
    /// populated cells are summarized.
    pub fn from_outcome(outcome: &LoopOutcome) -> Result<Self> {
        let mut cells = Vec::new();
        for cell in outcome.region_stats.cells() {
            cells.push(CellSummary {
                cell: [cell.0, cell.1],
                sample_count: outcome.region_stats.len(cell),
                centroid: outcome.region_stats.centroid(cell)?,
                covariance: outcome.region_stats.covariance(cell)?,
                samples: outcome.region_stats.samples(cell).to_vec(),
            });
        }
        cells.sort_by_key(|summary| summary.cell);

        Ok(Self {
            samples_processed: outcome.time_series.len(),
            triggers: outcome.triggers,
            fit_failures: outcome.fit_failures,
            final_theta: outcome.final_theta(),
            theta_history: outcome.theta_history.clone(),
            cells,
        })
    }

    /// Render the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Report`] when serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
