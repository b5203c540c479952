//! Per-region accumulation of fitted parameter vectors
//!
//! Every successful fit can be recorded against the region cell it was
//! obtained in, building an empirical distribution of nominal parameters
//! per operating region. Centroid and covariance are computed on demand
//! from the raw samples and become stale the instant another sample is
//! added, so callers recompute after each `add`.
//!
//! Growth is unbounded on purpose: this collector serves batch/offline
//! reporting, not a bounded online cache.

use std::collections::HashMap;

use crate::grid::RegionCell;
use crate::model::Theta;
use crate::{Error, Result};

/// Sample mean of a cell's parameter vectors, `(r0, rc_resistance, capacity)` order.
pub type Centroid = [f64; 3];

/// Sample covariance matrix of a cell's parameter vectors.
pub type CovarianceMatrix = [[f64; 3]; 3];

/// Insertion-ordered parameter samples keyed by region cell.
#[derive(Debug, Default, Clone)]
pub struct RegionStatistics {
    cells: HashMap<RegionCell, Vec<Theta>>,
}

impl RegionStatistics {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fitted vector to the cell's sample list, creating the
    /// list on first use. No deduplication.
    pub fn add(&mut self, cell: RegionCell, theta: Theta) {
        self.cells.entry(cell).or_default().push(theta);
    }

    /// Raw stored vectors for a cell, insertion order preserved.
    #[must_use]
    pub fn samples(&self, cell: RegionCell) -> &[Theta] {
        self.cells.get(&cell).map_or(&[], Vec::as_slice)
    }

    /// Number of samples recorded for a cell.
    #[must_use]
    pub fn len(&self, cell: RegionCell) -> usize {
        self.samples(cell).len()
    }

    /// True when no cell holds any sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(Vec::is_empty)
    }

    /// Cells that hold at least one sample, in arbitrary order.
    pub fn cells(&self) -> impl Iterator<Item = RegionCell> + '_ {
        self.cells
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(cell, _)| *cell)
    }

    /// Arithmetic mean of the cell's samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCell`] when the cell holds no samples.
    pub fn centroid(&self, cell: RegionCell) -> Result<Centroid> {
        let samples = self.samples(cell);
        if samples.is_empty() {
            return Err(Error::EmptyCell(cell));
        }
        let n = samples.len() as f64;
        let mut mean = [0.0; 3];
        for theta in samples {
            let values = theta.as_array();
            for i in 0..3 {
                mean[i] += values[i] / n;
            }
        }
        Ok(mean)
    }

    /// Sample covariance matrix of the cell's samples (`n - 1` divisor).
    ///
    /// A single-sample cell yields the zero matrix by convention.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCell`] when the cell holds no samples.
    pub fn covariance(&self, cell: RegionCell) -> Result<CovarianceMatrix> {
        let samples = self.samples(cell);
        if samples.is_empty() {
            return Err(Error::EmptyCell(cell));
        }
        let mut matrix = [[0.0; 3]; 3];
        if samples.len() < 2 {
            return Ok(matrix);
        }
        let mean = self.centroid(cell)?;
        let divisor = (samples.len() - 1) as f64;
        for theta in samples {
            let values = theta.as_array();
            for i in 0..3 {
                for j in 0..3 {
                    matrix[i][j] += (values[i] - mean[i]) * (values[j] - mean[j]) / divisor;
                }
            }
        }
        Ok(matrix)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn theta(r0: f64, rc: f64, c: f64) -> Theta {
        Theta {
            r0,
            rc_resistance: rc,
            capacity: c,
        }
    }

    #[test]
    fn test_samples_preserve_insertion_order() {
        let mut stats = RegionStatistics::new();
        let cell = RegionCell(1, 0);
        stats.add(cell, theta(0.05, 0.02, 2000.0));
        stats.add(cell, theta(0.06, 0.03, 1900.0));
        stats.add(cell, theta(0.05, 0.02, 2000.0)); // duplicates kept

        assert_eq!(stats.len(cell), 3);
        assert_eq!(stats.samples(cell)[1], theta(0.06, 0.03, 1900.0));
    }

    #[test]
    fn test_centroid_is_elementwise_mean() {
        let mut stats = RegionStatistics::new();
        let cell = RegionCell(0, 0);
        stats.add(cell, theta(0.04, 0.01, 1000.0));
        stats.add(cell, theta(0.06, 0.03, 2000.0));
        stats.add(cell, theta(0.05, 0.02, 3000.0));

        let centroid = stats.centroid(cell).unwrap();
        assert!((centroid[0] - 0.05).abs() < 1e-12);
        assert!((centroid[1] - 0.02).abs() < 1e-12);
        assert!((centroid[2] - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_covariance_matches_sample_formula() {
        let mut stats = RegionStatistics::new();
        let cell = RegionCell(2, 1);
        stats.add(cell, theta(0.04, 0.02, 1000.0));
        stats.add(cell, theta(0.06, 0.02, 3000.0));

        let cov = stats.covariance(cell).unwrap();
        // var(r0) = ((0.01)^2 + (0.01)^2) / 1
        assert!((cov[0][0] - 2e-4).abs() < 1e-15);
        // rc_resistance is constant
        assert_eq!(cov[1][1], 0.0);
        // cov(r0, capacity) = (0.01 * 1000 + 0.01 * 1000) / 1
        assert!((cov[0][2] - 20.0).abs() < 1e-9);
        // symmetry
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(cov[i][j], cov[j][i]);
            }
        }
    }

    #[test]
    fn test_single_sample_covariance_is_zero_matrix() {
        let mut stats = RegionStatistics::new();
        let cell = RegionCell(0, 1);
        stats.add(cell, theta(0.05, 0.02, 2000.0));

        assert_eq!(stats.covariance(cell).unwrap(), [[0.0; 3]; 3]);
    }

    #[test]
    fn test_empty_cell_queries_fail() {
        let stats = RegionStatistics::new();
        let cell = RegionCell(3, 3);
        assert!(matches!(stats.centroid(cell), Err(Error::EmptyCell(c)) if c == cell));
        assert!(matches!(stats.covariance(cell), Err(Error::EmptyCell(c)) if c == cell));
        assert!(stats.samples(cell).is_empty());
    }

    #[test]
    fn test_cells_lists_only_populated_cells() {
        let mut stats = RegionStatistics::new();
        stats.add(RegionCell(0, 0), theta(0.05, 0.02, 2000.0));
        stats.add(RegionCell(1, 2), theta(0.06, 0.02, 2100.0));

        let mut cells: Vec<RegionCell> = stats.cells().collect();
        cells.sort_by_key(|cell| (cell.0, cell.1));
        assert_eq!(cells, vec![RegionCell(0, 0), RegionCell(1, 2)]);
    }
}
