//! State-space discretization of the (soc, temperature) operating plane
//!
//! The grid partitions the plane into rectangular cells from configured
//! bin edges and reports when the twin's operating point crosses into a
//! different cell than the last one observed. Cell transitions are one of
//! the two re-estimation triggers of the learning loop.
//!
//! ## Boundary policy
//!
//! Bins are half-open `[edge[i], edge[i+1])`: a point exactly on an
//! interior edge deterministically lands in the higher-indexed bin.
//! Points outside the configured range are clamped to the nearest edge
//! cell rather than rejected, so a soc or temperature excursion past the
//! grid never aborts the stream.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Identifier of one discretized bin of the operating plane:
/// `(soc bin index, temperature bin index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionCell(pub usize, pub usize);

impl fmt::Display for RegionCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// Bin-edge configuration for the operating-plane grid.
///
/// Each edge vector lists the boundaries of the bins in increasing
/// order; `m` edges define `m - 1` bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Bin edges along the soc axis, strictly increasing
    pub soc_edges: Vec<f64>,
    /// Bin edges along the temperature axis, strictly increasing
    pub temperature_edges: Vec<f64>,
}

impl GridConfig {
    fn validate_axis(name: &str, edges: &[f64]) -> Result<()> {
        if edges.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "{name} bin edges must contain at least two boundaries, got {}",
                edges.len()
            )));
        }
        if edges.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::InvalidConfig(format!(
                "{name} bin edges must be strictly increasing"
            )));
        }
        Ok(())
    }

    /// Validate the edge sets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when either axis has fewer than
    /// two edges or edges that are not strictly increasing.
    pub fn validate(&self) -> Result<()> {
        Self::validate_axis("soc", &self.soc_edges)?;
        Self::validate_axis("temperature", &self.temperature_edges)
    }
}

/// Stateful cell-transition detector over the (soc, temperature) plane.
#[derive(Debug, Clone)]
pub struct RegionGrid {
    soc_edges: Vec<f64>,
    temperature_edges: Vec<f64>,
    current_cell: RegionCell,
}

impl RegionGrid {
    /// Build the grid and resolve the initial operating point to its cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for invalid bin-edge sets.
    pub fn new(config: GridConfig, initial_soc: f64, initial_temperature: f64) -> Result<Self> {
        config.validate()?;
        let mut grid = Self {
            soc_edges: config.soc_edges,
            temperature_edges: config.temperature_edges,
            current_cell: RegionCell(0, 0),
        };
        grid.current_cell = grid.cell_of(initial_soc, initial_temperature);
        Ok(grid)
    }

    /// The cell of the most recently observed operating point.
    #[must_use]
    pub const fn current_cell(&self) -> RegionCell {
        self.current_cell
    }

    /// Number of bins as `(soc bins, temperature bins)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.soc_edges.len() - 1, self.temperature_edges.len() - 1)
    }

    /// Resolve a point to its cell without touching the stored state.
    #[must_use]
    pub fn cell_of(&self, soc: f64, temperature: f64) -> RegionCell {
        RegionCell(
            Self::bin_index(&self.soc_edges, soc),
            Self::bin_index(&self.temperature_edges, temperature),
        )
    }

    /// Report whether the point falls in a different cell than the last
    /// observed one, updating the stored cell when it does.
    ///
    /// Stateful by design: two consecutive calls with the same point
    /// return `true` at most once.
    pub fn is_changed_cell(&mut self, soc: f64, temperature: f64) -> bool {
        let cell = self.cell_of(soc, temperature);
        if cell == self.current_cell {
            false
        } else {
            self.current_cell = cell;
            true
        }
    }

    /// Half-open bin lookup with clamping: index `i` such that
    /// `edges[i] <= x < edges[i+1]`, saturating at the outer bins.
    fn bin_index(edges: &[f64], x: f64) -> usize {
        let bins = edges.len() - 1;
        edges
            .partition_point(|edge| *edge <= x)
            .saturating_sub(1)
            .min(bins - 1)
    }
}
