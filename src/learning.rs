//! Adaptive-trigger online learning loop
//!
//! The loop steps through the measurement stream one sample at a time and
//! decides, before each twin step, whether to re-estimate parameters.
//! A re-estimation triggers on a fixed cadence (`k % batch_size == 0`,
//! excluding `k = 0`) or when the operating point has crossed into a new
//! region cell — the cadence check short-circuits, so the grid is only
//! consulted when the cadence did not already fire.
//!
//! Trigger evaluation uses the soc/temperature produced by the *previous*
//! step: which window is attributed to which region depends on this
//! ordering, so it is fixed.
//!
//! A failed fit is the one recoverable error in the hot path: the twin
//! keeps its stale parameters, the pending window keeps growing, and the
//! stream continues. Only configuration errors and NaN propagation out of
//! the twin are fatal.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::grid::RegionGrid;
use crate::measurement::{MeasurementStream, OperatingPoint};
use crate::model::Theta;
use crate::optimizer::WindowedOptimizer;
use crate::stats::RegionStatistics;
use crate::twin::BatteryTwin;
use crate::{Error, Result};

/// Recognized loop options with documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Cadence trigger period in samples (default 64)
    pub batch_size: usize,
    /// Number of stream samples to process (default 1000; capped at the
    /// stream length)
    pub training_window: usize,
    /// Record each successful fit into per-region statistics (default false)
    pub collect_region_stats: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            training_window: 1000,
            collect_region_stats: false,
        }
    }
}

impl LoopConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero batch size or a zero
    /// training window.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.training_window == 0 {
            return Err(Error::InvalidConfig(
                "training window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the loop recorded, handed to reporting after termination.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Every successfully fitted parameter vector, in fit order
    pub theta_history: Vec<Theta>,
    /// Elapsed simulation time per processed sample
    pub time_series: Vec<f64>,
    /// Concatenated reconstructed voltage of all successful fits
    pub voltage_reconstruction: Vec<f64>,
    /// Concatenated reconstructed temperature of all successful fits
    pub temperature_reconstruction: Vec<f64>,
    /// Number of fits attempted (cadence or region triggers with a
    /// non-empty pending window)
    pub triggers: usize,
    /// Number of attempted fits that failed and were skipped
    pub fit_failures: usize,
    /// Per-region parameter samples (empty unless collection is enabled)
    pub region_stats: RegionStatistics,
}

impl LoopOutcome {
    /// The most recently applied parameter vector, if any fit succeeded.
    #[must_use]
    pub fn final_theta(&self) -> Option<Theta> {
        self.theta_history.last().copied()
    }
}

/// Orchestrates grid, optimizer and statistics over one measurement stream.
pub struct AdaptiveLearningLoop {
    config: LoopConfig,
    grid: RegionGrid,
    optimizer: WindowedOptimizer,
}

impl AdaptiveLearningLoop {
    /// Build the loop from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the loop configuration fails
    /// validation.
    pub fn new(config: LoopConfig, grid: RegionGrid, optimizer: WindowedOptimizer) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            grid,
            optimizer,
        })
    }

    /// The grid's notion of the current operating region.
    #[must_use]
    pub const fn grid(&self) -> &RegionGrid {
        &self.grid
    }

    /// Drive the twin through the stream, re-estimating on triggers.
    ///
    /// Processes `min(training_window, stream length)` samples strictly in
    /// order and returns the recorded history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NumericalDivergence`] when the twin's state turns
    /// non-finite; fit failures are absorbed, not propagated.
    pub fn run<T: BatteryTwin>(
        &mut self,
        twin: &mut T,
        stream: &MeasurementStream,
    ) -> Result<LoopOutcome> {
        let samples = self.config.training_window.min(stream.len());
        let mut outcome = LoopOutcome {
            theta_history: Vec::new(),
            time_series: Vec::with_capacity(samples),
            voltage_reconstruction: Vec::new(),
            temperature_reconstruction: Vec::new(),
            triggers: 0,
            fit_failures: 0,
            region_stats: RegionStatistics::new(),
        };

        let mut point = operating_point(twin);
        let mut start = 0usize;
        let mut elapsed = 0.0;
        self.optimizer.set_initial_state(twin.state());

        for k in 0..samples {
            let dt = stream.dt_at(k);
            elapsed += dt;
            outcome.time_series.push(elapsed);

            let cadence = k % self.config.batch_size == 0 && k != 0;
            let triggered = cadence || self.grid.is_changed_cell(point.soc, point.temperature);
            if triggered && start < k {
                outcome.triggers += 1;
                let window = stream.window(start, k, dt)?;
                match self.optimizer.fit(&window) {
                    Ok(fit) => {
                        debug!(
                            k,
                            cell = %self.grid.current_cell(),
                            objective = fit.objective,
                            "applying re-estimated parameters"
                        );
                        twin.set_parameters(fit.theta);
                        outcome.theta_history.push(fit.theta);
                        outcome.voltage_reconstruction.extend_from_slice(&fit.voltage_hat);
                        outcome
                            .temperature_reconstruction
                            .extend_from_slice(&fit.temperature_hat);
                        start = k;
                        self.optimizer.set_initial_state(twin.state());
                        if self.config.collect_region_stats {
                            outcome.region_stats.add(self.grid.current_cell(), fit.theta);
                        }
                    }
                    Err(err @ Error::EstimationFailed { .. }) => {
                        // stale parameters stay in effect; the window keeps
                        // growing until the next successful fit
                        warn!(k, window = k - start, %err, "fit failed, keeping previous parameters");
                        outcome.fit_failures += 1;
                    }
                    Err(err) => return Err(err),
                }
            }

            twin.step(stream.current()[k], dt, k)?;
            point = operating_point(twin);
            if !(point.soc.is_finite() && point.temperature.is_finite()) {
                return Err(Error::NumericalDivergence(format!(
                    "twin reported soc={}, temperature={} after stream index {k}",
                    point.soc, point.temperature
                )));
            }
        }

        Ok(outcome)
    }
}

/// Latest operating condition from the twin's recorded series.
fn operating_point<T: BatteryTwin>(twin: &T) -> OperatingPoint {
    let state = twin.state();
    OperatingPoint {
        soc: twin.soc_series().last().copied().unwrap_or(state.soc),
        temperature: twin
            .temperature_series()
            .last()
            .copied()
            .unwrap_or(state.temperature),
    }
}
