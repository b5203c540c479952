//! Windowed multi-start parameter fitting
//!
//! Given one measurement window, the optimizer draws several starting
//! parameter vectors from the configured physical bounds, runs an
//! independent local search from each, discards runs that diverge or end
//! non-physical, and keeps the lowest-objective survivor. Ties break on
//! the earliest-generated restart, so the winner is identical whether the
//! restarts run sequentially or on the rayon pool.
//!
//! The objective is the sum of squared voltage (and optionally
//! temperature) residuals of a forward simulation that shares
//! [`crate::model::step_model`] with the live twin: same `dt`, same
//! integration order, so fitted parameters transfer to the twin exactly.
//!
//! ## Search coordinates
//!
//! Both local methods work in bounds-normalized coordinates
//! (`y = (x - lo) / (hi - lo)`), which puts milliohm resistances and
//! kilofarad capacitances on the same scale. A step that leaves the
//! physical region sees an infinite objective and either backs off
//! (Nelder-Mead) or gets the whole run discarded (gradient descent).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::measurement::MeasurementWindow;
use crate::model::{simulate_profile, ElectricalConfig, ModelState, Theta, ThermalConfig, ThermalMode};
use crate::{Error, Result};

/// Local search algorithm run from each restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMethod {
    /// Downhill simplex; derivative-free, robust on this 3-parameter
    /// problem. `learning_rate` scales the initial simplex spread.
    #[default]
    NelderMead,
    /// Plain finite-difference gradient descent with fixed step size
    /// `learning_rate`.
    GradientDescent,
}

/// Physically plausible `[low, high]` sampling ranges per parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterBounds {
    /// Series resistance range, in ohm
    pub r0: [f64; 2],
    /// RC-pair resistance range, in ohm
    pub rc_resistance: [f64; 2],
    /// RC-pair capacitance range, in farad
    pub capacity: [f64; 2],
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            r0: [1e-3, 0.5],
            rc_resistance: [1e-3, 0.5],
            capacity: [100.0, 10_000.0],
        }
    }
}

impl ParameterBounds {
    const fn lows(&self) -> [f64; 3] {
        [self.r0[0], self.rc_resistance[0], self.capacity[0]]
    }

    const fn highs(&self) -> [f64; 3] {
        [self.r0[1], self.rc_resistance[1], self.capacity[1]]
    }

    /// Validate that every range is positive and properly ordered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a non-positive lower bound or
    /// an inverted range.
    pub fn validate(&self) -> Result<()> {
        for (name, [low, high]) in [
            ("r0", self.r0),
            ("rc_resistance", self.rc_resistance),
            ("capacity", self.capacity),
        ] {
            if !(low.is_finite() && high.is_finite()) || low <= 0.0 || low >= high {
                return Err(Error::InvalidConfig(format!(
                    "{name} bounds must satisfy 0 < low < high, got [{low}, {high}]"
                )));
            }
        }
        Ok(())
    }
}

/// Everything the optimizer recognizes, with documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Local search algorithm
    pub method: OptimizerMethod,
    /// Step-size control: gradient step, or initial simplex spread, in
    /// normalized coordinates (default 0.1)
    pub learning_rate: f64,
    /// Number of randomized restarts per fit, at least 1 (default 8)
    pub restarts: usize,
    /// Iteration cap per local run (default 300)
    pub max_iterations: usize,
    /// Objective-improvement threshold that ends a local run (default 1e-10)
    pub tolerance: f64,
    /// Include temperature residuals in the objective (default false)
    pub fit_temperature: bool,
    /// Seed for the restart sampler; `None` seeds from entropy
    pub seed: Option<u64>,
    /// Sampling ranges for restart starting points
    pub bounds: ParameterBounds,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            method: OptimizerMethod::default(),
            learning_rate: 0.1,
            restarts: 8,
            max_iterations: 300,
            tolerance: 1e-10,
            fit_temperature: false,
            seed: None,
            bounds: ParameterBounds::default(),
        }
    }
}

impl OptimizerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero restarts, a zero
    /// iteration cap, a non-positive learning rate or tolerance, or
    /// invalid bounds.
    pub fn validate(&self) -> Result<()> {
        if self.restarts == 0 {
            return Err(Error::InvalidConfig(
                "number of restarts must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max iterations per local run must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        self.bounds.validate()
    }
}

/// The winning run of one multi-start fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Best-fitting parameter vector
    pub theta: Theta,
    /// Sum of squared residuals at `theta`
    pub objective: f64,
    /// Reconstructed terminal voltage over the window
    pub voltage_hat: Vec<f64>,
    /// Reconstructed cell temperature over the window
    pub temperature_hat: Vec<f64>,
    /// Index of the restart that produced the winner (stable tie-break key)
    pub restart_index: usize,
}

/// Multi-start fitter for one measurement window at a time.
pub struct WindowedOptimizer {
    elec: ElectricalConfig,
    thermal: ThermalConfig,
    config: OptimizerConfig,
    rng: StdRng,
    init_state: ModelState,
    last_fit: Option<FitResult>,
}

impl WindowedOptimizer {
    /// Build an optimizer sharing the twin's model configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when any configuration fails
    /// validation.
    pub fn new(
        elec: ElectricalConfig,
        thermal: ThermalConfig,
        config: OptimizerConfig,
    ) -> Result<Self> {
        elec.validate()?;
        thermal.validate()?;
        config.validate()?;
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let init_state = ModelState::initial(&elec, &thermal);
        Ok(Self {
            elec,
            thermal,
            config,
            rng,
            init_state,
            last_fit: None,
        })
    }

    /// Seed the forward simulation with the twin's state at window start.
    pub fn set_initial_state(&mut self, state: ModelState) {
        self.init_state = state;
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Fit the three-parameter model to one window.
    ///
    /// Starting points are drawn sequentially from the seeded RNG, then
    /// solved independently on the rayon pool; the winner is the
    /// lowest-objective physical run, ties broken by restart index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EstimationFailed`] when every restart diverges or
    /// ends at non-physical parameters.
    pub fn fit(&mut self, window: &MeasurementWindow) -> Result<FitResult> {
        let lows = self.config.bounds.lows();
        let highs = self.config.bounds.highs();

        let starts: Vec<[f64; 3]> = (0..self.config.restarts)
            .map(|_| [self.rng.gen(), self.rng.gen(), self.rng.gen()])
            .collect();

        let objective = |y: &[f64; 3]| self.evaluate(y, window, &lows, &highs);

        let runs: Vec<([f64; 3], f64)> = starts
            .par_iter()
            .map(|start| match self.config.method {
                OptimizerMethod::NelderMead => nelder_mead(
                    &objective,
                    *start,
                    self.config.learning_rate,
                    self.config.max_iterations,
                    self.config.tolerance,
                ),
                OptimizerMethod::GradientDescent => gradient_descent(
                    &objective,
                    *start,
                    self.config.learning_rate,
                    self.config.max_iterations,
                    self.config.tolerance,
                ),
            })
            .collect();

        let mut winner: Option<(usize, Theta, f64)> = None;
        let mut last_discard = "no restarts attempted".to_string();
        for (index, (y, value)) in runs.iter().enumerate() {
            let theta = unscale(y, &lows, &highs);
            if !value.is_finite() {
                last_discard = format!("restart {index} diverged (non-finite objective)");
                continue;
            }
            if !theta.is_physical() {
                last_discard = format!("restart {index} ended at non-physical parameters");
                continue;
            }
            // strict comparison keeps the earliest restart on ties
            if winner.map_or(true, |(_, _, best)| *value < best) {
                winner = Some((index, theta, *value));
            }
        }

        let Some((restart_index, theta, objective_value)) = winner else {
            return Err(Error::EstimationFailed {
                restarts: self.config.restarts,
                reason: last_discard,
            });
        };

        let ground = self.ground_for(window);
        let (voltage_hat, temperature_hat) = simulate_profile(
            &self.elec,
            &self.thermal,
            &theta,
            self.init_state,
            window.current(),
            ground,
            window.dt(),
        );
        debug!(
            restart = restart_index,
            objective = objective_value,
            samples = window.len(),
            "window fit converged"
        );

        let result = FitResult {
            theta,
            objective: objective_value,
            voltage_hat,
            temperature_hat,
            restart_index,
        };
        self.last_fit = Some(result.clone());
        Ok(result)
    }

    /// Reconstructed voltage of the most recent successful fit.
    #[must_use]
    pub fn reconstructed_voltage(&self) -> Option<&[f64]> {
        self.last_fit.as_ref().map(|fit| fit.voltage_hat.as_slice())
    }

    /// Reconstructed temperature of the most recent successful fit.
    #[must_use]
    pub fn reconstructed_temperature(&self) -> Option<&[f64]> {
        self.last_fit
            .as_ref()
            .map(|fit| fit.temperature_hat.as_slice())
    }

    fn ground_for<'a>(&self, window: &'a MeasurementWindow) -> Option<&'a [f64]> {
        (self.thermal.mode == ThermalMode::GroundTruth).then(|| window.temperature())
    }

    /// Sum of squared residuals for a candidate in normalized coordinates.
    /// Infinite outside the physical region, which keeps both local
    /// methods inside it.
    fn evaluate(
        &self,
        y: &[f64; 3],
        window: &MeasurementWindow,
        lows: &[f64; 3],
        highs: &[f64; 3],
    ) -> f64 {
        let theta = unscale(y, lows, highs);
        if !theta.is_physical() {
            return f64::INFINITY;
        }
        let ground = self.ground_for(window);
        let (voltage_hat, temperature_hat) = simulate_profile(
            &self.elec,
            &self.thermal,
            &theta,
            self.init_state,
            window.current(),
            ground,
            window.dt(),
        );

        let mut sum = 0.0;
        for (v_hat, v) in voltage_hat.iter().zip(window.voltage()) {
            let r = v_hat - v;
            sum += r * r;
        }
        if self.config.fit_temperature {
            for (t_hat, t) in temperature_hat.iter().zip(window.temperature()) {
                let r = t_hat - t;
                sum += r * r;
            }
        }
        if sum.is_nan() {
            f64::INFINITY
        } else {
            sum
        }
    }
}

fn unscale(y: &[f64; 3], lows: &[f64; 3], highs: &[f64; 3]) -> Theta {
    let mut x = [0.0; 3];
    for i in 0..3 {
        x[i] = lows[i] + y[i] * (highs[i] - lows[i]);
    }
    Theta::from_array(x)
}

/// Fixed-step gradient descent with a central finite-difference gradient.
/// Returns the final iterate; a run that walks into the infinite-objective
/// region ends non-finite and is discarded by the caller.
fn gradient_descent(
    objective: &impl Fn(&[f64; 3]) -> f64,
    start: [f64; 3],
    learning_rate: f64,
    max_iterations: usize,
    tolerance: f64,
) -> ([f64; 3], f64) {
    const H: f64 = 1e-6;

    let mut y = start;
    let mut value = objective(&y);
    for _ in 0..max_iterations {
        if !value.is_finite() {
            break;
        }
        let mut gradient = [0.0; 3];
        for i in 0..3 {
            let mut forward = y;
            let mut backward = y;
            forward[i] += H;
            backward[i] -= H;
            gradient[i] = (objective(&forward) - objective(&backward)) / (2.0 * H);
        }
        let mut next = y;
        for i in 0..3 {
            next[i] -= learning_rate * gradient[i];
        }
        let next_value = objective(&next);
        let converged = next_value.is_finite() && (value - next_value).abs() < tolerance;
        y = next;
        value = next_value;
        if converged {
            break;
        }
    }
    (y, value)
}

/// Nelder-Mead downhill simplex with standard coefficients
/// (reflect 1, expand 2, contract 0.5, shrink 0.5).
fn nelder_mead(
    objective: &impl Fn(&[f64; 3]) -> f64,
    start: [f64; 3],
    step: f64,
    max_iterations: usize,
    tolerance: f64,
) -> ([f64; 3], f64) {
    let mut simplex: Vec<([f64; 3], f64)> = Vec::with_capacity(4);
    simplex.push((start, objective(&start)));
    for i in 0..3 {
        let mut vertex = start;
        vertex[i] += step;
        simplex.push((vertex, objective(&vertex)));
    }

    for _ in 0..max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0].1;
        let worst = simplex[3].1;
        if worst.is_finite() && (worst - best) < tolerance {
            break;
        }

        let mut centroid = [0.0; 3];
        for (vertex, _) in &simplex[..3] {
            for i in 0..3 {
                centroid[i] += vertex[i] / 3.0;
            }
        }
        let at = |coefficient: f64| {
            let mut point = [0.0; 3];
            for i in 0..3 {
                point[i] = centroid[i] + coefficient * (centroid[i] - simplex[3].0[i]);
            }
            point
        };

        let reflected = at(1.0);
        let f_reflected = objective(&reflected);
        if f_reflected < simplex[0].1 {
            let expanded = at(2.0);
            let f_expanded = objective(&expanded);
            simplex[3] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }
        if f_reflected < simplex[2].1 {
            simplex[3] = (reflected, f_reflected);
            continue;
        }

        let contracted = if f_reflected < simplex[3].1 {
            at(0.5)
        } else {
            at(-0.5)
        };
        let f_contracted = objective(&contracted);
        if f_contracted < simplex[3].1.min(f_reflected) {
            simplex[3] = (contracted, f_contracted);
            continue;
        }

        // shrink toward the best vertex
        let anchor = simplex[0].0;
        for (vertex, value) in simplex.iter_mut().skip(1) {
            for i in 0..3 {
                vertex[i] = anchor[i] + 0.5 * (vertex[i] - anchor[i]);
            }
            *value = objective(vertex);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    simplex[0]
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::model::simulate_profile;

    fn synthetic_window(theta: &Theta, samples: usize) -> MeasurementWindow {
        let elec = ElectricalConfig::default();
        let thermal = ThermalConfig::default();
        // square-wave excitation so all three parameters are observable
        let currents: Vec<f64> = (0..samples)
            .map(|k| if (k / 25) % 2 == 0 { 2.0 } else { -1.0 })
            .collect();
        let (voltage, temperature) = simulate_profile(
            &elec,
            &thermal,
            theta,
            ModelState::initial(&elec, &thermal),
            &currents,
            None,
            1.0,
        );
        MeasurementWindow::new(currents, voltage, temperature, 1.0).unwrap()
    }

    fn seeded_config(seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            seed: Some(seed),
            restarts: 6,
            max_iterations: 500,
            tolerance: 1e-14,
            ..OptimizerConfig::default()
        }
    }

    #[test]
    fn test_config_validation_rejects_degenerate_settings() {
        let config = OptimizerConfig {
            restarts: 0,
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OptimizerConfig {
            learning_rate: 0.0,
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OptimizerConfig {
            bounds: ParameterBounds {
                capacity: [500.0, 500.0],
                ..ParameterBounds::default()
            },
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fit_reproducible_for_fixed_seed() {
        let truth = ElectricalConfig::default().initial_theta();
        let window = synthetic_window(&truth, 100);

        let run = || {
            let mut optimizer = WindowedOptimizer::new(
                ElectricalConfig::default(),
                ThermalConfig::default(),
                seeded_config(42),
            )
            .unwrap();
            optimizer.fit(&window).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.theta, second.theta);
        assert_eq!(first.objective, second.objective);
        assert_eq!(first.restart_index, second.restart_index);
        assert_eq!(first.voltage_hat, second.voltage_hat);
    }

    #[test]
    fn test_all_divergent_restarts_fail_the_fit() {
        let truth = ElectricalConfig::default().initial_theta();
        let window = synthetic_window(&truth, 50);

        // an enormous gradient step leaves the physical region immediately,
        // so every restart ends non-finite
        let config = OptimizerConfig {
            method: OptimizerMethod::GradientDescent,
            learning_rate: 1e12,
            seed: Some(7),
            restarts: 4,
            ..OptimizerConfig::default()
        };
        let mut optimizer =
            WindowedOptimizer::new(ElectricalConfig::default(), ThermalConfig::default(), config)
                .unwrap();
        let err = optimizer.fit(&window).unwrap_err();
        assert!(matches!(err, Error::EstimationFailed { restarts: 4, .. }));
        assert!(optimizer.reconstructed_voltage().is_none());
    }

    #[test]
    fn test_reconstructions_expose_winning_trajectories() {
        let truth = ElectricalConfig::default().initial_theta();
        let window = synthetic_window(&truth, 80);

        let mut optimizer = WindowedOptimizer::new(
            ElectricalConfig::default(),
            ThermalConfig::default(),
            seeded_config(3),
        )
        .unwrap();
        let fit = optimizer.fit(&window).unwrap();
        assert_eq!(optimizer.reconstructed_voltage().unwrap(), fit.voltage_hat);
        assert_eq!(
            optimizer.reconstructed_temperature().unwrap(),
            fit.temperature_hat
        );
        assert_eq!(fit.voltage_hat.len(), window.len());
    }

    #[test]
    fn test_winner_theta_is_physical_and_within_bounds_reach() {
        let truth = Theta {
            r0: 0.08,
            rc_resistance: 0.03,
            capacity: 1500.0,
        };
        let window = synthetic_window(&truth, 120);
        let mut optimizer = WindowedOptimizer::new(
            ElectricalConfig::default(),
            ThermalConfig::default(),
            seeded_config(11),
        )
        .unwrap();
        let fit = optimizer.fit(&window).unwrap();
        assert!(fit.theta.is_physical());
        assert!(fit.objective.is_finite());
    }

    #[test]
    fn test_nelder_mead_minimizes_quadratic() {
        let objective = |y: &[f64; 3]| {
            (y[0] - 0.3).powi(2) + 2.0 * (y[1] - 0.7).powi(2) + 0.5 * (y[2] - 0.5).powi(2)
        };
        let (y, value) = nelder_mead(&objective, [0.9, 0.1, 0.9], 0.1, 500, 1e-16);
        assert!(value < 1e-12);
        assert!((y[0] - 0.3).abs() < 1e-5);
        assert!((y[1] - 0.7).abs() < 1e-5);
        assert!((y[2] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_descent_minimizes_quadratic() {
        let objective = |y: &[f64; 3]| y.iter().map(|v| (v - 0.4).powi(2)).sum::<f64>();
        let (y, value) = gradient_descent(&objective, [0.0, 1.0, 0.2], 0.2, 2000, 1e-15);
        assert!(value < 1e-10);
        for v in y {
            assert!((v - 0.4).abs() < 1e-5);
        }
    }
}
