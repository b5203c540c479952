//! Digital twin of the battery cell
//!
//! The learning loop talks to the twin through the [`BatteryTwin`]
//! capability set only: reset, init, step, most-recent-last state
//! series, and an explicit parameter-update entry point. Any conforming
//! implementation can be substituted, including pure-simulation stubs in
//! tests.
//!
//! [`CircuitTwin`] is the shipped implementation: the first-order Thevenin
//! model of [`crate::model`] plus the per-step series the loop reads back.

use crate::model::{
    simulate_profile, step_model, ElectricalConfig, ModelState, Theta, ThermalConfig, ThermalMode,
};
use crate::Result;

/// Optional overrides applied when (re)initializing a twin at `t = 0`.
///
/// Mirrors the initialization surface of the underlying model: anything
/// left `None` falls back to the configured default (ambient temperature,
/// zero dissipated heat).
#[derive(Debug, Clone, Copy, Default)]
pub struct TwinInit {
    /// Initial cell temperature, in kelvin
    pub temperature: Option<f64>,
    /// Initial dissipated heat, in watt
    pub dissipated_heat: Option<f64>,
}

/// Capability set the learning loop requires from a digital twin.
pub trait BatteryTwin {
    /// Restore the configured initial state and clear all recorded series.
    fn reset(&mut self);

    /// Apply `t = 0` overrides after a reset.
    fn init(&mut self, init: TwinInit);

    /// Advance one timestep with the measured input current for stream
    /// index `k`, recording the resulting state.
    ///
    /// # Errors
    ///
    /// Implementations may fail on unrecoverable numerical errors.
    fn step(&mut self, input: f64, dt: f64, k: usize) -> Result<()>;

    /// State-of-charge series, most-recent-last.
    fn soc_series(&self) -> &[f64];

    /// Temperature series, most-recent-last.
    fn temperature_series(&self) -> &[f64];

    /// Simulated terminal-voltage series, most-recent-last.
    fn voltage_series(&self) -> &[f64];

    /// Overwrite the fitted parameters (no blending).
    fn set_parameters(&mut self, theta: Theta);

    /// Currently applied parameters.
    fn parameters(&self) -> Theta;

    /// Full integration state, for seeding window simulations.
    fn state(&self) -> ModelState;
}

/// First-order Thevenin twin with lumped or ground-replay thermal model.
#[derive(Debug, Clone)]
pub struct CircuitTwin {
    elec: ElectricalConfig,
    thermal: ThermalConfig,
    theta: Theta,
    state: ModelState,
    soc_series: Vec<f64>,
    temperature_series: Vec<f64>,
    voltage_series: Vec<f64>,
    ground_temperatures: Option<Vec<f64>>,
}

impl CircuitTwin {
    /// Build a twin from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for non-physical electrical
    /// or thermal configuration, or when ground-replay thermal mode is
    /// selected without a ground temperature series.
    pub fn new(elec: ElectricalConfig, thermal: ThermalConfig) -> Result<Self> {
        elec.validate()?;
        thermal.validate()?;
        if thermal.mode == ThermalMode::GroundTruth {
            return Err(crate::Error::InvalidConfig(
                "ground-replay thermal mode requires a ground temperature series; \
                 use CircuitTwin::with_ground_temperatures"
                    .to_string(),
            ));
        }
        Ok(Self::build(elec, thermal, None))
    }

    /// Build a twin whose thermal model replays measured ground
    /// temperatures (the original "dummy thermal" mode).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for invalid configuration
    /// or an empty ground series.
    pub fn with_ground_temperatures(
        elec: ElectricalConfig,
        mut thermal: ThermalConfig,
        ground_temperatures: Vec<f64>,
    ) -> Result<Self> {
        elec.validate()?;
        if ground_temperatures.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "ground temperature series must not be empty".to_string(),
            ));
        }
        thermal.mode = ThermalMode::GroundTruth;
        Ok(Self::build(elec, thermal, Some(ground_temperatures)))
    }

    fn build(
        elec: ElectricalConfig,
        thermal: ThermalConfig,
        ground_temperatures: Option<Vec<f64>>,
    ) -> Self {
        let theta = elec.initial_theta();
        let state = ModelState::initial(&elec, &thermal);
        let mut twin = Self {
            elec,
            thermal,
            theta,
            state,
            soc_series: Vec::new(),
            temperature_series: Vec::new(),
            voltage_series: Vec::new(),
            ground_temperatures,
        };
        twin.record_state();
        twin
    }

    fn record_state(&mut self) {
        self.soc_series.push(self.state.soc);
        self.temperature_series.push(self.state.temperature);
    }

    /// Electrical configuration this twin was built with.
    #[must_use]
    pub const fn electrical_config(&self) -> &ElectricalConfig {
        &self.elec
    }

    /// Thermal configuration this twin was built with.
    #[must_use]
    pub const fn thermal_config(&self) -> &ThermalConfig {
        &self.thermal
    }

    /// Forward-simulate a current profile from the current state with the
    /// current parameters, without mutating the twin. Used to generate
    /// synthetic ground truth in tests and demos.
    #[must_use]
    pub fn simulate(&self, currents: &[f64], dt: f64) -> (Vec<f64>, Vec<f64>) {
        simulate_profile(
            &self.elec,
            &self.thermal,
            &self.theta,
            self.state,
            currents,
            self.ground_temperatures.as_deref(),
            dt,
        )
    }
}

impl BatteryTwin for CircuitTwin {
    fn reset(&mut self) {
        self.theta = self.elec.initial_theta();
        self.state = ModelState::initial(&self.elec, &self.thermal);
        self.soc_series.clear();
        self.temperature_series.clear();
        self.voltage_series.clear();
        self.record_state();
    }

    fn init(&mut self, init: TwinInit) {
        if let Some(temperature) = init.temperature {
            self.state.temperature = temperature;
            if let Some(last) = self.temperature_series.last_mut() {
                *last = temperature;
            }
        }
        if let Some(heat) = init.dissipated_heat {
            self.state.heat = heat;
        }
    }

    fn step(&mut self, input: f64, dt: f64, k: usize) -> Result<()> {
        let ground = self
            .ground_temperatures
            .as_ref()
            .and_then(|g| g.get(k).copied());
        let voltage = step_model(
            &self.elec,
            &self.thermal,
            &self.theta,
            &mut self.state,
            input,
            dt,
            ground,
        );
        if !self.state.is_finite() || !voltage.is_finite() {
            return Err(crate::Error::NumericalDivergence(format!(
                "twin state diverged at stream index {k}"
            )));
        }
        self.voltage_series.push(voltage);
        self.record_state();
        Ok(())
    }

    fn soc_series(&self) -> &[f64] {
        &self.soc_series
    }

    fn temperature_series(&self) -> &[f64] {
        &self.temperature_series
    }

    fn voltage_series(&self) -> &[f64] {
        &self.voltage_series
    }

    fn set_parameters(&mut self, theta: Theta) {
        self.theta = theta;
    }

    fn parameters(&self) -> Theta {
        self.theta
    }

    fn state(&self) -> ModelState {
        self.state
    }
}
