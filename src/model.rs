//! Equivalent-circuit battery model (first-order Thevenin + lumped thermal)
//!
//! One series resistance `r0` and one RC pair reproduce terminal voltage
//! from current and state-of-charge; a lumped thermal balance (Joule
//! heating vs. convective exchange) reproduces cell temperature.
//!
//! The learning loop fits three of these quantities online: `r0`, the RC
//! resistance, and the RC capacitance (see [`Theta`]). Everything else is
//! fixed model configuration.
//!
//! ## Integration order
//!
//! The optimizer's objective must be computed with the *same* forward
//! procedure the live twin uses, otherwise fitted parameters are not
//! consistent when applied back to the twin. Both therefore share
//! [`step_model`]: explicit Euler, voltage read out before the state
//! update, one call per measurement sample.

use serde::{Deserialize, Serialize};

/// The fitted parameter vector: series resistance, RC-pair resistance and
/// RC-pair capacitance. All three are strictly positive physical
/// quantities; a fit that produces anything else is a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Theta {
    /// Series (ohmic) resistance, in ohm
    pub r0: f64,
    /// RC-pair resistance, in ohm
    pub rc_resistance: f64,
    /// RC-pair capacitance, in farad
    pub capacity: f64,
}

impl Theta {
    /// True when every component is finite and strictly positive.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        [self.r0, self.rc_resistance, self.capacity]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }

    /// Components as a fixed array, in `(r0, rc_resistance, capacity)` order.
    #[must_use]
    pub const fn as_array(&self) -> [f64; 3] {
        [self.r0, self.rc_resistance, self.capacity]
    }

    /// Rebuild from the `(r0, rc_resistance, capacity)` array order.
    #[must_use]
    pub const fn from_array(values: [f64; 3]) -> Self {
        Self {
            r0: values[0],
            rc_resistance: values[1],
            capacity: values[2],
        }
    }
}

/// Fixed electrical configuration of the cell being twinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectricalConfig {
    /// Initial series resistance, in ohm (starting point before any fit)
    pub r0: f64,
    /// Initial RC-pair resistance, in ohm
    pub rc_resistance: f64,
    /// Initial RC-pair capacitance, in farad
    pub rc_capacity: f64,
    /// Nominal cell capacity for coulomb counting, in ampere-hours
    pub nominal_capacity_ah: f64,
    /// Open-circuit voltage at soc = 0, in volt
    pub ocv_empty: f64,
    /// Open-circuit voltage at soc = 1, in volt
    pub ocv_full: f64,
    /// Initial state of charge, in [0, 1]
    pub initial_soc: f64,
}

impl Default for ElectricalConfig {
    fn default() -> Self {
        Self {
            r0: 0.05,
            rc_resistance: 0.02,
            rc_capacity: 2000.0,
            nominal_capacity_ah: 3.0,
            ocv_empty: 3.0,
            ocv_full: 4.2,
            initial_soc: 0.9,
        }
    }
}

impl ElectricalConfig {
    /// The initial parameter vector implied by this configuration.
    #[must_use]
    pub const fn initial_theta(&self) -> Theta {
        Theta {
            r0: self.r0,
            rc_resistance: self.rc_resistance,
            capacity: self.rc_capacity,
        }
    }

    /// Validate physical plausibility.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] when a resistance/capacitance
    /// is non-positive or the initial soc is outside `[0, 1]`.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.initial_theta().is_physical() {
            return Err(crate::Error::InvalidConfig(format!(
                "electrical parameters must be finite and positive, got r0={}, rc_resistance={}, rc_capacity={}",
                self.r0, self.rc_resistance, self.rc_capacity
            )));
        }
        if self.nominal_capacity_ah <= 0.0 {
            return Err(crate::Error::InvalidConfig(format!(
                "nominal capacity must be positive, got {} Ah",
                self.nominal_capacity_ah
            )));
        }
        if !(0.0..=1.0).contains(&self.initial_soc) {
            return Err(crate::Error::InvalidConfig(format!(
                "initial soc must be within [0, 1], got {}",
                self.initial_soc
            )));
        }
        Ok(())
    }
}

/// How cell temperature evolves during simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalMode {
    /// Lumped thermal balance: Joule heating against convective exchange
    /// with the ambient. Usable for what-if simulation.
    Lumped,
    /// Replay the measured ground temperatures sample by sample. Cannot
    /// generate new data, but removes thermal-model error from the fit.
    GroundTruth,
}

/// Thermal configuration of the cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalConfig {
    /// Temperature integration mode
    pub mode: ThermalMode,
    /// Lumped heat capacity, in joule per kelvin
    pub heat_capacity: f64,
    /// Convective exchange coefficient, in watt per kelvin
    pub exchange_coefficient: f64,
    /// Ambient temperature, in kelvin
    pub ambient_temperature: f64,
    /// Initial cell temperature, in kelvin (ambient, 298.15 K, if unset)
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    /// Initial dissipated heat, in watt (0 if unset)
    #[serde(default)]
    pub initial_dissipated_heat: f64,
}

const fn default_initial_temperature() -> f64 {
    298.15
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            mode: ThermalMode::Lumped,
            heat_capacity: 40.0,
            exchange_coefficient: 0.5,
            ambient_temperature: 298.15,
            initial_temperature: default_initial_temperature(),
            initial_dissipated_heat: 0.0,
        }
    }
}

impl ThermalConfig {
    /// Validate physical plausibility.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for non-positive heat
    /// capacity or negative exchange coefficient in lumped mode.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mode == ThermalMode::Lumped {
            if self.heat_capacity <= 0.0 {
                return Err(crate::Error::InvalidConfig(format!(
                    "thermal heat capacity must be positive, got {}",
                    self.heat_capacity
                )));
            }
            if self.exchange_coefficient < 0.0 {
                return Err(crate::Error::InvalidConfig(format!(
                    "thermal exchange coefficient must be non-negative, got {}",
                    self.exchange_coefficient
                )));
            }
        }
        Ok(())
    }
}

/// Mutable integration state of the circuit model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// State of charge, in [0, 1]
    pub soc: f64,
    /// Voltage across the RC pair, in volt
    pub v_rc: f64,
    /// Cell temperature, in kelvin
    pub temperature: f64,
    /// Dissipated heat of the last step, in watt
    pub heat: f64,
}

impl ModelState {
    /// Initial state implied by the electrical and thermal configuration.
    #[must_use]
    pub const fn initial(elec: &ElectricalConfig, thermal: &ThermalConfig) -> Self {
        Self {
            soc: elec.initial_soc,
            v_rc: 0.0,
            temperature: thermal.initial_temperature,
            heat: thermal.initial_dissipated_heat,
        }
    }

    /// True when every state component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.soc.is_finite()
            && self.v_rc.is_finite()
            && self.temperature.is_finite()
            && self.heat.is_finite()
    }
}

/// Open-circuit voltage, linear in state of charge.
#[must_use]
pub fn open_circuit_voltage(elec: &ElectricalConfig, soc: f64) -> f64 {
    elec.ocv_empty + (elec.ocv_full - elec.ocv_empty) * soc
}

/// Advance the model by one timestep and return the terminal voltage for
/// that step. Discharge current is positive.
///
/// Voltage is read out *before* the state update so that sample `k` of a
/// simulated trajectory corresponds to the state produced by samples
/// `0..k` of the input, matching the measurement convention.
///
/// `ground_temperature` supplies the measured temperature for
/// [`ThermalMode::GroundTruth`]; it is ignored in lumped mode.
pub fn step_model(
    elec: &ElectricalConfig,
    thermal: &ThermalConfig,
    theta: &Theta,
    state: &mut ModelState,
    current: f64,
    dt: f64,
    ground_temperature: Option<f64>,
) -> f64 {
    let voltage = open_circuit_voltage(elec, state.soc) - theta.r0 * current - state.v_rc;

    // RC pair, explicit Euler
    let tau = theta.rc_resistance * theta.capacity;
    state.v_rc += dt * (current / theta.capacity - state.v_rc / tau);

    // Coulomb counting, clamped to the physical range
    state.soc -= current * dt / (elec.nominal_capacity_ah * 3600.0);
    state.soc = state.soc.clamp(0.0, 1.0);

    // Joule heating in both resistive elements
    state.heat = current * current * theta.r0 + state.v_rc * state.v_rc / theta.rc_resistance;

    match thermal.mode {
        ThermalMode::Lumped => {
            let exchange = thermal.exchange_coefficient * (state.temperature - thermal.ambient_temperature);
            state.temperature += dt * (state.heat - exchange) / thermal.heat_capacity;
        }
        ThermalMode::GroundTruth => {
            if let Some(temp) = ground_temperature {
                state.temperature = temp;
            }
        }
    }

    voltage
}

/// Forward-simulate a whole current profile from `state`, returning the
/// voltage and temperature trajectories (one sample per input sample).
///
/// This is the shared procedure behind both the live twin's stepping and
/// the optimizer's objective.
#[must_use]
pub fn simulate_profile(
    elec: &ElectricalConfig,
    thermal: &ThermalConfig,
    theta: &Theta,
    mut state: ModelState,
    currents: &[f64],
    ground_temperatures: Option<&[f64]>,
    dt: f64,
) -> (Vec<f64>, Vec<f64>) {
    let mut voltages = Vec::with_capacity(currents.len());
    let mut temperatures = Vec::with_capacity(currents.len());
    for (k, &current) in currents.iter().enumerate() {
        let ground = ground_temperatures.and_then(|g| g.get(k).copied());
        let v = step_model(elec, thermal, theta, &mut state, current, dt, ground);
        voltages.push(v);
        temperatures.push(state.temperature);
    }
    (voltages, temperatures)
}
