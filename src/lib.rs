//! # Celltwin: Online Equivalent-Circuit Battery Identification
//!
//! Celltwin keeps a digital twin of a battery cell calibrated against a
//! live measurement stream. As (current, voltage, temperature) samples
//! arrive, the learning loop periodically re-estimates the twin's series
//! resistance and RC-pair parameters, triggered either on a fixed cadence
//! or when the operating point (state-of-charge x temperature) crosses
//! into a new discretized region.
//!
//! ## Components
//!
//! - [`grid::RegionGrid`] — discretizes the operating plane and detects
//!   region transitions
//! - [`optimizer::WindowedOptimizer`] — fits the three-parameter circuit
//!   model to a measurement window via seeded multi-start local search
//! - [`stats::RegionStatistics`] — accumulates fitted vectors per region
//!   and summarizes them as centroid + covariance
//! - [`learning::AdaptiveLearningLoop`] — drives the stream, decides
//!   triggers, applies fits to the twin
//! - [`twin::CircuitTwin`] — the shipped first-order Thevenin twin; any
//!   [`twin::BatteryTwin`] implementation can be substituted
//!
//! ## Example
//!
//! ```rust
//! use celltwin::grid::{GridConfig, RegionGrid};
//! use celltwin::learning::{AdaptiveLearningLoop, LoopConfig};
//! use celltwin::measurement::MeasurementStream;
//! use celltwin::model::{ElectricalConfig, ThermalConfig};
//! use celltwin::optimizer::{OptimizerConfig, WindowedOptimizer};
//! use celltwin::twin::CircuitTwin;
//!
//! # fn main() -> celltwin::Result<()> {
//! let elec = ElectricalConfig::default();
//! let thermal = ThermalConfig::default();
//!
//! // synthesize a short ground-truth stream from a reference twin
//! let reference = CircuitTwin::new(elec.clone(), thermal.clone())?;
//! let currents = vec![1.0; 40];
//! let (voltage, temperature) = reference.simulate(&currents, 1.0);
//! let time = (0..40).map(|k| f64::from(k)).collect();
//! let stream = MeasurementStream::new(currents, voltage, temperature, time)?;
//!
//! let grid = RegionGrid::new(
//!     GridConfig {
//!         soc_edges: vec![0.0, 0.5, 1.0],
//!         temperature_edges: vec![273.15, 323.15],
//!     },
//!     elec.initial_soc,
//!     thermal.initial_temperature,
//! )?;
//! let optimizer = WindowedOptimizer::new(
//!     elec.clone(),
//!     thermal.clone(),
//!     OptimizerConfig { seed: Some(0), ..OptimizerConfig::default() },
//! )?;
//!
//! let mut twin = CircuitTwin::new(elec, thermal)?;
//! let mut learning = AdaptiveLearningLoop::new(
//!     LoopConfig { batch_size: 16, training_window: 40, ..LoopConfig::default() },
//!     grid,
//!     optimizer,
//! )?;
//! let outcome = learning.run(&mut twin, &stream)?;
//! assert_eq!(outcome.time_series.len(), 40);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod grid;
pub mod learning;
pub mod measurement;
pub mod model;
pub mod optimizer;
pub mod report;
pub mod stats;
pub mod twin;

pub use error::{Error, Result};
