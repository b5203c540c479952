//! Online identification demo
//!
//! Synthesizes a drive cycle from a "real" cell whose parameters differ
//! from the twin's initial configuration, runs the adaptive learning loop
//! against it, and prints the resulting report as JSON.
//!
//! Run with: cargo run --example online_identification

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use celltwin::grid::{GridConfig, RegionGrid};
use celltwin::learning::{AdaptiveLearningLoop, LoopConfig};
use celltwin::measurement::MeasurementStream;
use celltwin::model::{ElectricalConfig, Theta, ThermalConfig};
use celltwin::optimizer::{OptimizerConfig, WindowedOptimizer};
use celltwin::report::RunReport;
use celltwin::twin::{BatteryTwin, CircuitTwin};

const SAMPLES: usize = 600;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // the twin starts from nominal data-sheet values
    let elec = ElectricalConfig {
        nominal_capacity_ah: 0.2,
        ..ElectricalConfig::default()
    };
    let thermal = ThermalConfig::default();

    // the "real" cell has drifted: higher series resistance, lower capacitance
    let real_theta = Theta {
        r0: 0.082,
        rc_resistance: 0.031,
        capacity: 1400.0,
    };
    let stream = synthesize_stream(&elec, &thermal, &real_theta)?;

    let grid = RegionGrid::new(
        GridConfig {
            soc_edges: vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0],
            temperature_edges: vec![273.15, 298.15, 323.15],
        },
        elec.initial_soc,
        thermal.initial_temperature,
    )?;
    let optimizer = WindowedOptimizer::new(
        elec.clone(),
        thermal.clone(),
        OptimizerConfig {
            seed: Some(2024),
            restarts: 10,
            ..OptimizerConfig::default()
        },
    )?;
    eprintln!(
        "fitting with {} restarts per trigger (seed {:?})",
        optimizer.config().restarts,
        optimizer.config().seed
    );
    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 100,
            training_window: SAMPLES,
            collect_region_stats: true,
        },
        grid,
        optimizer,
    )?;

    let mut twin = CircuitTwin::new(elec, thermal)?;
    let outcome = learning.run(&mut twin, &stream)?;

    let report = RunReport::from_outcome(&outcome)?;
    println!("{}", report.to_json()?);

    if let Some(theta) = outcome.final_theta() {
        eprintln!(
            "real r0={:.4}  identified r0={:.4}  (started at {:.4})",
            real_theta.r0, theta.r0, 0.05
        );
    }
    Ok(())
}

/// Forward-simulate the "real" cell over a mixed drive cycle.
fn synthesize_stream(
    elec: &ElectricalConfig,
    thermal: &ThermalConfig,
    real_theta: &Theta,
) -> Result<MeasurementStream> {
    let mut real_cell = CircuitTwin::new(elec.clone(), thermal.clone())?;
    real_cell.set_parameters(*real_theta);

    let currents: Vec<f64> = (0..SAMPLES)
        .map(|k| match (k / 50) % 4 {
            0 => 2.0,  // acceleration
            1 => 0.8,  // cruise
            2 => -1.2, // regenerative braking
            _ => 0.1,  // idle
        })
        .collect();
    let (voltage, temperature) = real_cell.simulate(&currents, 1.0);
    let time: Vec<f64> = (0..SAMPLES).map(|k| k as f64).collect();
    Ok(MeasurementStream::new(currents, voltage, temperature, time)?)
}
