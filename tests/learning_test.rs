//! End-to-end tests for the adaptive learning loop

use celltwin::grid::{GridConfig, RegionGrid};
use celltwin::learning::{AdaptiveLearningLoop, LoopConfig};
use celltwin::measurement::MeasurementStream;
use celltwin::model::{ElectricalConfig, ThermalConfig};
use celltwin::optimizer::{OptimizerConfig, OptimizerMethod, WindowedOptimizer};
use celltwin::report::RunReport;
use celltwin::twin::{BatteryTwin, CircuitTwin};

fn electrical() -> ElectricalConfig {
    // small nominal capacity so the soc sweeps across grid cells quickly
    ElectricalConfig {
        nominal_capacity_ah: 0.05,
        ..ElectricalConfig::default()
    }
}

fn ground_truth_stream(elec: &ElectricalConfig, samples: usize) -> MeasurementStream {
    let reference = CircuitTwin::new(elec.clone(), ThermalConfig::default()).unwrap();
    let currents: Vec<f64> = (0..samples)
        .map(|k| if (k / 15) % 3 == 2 { -0.5 } else { 1.5 })
        .collect();
    let (voltage, temperature) = reference.simulate(&currents, 1.0);
    let time: Vec<f64> = (0..samples).map(|k| k as f64).collect();
    MeasurementStream::new(currents, voltage, temperature, time).unwrap()
}

fn fast_optimizer(elec: &ElectricalConfig, seed: u64) -> WindowedOptimizer {
    WindowedOptimizer::new(
        elec.clone(),
        ThermalConfig::default(),
        OptimizerConfig {
            seed: Some(seed),
            restarts: 3,
            max_iterations: 150,
            ..OptimizerConfig::default()
        },
    )
    .unwrap()
}

fn coarse_grid(elec: &ElectricalConfig) -> RegionGrid {
    RegionGrid::new(
        GridConfig {
            soc_edges: vec![0.0, 1.0],
            temperature_edges: vec![200.0, 400.0],
        },
        elec.initial_soc,
        298.15,
    )
    .unwrap()
}

fn fine_grid(elec: &ElectricalConfig) -> RegionGrid {
    RegionGrid::new(
        GridConfig {
            soc_edges: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0],
            temperature_edges: vec![200.0, 400.0],
        },
        elec.initial_soc,
        298.15,
    )
    .unwrap()
}

#[test]
fn test_cadence_only_trigger_count() {
    let elec = ElectricalConfig::default(); // large capacity: soc barely moves
    let stream = ground_truth_stream(&elec, 100);
    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 25,
            training_window: 100,
            collect_region_stats: false,
        },
        coarse_grid(&elec),
        fast_optimizer(&elec, 17),
    )
    .unwrap();
    let mut twin = CircuitTwin::new(elec, ThermalConfig::default()).unwrap();

    let outcome = learning.run(&mut twin, &stream).unwrap();
    // floor((100 - 1) / 25) = 3
    assert_eq!(outcome.triggers, 3);
}

#[test]
fn test_region_changes_only_add_triggers() {
    let elec = electrical();
    let stream = ground_truth_stream(&elec, 100);
    let cadence_only = {
        let mut learning = AdaptiveLearningLoop::new(
            LoopConfig {
                batch_size: 40,
                training_window: 100,
                collect_region_stats: false,
            },
            coarse_grid(&elec),
            fast_optimizer(&elec, 31),
        )
        .unwrap();
        let mut twin = CircuitTwin::new(elec.clone(), ThermalConfig::default()).unwrap();
        learning.run(&mut twin, &stream).unwrap().triggers
    };
    let with_region = {
        let mut learning = AdaptiveLearningLoop::new(
            LoopConfig {
                batch_size: 40,
                training_window: 100,
                collect_region_stats: false,
            },
            fine_grid(&elec),
            fast_optimizer(&elec, 31),
        )
        .unwrap();
        let mut twin = CircuitTwin::new(elec.clone(), ThermalConfig::default()).unwrap();
        learning.run(&mut twin, &stream).unwrap().triggers
    };

    assert_eq!(cadence_only, 2, "floor(99 / 40) cadence triggers");
    assert!(
        with_region > cadence_only,
        "soc sweep across fine cells must add region triggers ({with_region} vs {cadence_only})"
    );
}

#[test]
fn test_region_statistics_populated_per_visited_cell() {
    let elec = electrical();
    let stream = ground_truth_stream(&elec, 120);
    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 30,
            training_window: 120,
            collect_region_stats: true,
        },
        fine_grid(&elec),
        fast_optimizer(&elec, 5),
    )
    .unwrap();
    let mut twin = CircuitTwin::new(elec, ThermalConfig::default()).unwrap();

    let outcome = learning.run(&mut twin, &stream).unwrap();
    let recorded: usize = outcome
        .region_stats
        .cells()
        .map(|cell| outcome.region_stats.len(cell))
        .sum();
    assert_eq!(recorded, outcome.theta_history.len());
    for cell in outcome.region_stats.cells() {
        // every populated cell must summarize cleanly
        let centroid = outcome.region_stats.centroid(cell).unwrap();
        assert!(centroid.iter().all(|v| v.is_finite() && *v > 0.0));
        outcome.region_stats.covariance(cell).unwrap();
    }
}

#[test]
fn test_graceful_degradation_on_forced_fit_failures() {
    let elec = electrical();
    let stream = ground_truth_stream(&elec, 80);
    // unsatisfiable local runs: a huge gradient step diverges immediately
    let broken_optimizer = WindowedOptimizer::new(
        elec.clone(),
        ThermalConfig::default(),
        OptimizerConfig {
            method: OptimizerMethod::GradientDescent,
            learning_rate: 1e12,
            seed: Some(2),
            restarts: 2,
            ..OptimizerConfig::default()
        },
    )
    .unwrap();
    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 20,
            training_window: 80,
            collect_region_stats: false,
        },
        coarse_grid(&elec),
        broken_optimizer,
    )
    .unwrap();
    let mut twin = CircuitTwin::new(elec, ThermalConfig::default()).unwrap();
    let parameters_before = twin.parameters();

    let outcome = learning.run(&mut twin, &stream).unwrap();
    assert_eq!(outcome.time_series.len(), 80, "loop must run to completion");
    assert!(outcome.fit_failures > 0);
    assert_eq!(outcome.fit_failures, outcome.triggers);
    assert_eq!(twin.parameters(), parameters_before);
    assert!(outcome.final_theta().is_none());
}

#[test]
fn test_nan_input_aborts_the_run_as_numerical_divergence() {
    let elec = ElectricalConfig::default();
    let mut currents = vec![1.0; 60];
    currents[35] = f64::NAN;
    let reference = CircuitTwin::new(elec.clone(), ThermalConfig::default()).unwrap();
    let (voltage, temperature) = reference.simulate(&[1.0; 60], 1.0);
    let time: Vec<f64> = (0..60).map(|k| k as f64).collect();
    let stream = MeasurementStream::new(currents, voltage, temperature, time).unwrap();

    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 20,
            training_window: 60,
            collect_region_stats: false,
        },
        coarse_grid(&elec),
        fast_optimizer(&elec, 3),
    )
    .unwrap();
    let mut twin = CircuitTwin::new(elec, ThermalConfig::default()).unwrap();

    // NaN propagation out of the twin is the one fatal hot-path error;
    // unlike a failed fit it must stop the stream
    let err = learning.run(&mut twin, &stream).unwrap_err();
    assert!(matches!(err, celltwin::Error::NumericalDivergence(_)), "got {err:?}");
}

#[test]
fn test_report_round_trips_through_json() {
    let elec = electrical();
    let stream = ground_truth_stream(&elec, 90);
    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 30,
            training_window: 90,
            collect_region_stats: true,
        },
        fine_grid(&elec),
        fast_optimizer(&elec, 77),
    )
    .unwrap();
    let mut twin = CircuitTwin::new(elec, ThermalConfig::default()).unwrap();
    let outcome = learning.run(&mut twin, &stream).unwrap();

    let report = RunReport::from_outcome(&outcome).unwrap();
    assert_eq!(report.samples_processed, 90);
    let json = report.to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["samples_processed"], 90);
}

#[test]
fn test_applied_parameters_match_last_history_entry() {
    let elec = ElectricalConfig::default();
    let stream = ground_truth_stream(&elec, 100);
    let mut learning = AdaptiveLearningLoop::new(
        LoopConfig {
            batch_size: 20,
            training_window: 100,
            collect_region_stats: false,
        },
        coarse_grid(&elec),
        fast_optimizer(&elec, 13),
    )
    .unwrap();
    let mut twin = CircuitTwin::new(elec, ThermalConfig::default()).unwrap();

    let outcome = learning.run(&mut twin, &stream).unwrap();
    if let Some(theta) = outcome.final_theta() {
        assert_eq!(twin.parameters(), theta);
    }
}
