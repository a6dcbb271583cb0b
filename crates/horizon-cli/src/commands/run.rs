use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use horizon_core::{ControllerKind, HorizonSettings, Plant, PredictionModel};
use horizon_executor::{MpcController, RecedingHorizonDriver, RunMetrics};
use horizon_simulator::{
    cartpole_settings, oscillator_settings, thermal_settings, CartPole, CartPoleModel,
    MassSpringDamper, MassSpringDamperModel, NoisyPlant, ThermalModel, ThermalParams, ThermalRoom,
    CARTPOLE_INITIAL_ANGLE, THERMAL_INITIAL_TEMPERATURE, THERMAL_SETPOINTS,
};
use nalgebra::DVector;

use crate::cli::PlantKind;

pub struct RunArgs {
    pub plant: PlantKind,
    pub controller: ControllerKind,
    pub duration: f64,
    pub settings_file: Option<PathBuf>,
    pub noise: f64,
    pub seed: u64,
}

/// What to measure and which target changes to make during a run.
struct Scenario {
    /// `(tick, target)` pairs. The first one is applied before the run starts.
    setpoints: Vec<(u64, DVector<f64>)>,
    /// State component the metrics are computed on.
    component: usize,
    /// Error band for the settling time.
    band: f64,
}

pub fn run(args: RunArgs) -> Result<RunMetrics> {
    if !args.duration.is_finite() || args.duration <= 0.0 {
        bail!("Duration must be positive, got {}", args.duration);
    }

    let preset = match args.plant {
        PlantKind::Cartpole => cartpole_settings,
        PlantKind::Thermal => thermal_settings,
        PlantKind::Oscillator => oscillator_settings,
    };
    let mut settings = match &args.settings_file {
        Some(path) => HorizonSettings::load_or_insert_with(path, || preset(args.controller))?,
        None => preset(args.controller),
    };
    settings.controller.kind = args.controller;

    let dt = settings.controller.dt;
    let ticks = (args.duration / dt).round() as u64;
    log::info!(
        "Running {:?} with the {:?} controller for {} ticks",
        args.plant,
        args.controller,
        ticks
    );

    match args.plant {
        PlantKind::Cartpole => {
            let plant = CartPole::tilted(CARTPOLE_INITIAL_ANGLE);
            let scenario = Scenario {
                setpoints: vec![(0, DVector::zeros(4))],
                component: 2,
                band: 0.01,
            };
            drive(&settings, plant, CartPoleModel::default(), scenario, &args, ticks)
        }
        PlantKind::Thermal => {
            let room = ThermalRoom::new(ThermalParams::default(), THERMAL_INITIAL_TEMPERATURE);
            let scenario = Scenario {
                setpoints: THERMAL_SETPOINTS
                    .iter()
                    .map(|&(time, target)| {
                        ((time / dt).round() as u64, DVector::from_vec(vec![target]))
                    })
                    .collect(),
                component: 0,
                band: 0.5,
            };
            drive(&settings, room, ThermalModel::default(), scenario, &args, ticks)
        }
        PlantKind::Oscillator => {
            let scenario = Scenario {
                setpoints: vec![(0, DVector::from_vec(vec![1.0, 0.0]))],
                component: 0,
                band: 0.05,
            };
            drive(
                &settings,
                MassSpringDamper::default(),
                MassSpringDamperModel::default(),
                scenario,
                &args,
                ticks,
            )
        }
    }
}

fn drive<P: Plant, M: PredictionModel>(
    settings: &HorizonSettings,
    plant: P,
    model: M,
    scenario: Scenario,
    args: &RunArgs,
    ticks: u64,
) -> Result<RunMetrics> {
    let controller = MpcController::from_settings(settings)?;
    let plant = NoisyPlant::new(plant, args.noise, args.seed)?;

    let mut driver = RecedingHorizonDriver::new(controller, plant, model);
    for (at, target) in scenario.setpoints {
        driver = driver.with_setpoint(at, target);
    }
    let applied = driver.run(ticks)?;
    if applied < ticks {
        log::warn!("Run stopped after {} of {} ticks", applied, ticks);
    }

    driver
        .trace()
        .metrics(scenario.component, scenario.band, driver.dt())
        .ok_or_else(|| anyhow!("State has no component {}", scenario.component))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(plant: PlantKind, controller: ControllerKind, duration: f64) -> RunArgs {
        RunArgs {
            plant,
            controller,
            duration,
            settings_file: None,
            noise: 0.0,
            seed: 0,
        }
    }

    #[test]
    fn oscillator_run_settles() {
        let metrics = run(args(PlantKind::Oscillator, ControllerKind::Linear, 10.0)).unwrap();
        assert_eq!(metrics.ticks, 200);
        assert!(!metrics.faulted);
        assert!(metrics.final_error.abs() < 0.05);
    }

    #[test]
    fn settings_file_is_created_from_the_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thermal.json");
        let mut run_args = args(PlantKind::Thermal, ControllerKind::Nonlinear, 100.0);
        run_args.settings_file = Some(path.clone());

        let metrics = run(run_args).unwrap();
        assert_eq!(metrics.ticks, 10);

        let stored = HorizonSettings::load_or_insert(&path).unwrap();
        assert_eq!(stored, thermal_settings(ControllerKind::Nonlinear));
    }

    #[test]
    fn negative_noise_is_rejected() {
        let mut run_args = args(PlantKind::Oscillator, ControllerKind::Linear, 1.0);
        run_args.noise = -0.1;
        assert!(run(run_args).is_err());
    }

    #[test]
    fn negative_duration_is_rejected() {
        assert!(run(args(PlantKind::Cartpole, ControllerKind::Nonlinear, -1.0)).is_err());
    }
}
