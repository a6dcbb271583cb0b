use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    AdaptiveSchedule, ConfigError, ControlBounds, Horizon, MpcConfig, ScheduledWeight,
    SolverOptions, Weights,
};

/// Which solution strategy a controller uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    /// Bounded nonlinear optimization over the full prediction model.
    #[default]
    Nonlinear,
    /// Closed-form QP on a linearization around the current state.
    Linear,
    /// Nonlinear MPC with state-dependent weights and horizon.
    Adaptive,
}

impl ControllerKind {
    /// The name used in settings files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ControllerKind::Nonlinear => "nonlinear",
            ControllerKind::Linear => "linear",
            ControllerKind::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControllerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ControllerKind::Nonlinear,
            ControllerKind::Linear,
            ControllerKind::Adaptive,
        ]
        .into_iter()
        .find(|kind| kind.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| ConfigError::UnknownController(s.to_string()))
    }
}

/// Settings for the MPC controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Solution strategy.
    pub kind: ControllerKind,
    /// Prediction horizon `N`, in steps.
    pub prediction_horizon: usize,
    /// Control horizon `M`, in steps. Must not exceed the prediction horizon.
    pub control_horizon: usize,
    /// Sampling interval in seconds.
    pub dt: f64,
    /// Diagonal of the state-error weight `Q`.
    pub q_diagonal: Vec<f64>,
    /// Diagonal of the control-effort weight `R`.
    pub r_diagonal: Vec<f64>,
    /// Lower bound on every control input.
    pub u_min: f64,
    /// Upper bound on every control input.
    pub u_max: f64,
    /// Weight of the control-smoothness penalty.
    pub smoothing: f64,
    /// Iteration cap of the optimizer.
    pub max_iterations: usize,
    /// Convergence tolerance of the optimizer.
    pub tolerance: f64,
    /// L-BFGS memory of the nonlinear solver.
    pub lbfgs_memory: usize,
    /// Start each solve from the shifted previous solution instead of zero.
    pub warm_start: bool,
}

impl ControllerSettings {
    /// Validate the settings and turn them into a controller configuration.
    pub fn to_config(&self) -> Result<MpcConfig, ConfigError> {
        let horizon = Horizon::new(self.prediction_horizon, self.control_horizon)?;
        let bounds = ControlBounds::new(self.u_min, self.u_max)?;
        let weights = Weights::from_diagonals(&self.q_diagonal, &self.r_diagonal)?;
        MpcConfig::new(horizon, self.dt, bounds, weights)?.with_solver(self.solver_options())
    }

    fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            lbfgs_memory: self.lbfgs_memory,
            smoothing: self.smoothing,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        let solver = SolverOptions::default();
        Self {
            kind: ControllerKind::default(),
            prediction_horizon: 10,
            control_horizon: 5,
            dt: 0.02,
            q_diagonal: vec![10.0, 1.0, 200.0, 20.0],
            r_diagonal: vec![0.01],
            u_min: -50.0,
            u_max: 50.0,
            smoothing: solver.smoothing,
            max_iterations: solver.max_iterations,
            tolerance: solver.tolerance,
            lbfgs_memory: solver.lbfgs_memory,
            warm_start: false,
        }
    }
}

/// Settings for the adaptive supervisor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// `(component, gain)` pairs. The `Q` entry of each component is scaled by
    /// `1 + gain * |error|`.
    pub scheduled: Vec<(usize, f64)>,
    /// Component whose error shortens the horizon.
    pub trigger_component: usize,
    /// Error magnitude above which the horizon is shortened.
    pub threshold: f64,
    /// Floor of the shortened prediction horizon.
    pub min_prediction_horizon: usize,
    /// Floor of the shortened control horizon.
    pub min_control_horizon: usize,
}

impl AdaptiveSettings {
    pub fn to_schedule(&self) -> Result<AdaptiveSchedule, ConfigError> {
        AdaptiveSchedule::new(
            self.scheduled
                .iter()
                .map(|&(component, gain)| ScheduledWeight { component, gain })
                .collect(),
            self.trigger_component,
            self.threshold,
            self.min_prediction_horizon,
            self.min_control_horizon,
        )
    }
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            scheduled: vec![(2, 10.0), (3, 5.0)],
            trigger_component: 2,
            threshold: 0.15,
            min_prediction_horizon: 5,
            min_control_horizon: 3,
        }
    }
}

/// Top-level settings file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonSettings {
    pub controller: ControllerSettings,
    pub adaptive: AdaptiveSettings,
}

impl HorizonSettings {
    /// Load the settings from a file, or store the default settings if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is reported and replaced by the defaults in
    /// memory only.
    pub fn load_or_insert(path: impl AsRef<Path>) -> Result<Self> {
        read_or_insert(path.as_ref(), Self::default)
    }

    /// Like [`HorizonSettings::load_or_insert`], with the settings to use when the file is
    /// missing or invalid.
    pub fn load_or_insert_with(
        path: impl AsRef<Path>,
        default: impl FnOnce() -> Self,
    ) -> Result<Self> {
        read_or_insert(path.as_ref(), default)
    }

    /// Store the settings in the given file.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}

fn read_or_insert(
    path: &Path,
    default: impl FnOnce() -> HorizonSettings,
) -> Result<HorizonSettings> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                log::error!("Failed to parse settings {}: {}", path.display(), err);
                Ok(default())
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let settings = default();
            settings.store(path)?;
            log::info!("Wrote default settings to {}", path.display());
            Ok(settings)
        }
        Err(err) => {
            Err(err).with_context(|| format!("Failed to read settings from {}", path.display()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_controller_names_match_settings_files() {
        for kind in [
            ControllerKind::Nonlinear,
            ControllerKind::Linear,
            ControllerKind::Adaptive,
        ] {
            assert_eq!(kind.to_string().parse::<ControllerKind>(), Ok(kind));
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{kind}\""));
        }
        assert_eq!("Linear".parse::<ControllerKind>(), Ok(ControllerKind::Linear));
        assert!(matches!(
            "pid".parse::<ControllerKind>(),
            Err(ConfigError::UnknownController(name)) if name == "pid"
        ));
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = HorizonSettings::default();
        let config = settings.controller.to_config().unwrap();
        assert_eq!(config.horizon().prediction(), 10);
        assert_eq!(config.horizon().control(), 5);
        assert_eq!(config.state_dim(), 4);
        assert_eq!(config.control_dim(), 1);
        assert!(settings.adaptive.to_schedule().is_ok());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let settings = ControllerSettings {
            prediction_horizon: 3,
            control_horizon: 4,
            ..Default::default()
        };
        assert!(matches!(
            settings.to_config(),
            Err(ConfigError::ControlHorizonExceedsPrediction { .. })
        ));

        let settings = ControllerSettings {
            u_min: 1.0,
            u_max: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            settings.to_config(),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{ "controller": { "kind": "linear", "prediction_horizon": 20 } }"#;
        let settings: HorizonSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.controller.kind, ControllerKind::Linear);
        assert_eq!(settings.controller.prediction_horizon, 20);
        assert_eq!(settings.controller.control_horizon, 5);
        assert_eq!(settings.adaptive, AdaptiveSettings::default());
    }

    #[test]
    fn test_load_or_insert_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = HorizonSettings::load_or_insert(&path).unwrap();
        assert_eq!(settings, HorizonSettings::default());
        assert!(path.exists());

        let mut changed = settings.clone();
        changed.controller.kind = ControllerKind::Adaptive;
        changed.store(&path).unwrap();
        let loaded = HorizonSettings::load_or_insert(&path).unwrap();
        assert_eq!(loaded.controller.kind, ControllerKind::Adaptive);
    }

    #[test]
    fn test_load_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let settings = HorizonSettings::load_or_insert(&path).unwrap();
        assert_eq!(settings, HorizonSettings::default());
        // The broken file is left alone
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }
}
