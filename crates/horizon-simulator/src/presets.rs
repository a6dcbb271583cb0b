//! Controller settings tuned for the bundled plants.

use horizon_core::{AdaptiveSettings, ControllerKind, ControllerSettings, HorizonSettings};

/// Room temperature changes as `(time in s, target in °C)`.
pub const THERMAL_SETPOINTS: [(f64, f64); 2] = [(0.0, 22.0), (1800.0, 20.0)];

/// Temperature the thermal scenario starts from.
pub const THERMAL_INITIAL_TEMPERATURE: f64 = 5.0;

/// Pole angle the cart-pole scenario starts from.
pub const CARTPOLE_INITIAL_ANGLE: f64 = 0.1;

/// Cart-pole around the upright equilibrium. The linearized variant gets the longer horizon it
/// needs to make up for its model error.
pub fn cartpole_settings(kind: ControllerKind) -> HorizonSettings {
    let (prediction_horizon, control_horizon) = match kind {
        ControllerKind::Linear => (15, 8),
        ControllerKind::Nonlinear | ControllerKind::Adaptive => (10, 5),
    };
    HorizonSettings {
        controller: ControllerSettings {
            kind,
            prediction_horizon,
            control_horizon,
            ..Default::default()
        },
        adaptive: AdaptiveSettings::default(),
    }
}

/// Heated room with slow dynamics: long sampling interval and horizon, cheap control effort.
pub fn thermal_settings(kind: ControllerKind) -> HorizonSettings {
    HorizonSettings {
        controller: ControllerSettings {
            kind,
            prediction_horizon: 20,
            control_horizon: 10,
            dt: 10.0,
            q_diagonal: vec![10.0],
            r_diagonal: vec![0.001],
            u_min: 0.0,
            u_max: 2000.0,
            smoothing: 0.001,
            ..Default::default()
        },
        adaptive: AdaptiveSettings {
            scheduled: vec![(0, 0.5)],
            trigger_component: 0,
            threshold: 2.0,
            min_prediction_horizon: 10,
            min_control_horizon: 5,
        },
    }
}

/// Mass-spring-damper driven to `x = 1`.
pub fn oscillator_settings(kind: ControllerKind) -> HorizonSettings {
    HorizonSettings {
        controller: ControllerSettings {
            kind,
            prediction_horizon: 20,
            control_horizon: 10,
            dt: 0.05,
            q_diagonal: vec![10.0, 1.0],
            r_diagonal: vec![0.01],
            u_min: -5.0,
            u_max: 5.0,
            ..Default::default()
        },
        adaptive: AdaptiveSettings {
            scheduled: vec![(0, 5.0)],
            trigger_component: 0,
            threshold: 0.5,
            min_prediction_horizon: 10,
            min_control_horizon: 5,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [ControllerKind; 3] = [
        ControllerKind::Nonlinear,
        ControllerKind::Linear,
        ControllerKind::Adaptive,
    ];

    #[test]
    fn presets_are_valid() {
        for kind in KINDS {
            for (settings, state_dim) in [
                (cartpole_settings(kind), 4),
                (thermal_settings(kind), 1),
                (oscillator_settings(kind), 2),
            ] {
                let config = settings.controller.to_config().unwrap();
                assert_eq!(config.state_dim(), state_dim);
                let schedule = settings.adaptive.to_schedule().unwrap();
                schedule.check_dimension(state_dim).unwrap();
            }
        }
    }

    #[test]
    fn linear_cartpole_uses_longer_horizon() {
        let linear = cartpole_settings(ControllerKind::Linear).controller;
        assert_eq!((linear.prediction_horizon, linear.control_horizon), (15, 8));
        let nonlinear = cartpole_settings(ControllerKind::Nonlinear).controller;
        assert_eq!(
            (nonlinear.prediction_horizon, nonlinear.control_horizon),
            (10, 5)
        );
    }
}
