use horizon_core::{ControllerKind, HorizonSettings, MpcError, PredictionModel};
use nalgebra::DVector;

use crate::mpc::{AdaptiveMpc, History, LinearMpc, MpcSolution, NonlinearMpc};

/// A receding-horizon controller: given the current state, return the next control action.
pub trait Controller {
    /// Short name used in logs and telemetry.
    fn name(&self) -> &'static str;

    /// Sampling interval the controller predicts with, in seconds.
    fn dt(&self) -> f64;

    /// Solve from `state` and return the first move of the optimal sequence.
    fn update(
        &mut self,
        state: &DVector<f64>,
        model: &dyn PredictionModel,
    ) -> Result<DVector<f64>, MpcError>;

    fn set_target(&mut self, target: DVector<f64>) -> Result<(), MpcError>;

    fn target(&self) -> &DVector<f64>;

    /// Clear the history. Configuration and target are kept.
    fn reset(&mut self);

    fn history(&self) -> &History;

    fn last_solution(&self) -> Option<&MpcSolution>;
}

macro_rules! impl_controller {
    ($ty:ty, $name:literal) => {
        impl Controller for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn dt(&self) -> f64 {
                <$ty>::config(self).dt()
            }

            fn update(
                &mut self,
                state: &DVector<f64>,
                model: &dyn PredictionModel,
            ) -> Result<DVector<f64>, MpcError> {
                <$ty>::update(self, state, model)
            }

            fn set_target(&mut self, target: DVector<f64>) -> Result<(), MpcError> {
                <$ty>::set_target(self, target)
            }

            fn target(&self) -> &DVector<f64> {
                <$ty>::target(self)
            }

            fn reset(&mut self) {
                <$ty>::reset(self)
            }

            fn history(&self) -> &History {
                <$ty>::history(self)
            }

            fn last_solution(&self) -> Option<&MpcSolution> {
                <$ty>::last_solution(self)
            }
        }
    };
}

impl_controller!(NonlinearMpc, "nonlinear");
impl_controller!(LinearMpc, "linear");
impl_controller!(AdaptiveMpc, "adaptive");

/// The three solver variants behind one [`Controller`].
#[derive(Debug, Clone)]
pub enum MpcController {
    Nonlinear(NonlinearMpc),
    Linear(LinearMpc),
    Adaptive(AdaptiveMpc),
}

impl MpcController {
    /// Build the controller described by `settings`.
    pub fn from_settings(settings: &HorizonSettings) -> Result<Self, MpcError> {
        let config = settings.controller.to_config()?;
        Ok(match settings.controller.kind {
            ControllerKind::Nonlinear => MpcController::Nonlinear(
                NonlinearMpc::new(config).with_warm_start(settings.controller.warm_start),
            ),
            ControllerKind::Linear => MpcController::Linear(LinearMpc::new(config)),
            ControllerKind::Adaptive => MpcController::Adaptive(AdaptiveMpc::new(
                config,
                settings.adaptive.to_schedule()?,
            )?),
        })
    }

    pub fn kind(&self) -> ControllerKind {
        match self {
            MpcController::Nonlinear(_) => ControllerKind::Nonlinear,
            MpcController::Linear(_) => ControllerKind::Linear,
            MpcController::Adaptive(_) => ControllerKind::Adaptive,
        }
    }

    fn inner(&self) -> &dyn Controller {
        match self {
            MpcController::Nonlinear(c) => c,
            MpcController::Linear(c) => c,
            MpcController::Adaptive(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Controller {
        match self {
            MpcController::Nonlinear(c) => c,
            MpcController::Linear(c) => c,
            MpcController::Adaptive(c) => c,
        }
    }
}

impl Controller for MpcController {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn dt(&self) -> f64 {
        self.inner().dt()
    }

    fn update(
        &mut self,
        state: &DVector<f64>,
        model: &dyn PredictionModel,
    ) -> Result<DVector<f64>, MpcError> {
        self.inner_mut().update(state, model)
    }

    fn set_target(&mut self, target: DVector<f64>) -> Result<(), MpcError> {
        self.inner_mut().set_target(target)
    }

    fn target(&self) -> &DVector<f64> {
        self.inner().target()
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }

    fn history(&self) -> &History {
        self.inner().history()
    }

    fn last_solution(&self) -> Option<&MpcSolution> {
        self.inner().last_solution()
    }
}

#[cfg(test)]
mod test {
    use horizon_core::{ControllerSettings, FnModel};

    use super::*;

    fn settings(kind: ControllerKind) -> HorizonSettings {
        HorizonSettings {
            controller: ControllerSettings {
                kind,
                q_diagonal: vec![1.0, 1.0, 1.0, 1.0],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_from_settings_picks_variant() {
        for kind in [
            ControllerKind::Nonlinear,
            ControllerKind::Linear,
            ControllerKind::Adaptive,
        ] {
            let controller = MpcController::from_settings(&settings(kind)).unwrap();
            assert_eq!(controller.kind(), kind);
        }
        let controller = MpcController::from_settings(&settings(ControllerKind::Linear)).unwrap();
        assert_eq!(controller.name(), "linear");
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut bad = settings(ControllerKind::Nonlinear);
        bad.controller.control_horizon = 20;
        assert!(matches!(
            MpcController::from_settings(&bad),
            Err(MpcError::Config(_))
        ));
    }

    #[test]
    fn test_dispatch_through_trait_object() {
        let model = FnModel::new(4, 1, |x: &DVector<f64>, u: &DVector<f64>, dt: f64| {
            let mut next = x.clone();
            next[0] += dt * x[1];
            next[1] += dt * u[0];
            next
        });
        let mut controllers: Vec<Box<dyn Controller>> = [
            ControllerKind::Nonlinear,
            ControllerKind::Linear,
            ControllerKind::Adaptive,
        ]
        .into_iter()
        .map(|kind| {
            Box::new(MpcController::from_settings(&settings(kind)).unwrap()) as Box<dyn Controller>
        })
        .collect();

        let state = DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0]);
        for controller in controllers.iter_mut() {
            let u = controller.update(&state, &model).unwrap();
            assert_eq!(u.len(), 1);
            assert!(u[0] < 0.0, "{} pushed the wrong way", controller.name());
            assert_eq!(controller.history().len(), 1);
            controller.reset();
            assert!(controller.history().is_empty());
        }
    }
}
