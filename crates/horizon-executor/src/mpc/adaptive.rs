use horizon_core::{
    AdaptiveSchedule, ConfigError, Horizon, MpcConfig, MpcError, PredictionModel, Weights,
};
use nalgebra::DVector;

use super::{check_dimensions, History, MpcSolution, NonlinearMpc};

/// Parameters chosen for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub weights: Weights,
    pub horizon: Horizon,
    /// Whether the trigger error exceeded the threshold.
    pub shortened: bool,
}

/// Gain-scheduled nonlinear MPC.
///
/// Every tick the diagonal `Q` entries of the scheduled components are scaled with the error on
/// those components and the horizon is shortened while the trigger error is large. The solve
/// itself is delegated to a fresh [`NonlinearMpc`] built from the adapted configuration. Nothing
/// carries over between ticks except the diagnostic history.
#[derive(Debug, Clone)]
pub struct AdaptiveMpc {
    base: MpcConfig,
    schedule: AdaptiveSchedule,
    target: DVector<f64>,
    history: History,
    last_solution: Option<MpcSolution>,
    last_adaptation: Option<Adaptation>,
}

impl AdaptiveMpc {
    pub fn new(base: MpcConfig, schedule: AdaptiveSchedule) -> Result<Self, ConfigError> {
        schedule.check_dimension(base.state_dim())?;
        Ok(Self {
            target: DVector::zeros(base.state_dim()),
            base,
            schedule,
            history: History::default(),
            last_solution: None,
            last_adaptation: None,
        })
    }

    pub fn config(&self) -> &MpcConfig {
        &self.base
    }

    pub fn target(&self) -> &DVector<f64> {
        &self.target
    }

    pub fn set_target(&mut self, target: DVector<f64>) -> Result<(), MpcError> {
        if target.len() != self.base.state_dim() {
            return Err(MpcError::dimension(
                "target",
                self.base.state_dim(),
                target.len(),
            ));
        }
        self.target = target;
        Ok(())
    }

    /// Weights and horizon for `state`.
    pub fn adapt(&self, state: &DVector<f64>) -> Result<Adaptation, MpcError> {
        if state.len() != self.base.state_dim() {
            return Err(MpcError::dimension(
                "state",
                self.base.state_dim(),
                state.len(),
            ));
        }
        let error = state - &self.target;

        let mut q = self.base.weights().q().clone();
        for scheduled in self.schedule.scheduled() {
            let c = scheduled.component;
            let base = self.base.weights().q()[(c, c)];
            q[(c, c)] = base * (1.0 + scheduled.gain * error[c].abs());
        }
        let weights = self.base.weights().with_q(q)?;

        let shortened = error[self.schedule.trigger_component()].abs() > self.schedule.threshold();
        let horizon = if shortened {
            self.schedule.short_horizon(self.base.horizon())
        } else {
            *self.base.horizon()
        };

        Ok(Adaptation {
            weights,
            horizon,
            shortened,
        })
    }

    pub fn solve<M: PredictionModel + ?Sized>(
        &mut self,
        state: &DVector<f64>,
        model: &M,
    ) -> Result<MpcSolution, MpcError> {
        check_dimensions(
            state,
            &self.target,
            model,
            self.base.state_dim(),
            self.base.control_dim(),
        )?;

        let adaptation = self.adapt(state)?;
        let config = self
            .base
            .with_weights(adaptation.weights.clone())?
            .with_horizon(adaptation.horizon);
        log::debug!(
            "Adaptive MPC: horizon ({}, {}), shortened {}",
            adaptation.horizon.prediction(),
            adaptation.horizon.control(),
            adaptation.shortened
        );

        let mut solver = NonlinearMpc::new(config);
        solver.set_target(self.target.clone())?;
        let solution = solver.solve(state, model, None)?;

        self.history.push(solution.first(), solution.cost);
        self.last_solution = Some(solution.clone());
        self.last_adaptation = Some(adaptation);
        Ok(solution)
    }

    /// Solve and return only the first control move.
    pub fn update<M: PredictionModel + ?Sized>(
        &mut self,
        state: &DVector<f64>,
        model: &M,
    ) -> Result<DVector<f64>, MpcError> {
        self.solve(state, model).map(|solution| solution.first())
    }

    /// Parameters used by the last solve.
    pub fn last_adaptation(&self) -> Option<&Adaptation> {
        self.last_adaptation.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn last_solution(&self) -> Option<&MpcSolution> {
        self.last_solution.as_ref()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_solution = None;
        self.last_adaptation = None;
    }
}
