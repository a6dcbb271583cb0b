use horizon_core::{MpcConfig, MpcError, PredictionModel, Weights};
use nalgebra::DVector;

use super::{linearize::step_jacobians, predict, ControlSequence, Trajectory};

/// Everything a cost evaluation depends on, passed explicitly instead of captured.
pub struct CostContext<'a, M: PredictionModel + ?Sized> {
    pub state: &'a DVector<f64>,
    pub target: &'a DVector<f64>,
    pub model: &'a M,
    pub config: &'a MpcConfig,
}

impl<'a, M: PredictionModel + ?Sized> CostContext<'a, M> {
    /// Cost of the flat decision vector `u`.
    pub fn cost(&self, u: &[f64]) -> Result<f64, MpcError> {
        let controls = ControlSequence::try_new(u, self.config.control_dim())?;
        let trajectory = predict(
            self.state,
            &controls,
            self.model,
            self.config.horizon(),
            self.config.dt(),
        )?;
        Ok(trajectory_cost(
            &trajectory,
            &controls,
            self.target,
            self.config.weights(),
            self.config.solver().smoothing,
        ))
    }

    /// Gradient of [`CostContext::cost`].
    ///
    /// The cost terms are differentiated exactly. The model is differentiated one step at a
    /// time by central differences and the tracking error is carried backwards through the
    /// rollout with the costate `p_k = F_x' p_{k+1} + (Q + Q') e_k`. Moves held past the
    /// control horizon collect the sensitivities of every step they drive.
    pub fn cost_grad(&self, u: &[f64], grad: &mut [f64]) -> Result<(), MpcError> {
        if grad.len() != u.len() {
            return Err(MpcError::dimension("gradient", u.len(), grad.len()));
        }
        let m = self.config.control_dim();
        let horizon = self.config.horizon();
        let dt = self.config.dt();
        let controls = ControlSequence::try_new(u, m)?;
        let trajectory = predict(self.state, &controls, self.model, horizon, dt)?;
        let states = trajectory.states();

        let weights = self.config.weights();
        let q_sym = weights.q() + weights.q().transpose();
        let r_sym = weights.r() + weights.r().transpose();
        let smoothing = self.config.solver().smoothing;

        grad.fill(0.0);
        for j in 0..controls.len() {
            let effort = &r_sym * controls.at(j);
            for (c, value) in effort.iter().enumerate() {
                grad[j * m + c] += value;
            }
        }
        for j in 1..controls.len() {
            for c in 0..m {
                let delta = 2.0 * smoothing * (u[j * m + c] - u[(j - 1) * m + c]);
                grad[j * m + c] += delta;
                grad[(j - 1) * m + c] -= delta;
            }
        }

        let last = horizon.prediction();
        let mut costate = &q_sym * (&states[last] - self.target);
        for step in (0..last).rev() {
            let j = horizon.control_index(step);
            let (f_x, f_u) = step_jacobians(self.model, &states[step], &controls.at(j), dt)
                .map_err(|err| match err {
                    MpcError::Model { reason, .. } => MpcError::Model { step, reason },
                    other => other,
                })?;
            let sensitivity = f_u.transpose() * &costate;
            for (c, value) in sensitivity.iter().enumerate() {
                grad[j * m + c] += value;
            }
            if step > 0 {
                costate = f_x.transpose() * costate + &q_sym * (&states[step] - self.target);
            }
        }

        if grad.iter().any(|g| !g.is_finite()) {
            return Err(MpcError::Model {
                step: 0,
                reason: "cost gradient is not finite".into(),
            });
        }
        Ok(())
    }
}

/// `sum_{i=1..N} e_i' Q e_i + sum_{i<M} u_i' R u_i + lambda * sum_{i<M-1} |u_{i+1} - u_i|^2`
/// with `e_i = x_i - target`.
pub fn trajectory_cost(
    trajectory: &Trajectory,
    controls: &ControlSequence,
    target: &DVector<f64>,
    weights: &Weights,
    smoothing: f64,
) -> f64 {
    let tracking: f64 = trajectory
        .predicted()
        .iter()
        .map(|x| {
            let e = x - target;
            (e.transpose() * weights.q() * &e)[(0, 0)]
        })
        .sum();

    let effort: f64 = (0..controls.len())
        .map(|i| {
            let u = controls.at(i);
            (u.transpose() * weights.r() * &u)[(0, 0)]
        })
        .sum();

    let roughness: f64 = controls
        .moves()
        .zip(controls.moves().skip(1))
        .map(|(a, b)| a.iter().zip(b).map(|(a, b)| (b - a).powi(2)).sum::<f64>())
        .sum();

    tracking + effort + smoothing * roughness
}
