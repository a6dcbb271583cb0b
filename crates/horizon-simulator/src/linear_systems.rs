use horizon_core::{Plant, PredictionModel};
use nalgebra::{DMatrix, DVector, Vector2};

/// First-order lag `dy/dt = (u - y) / tau`.
#[derive(Debug, Clone)]
pub struct FirstOrderSystem {
    tau: f64,
    y: f64,
}

impl FirstOrderSystem {
    pub fn new(tau: f64, y: f64) -> Self {
        Self { tau, y }
    }

    pub fn output(&self) -> f64 {
        self.y
    }
}

impl Default for FirstOrderSystem {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Plant for FirstOrderSystem {
    fn state(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.y])
    }

    fn apply(&mut self, control: &DVector<f64>, dt: f64) {
        self.y += (control[0] - self.y) / self.tau * dt;
    }
}

/// Prediction model of a [`FirstOrderSystem`].
#[derive(Debug, Clone, Copy)]
pub struct FirstOrderModel {
    pub tau: f64,
}

impl Default for FirstOrderModel {
    fn default() -> Self {
        Self { tau: 1.0 }
    }
}

impl PredictionModel for FirstOrderModel {
    fn state_dim(&self) -> usize {
        1
    }

    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64> {
        DVector::from_vec(vec![state[0] + (control[0] - state[0]) / self.tau * dt])
    }

    fn jacobians(
        &self,
        _state: &DVector<f64>,
        _control: &DVector<f64>,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        Some((
            DMatrix::from_element(1, 1, -1.0 / self.tau),
            DMatrix::from_element(1, 1, 1.0 / self.tau),
        ))
    }
}

/// Parameters of `m x'' + c x' + k x = u`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorParams {
    pub mass: f64,
    pub damping: f64,
    pub stiffness: f64,
}

impl Default for OscillatorParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            damping: 0.5,
            stiffness: 1.0,
        }
    }
}

impl OscillatorParams {
    /// Semi-implicit Euler step of `[x, v]`: velocity first, then position with the new velocity.
    fn step(&self, state: Vector2<f64>, force: f64, dt: f64) -> Vector2<f64> {
        let (x, v) = (state[0], state[1]);
        let acc = (force - self.damping * v - self.stiffness * x) / self.mass;
        let v = v + acc * dt;
        Vector2::new(x + v * dt, v)
    }
}

/// Damped mass on a spring, state `[x, v]`.
#[derive(Debug, Clone)]
pub struct MassSpringDamper {
    params: OscillatorParams,
    state: Vector2<f64>,
}

impl MassSpringDamper {
    pub fn new(params: OscillatorParams, x: f64, v: f64) -> Self {
        Self {
            params,
            state: Vector2::new(x, v),
        }
    }

    pub fn params(&self) -> &OscillatorParams {
        &self.params
    }
}

impl Default for MassSpringDamper {
    fn default() -> Self {
        Self::new(OscillatorParams::default(), 0.0, 0.0)
    }
}

impl Plant for MassSpringDamper {
    fn state(&self) -> DVector<f64> {
        DVector::from_column_slice(self.state.as_slice())
    }

    fn apply(&mut self, control: &DVector<f64>, dt: f64) {
        self.state = self.params.step(self.state, control[0], dt);
    }
}

/// Prediction model of a [`MassSpringDamper`], using the same integrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MassSpringDamperModel {
    pub params: OscillatorParams,
}

impl PredictionModel for MassSpringDamperModel {
    fn state_dim(&self) -> usize {
        2
    }

    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64> {
        let next = self
            .params
            .step(Vector2::new(state[0], state[1]), control[0], dt);
        DVector::from_column_slice(next.as_slice())
    }

    fn jacobians(
        &self,
        _state: &DVector<f64>,
        _control: &DVector<f64>,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        let OscillatorParams {
            mass,
            damping,
            stiffness,
        } = self.params;
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -stiffness / mass, -damping / mass]);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0 / mass]);
        Some((a, b))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn first_order_approaches_input() {
        let mut system = FirstOrderSystem::default();
        for _ in 0..1000 {
            system.apply(&DVector::from_vec(vec![2.0]), 0.01);
        }
        assert_relative_eq!(system.output(), 2.0, epsilon = 1e-3);
        assert!(system.output() < 2.0);
    }

    #[test]
    fn first_order_model_matches_plant() {
        let mut system = FirstOrderSystem::new(0.5, 1.0);
        let model = FirstOrderModel { tau: 0.5 };
        let u = DVector::from_vec(vec![3.0]);
        let predicted = model.step(&system.state(), &u, 0.1);
        system.apply(&u, 0.1);
        assert_relative_eq!(predicted, system.state());
    }

    #[test]
    fn oscillator_updates_velocity_first() {
        let mut system = MassSpringDamper::new(OscillatorParams::default(), 0.0, 0.0);
        system.apply(&DVector::from_vec(vec![1.0]), 0.1);
        // v = 0.1, and the position already moves with the new velocity
        assert_relative_eq!(system.state()[1], 0.1);
        assert_relative_eq!(system.state()[0], 0.01);
    }

    #[test]
    fn oscillator_decays_without_input() {
        let mut system = MassSpringDamper::new(OscillatorParams::default(), 1.0, 0.0);
        let model = MassSpringDamperModel::default();
        let mut predicted = system.state();
        for _ in 0..3000 {
            predicted = model.step(&predicted, &DVector::zeros(1), 0.01);
            system.apply(&DVector::zeros(1), 0.01);
        }
        assert_relative_eq!(predicted, system.state());
        assert!(system.state().norm() < 1e-2);
    }
}
