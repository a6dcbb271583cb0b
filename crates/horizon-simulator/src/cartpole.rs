use horizon_core::{Plant, PredictionModel};
use nalgebra::{DMatrix, DVector, Vector4};

/// Physical parameters of the inverted pendulum on a cart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartPoleParams {
    /// Cart mass in kg.
    pub cart_mass: f64,
    /// Pole mass in kg.
    pub pole_mass: f64,
    /// Distance from the pivot to the pole's center of mass in m.
    pub pole_length: f64,
    /// Gravitational acceleration in m/s².
    pub gravity: f64,
    /// Cart position beyond which the run fails, in m.
    pub x_threshold: f64,
    /// Pole angle beyond which the run fails, in rad.
    pub theta_threshold: f64,
}

impl Default for CartPoleParams {
    fn default() -> Self {
        Self {
            cart_mass: 1.0,
            pole_mass: 0.1,
            pole_length: 0.5,
            gravity: 9.8,
            x_threshold: 2.4,
            theta_threshold: 0.21,
        }
    }
}

impl CartPoleParams {
    /// Time derivative of `[x, x_dot, theta, theta_dot]` under horizontal force `force`.
    /// `theta = 0` is upright.
    fn derivatives(&self, state: &Vector4<f64>, force: f64) -> Vector4<f64> {
        let (theta, theta_dot) = (state[2], state[3]);
        let (sin, cos) = theta.sin_cos();
        let total_mass = self.cart_mass + self.pole_mass;
        let ml = self.pole_mass * self.pole_length;

        let temp = (force + ml * theta_dot.powi(2) * sin) / total_mass;
        let theta_acc = (self.gravity * sin - cos * temp)
            / (self.pole_length * (4.0 / 3.0 - self.pole_mass * cos.powi(2) / total_mass));
        let x_acc = temp - ml * theta_acc * cos / total_mass;

        Vector4::new(state[1], x_acc, theta_dot, theta_acc)
    }
}

/// Simulated cart-pole, integrated with RK4.
#[derive(Debug, Clone)]
pub struct CartPole {
    params: CartPoleParams,
    state: Vector4<f64>,
}

impl CartPole {
    pub fn new(params: CartPoleParams) -> Self {
        Self {
            params,
            state: Vector4::zeros(),
        }
    }

    /// Cart at rest in the middle of the track with the pole tilted by `theta`.
    pub fn tilted(theta: f64) -> Self {
        let mut cartpole = Self::new(CartPoleParams::default());
        cartpole.reset(Vector4::new(0.0, 0.0, theta, 0.0));
        cartpole
    }

    pub fn reset(&mut self, state: Vector4<f64>) {
        self.state = state;
    }

    pub fn params(&self) -> &CartPoleParams {
        &self.params
    }
}

impl Plant for CartPole {
    fn state(&self) -> DVector<f64> {
        DVector::from_column_slice(self.state.as_slice())
    }

    fn apply(&mut self, control: &DVector<f64>, dt: f64) {
        let force = control[0];
        let p = &self.params;
        let s = self.state;
        let k1 = p.derivatives(&s, force);
        let k2 = p.derivatives(&(s + k1 * (dt / 2.0)), force);
        let k3 = p.derivatives(&(s + k2 * (dt / 2.0)), force);
        let k4 = p.derivatives(&(s + k3 * dt), force);
        self.state = s + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0);
    }

    fn is_failed(&self) -> bool {
        self.state[0].abs() > self.params.x_threshold
            || self.state[2].abs() > self.params.theta_threshold
    }
}

/// Cart-pole prediction model: the same dynamics stepped with explicit Euler.
///
/// The analytic Jacobians are those of the upright equilibrium with the pole treated as a point
/// mass, independent of the operating point.
#[derive(Debug, Clone, Copy, Default)]
pub struct CartPoleModel {
    pub params: CartPoleParams,
}

impl PredictionModel for CartPoleModel {
    fn state_dim(&self) -> usize {
        4
    }

    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64> {
        let s = Vector4::new(state[0], state[1], state[2], state[3]);
        let next = s + self.params.derivatives(&s, control[0]) * dt;
        DVector::from_column_slice(next.as_slice())
    }

    fn jacobians(
        &self,
        _state: &DVector<f64>,
        _control: &DVector<f64>,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        let CartPoleParams {
            cart_mass: big_m,
            pole_mass: m,
            pole_length: l,
            gravity: g,
            ..
        } = self.params;

        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(4, 4, &[
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, -m * g / big_m, 0.0,
            0.0, 0.0, 0.0, 1.0,
            0.0, 0.0, (big_m + m) * g / (big_m * l), 0.0,
        ]);
        let b = DMatrix::from_row_slice(4, 1, &[0.0, 1.0 / big_m, 0.0, -1.0 / (big_m * l)]);
        Some((a, b))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn upright_is_an_equilibrium() {
        let mut cartpole = CartPole::new(CartPoleParams::default());
        cartpole.apply(&DVector::zeros(1), 0.02);
        assert_eq!(cartpole.state(), DVector::zeros(4));
        assert!(!cartpole.is_failed());
    }

    #[test]
    fn tilted_pole_falls() {
        let mut cartpole = CartPole::tilted(0.1);
        for _ in 0..50 {
            cartpole.apply(&DVector::zeros(1), 0.02);
        }
        assert!(cartpole.state()[2] > 0.21);
        assert!(cartpole.is_failed());
    }

    #[test]
    fn pushing_the_cart_rights_the_pole() {
        let model = CartPoleModel::default();
        let state = DVector::from_vec(vec![0.0, 0.0, 0.1, 0.0]);
        let free = model.step(&state, &DVector::zeros(1), 0.02);
        let pushed = model.step(&state, &DVector::from_vec(vec![10.0]), 0.02);
        assert!(pushed[3] < free[3]);
        assert!(pushed[1] > free[1]);
    }

    #[test]
    fn model_tracks_plant_over_one_step() {
        let mut plant = CartPole::tilted(0.05);
        let model = CartPoleModel::default();
        let u = DVector::from_vec(vec![2.0]);
        let predicted = model.step(&plant.state(), &u, 0.001);
        plant.apply(&u, 0.001);
        assert_relative_eq!(predicted, plant.state(), epsilon = 1e-5);
    }

    #[test]
    fn jacobians_match_the_upright_linearization() {
        let model = CartPoleModel::default();
        let (a, b) = model
            .jacobians(&DVector::zeros(4), &DVector::zeros(1))
            .unwrap();
        assert_relative_eq!(a[(3, 2)], 1.1 * 9.8 / 0.5);
        assert_relative_eq!(b[(3, 0)], -2.0);
    }
}
