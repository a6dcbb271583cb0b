use horizon_core::{Plant, PredictionModel};
use nalgebra::{DMatrix, DVector};

/// First-order room model `dT/dt = -a (T - ambient) + b u`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalParams {
    /// Heat loss coefficient in 1/s.
    pub a: f64,
    /// Heater gain in K/(W s).
    pub b: f64,
    /// Ambient temperature in °C.
    pub ambient: f64,
    /// Smallest heater power the room accepts, in W.
    pub u_min: f64,
    /// Largest heater power the room accepts, in W.
    pub u_max: f64,
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self {
            a: 0.05,
            b: 0.002,
            ambient: 5.0,
            u_min: 0.0,
            u_max: 2000.0,
        }
    }
}

impl ThermalParams {
    fn derivative(&self, temperature: f64, power: f64) -> f64 {
        -self.a * (temperature - self.ambient) + self.b * power
    }
}

/// Simulated room. The heater saturates at the power limits whatever it is asked for.
#[derive(Debug, Clone)]
pub struct ThermalRoom {
    params: ThermalParams,
    temperature: f64,
}

impl ThermalRoom {
    pub fn new(params: ThermalParams, temperature: f64) -> Self {
        Self {
            params,
            temperature,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn params(&self) -> &ThermalParams {
        &self.params
    }
}

impl Plant for ThermalRoom {
    fn state(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.temperature])
    }

    fn apply(&mut self, control: &DVector<f64>, dt: f64) {
        let power = control[0].clamp(self.params.u_min, self.params.u_max);
        self.temperature += self.params.derivative(self.temperature, power) * dt;
    }
}

/// Prediction model of a [`ThermalRoom`], stepped with explicit Euler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermalModel {
    pub params: ThermalParams,
}

impl PredictionModel for ThermalModel {
    fn state_dim(&self) -> usize {
        1
    }

    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64> {
        DVector::from_vec(vec![
            state[0] + self.params.derivative(state[0], control[0]) * dt,
        ])
    }

    fn jacobians(
        &self,
        _state: &DVector<f64>,
        _control: &DVector<f64>,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        Some((
            DMatrix::from_element(1, 1, -self.params.a),
            DMatrix::from_element(1, 1, self.params.b),
        ))
    }
}
