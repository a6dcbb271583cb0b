use nalgebra::{DMatrix, DVector};

/// A discrete-time prediction model: `(state, control, dt) -> next state`.
///
/// Implementations must be deterministic and side-effect free. A single model may be shared
/// between any number of controllers.
pub trait PredictionModel {
    /// Number of state components.
    fn state_dim(&self) -> usize;

    /// Number of control inputs.
    fn control_dim(&self) -> usize {
        1
    }

    /// Advance `state` by one sampling interval under `control`.
    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64>;

    /// Continuous-time Jacobians `(A, B) = (df/dx, df/du)` of the underlying vector field at
    /// `(state, control)`, if the model knows them analytically.
    ///
    /// Returning `None` makes the linearized controller fall back to finite differences.
    fn jacobians(
        &self,
        _state: &DVector<f64>,
        _control: &DVector<f64>,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        None
    }
}

impl<M: PredictionModel + ?Sized> PredictionModel for &M {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }

    fn control_dim(&self) -> usize {
        (**self).control_dim()
    }

    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64> {
        (**self).step(state, control, dt)
    }

    fn jacobians(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        (**self).jacobians(state, control)
    }
}

/// Wraps a plain function as a [`PredictionModel`].
pub struct FnModel<F> {
    state_dim: usize,
    control_dim: usize,
    f: F,
}

impl<F> FnModel<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>, f64) -> DVector<f64>,
{
    pub fn new(state_dim: usize, control_dim: usize, f: F) -> Self {
        Self {
            state_dim,
            control_dim,
            f,
        }
    }
}

impl<F> PredictionModel for FnModel<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>, f64) -> DVector<f64>,
{
    fn state_dim(&self) -> usize {
        self.state_dim
    }

    fn control_dim(&self) -> usize {
        self.control_dim
    }

    fn step(&self, state: &DVector<f64>, control: &DVector<f64>, dt: f64) -> DVector<f64> {
        (self.f)(state, control, dt)
    }
}
