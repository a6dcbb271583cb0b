use horizon_core::{Horizon, MpcError, PredictionModel};
use nalgebra::DVector;

use super::ControlSequence;

/// Predicted states `x_0 ..= x_N`. `x_0` is the measured state the prediction started from.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    states: Vec<DVector<f64>>,
}

impl Trajectory {
    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    /// The measured state, never optimized.
    pub fn initial(&self) -> &DVector<f64> {
        &self.states[0]
    }

    /// Predicted states `x_1 ..= x_N`.
    pub fn predicted(&self) -> &[DVector<f64>] {
        &self.states[1..]
    }

    pub fn into_states(self) -> Vec<DVector<f64>> {
        self.states
    }
}

/// Roll `model` forward over the prediction horizon.
///
/// Step `i` applies move `min(i, M - 1)` of `controls`, so the last move is held once the
/// control horizon is exhausted. Fails if the model returns a state of the wrong dimension or
/// with non-finite components.
pub fn predict<M: PredictionModel + ?Sized>(
    state: &DVector<f64>,
    controls: &ControlSequence,
    model: &M,
    horizon: &Horizon,
    dt: f64,
) -> Result<Trajectory, MpcError> {
    if controls.len() != horizon.control() {
        return Err(MpcError::dimension(
            "control moves",
            horizon.control(),
            controls.len(),
        ));
    }

    let mut states = Vec::with_capacity(horizon.prediction() + 1);
    states.push(state.clone());
    for step in 0..horizon.prediction() {
        let u = controls.at(horizon.control_index(step));
        let next = model.step(&states[step], &u, dt);
        if next.len() != state.len() {
            return Err(MpcError::Model {
                step,
                reason: format!(
                    "returned a state of dimension {}, expected {}",
                    next.len(),
                    state.len()
                ),
            });
        }
        if next.iter().any(|v| !v.is_finite()) {
            return Err(MpcError::Model {
                step,
                reason: "returned a non-finite state".into(),
            });
        }
        states.push(next);
    }

    Ok(Trajectory { states })
}
