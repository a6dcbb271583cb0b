//! Receding-horizon solvers.
//!
//! All three variants minimize the same quadratic tracking cost over a flat decision vector of
//! `M * m` control values (`M` moves of `m` inputs each) and always return a sequence that lies
//! inside the configured control bounds.

mod adaptive;
mod control_sequence;
mod cost;
mod history;
mod linear;
mod linearize;
mod nonlinear;
mod predictor;

pub use adaptive::{Adaptation, AdaptiveMpc};
pub use control_sequence::ControlSequence;
pub use cost::{trajectory_cost, CostContext};
pub use history::{History, MpcSolution};
pub use linear::{
    block_diagonal, build_qp, prediction_matrices, LinearMpc, PredictionMatrices, QuadraticProgram,
};
pub use linearize::{discretize, linearize};
pub use nonlinear::NonlinearMpc;
pub use predictor::{predict, Trajectory};

use horizon_core::{ControlBounds, MpcError, PredictionModel};
use nalgebra::DVector;

/// Clip every component of a decision vector into the box.
pub(crate) fn clip(u: &mut [f64], bounds: &ControlBounds) {
    for value in u.iter_mut() {
        *value = bounds.clamp(*value);
    }
}

/// Check that state, target and model agree with the configured dimensions.
pub(crate) fn check_dimensions<M: PredictionModel + ?Sized>(
    state: &DVector<f64>,
    target: &DVector<f64>,
    model: &M,
    state_dim: usize,
    control_dim: usize,
) -> Result<(), MpcError> {
    if state.len() != state_dim {
        return Err(MpcError::dimension("state", state_dim, state.len()));
    }
    if target.len() != state_dim {
        return Err(MpcError::dimension("target", state_dim, target.len()));
    }
    if model.state_dim() != state_dim {
        return Err(MpcError::dimension("model state", state_dim, model.state_dim()));
    }
    if model.control_dim() != control_dim {
        return Err(MpcError::dimension(
            "model control",
            control_dim,
            model.control_dim(),
        ));
    }
    if state.iter().any(|v| !v.is_finite()) {
        return Err(MpcError::Model {
            step: 0,
            reason: "measured state is not finite".into(),
        });
    }
    Ok(())
}
