use horizon_core::{MpcError, PredictionModel};
use nalgebra::{DMatrix, DVector};

/// Continuous-time Jacobians `(A, B)` of `model` about `(state, control)`.
///
/// Uses the model's analytic Jacobians when it has them. Otherwise the discrete step is
/// differentiated by central differences and converted back to continuous time with
/// `A = (df/dx - I) / dt`, `B = (df/du) / dt`.
pub fn linearize<M: PredictionModel + ?Sized>(
    model: &M,
    state: &DVector<f64>,
    control: &DVector<f64>,
    dt: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>), MpcError> {
    let n = state.len();
    let m = control.len();

    let (a, b) = match model.jacobians(state, control) {
        Some(jacobians) => jacobians,
        None => {
            let (dfdx, dfdu) = step_jacobians(model, state, control, dt)?;
            ((dfdx - DMatrix::identity(n, n)) / dt, dfdu / dt)
        }
    };

    if a.shape() != (n, n) {
        return Err(MpcError::Model {
            step: 0,
            reason: format!("state Jacobian has shape {:?}, expected ({n}, {n})", a.shape()),
        });
    }
    if b.shape() != (n, m) {
        return Err(MpcError::Model {
            step: 0,
            reason: format!("control Jacobian has shape {:?}, expected ({n}, {m})", b.shape()),
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(MpcError::Model {
            step: 0,
            reason: "linearization is not finite".into(),
        });
    }
    Ok((a, b))
}

/// First-order discretization: `A_d = I + dt A`, `B_d = dt B`.
pub fn discretize(a: &DMatrix<f64>, b: &DMatrix<f64>, dt: f64) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = a.nrows();
    (DMatrix::identity(n, n) + a * dt, b * dt)
}

/// Jacobians `(df/dx, df/du)` of one discrete model step, by central differences.
pub(crate) fn step_jacobians<M: PredictionModel + ?Sized>(
    model: &M,
    state: &DVector<f64>,
    control: &DVector<f64>,
    dt: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>), MpcError> {
    let n = state.len();
    let m = control.len();
    let mut dfdx = DMatrix::zeros(n, n);
    for j in 0..n {
        let column = central_difference(state, j, n, |x| model.step(x, control, dt))?;
        dfdx.set_column(j, &column);
    }
    let mut dfdu = DMatrix::zeros(n, m);
    for j in 0..m {
        let column = central_difference(control, j, n, |u| model.step(state, u, dt))?;
        dfdu.set_column(j, &column);
    }
    Ok((dfdx, dfdu))
}

fn central_difference(
    at: &DVector<f64>,
    component: usize,
    expected: usize,
    f: impl Fn(&DVector<f64>) -> DVector<f64>,
) -> Result<DVector<f64>, MpcError> {
    let h = 1e-6 * (1.0 + at[component].abs());
    let mut shifted = at.clone();
    shifted[component] += h;
    let forward = f(&shifted);
    shifted[component] = at[component] - h;
    let backward = f(&shifted);
    if forward.len() != expected || backward.len() != expected {
        return Err(MpcError::Model {
            step: 0,
            reason: format!("returned a state of dimension {}, expected {expected}", forward.len()),
        });
    }
    Ok((forward - backward) / (2.0 * h))
}
