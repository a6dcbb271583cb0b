use horizon_core::{Horizon, MpcConfig, MpcError, PredictionModel, Weights};
use nalgebra::{DMatrix, DVector};

use super::{check_dimensions, clip, discretize, linearize, History, MpcSolution};

/// Ratio of smallest to largest singular value of `H` below which the QP is treated as
/// singular.
const CONDITION_LIMIT: f64 = 1e-12;

/// Batched prediction `X = Phi x_0 + Gamma U` of the stacked states `x_1 ..= x_N`.
///
/// Row block `i` predicts `x_{i+1}`: `Phi_i = A_d^{i+1}` and `Gamma_{i,j} = A_d^{i-j} B_d` for
/// `j <= i`, `j < M`. Moves beyond the control horizon contribute nothing, unlike the nonlinear
/// predictor which holds the last move.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMatrices {
    pub phi: DMatrix<f64>,
    pub gamma: DMatrix<f64>,
}

pub fn prediction_matrices(
    a_d: &DMatrix<f64>,
    b_d: &DMatrix<f64>,
    horizon: &Horizon,
) -> PredictionMatrices {
    let n = a_d.nrows();
    let m = b_d.ncols();
    let (big_n, big_m) = (horizon.prediction(), horizon.control());

    let mut powers = Vec::with_capacity(big_n + 1);
    powers.push(DMatrix::<f64>::identity(n, n));
    for k in 1..=big_n {
        let next = a_d * &powers[k - 1];
        powers.push(next);
    }

    let mut phi = DMatrix::zeros(big_n * n, n);
    let mut gamma = DMatrix::zeros(big_n * n, big_m * m);
    for i in 0..big_n {
        phi.view_mut((i * n, 0), (n, n)).copy_from(&powers[i + 1]);
        for j in 0..=i.min(big_m - 1) {
            gamma
                .view_mut((i * n, j * m), (n, m))
                .copy_from(&(&powers[i - j] * b_d));
        }
    }

    PredictionMatrices { phi, gamma }
}

/// `count` copies of `block` along the diagonal.
pub fn block_diagonal(block: &DMatrix<f64>, count: usize) -> DMatrix<f64> {
    let (r, c) = block.shape();
    let mut out = DMatrix::zeros(count * r, count * c);
    for k in 0..count {
        out.view_mut((k * r, k * c), (r, c)).copy_from(block);
    }
    out
}

/// `min 1/2 U' H U + f' U + offset`, where `offset` makes the objective equal to the full
/// quadratic tracking and effort cost of the linear prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticProgram {
    pub h: DMatrix<f64>,
    pub f: DVector<f64>,
    pub offset: f64,
}

impl QuadraticProgram {
    pub fn cost(&self, u: &DVector<f64>) -> f64 {
        0.5 * u.dot(&(&self.h * u)) + self.f.dot(u) + self.offset
    }

    /// Solve `H U = -f`. Returns `None` if `H` is singular or too ill-conditioned to trust.
    pub fn solve_unconstrained(&self) -> Option<DVector<f64>> {
        let singular_values = self.h.singular_values();
        let largest = singular_values.max();
        let smallest = singular_values.min();
        if !(largest > 0.0) || smallest / largest < CONDITION_LIMIT {
            return None;
        }
        let u = self.h.clone().lu().solve(&(-self.f.clone()))?;
        u.iter().all(|v| v.is_finite()).then_some(u)
    }
}

/// Build the QP for tracking `target` from `state`:
/// `H = 2 (Gamma' Qbar Gamma + Rbar)`, `f = 2 Gamma' Qbar (Phi x_0 - Xref)`.
pub fn build_qp(
    matrices: &PredictionMatrices,
    weights: &Weights,
    horizon: &Horizon,
    state: &DVector<f64>,
    target: &DVector<f64>,
) -> QuadraticProgram {
    let q_bar = block_diagonal(weights.q(), horizon.prediction());
    let r_bar = block_diagonal(weights.r(), horizon.control());

    let n = target.len();
    let stacked_target = DVector::from_fn(horizon.prediction() * n, |i, _| target[i % n]);
    let free_error = &matrices.phi * state - stacked_target;

    let gamma_t_q = matrices.gamma.transpose() * &q_bar;
    let h = (&gamma_t_q * &matrices.gamma + r_bar) * 2.0;
    let f = &gamma_t_q * &free_error * 2.0;
    let offset = free_error.dot(&(&q_bar * &free_error));

    QuadraticProgram { h, f, offset }
}

/// Receding-horizon controller on a linearization of the model about the current state.
///
/// The QP is solved in closed form and the result clipped into the bounds, which is not the
/// constrained optimum when bounds are active.
#[derive(Debug, Clone)]
pub struct LinearMpc {
    config: MpcConfig,
    target: DVector<f64>,
    history: History,
    last_solution: Option<MpcSolution>,
    singular_fallbacks: usize,
}

impl LinearMpc {
    pub fn new(config: MpcConfig) -> Self {
        Self {
            target: DVector::zeros(config.state_dim()),
            config,
            history: History::default(),
            last_solution: None,
            singular_fallbacks: 0,
        }
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn target(&self) -> &DVector<f64> {
        &self.target
    }

    pub fn set_target(&mut self, target: DVector<f64>) -> Result<(), MpcError> {
        if target.len() != self.config.state_dim() {
            return Err(MpcError::dimension(
                "target",
                self.config.state_dim(),
                target.len(),
            ));
        }
        self.target = target;
        Ok(())
    }

    pub fn solve<M: PredictionModel + ?Sized>(
        &mut self,
        state: &DVector<f64>,
        model: &M,
    ) -> Result<MpcSolution, MpcError> {
        let config = &self.config;
        check_dimensions(
            state,
            &self.target,
            model,
            config.state_dim(),
            config.control_dim(),
        )?;

        let nominal = DVector::zeros(config.control_dim());
        let (a, b) = linearize(model, state, &nominal, config.dt())?;
        let (a_d, b_d) = discretize(&a, &b, config.dt());
        let matrices = prediction_matrices(&a_d, &b_d, config.horizon());
        let qp = build_qp(
            &matrices,
            config.weights(),
            config.horizon(),
            state,
            &self.target,
        );

        let (mut u, fallback) = match qp.solve_unconstrained() {
            Some(u) => (u, false),
            None => {
                log::warn!("Linear MPC: singular QP, applying zero control");
                (DVector::zeros(config.decision_len()), true)
            }
        };
        clip(u.as_mut_slice(), config.bounds());
        let cost = qp.cost(&u);
        log::debug!("Linear MPC solved, cost {cost:.6}, fallback {fallback}");

        let solution = MpcSolution {
            sequence: u.as_slice().to_vec(),
            control_dim: config.control_dim(),
            cost,
            iterations: 0,
            converged: !fallback,
            fallback,
        };
        if fallback {
            self.singular_fallbacks += 1;
        }
        self.history.push(solution.first(), solution.cost);
        self.last_solution = Some(solution.clone());
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

    /// Number of solves that fell back to the zero sequence because `H` was singular.
    pub fn singular_fallbacks(&self) -> usize {
        self.singular_fallbacks
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn last_solution(&self) -> Option<&MpcSolution> {
        self.last_solution.as_ref()
    }

    /// Clear the history. The fallback counter and configuration are kept.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_solution = None;
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use horizon_core::{ControlBounds, FnModel};

    use super::*;

    fn config(r: f64, u_max: f64) -> MpcConfig {
        MpcConfig::new(
            Horizon::new(3, 2).unwrap(),
            0.1,
            ControlBounds::new(-u_max, u_max).unwrap(),
            Weights::from_diagonals(&[1.0, 1.0], &[r]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_prediction_matrices_blocks() {
        let a = DMatrix::from_row_slice(1, 1, &[2.0]);
        let b = DMatrix::from_row_slice(1, 1, &[1.0]);
        let pm = prediction_matrices(&a, &b, &Horizon::new(3, 2).unwrap());

        assert_eq!(pm.phi, DMatrix::from_row_slice(3, 1, &[2.0, 4.0, 8.0]));
        #[rustfmt::skip]
        let gamma = DMatrix::from_row_slice(3, 2, &[
            1.0, 0.0,
            2.0, 1.0,
            4.0, 2.0,
        ]);
        assert_eq!(pm.gamma, gamma);
    }

    #[test]
    fn test_prediction_matches_rollout_within_control_horizon() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 0.1]);
        let horizon = Horizon::new(4, 4).unwrap();
        let pm = prediction_matrices(&a, &b, &horizon);

        let x0 = DVector::from_vec(vec![1.0, -0.5]);
        let u = DVector::from_vec(vec![0.3, -0.2, 0.5, 0.1]);
        let stacked = &pm.phi * &x0 + &pm.gamma * &u;

        let mut x = x0.clone();
        for i in 0..4 {
            x = &a * &x + &b * u[i];
            assert_relative_eq!(stacked.rows(i * 2, 2).into_owned(), x, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_block_diagonal() {
        let block = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let out = block_diagonal(&block, 2);
        assert_eq!(
            out,
            DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0])
        );
    }

    #[test]
    fn test_qp_cost_matches_direct_evaluation() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 0.1]);
        let horizon = Horizon::new(3, 2).unwrap();
        let weights = Weights::from_diagonals(&[2.0, 0.5], &[0.1]).unwrap();
        let pm = prediction_matrices(&a, &b, &horizon);
        let x0 = DVector::from_vec(vec![1.0, 0.0]);
        let target = DVector::from_vec(vec![0.5, 0.0]);
        let qp = build_qp(&pm, &weights, &horizon, &x0, &target);

        let u = DVector::from_vec(vec![-1.0, 0.5]);
        let mut x = x0.clone();
        let mut expected = 0.0;
        for i in 0..3 {
            let u_i = if i < 2 { u[i] } else { 0.0 };
            x = &a * &x + &b * u_i;
            let e = &x - &target;
            expected += e.dot(&(weights.q() * &e));
        }
        expected += 0.1 * (1.0 + 0.25);
        assert_relative_eq!(qp.cost(&u), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_regulates_double_integrator() {
        let model = FnModel::new(2, 1, |x: &DVector<f64>, u: &DVector<f64>, dt: f64| {
            DVector::from_vec(vec![x[0] + dt * x[1], x[1] + dt * u[0]])
        });
        let mut mpc = LinearMpc::new(config(0.01, 100.0));

        let u = mpc.update(&DVector::from_vec(vec![1.0, 0.0]), &model).unwrap();
        assert!(u[0] < 0.0);
        assert_eq!(mpc.singular_fallbacks(), 0);

        let solution = mpc.last_solution().unwrap();
        assert!(solution.converged);
        assert!(solution.cost >= 0.0);
    }

    #[test]
    fn test_clips_into_bounds() {
        let model = FnModel::new(2, 1, |x: &DVector<f64>, u: &DVector<f64>, dt: f64| {
            DVector::from_vec(vec![x[0] + dt * x[1], x[1] + dt * u[0]])
        });
        let mut mpc = LinearMpc::new(config(0.01, 0.1));

        let solution = mpc
            .solve(&DVector::from_vec(vec![50.0, 0.0]), &model)
            .unwrap();
        assert!(solution.sequence.iter().all(|u| (-0.1..=0.1).contains(u)));
    }

    #[test]
    fn test_qp_stacks_target_per_step() {
        let a = DMatrix::identity(2, 2);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let horizon = Horizon::new(3, 2).unwrap();
        let weights = Weights::from_diagonals(&[1.0, 1.0], &[0.1]).unwrap();
        let pm = prediction_matrices(&a, &b, &horizon);
        let x0 = DVector::from_vec(vec![0.0, 0.0]);
        let target = DVector::from_vec(vec![2.0, -1.0]);
        let qp = build_qp(&pm, &weights, &horizon, &x0, &target);

        // Zero moves leave every predicted state at the origin
        let expected = 3.0 * target.norm_squared();
        assert_relative_eq!(qp.cost(&DVector::zeros(2)), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_tracks_nonzero_target() {
        let model = FnModel::new(2, 1, |x: &DVector<f64>, u: &DVector<f64>, dt: f64| {
            DVector::from_vec(vec![x[0] + dt * x[1], x[1] + dt * u[0]])
        });
        let mut mpc = LinearMpc::new(config(0.01, 100.0));
        mpc.set_target(DVector::from_vec(vec![1.0, 0.0])).unwrap();

        let u = mpc.update(&DVector::zeros(2), &model).unwrap();
        assert!(u[0] > 0.0);
        assert!(mpc.last_solution().unwrap().converged);
    }

    #[test]
    fn test_singular_qp_falls_back_to_zero() {
        // No control authority and no effort weight: H = 0
        let model = FnModel::new(2, 1, |x: &DVector<f64>, _u: &DVector<f64>, _dt: f64| x.clone());
        let mut mpc = LinearMpc::new(config(0.0, 5.0));

        let u = mpc.update(&DVector::from_vec(vec![1.0, 2.0]), &model).unwrap();
        assert_eq!(u, DVector::zeros(1));
        assert_eq!(mpc.singular_fallbacks(), 1);
        assert!(mpc.last_solution().unwrap().fallback);
        assert!(mpc.last_solution().unwrap().cost.is_finite());

        mpc.reset();
        assert!(mpc.history().is_empty());
        assert_eq!(mpc.singular_fallbacks(), 1);
    }
}
