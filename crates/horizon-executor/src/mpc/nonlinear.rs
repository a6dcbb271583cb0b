use std::cell::RefCell;

use horizon_core::{ControlBounds, MpcConfig, MpcError, PredictionModel};
use nalgebra::DVector;
use optimization_engine::{
    constraints::Rectangle,
    panoc::{PANOCCache, PANOCOptimizer},
    Optimizer, Problem, SolverError,
};

use super::{check_dimensions, clip, CostContext, History, MpcSolution};

/// Affine map between control values and the decision variables the optimizer sees.
///
/// A finite box is mapped onto `[1, 2]`, so every decision variable is of unit scale and bounded
/// away from zero. Unbounded or degenerate boxes are left as they are.
#[derive(Debug, Clone, Copy)]
struct Scaling {
    offset: f64,
    scale: f64,
}

impl Scaling {
    fn new(bounds: &ControlBounds) -> Self {
        let width = bounds.max() - bounds.min();
        if width.is_finite() && width > 0.0 {
            Self {
                offset: bounds.min() - width,
                scale: width,
            }
        } else {
            Self {
                offset: 0.0,
                scale: 1.0,
            }
        }
    }

    fn to_decision(self, u: f64) -> f64 {
        (u - self.offset) / self.scale
    }

    fn to_control(self, v: f64) -> f64 {
        self.offset + self.scale * v
    }

    fn controls(self, v: &[f64]) -> Vec<f64> {
        v.iter().map(|&v| self.to_control(v)).collect()
    }
}

/// Minimize the cost of `ctx` over the box-constrained decision vector with PANOC.
///
/// Hitting the iteration cap is not an error: the better of the initial guess and the last
/// iterate is returned. The returned sequence is always clipped into the bounds.
pub(crate) fn minimize<M: PredictionModel + ?Sized>(
    ctx: &CostContext<M>,
    initial_guess: Vec<f64>,
) -> Result<MpcSolution, MpcError> {
    let config = ctx.config;
    let n = config.decision_len();
    let bounds = config.bounds();
    let scaling = Scaling::new(bounds);
    let lower = vec![scaling.to_decision(bounds.min()); n];
    let upper = vec![scaling.to_decision(bounds.max()); n];
    let constraints = Rectangle::new(Some(&lower[..]), Some(&upper[..]));

    // The optimizer only understands its own error type, so model failures are parked here
    let failure: RefCell<Option<MpcError>> = RefCell::new(None);
    let cost_f = |v: &[f64], c: &mut f64| -> Result<(), SolverError> {
        match ctx.cost(&scaling.controls(v)) {
            Ok(value) => {
                *c = value;
                Ok(())
            }
            Err(err) => {
                failure.borrow_mut().get_or_insert(err);
                Err(SolverError::Cost)
            }
        }
    };
    let cost_df = |v: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
        match ctx.cost_grad(&scaling.controls(v), grad) {
            Ok(()) => {
                grad.iter_mut().for_each(|g| *g *= scaling.scale);
                Ok(())
            }
            Err(err) => {
                failure.borrow_mut().get_or_insert(err);
                Err(SolverError::Cost)
            }
        }
    };

    let problem = Problem::new(&constraints, cost_df, cost_f);
    let options = config.solver();
    let mut panoc_cache = PANOCCache::new(n, options.tolerance, options.lbfgs_memory);
    let mut panoc =
        PANOCOptimizer::new(problem, &mut panoc_cache).with_max_iter(options.max_iterations);

    let mut start = initial_guess;
    clip(&mut start, bounds);
    let mut v: Vec<f64> = start.iter().map(|&u| scaling.to_decision(u)).collect();
    let status = panoc.solve(&mut v);

    if let Some(err) = failure.borrow_mut().take() {
        return Err(err);
    }

    let (iterations, converged) = match status {
        Ok(status) => (status.iterations(), status.has_converged()),
        Err(err) => {
            log::debug!("PANOC stopped early: {:?}", err);
            (options.max_iterations, false)
        }
    };

    let mut u = scaling.controls(&v);
    clip(&mut u, bounds);
    let start_cost = ctx.cost(&start)?;
    let (sequence, cost) = if u.iter().all(|v| v.is_finite()) {
        let cost = ctx.cost(&u)?;
        if cost <= start_cost {
            (u, cost)
        } else {
            (start, start_cost)
        }
    } else {
        (start, start_cost)
    };

    if converged {
        log::debug!("Nonlinear MPC converged in {iterations} iterations, cost {cost:.6}");
    } else {
        log::debug!("Nonlinear MPC hit the iteration cap ({iterations}), cost {cost:.6}");
    }

    Ok(MpcSolution {
        sequence,
        control_dim: config.control_dim(),
        cost,
        iterations,
        converged,
        fallback: false,
    })
}

/// Nonlinear receding-horizon controller.
///
/// Each solve minimizes the full nonlinear prediction cost over the control sequence subject
/// to the box bounds.
#[derive(Debug, Clone)]
pub struct NonlinearMpc {
    config: MpcConfig,
    target: DVector<f64>,
    warm_start: bool,
    previous: Option<Vec<f64>>,
    history: History,
    last_solution: Option<MpcSolution>,
}

impl NonlinearMpc {
    /// Create a controller tracking the zero state until a target is set.
    pub fn new(config: MpcConfig) -> Self {
        Self {
            target: DVector::zeros(config.state_dim()),
            config,
            warm_start: false,
            previous: None,
            history: History::default(),
            last_solution: None,
        }
    }

    /// Seed every solve with the previous solution shifted by one move.
    ///
    /// Off by default; with warm starts `update` is no longer a pure function of its inputs.
    pub fn with_warm_start(mut self, enabled: bool) -> Self {
        self.warm_start = enabled;
        self
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn target(&self) -> &DVector<f64> {
        &self.target
    }

    /// Set the state to track. Takes effect on the next solve.
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

    /// Solve for the optimal control sequence from `state`.
    ///
    /// Without an explicit `initial_guess` the solve starts from zero, or from the shifted
    /// previous solution when warm starts are enabled. Appends the first move and the cost to
    /// the history.
    pub fn solve<M: PredictionModel + ?Sized>(
        &mut self,
        state: &DVector<f64>,
        model: &M,
        initial_guess: Option<&[f64]>,
    ) -> Result<MpcSolution, MpcError> {
        check_dimensions(
            state,
            &self.target,
            model,
            self.config.state_dim(),
            self.config.control_dim(),
        )?;

        let n = self.config.decision_len();
        let guess = match initial_guess {
            Some(guess) if guess.len() != n => {
                return Err(MpcError::dimension("initial guess", n, guess.len()));
            }
            Some(guess) => guess.to_vec(),
            None => match (&self.previous, self.warm_start) {
                (Some(previous), true) if previous.len() == n => {
                    shift(previous, self.config.control_dim())
                }
                _ => vec![0.0; n],
            },
        };

        let ctx = CostContext {
            state,
            target: &self.target,
            model,
            config: &self.config,
        };
        let solution = minimize(&ctx, guess)?;

        self.history.push(solution.first(), solution.cost);
        self.previous = Some(solution.sequence.clone());
        self.last_solution = Some(solution.clone());
        Ok(solution)
    }

    /// Solve and return only the first control move.
    pub fn update<M: PredictionModel + ?Sized>(
        &mut self,
        state: &DVector<f64>,
        model: &M,
    ) -> Result<DVector<f64>, MpcError> {
        self.solve(state, model, None).map(|solution| solution.first())
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn last_solution(&self) -> Option<&MpcSolution> {
        self.last_solution.as_ref()
    }

    /// Clear the history and the warm-start memory. The configuration and target are kept.
    pub fn reset(&mut self) {
        self.history.clear();
        self.previous = None;
        self.last_solution = None;
    }
}

/// Drop the first move and repeat the last one.
fn shift(sequence: &[f64], control_dim: usize) -> Vec<f64> {
    let mut shifted = sequence[control_dim..].to_vec();
    shifted.extend_from_slice(&sequence[sequence.len() - control_dim..]);
    shifted
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use horizon_core::{ControlBounds, FnModel, Horizon, Weights};

    use super::*;

    fn double_integrator() -> impl PredictionModel {
        FnModel::new(2, 1, |x: &DVector<f64>, u: &DVector<f64>, dt: f64| {
            DVector::from_vec(vec![x[0] + dt * x[1], x[1] + dt * u[0]])
        })
    }

    fn controller(u_max: f64) -> NonlinearMpc {
        let config = MpcConfig::new(
            Horizon::new(10, 4).unwrap(),
            0.1,
            ControlBounds::new(-u_max, u_max).unwrap(),
            Weights::from_diagonals(&[10.0, 1.0], &[0.01]).unwrap(),
        )
        .unwrap();
        NonlinearMpc::new(config)
    }

    #[test]
    fn test_drives_towards_target() {
        let mut mpc = controller(5.0);
        let model = double_integrator();
        let state = DVector::from_vec(vec![1.0, 0.0]);

        let u = mpc.update(&state, &model).unwrap();
        assert!(u[0] < 0.0);
        assert!(u[0] >= -5.0);
        assert_eq!(mpc.history().len(), 1);
    }

    #[test]
    fn test_bounds_hold_when_saturated() {
        let mut mpc = controller(0.5);
        let model = double_integrator();
        let state = DVector::from_vec(vec![100.0, 0.0]);

        let solution = mpc.solve(&state, &model, None).unwrap();
        assert!(solution.sequence.iter().all(|u| (-0.5..=0.5).contains(u)));
        assert_abs_diff_eq!(solution.first()[0], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_wide_bounds_from_the_lower_edge() {
        // Room heater: zero input sits on the lower bound and the useful input is in the hundreds
        let model = FnModel::new(1, 1, |x: &DVector<f64>, u: &DVector<f64>, dt: f64| {
            x.map(|t| t + dt * (0.05 * (5.0 - t) + 0.002 * u[0]))
        });
        let config = MpcConfig::new(
            Horizon::new(20, 10).unwrap(),
            10.0,
            ControlBounds::new(0.0, 2000.0).unwrap(),
            Weights::from_diagonals(&[10.0], &[0.001]).unwrap(),
        )
        .unwrap();
        let mut mpc = NonlinearMpc::new(config);
        mpc.set_target(DVector::from_vec(vec![22.0])).unwrap();

        let solution = mpc.solve(&DVector::from_vec(vec![5.0]), &model, None).unwrap();
        let first = solution.first()[0];
        assert!(first > 100.0 && first <= 2000.0, "first move {first}");
        assert!(solution.sequence.iter().all(|u| (0.0..=2000.0).contains(u)));

        let idle = vec![0.0; 10];
        let ctx = CostContext {
            state: &DVector::from_vec(vec![5.0]),
            target: mpc.target(),
            model: &model,
            config: mpc.config(),
        };
        assert!(solution.cost < 0.1 * ctx.cost(&idle).unwrap());
    }

    #[test]
    fn test_scaling_maps_box_onto_unit_interval() {
        let scaling = Scaling::new(&ControlBounds::new(-0.5, 0.5).unwrap());
        assert_eq!(scaling.to_decision(-0.5), 1.0);
        assert_eq!(scaling.to_decision(0.5), 2.0);
        assert_eq!(scaling.to_control(1.0), -0.5);
        assert_eq!(scaling.to_control(1.5), 0.0);

        let unbounded = Scaling::new(&ControlBounds::new(f64::NEG_INFINITY, 1.0).unwrap());
        assert_eq!(unbounded.to_decision(0.25), 0.25);
        let fixed = Scaling::new(&ControlBounds::new(3.0, 3.0).unwrap());
        assert_eq!(fixed.to_control(3.0), 3.0);
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut mpc = controller(5.0);
        let model = double_integrator();
        let state = DVector::from_vec(vec![0.3, -0.2]);

        let first = mpc.update(&state, &model).unwrap();
        let second = mpc.update(&state, &model).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_error_fixed_point() {
        let mut mpc = controller(5.0);
        let model = double_integrator();
        let state = DVector::from_vec(vec![0.7, 0.0]);
        mpc.set_target(state.clone()).unwrap();

        let solution = mpc.solve(&state, &model, None).unwrap();
        assert_abs_diff_eq!(solution.first()[0], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(solution.cost, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_iteration_cap_returns_feasible_iterate() {
        let mut mpc = controller(5.0);
        let capped = mpc
            .config()
            .with_solver(horizon_core::SolverOptions {
                max_iterations: 1,
                ..*mpc.config().solver()
            })
            .unwrap();
        mpc = NonlinearMpc::new(capped);

        let solution = mpc
            .solve(&DVector::from_vec(vec![3.0, 1.0]), &double_integrator(), None)
            .unwrap();
        assert!(solution.sequence.iter().all(|u| (-5.0..=5.0).contains(u)));
        assert!(solution.cost.is_finite());
    }

    #[test]
    fn test_model_failure_propagates() {
        let mut mpc = controller(5.0);
        let model = FnModel::new(2, 1, |_x: &DVector<f64>, _u: &DVector<f64>, _dt: f64| {
            DVector::from_vec(vec![f64::NAN, 0.0])
        });
        let result = mpc.update(&DVector::zeros(2), &model);
        assert!(matches!(result, Err(MpcError::Model { step: 0, .. })));
        assert!(mpc.history().is_empty());
    }

    #[test]
    fn test_dimension_checks() {
        let mut mpc = controller(5.0);
        assert!(mpc.set_target(DVector::zeros(3)).is_err());
        let result = mpc.update(&DVector::zeros(3), &double_integrator());
        assert!(matches!(result, Err(MpcError::DimensionMismatch { .. })));
        let result = mpc.solve(&DVector::zeros(2), &double_integrator(), Some(&[0.0]));
        assert!(matches!(result, Err(MpcError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_warm_start_and_reset() {
        assert_eq!(shift(&[1.0, 2.0, 3.0, 4.0], 2), vec![3.0, 4.0, 3.0, 4.0]);

        let mut mpc = controller(5.0).with_warm_start(true);
        let model = double_integrator();
        let state = DVector::from_vec(vec![1.0, 0.0]);
        mpc.update(&state, &model).unwrap();
        mpc.update(&state, &model).unwrap();
        assert_eq!(mpc.history().len(), 2);

        mpc.reset();
        assert!(mpc.history().is_empty());
        assert!(mpc.last_solution().is_none());
    }
}
