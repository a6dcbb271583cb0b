use nalgebra::{DMatrix, DVector};

use crate::ConfigError;

/// Prediction horizon `N` and control horizon `M`, with `1 <= M <= N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    prediction: usize,
    control: usize,
}

impl Horizon {
    /// Create a horizon pair. A control horizon longer than the prediction horizon is rejected.
    pub fn new(prediction: usize, control: usize) -> Result<Self, ConfigError> {
        if prediction == 0 {
            return Err(ConfigError::ZeroPredictionHorizon);
        }
        if control == 0 {
            return Err(ConfigError::ZeroControlHorizon);
        }
        if control > prediction {
            return Err(ConfigError::ControlHorizonExceedsPrediction {
                control,
                prediction,
            });
        }
        Ok(Self {
            prediction,
            control,
        })
    }

    /// Number of predicted steps `N`.
    pub fn prediction(&self) -> usize {
        self.prediction
    }

    /// Number of free control moves `M`.
    pub fn control(&self) -> usize {
        self.control
    }

    /// Index of the control move applied at prediction step `step`. The last move is held once
    /// the control horizon is exhausted.
    pub fn control_index(&self, step: usize) -> usize {
        step.min(self.control - 1)
    }
}

/// Component-wise box constraint `[min, max]` on every control input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlBounds {
    min: f64,
    max: f64,
}

impl ControlBounds {
    pub fn new(min: f64, max: f64) -> Result<Self, ConfigError> {
        // Also rejects NaN bounds
        if !(min <= max) {
            return Err(ConfigError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Clip `value` into the box. NaN is mapped to the point of the box closest to zero.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            0.0f64.clamp(self.min, self.max)
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// State-error weight `Q` (n x n) and control-effort weight `R` (m x m).
///
/// Only the shapes and finiteness are checked; definiteness is left to the caller so that
/// degenerate problems (e.g. `R = 0`) can be expressed.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl Weights {
    pub fn new(q: DMatrix<f64>, r: DMatrix<f64>) -> Result<Self, ConfigError> {
        check_square("Q", &q, q.nrows())?;
        check_square("R", &r, r.nrows())?;
        if q.nrows() == 0 {
            return Err(ConfigError::WeightShape {
                matrix: "Q",
                expected: 1,
                rows: 0,
                cols: 0,
            });
        }
        if r.nrows() == 0 {
            return Err(ConfigError::WeightShape {
                matrix: "R",
                expected: 1,
                rows: 0,
                cols: 0,
            });
        }
        Ok(Self { q, r })
    }

    /// Diagonal weights, the usual way of writing `Q` and `R`.
    pub fn from_diagonals(q: &[f64], r: &[f64]) -> Result<Self, ConfigError> {
        Self::new(
            DMatrix::from_diagonal(&DVector::from_column_slice(q)),
            DMatrix::from_diagonal(&DVector::from_column_slice(r)),
        )
    }

    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn state_dim(&self) -> usize {
        self.q.nrows()
    }

    pub fn control_dim(&self) -> usize {
        self.r.nrows()
    }

    /// A new weight set with `Q` replaced. The dimension must not change.
    pub fn with_q(&self, q: DMatrix<f64>) -> Result<Self, ConfigError> {
        check_square("Q", &q, self.state_dim())?;
        Ok(Self {
            q,
            r: self.r.clone(),
        })
    }
}

fn check_square(matrix: &'static str, m: &DMatrix<f64>, expected: usize) -> Result<(), ConfigError> {
    if m.nrows() != expected || m.ncols() != expected {
        return Err(ConfigError::WeightShape {
            matrix,
            expected,
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ConfigError::NonFiniteWeight);
    }
    Ok(())
}

/// Stopping criteria and shaping terms of the optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Hard cap on optimizer iterations. The only cancellation mechanism of a solve.
    pub max_iterations: usize,
    /// Convergence tolerance of the optimizer.
    pub tolerance: f64,
    /// Memory length of the L-BFGS direction used by the nonlinear solver.
    pub lbfgs_memory: usize,
    /// Weight `lambda` of the control-smoothness term `sum (u_{i+1} - u_i)^2`.
    pub smoothing: f64,
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidSolverOption(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            return Err(ConfigError::InvalidSolverOption(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.lbfgs_memory == 0 {
            return Err(ConfigError::InvalidSolverOption(
                "lbfgs_memory must be at least 1".into(),
            ));
        }
        if !(self.smoothing >= 0.0) || !self.smoothing.is_finite() {
            return Err(ConfigError::InvalidSolverOption(format!(
                "smoothing must be non-negative, got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            lbfgs_memory: 10,
            smoothing: 0.01,
        }
    }
}

/// Validated, immutable controller configuration.
///
/// Created once per controller. The adaptive supervisor derives new configurations with the
/// `with_*` methods instead of mutating an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct MpcConfig {
    horizon: Horizon,
    dt: f64,
    bounds: ControlBounds,
    weights: Weights,
    solver: SolverOptions,
}

impl MpcConfig {
    pub fn new(
        horizon: Horizon,
        dt: f64,
        bounds: ControlBounds,
        weights: Weights,
    ) -> Result<Self, ConfigError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(ConfigError::NonPositiveDt(dt));
        }
        Ok(Self {
            horizon,
            dt,
            bounds,
            weights,
            solver: SolverOptions::default(),
        })
    }

    pub fn with_solver(&self, solver: SolverOptions) -> Result<Self, ConfigError> {
        solver.validate()?;
        Ok(Self {
            solver,
            ..self.clone()
        })
    }

    /// Replace the weights wholesale. Dimensions must match the current ones.
    pub fn with_weights(&self, weights: Weights) -> Result<Self, ConfigError> {
        if weights.state_dim() != self.weights.state_dim() {
            return Err(ConfigError::WeightShape {
                matrix: "Q",
                expected: self.weights.state_dim(),
                rows: weights.q().nrows(),
                cols: weights.q().ncols(),
            });
        }
        if weights.control_dim() != self.weights.control_dim() {
            return Err(ConfigError::WeightShape {
                matrix: "R",
                expected: self.weights.control_dim(),
                rows: weights.r().nrows(),
                cols: weights.r().ncols(),
            });
        }
        Ok(Self {
            weights,
            ..self.clone()
        })
    }

    pub fn with_horizon(&self, horizon: Horizon) -> Self {
        Self {
            horizon,
            ..self.clone()
        }
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn bounds(&self) -> &ControlBounds {
        &self.bounds
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn solver(&self) -> &SolverOptions {
        &self.solver
    }

    pub fn state_dim(&self) -> usize {
        self.weights.state_dim()
    }

    pub fn control_dim(&self) -> usize {
        self.weights.control_dim()
    }

    /// Length of the flat decision vector, `M * m`.
    pub fn decision_len(&self) -> usize {
        self.horizon.control() * self.control_dim()
    }
}

/// One diagonal entry of `Q` that is scaled with the error on its state component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledWeight {
    /// State component whose error drives the scaling and whose `Q` entry is scaled.
    pub component: usize,
    /// Gain `k` in `weight = base * (1 + k * |error|)`.
    pub gain: f64,
}

/// Gain schedule used by the adaptive supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveSchedule {
    scheduled: Vec<ScheduledWeight>,
    trigger_component: usize,
    threshold: f64,
    min_prediction: usize,
    min_control: usize,
}

impl AdaptiveSchedule {
    pub fn new(
        scheduled: Vec<ScheduledWeight>,
        trigger_component: usize,
        threshold: f64,
        min_prediction: usize,
        min_control: usize,
    ) -> Result<Self, ConfigError> {
        if let Some(w) = scheduled.iter().find(|w| !(w.gain >= 0.0) || !w.gain.is_finite()) {
            return Err(ConfigError::InvalidSchedule(format!(
                "gain for component {} must be non-negative, got {}",
                w.component, w.gain
            )));
        }
        if !(threshold >= 0.0) {
            return Err(ConfigError::InvalidSchedule(format!(
                "threshold must be non-negative, got {threshold}"
            )));
        }
        if min_prediction == 0 || min_control == 0 {
            return Err(ConfigError::InvalidSchedule(
                "horizon floors must be at least 1".into(),
            ));
        }
        Ok(Self {
            scheduled,
            trigger_component,
            threshold,
            min_prediction,
            min_control,
        })
    }

    pub fn scheduled(&self) -> &[ScheduledWeight] {
        &self.scheduled
    }

    pub fn trigger_component(&self) -> usize {
        self.trigger_component
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Check that every referenced component exists in a state of dimension `state_dim`.
    pub fn check_dimension(&self, state_dim: usize) -> Result<(), ConfigError> {
        let out_of_range = self
            .scheduled
            .iter()
            .map(|w| w.component)
            .chain(std::iter::once(self.trigger_component))
            .find(|&c| c >= state_dim);
        match out_of_range {
            Some(c) => Err(ConfigError::InvalidSchedule(format!(
                "component {c} is out of range for a {state_dim}-dimensional state"
            ))),
            None => Ok(()),
        }
    }

    /// The shortened horizon used while the trigger error exceeds the threshold: half the base
    /// horizon, floored at the configured minimums and never longer than the base horizon.
    pub fn short_horizon(&self, base: &Horizon) -> Horizon {
        let prediction = (base.prediction() / 2)
            .max(self.min_prediction)
            .min(base.prediction());
        let control = (base.control() / 2)
            .max(self.min_control)
            .min(base.control())
            .min(prediction);
        // Both values are >= 1 and control <= prediction by construction
        Horizon::new(prediction, control).unwrap_or(*base)
    }
}

impl Default for AdaptiveSchedule {
    fn default() -> Self {
        Self {
            scheduled: vec![
                ScheduledWeight {
                    component: 2,
                    gain: 10.0,
                },
                ScheduledWeight {
                    component: 3,
                    gain: 5.0,
                },
            ],
            trigger_component: 2,
            threshold: 0.15,
            min_prediction: 5,
            min_control: 3,
        }
    }
}
