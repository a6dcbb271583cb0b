use nalgebra::DVector;

/// Applied controls and achieved costs, for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    controls: Vec<DVector<f64>>,
    costs: Vec<f64>,
}

impl History {
    pub fn push(&mut self, control: DVector<f64>, cost: f64) {
        self.controls.push(control);
        self.costs.push(cost);
    }

    pub fn controls(&self) -> &[DVector<f64>] {
        &self.controls
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn clear(&mut self) {
        self.controls.clear();
        self.costs.clear();
    }
}

/// Result of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct MpcSolution {
    /// Optimal decision vector, `M * m` values inside the control bounds.
    pub sequence: Vec<f64>,
    pub control_dim: usize,
    /// Cost of `sequence`.
    pub cost: f64,
    /// Optimizer iterations, 0 for the closed-form path.
    pub iterations: usize,
    /// Whether the optimizer met its tolerance. Always `true` for the closed-form path unless it
    /// fell back.
    pub converged: bool,
    /// Whether the solver gave up and returned the zero sequence.
    pub fallback: bool,
}

impl MpcSolution {
    /// The action to apply now.
    pub fn first(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.sequence[..self.control_dim])
    }
}
