use horizon_core::MpcError;
use nalgebra::DVector;

/// Wraps the flat decision vector for easier access.
///
/// Layout: `([u_0 .. u_{m-1}] * num_moves)`, i.e. the `m` inputs of move 0 first.
#[derive(Debug, Clone, Copy)]
pub struct ControlSequence<'a> {
    u: &'a [f64],
    control_dim: usize,
}

impl<'a> ControlSequence<'a> {
    /// Create a view over `u`. The length must be a non-zero multiple of `control_dim`.
    pub fn try_new(u: &'a [f64], control_dim: usize) -> Result<Self, MpcError> {
        if control_dim == 0 || u.is_empty() || u.len() % control_dim != 0 {
            // Reported as "expected a multiple of control_dim"
            return Err(MpcError::dimension(
                "control sequence (multiple of)",
                control_dim,
                u.len(),
            ));
        }
        Ok(Self { u, control_dim })
    }

    /// Number of moves.
    pub fn len(&self) -> usize {
        self.u.len() / self.control_dim
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    pub fn control_dim(&self) -> usize {
        self.control_dim
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.u
    }

    /// Control of move `idx`.
    pub fn at(&self, idx: usize) -> DVector<f64> {
        DVector::from_column_slice(self.slice(idx))
    }

    /// Control applied at prediction step `step`: move `step`, or the last move once the sequence
    /// is exhausted.
    pub fn held(&self, step: usize) -> DVector<f64> {
        self.at(step.min(self.len() - 1))
    }

    pub fn first(&self) -> DVector<f64> {
        self.at(0)
    }

    /// Iterate over the moves as slices.
    pub fn moves(&self) -> impl Iterator<Item = &'a [f64]> {
        self.u.chunks_exact(self.control_dim)
    }

    fn slice(&self, idx: usize) -> &'a [f64] {
        let start = idx * self.control_dim;
        &self.u[start..start + self.control_dim]
    }
}
