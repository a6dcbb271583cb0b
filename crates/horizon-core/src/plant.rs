use nalgebra::DVector;

/// The system under control, as seen by the receding-horizon loop.
pub trait Plant {
    /// Current measured state. Queried once per tick.
    fn state(&self) -> DVector<f64>;

    /// Apply `control` for one sampling interval.
    fn apply(&mut self, control: &DVector<f64>, dt: f64);

    /// Whether the plant has left its safety envelope. Once this returns `true` the loop stops
    /// issuing commands for the rest of the session.
    fn is_failed(&self) -> bool {
        false
    }
}
