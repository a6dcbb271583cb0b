use std::fmt;

use nalgebra::DVector;

/// One control tick as seen by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub tick: u64,
    /// Time at the start of the tick, in seconds.
    pub time: f64,
    /// State measured at the start of the tick.
    pub state: DVector<f64>,
    pub target: DVector<f64>,
    pub control: DVector<f64>,
    pub cost: f64,
}

/// Everything a driver did during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTrace {
    pub entries: Vec<TraceEntry>,
    pub faulted: bool,
}

impl RunTrace {
    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracking error `state - target` of `component` at every tick, or `None` if some tick has
    /// no such component.
    pub fn errors(&self, component: usize) -> Option<Vec<f64>> {
        self.entries
            .iter()
            .map(|e| Some(e.state.get(component)? - e.target.get(component)?))
            .collect()
    }

    /// Summary of the tracking performance on `component`, or `None` if the component is out of
    /// range.
    ///
    /// `band` is the error magnitude inside which the component counts as settled.
    pub fn metrics(&self, component: usize, band: f64, dt: f64) -> Option<RunMetrics> {
        let errors = self.errors(component)?;

        let ise = errors.iter().map(|e| e * e * dt).sum();
        let iae = errors.iter().map(|e| e.abs() * dt).sum();

        // First tick after which the error never leaves the band again
        let settled_from = errors
            .iter()
            .rposition(|e| e.abs() > band)
            .map(|last_outside| last_outside + 1)
            .unwrap_or(0);
        let settling_time = self
            .entries
            .get(settled_from)
            .map(|entry| entry.time - self.entries[0].time);

        // Overshoot is measured against the side the run started on
        let initial_sign = errors.first().map(|e| e.signum()).unwrap_or(0.0);
        let peak_overshoot = errors
            .iter()
            .map(|e| -initial_sign * e)
            .fold(0.0, f64::max);

        Some(RunMetrics {
            ise,
            iae,
            settling_time,
            peak_overshoot,
            final_error: errors.last().copied().unwrap_or(0.0),
            max_control: self
                .entries
                .iter()
                .flat_map(|e| e.control.iter())
                .fold(0.0, |acc: f64, u| acc.max(u.abs())),
            ticks: self.entries.len(),
            faulted: self.faulted,
        })
    }
}

/// Performance summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetrics {
    /// Integral of squared error.
    pub ise: f64,
    /// Integral of absolute error.
    pub iae: f64,
    /// Time after which the error stays within the band, if it settled at all.
    pub settling_time: Option<f64>,
    /// Largest excursion past the target, opposite to the initial error.
    pub peak_overshoot: f64,
    pub final_error: f64,
    /// Largest control magnitude applied.
    pub max_control: f64,
    pub ticks: usize,
    pub faulted: bool,
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ticks:          {}", self.ticks)?;
        writeln!(f, "faulted:        {}", self.faulted)?;
        writeln!(f, "ISE:            {:.6}", self.ise)?;
        writeln!(f, "IAE:            {:.6}", self.iae)?;
        match self.settling_time {
            Some(t) => writeln!(f, "settling time:  {:.3} s", t)?,
            None => writeln!(f, "settling time:  not settled")?,
        }
        writeln!(f, "peak overshoot: {:.6}", self.peak_overshoot)?;
        writeln!(f, "final error:    {:.6}", self.final_error)?;
        write!(f, "max |u|:        {:.3}", self.max_control)
    }
}
