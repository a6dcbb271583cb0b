use horizon_core::{MpcError, Plant, PredictionModel};
use horizon_logger::TickRecord;
use nalgebra::DVector;

use crate::{Controller, RunTrace, TraceEntry};

/// Lifecycle of a driver. `Faulted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, no tick run yet.
    Idle,
    /// Ticking.
    Active,
    /// The plant signalled a failure. No further commands are issued.
    Faulted,
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Applied { control: DVector<f64>, cost: f64 },
    Faulted,
}

/// Receding-horizon control loop: once per tick, read the plant state, solve, apply the first
/// move and discard the rest.
///
/// The plant is advanced by the controller's own sampling interval, so predictions and the
/// simulated plant always agree on the time step.
pub struct RecedingHorizonDriver<C, P, M> {
    controller: C,
    plant: P,
    model: M,
    dt: f64,
    state: DriverState,
    tick: u64,
    /// Pending `(tick, target)` changes, sorted by tick.
    setpoints: Vec<(u64, DVector<f64>)>,
    trace: RunTrace,
}

impl<C, P, M> RecedingHorizonDriver<C, P, M>
where
    C: Controller,
    P: Plant,
    M: PredictionModel,
{
    pub fn new(controller: C, plant: P, model: M) -> Self {
        let dt = controller.dt();
        Self {
            controller,
            plant,
            model,
            dt,
            state: DriverState::Idle,
            tick: 0,
            setpoints: Vec::new(),
            trace: RunTrace::default(),
        }
    }

    /// Change the target to `target` when tick `at` starts.
    pub fn with_setpoint(mut self, at: u64, target: DVector<f64>) -> Self {
        self.setpoints.push((at, target));
        self.setpoints.sort_by_key(|(tick, _)| *tick);
        self
    }

    /// Track `target` from the next tick on.
    pub fn set_target(&mut self, target: DVector<f64>) -> Result<(), MpcError> {
        self.controller.set_target(target)
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Time step the plant is advanced by on every tick.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn plant(&self) -> &P {
        &self.plant
    }

    pub fn trace(&self) -> &RunTrace {
        &self.trace
    }

    pub fn into_trace(self) -> RunTrace {
        self.trace
    }

    /// Run one control tick.
    ///
    /// Model failures end the tick with an error and leave the plant untouched; the driver stays
    /// usable.
    pub fn tick(&mut self) -> Result<TickOutcome, MpcError> {
        if self.state == DriverState::Faulted {
            return Ok(TickOutcome::Faulted);
        }
        if self.plant.is_failed() {
            self.fault();
            return Ok(TickOutcome::Faulted);
        }
        if self.state == DriverState::Idle {
            log::info!("Driver active ({} controller)", self.controller.name());
            self.state = DriverState::Active;
        }

        while let Some((at, _)) = self.setpoints.first() {
            if *at > self.tick {
                break;
            }
            let (at, target) = self.setpoints.remove(0);
            log::info!("Tick {}: new target {:?}", at, target.as_slice());
            self.controller.set_target(target)?;
        }

        let state = self.plant.state();
        let control = match self.controller.update(&state, &self.model) {
            Ok(control) => control,
            Err(err) => {
                log::error!("Tick {}: controller failed: {}", self.tick, err);
                return Err(err);
            }
        };
        let cost = self
            .controller
            .last_solution()
            .map(|solution| solution.cost)
            .unwrap_or(f64::NAN);
        let fallback = self
            .controller
            .last_solution()
            .map(|solution| solution.fallback)
            .unwrap_or(false);

        self.plant.apply(&control, self.dt);

        let time = self.tick as f64 * self.dt;
        let target = self.controller.target().clone();
        horizon_logger::log_tick(&TickRecord {
            tick: self.tick,
            time,
            state: state.as_slice().to_vec(),
            target: target.as_slice().to_vec(),
            control: control.as_slice().to_vec(),
            cost,
            controller: self.controller.name().to_string(),
            fallback,
        });
        self.trace.push(TraceEntry {
            tick: self.tick,
            time,
            state,
            target,
            control: control.clone(),
            cost,
        });
        self.tick += 1;

        if self.plant.is_failed() {
            self.fault();
        }
        Ok(TickOutcome::Applied { control, cost })
    }

    /// Tick until `ticks` ticks have run or the plant fails. Returns the number of ticks that
    /// applied a control.
    pub fn run(&mut self, ticks: u64) -> Result<u64, MpcError> {
        let mut applied = 0;
        for _ in 0..ticks {
            match self.tick()? {
                TickOutcome::Applied { .. } => applied += 1,
                TickOutcome::Faulted => break,
            }
            if self.state == DriverState::Faulted {
                break;
            }
        }
        Ok(applied)
    }

    fn fault(&mut self) {
        log::info!("Tick {}: plant failed, driver faulted", self.tick);
        self.state = DriverState::Faulted;
        self.trace.faulted = true;
    }
}
