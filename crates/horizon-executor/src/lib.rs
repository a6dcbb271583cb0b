mod control;
mod driver;
mod metrics;
pub mod mpc;

pub use control::{Controller, MpcController};
pub use driver::{DriverState, RecedingHorizonDriver, TickOutcome};
pub use metrics::{RunMetrics, RunTrace, TraceEntry};
pub use mpc::{AdaptiveMpc, Adaptation, History, LinearMpc, MpcSolution, NonlinearMpc};
