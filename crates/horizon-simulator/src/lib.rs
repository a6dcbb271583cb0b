//! Simulated plants and matching prediction models.

mod cartpole;
mod linear_systems;
mod noise;
mod presets;
mod thermal;

pub use cartpole::{CartPole, CartPoleModel, CartPoleParams};
pub use linear_systems::{
    FirstOrderModel, FirstOrderSystem, MassSpringDamper, MassSpringDamperModel, OscillatorParams,
};
pub use noise::NoisyPlant;
pub use presets::*;
pub use thermal::{ThermalModel, ThermalParams, ThermalRoom};
