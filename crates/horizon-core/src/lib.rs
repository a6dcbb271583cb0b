mod config;
mod error;
mod model;
mod plant;
mod settings;

pub use config::*;
pub use error::*;
pub use model::*;
pub use plant::*;
pub use settings::*;

/// Plant state, e.g. `[x, x_dot, theta, theta_dot]` for the cart-pole or `[T]` for a room.
pub type StateVector = nalgebra::DVector<f64>;

/// A single control action. Scalar-input plants use vectors of length 1.
pub type ControlVector = nalgebra::DVector<f64>;
