//! The `spindler_core` crate evolves the orbit of an accreting binary using
//! rate tables measured in circumbinary-disk simulations.
//!
//! Key components:
//! - **Grid**: `LinearField1d` and `GridField2d` interpolate tabulated rates, falling back to the
//!   nearest node (or extrapolating) outside the sampled domain.
//! - **Tables**: `Table1d`, `Table2d` and CSV loaders for the simulation output.
//! - **Model**: the `DerivativeModel` trait with the general `Siwek23` model and the equal-mass
//!   `DD21` / `Zrake21` models, plus energy and angular-momentum rates.
//! - **Solvers**: adaptive `Tsit5` and `Rosenbrock23` steppers behind `integrate`, with automatic
//!   stiffness switching.
//! - **Evolution**: `evolve` integrates `(a, q, e)` over the binary mass into a `Trajectory`.
pub mod error;
pub mod evolution;
pub mod grid;
pub mod model;
pub mod solvers;
pub mod tables;
pub mod traits;

pub use error::{
    EvolveError, GridError, IntegrationError, IntegrationFailure, ModelError, QueryError,
    TableError,
};
pub use evolution::{evolve, evolve_batch, BinaryState, EvolutionEngine, Trajectory};
pub use grid::{GridField, GridField2d, LinearField1d, OutOfBounds};
pub use model::{DerivativeModel, EqualMass, ModelKind, Rate, Siwek23};
pub use solvers::{integrate, IntegrationSettings, Method};
pub use tables::{ModelTables, Table1d, Table2d};
