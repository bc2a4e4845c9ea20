//! JavaScript bindings for `spindler_core`.
//!
//! Tables and settings cross the boundary as plain objects through
//! `serde-wasm-bindgen`; errors are returned as strings.
mod model;

pub use model::{model_names, WasmModel};
