//! Error types shared across the crate.
//!
//! Construction-time problems (grids, tables, model selection) are reported
//! eagerly and never retried. Integration failures carry the part of the
//! solution that was accepted before the failure.

use std::path::PathBuf;

use thiserror::Error;

use crate::evolution::Trajectory;
use crate::solvers::Solution;

/// Malformed axis or value data handed to a grid field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("axis {axis} is empty")]
    EmptyAxis { axis: usize },
    #[error("axis {axis} has a non-finite coordinate at index {index}")]
    NonFiniteCoordinate { axis: usize, index: usize },
    #[error("axis {axis} is not strictly increasing at index {index} ({previous} then {current})")]
    NotIncreasing {
        axis: usize,
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("value grid has {actual} entries but the axes describe {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("value at flat index {index} is not finite")]
    NonFiniteValue { index: usize },
    #[error("tables `{left}` and `{right}` are not sampled on the same axes")]
    AxisMismatch {
        left: &'static str,
        right: &'static str,
    },
}

/// Problems turning raw tabular text into table values.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table is empty")]
    Empty,
    #[error("line {line}: could not parse `{value}` as a number")]
    Parse { line: usize, value: String },
    #[error("line {line}: expected {expected} fields, found {actual}")]
    RaggedRow {
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("column `{name}` not found in table header")]
    MissingColumn { name: String },
    #[error("column lengths differ ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
    #[error("failed to read table {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Shape errors for vectorized queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("cannot broadcast {q} mass ratios against {e} eccentricities")]
    ShapeMismatch { q: usize, e: usize },
    #[error("{len} coordinates do not split into points of dimension {dim}")]
    RaggedPoints { len: usize, dim: usize },
    #[error("unknown rate `{0}`")]
    UnknownRate(String),
}

/// Model selection and construction failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown disk model `{0}` (expected Siwek23, DD21 or Zrake21)")]
    UnknownModel(String),
    #[error("model {model} needs {expected} tables")]
    TablesMismatch {
        model: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Reason an adaptive integration stopped early.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationFailure {
    #[error("invalid integration settings: {0}")]
    InvalidSettings(String),
    #[error("step size {step:e} fell below the minimum {min:e}")]
    StepSizeTooSmall { step: f64, min: f64 },
    #[error("step budget of {max_steps} attempts exhausted")]
    TooManySteps { max_steps: usize },
    #[error("derivative is not finite")]
    NonFinite,
    #[error("state component {component} left its domain (value {value})")]
    StateOutOfDomain { component: usize, value: f64 },
    #[error("iteration matrix is singular")]
    SingularMatrix,
}

/// An integration that failed, with everything accepted up to that point.
#[derive(Debug, Clone, Error)]
#[error("integration failed at t = {t}: {failure}")]
pub struct IntegrationError {
    pub failure: IntegrationFailure,
    pub t: f64,
    pub partial: Solution,
}

/// Errors from [`crate::evolution::evolve`].
#[derive(Debug, Clone, Error)]
pub enum EvolveError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

impl EvolveError {
    /// The trajectory accepted before an integration failure, if any.
    pub fn partial_trajectory(&self) -> Option<Trajectory> {
        match self {
            EvolveError::InvalidInput(_) => None,
            EvolveError::Integration(err) => Some(Trajectory::from_solution(&err.partial)),
        }
    }
}
