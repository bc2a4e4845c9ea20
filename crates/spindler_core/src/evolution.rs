//! Orbital evolution of an accreting binary.
//!
//! The state `(a, q, e)` is integrated over the total binary mass `m`, from
//! `m = 1` to `m = 1 + accreted_mass`, with `a` normalized to 1 at the start.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::EvolveError;
use crate::model::DerivativeModel;
use crate::solvers::{integrate, IntegrationSettings, Solution, SolverStats};
use crate::traits::DynamicalSystem;

const A: usize = 0;
const Q: usize = 1;
const E: usize = 2;

/// `d(a, q, e)/dm` for a disk model.
pub struct MassEvolution<'a, M: ?Sized> {
    model: &'a M,
}

impl<'a, M: DerivativeModel + ?Sized> MassEvolution<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<M: DerivativeModel + ?Sized> DynamicalSystem for MassEvolution<'_, M> {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, m: f64, x: &[f64], out: &mut [f64]) {
        let (a, q, e) = (x[A], x[Q], x[E]);
        out[A] = self.model.dlog_a(q, e) * a / m;
        out[Q] = self.model.dlog_q(q, e) * q / m;
        out[E] = self.model.dlog_e(q, e) * e / m;
    }

    // The mass ratio is never clamped; leaving (0, inf) ends the integration.
    fn check_domain(&self, x: &[f64]) -> Option<usize> {
        if x[Q] > 0.0 {
            None
        } else {
            Some(Q)
        }
    }
}

/// Orbital elements at one mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryState {
    pub a: f64,
    pub q: f64,
    pub e: f64,
    pub m: f64,
}

/// Accepted states of an evolution, one entry per solver step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub a: Vec<f64>,
    pub q: Vec<f64>,
    pub e: Vec<f64>,
    pub m: Vec<f64>,
    pub stats: SolverStats,
}

impl Trajectory {
    pub fn from_solution(solution: &Solution) -> Self {
        let column = |idx: usize| solution.y.iter().map(|state| state[idx]).collect();
        Self {
            a: column(A),
            q: column(Q),
            e: column(E),
            m: solution.t.clone(),
            stats: solution.stats,
        }
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    pub fn state(&self, idx: usize) -> Option<BinaryState> {
        Some(BinaryState {
            a: *self.a.get(idx)?,
            q: *self.q.get(idx)?,
            e: *self.e.get(idx)?,
            m: *self.m.get(idx)?,
        })
    }

    pub fn final_state(&self) -> Option<BinaryState> {
        self.state(self.len().checked_sub(1)?)
    }
}

/// Integration settings bundled for repeated evolutions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEngine {
    pub settings: IntegrationSettings,
}

impl EvolutionEngine {
    pub fn new(settings: IntegrationSettings) -> Self {
        Self { settings }
    }

    pub fn evolve<M: DerivativeModel + ?Sized>(
        &self,
        model: &M,
        accreted_mass: f64,
        q0: f64,
        e0: f64,
    ) -> Result<Trajectory, EvolveError> {
        evolve(model, accreted_mass, q0, e0, &self.settings)
    }

    pub fn evolve_batch<M: DerivativeModel + ?Sized>(
        &self,
        model: &M,
        accreted_mass: f64,
        initial: &[(f64, f64)],
    ) -> Vec<Result<Trajectory, EvolveError>> {
        evolve_batch(model, accreted_mass, initial, &self.settings)
    }
}

fn validate(accreted_mass: f64, q0: f64, e0: f64) -> Result<(), EvolveError> {
    if !(accreted_mass > 0.0 && accreted_mass.is_finite()) {
        return Err(EvolveError::InvalidInput(format!(
            "accreted mass must be positive and finite, got {accreted_mass}"
        )));
    }
    if !(q0 > 0.0 && q0 <= 1.0) {
        return Err(EvolveError::InvalidInput(format!(
            "initial mass ratio must lie in (0, 1], got {q0}"
        )));
    }
    if !(0.0..1.0).contains(&e0) {
        return Err(EvolveError::InvalidInput(format!(
            "initial eccentricity must lie in [0, 1), got {e0}"
        )));
    }
    Ok(())
}

/// Evolves `(a, q, e)` from `(1, q0, e0)` at `m = 1` to `m = 1 + accreted_mass`.
pub fn evolve<M: DerivativeModel + ?Sized>(
    model: &M,
    accreted_mass: f64,
    q0: f64,
    e0: f64,
    settings: &IntegrationSettings,
) -> Result<Trajectory, EvolveError> {
    validate(accreted_mass, q0, e0)?;
    settings
        .validate()
        .map_err(|failure| EvolveError::InvalidInput(failure.to_string()))?;

    tracing::debug!(
        model = model.name(),
        accreted_mass,
        q0,
        e0,
        method = ?settings.method,
        "starting evolution"
    );
    let system = MassEvolution::new(model);
    let solution = integrate(&system, (1.0, 1.0 + accreted_mass), &[1.0, q0, e0], settings)?;
    let trajectory = Trajectory::from_solution(&solution);
    tracing::debug!(
        model = model.name(),
        accepted = trajectory.stats.accepted,
        rejected = trajectory.stats.rejected,
        "evolution finished"
    );
    Ok(trajectory)
}

/// Runs [`evolve`] for every `(q0, e0)` on the rayon pool. Results keep the
/// input order.
pub fn evolve_batch<M: DerivativeModel + ?Sized>(
    model: &M,
    accreted_mass: f64,
    initial: &[(f64, f64)],
    settings: &IntegrationSettings,
) -> Vec<Result<Trajectory, EvolveError>> {
    initial
        .par_iter()
        .map(|&(q0, e0)| evolve(model, accreted_mass, q0, e0, settings))
        .collect()
}
