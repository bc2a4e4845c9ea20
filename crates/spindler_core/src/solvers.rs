use std::cell::Cell;
use std::f64::consts::SQRT_2;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, IntegrationFailure};
use crate::traits::{AdaptiveStepper, DynamicalSystem, StepAttempt, Tolerance};

/// Consecutive accepted explicit steps flagged stiff before switching to the
/// implicit stepper.
const STIFF_RUN: usize = 15;
const STIFF_THRESHOLD: f64 = 3.0;
/// Consecutive accepted implicit steps flagged non-stiff before switching back.
const NONSTIFF_RUN: usize = 25;
const NONSTIFF_THRESHOLD: f64 = 1.0;

/// Integration algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Starts explicit and switches to the implicit stepper while the problem
    /// looks stiff.
    #[default]
    Auto,
    /// Tsitouras 5(4) explicit pair.
    Tsit5,
    /// Shampine-Reichelt linearly implicit Rosenbrock 2(3) method.
    Rosenbrock23,
}

impl FromStr for Method {
    type Err = IntegrationFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "lsoda" => Ok(Method::Auto),
            "tsit5" => Ok(Method::Tsit5),
            "rosenbrock23" | "ode23s" => Ok(Method::Rosenbrock23),
            _ => Err(IntegrationFailure::InvalidSettings(format!(
                "unknown integration method `{s}`"
            ))),
        }
    }
}

/// Tuning knobs for [`integrate`]. Missing fields deserialize to defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    pub method: Method,
    pub rtol: f64,
    pub atol: f64,
    /// Initial step size; estimated from the problem when unset.
    pub first_step: Option<f64>,
    /// Upper bound on the step size; unbounded when unset.
    pub max_step: Option<f64>,
    /// Absolute lower bound on the step size. The effective floor also scales
    /// with the machine epsilon at the current `t`.
    pub min_step: f64,
    /// Budget of attempted (accepted plus rejected) steps.
    pub max_steps: usize,
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            method: Method::Auto,
            rtol: 1e-2,
            atol: 1e-5,
            first_step: None,
            max_step: None,
            min_step: 0.0,
            max_steps: 100_000,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

impl IntegrationSettings {
    pub fn validate(&self) -> Result<(), IntegrationFailure> {
        let positive = |v: f64| v > 0.0 && v.is_finite();
        let invalid = |msg: &str| Err(IntegrationFailure::InvalidSettings(msg.to_string()));
        if !positive(self.rtol) {
            return invalid("rtol must be positive and finite");
        }
        if !positive(self.atol) {
            return invalid("atol must be positive and finite");
        }
        if self.first_step.is_some_and(|h| !positive(h)) {
            return invalid("first_step must be positive and finite");
        }
        if self.max_step.is_some_and(|h| !(h > 0.0)) {
            return invalid("max_step must be positive");
        }
        if !(self.min_step >= 0.0 && self.min_step.is_finite()) {
            return invalid("min_step must be non-negative and finite");
        }
        if self.max_steps == 0 {
            return invalid("max_steps must be greater than zero");
        }
        if !(self.safety > 0.0 && self.safety <= 1.0) {
            return invalid("safety must lie in (0, 1]");
        }
        if !(self.min_factor > 0.0 && self.min_factor < 1.0) {
            return invalid("min_factor must lie in (0, 1)");
        }
        if !(self.max_factor > 1.0) {
            return invalid("max_factor must be greater than 1");
        }
        Ok(())
    }

    fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.rtol,
            atol: self.atol,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub accepted: usize,
    pub rejected: usize,
    pub rhs_evaluations: usize,
    pub method_switches: usize,
}

/// Accepted steps of an integration: `y[i]` is the state at `t[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub t: Vec<f64>,
    pub y: Vec<Vec<f64>>,
    pub stats: SolverStats,
}

fn error_norm(err: &[f64], y: &[f64], y_new: &[f64], tolerance: Tolerance) -> f64 {
    let n = err.len().max(1) as f64;
    let sum: f64 = err
        .iter()
        .zip(y.iter().zip(y_new))
        .map(|(e, (a, b))| {
            let scale = tolerance.atol + tolerance.rtol * a.abs().max(b.abs());
            (e / scale).powi(2)
        })
        .sum();
    (sum / n).sqrt()
}

fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Tsitouras 5(4) Solver with embedded error estimate
pub struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
    stage6: Vec<f64>,
    err: Vec<f64>,
    // k1 holds f(t, y) for the state the next attempt starts from.
    k1_current: bool,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
            stage6: vec![0.0; dim],
            err: vec![0.0; dim],
            k1_current: false,
        }
    }
}

impl AdaptiveStepper for Tsit5 {
    fn error_order(&self) -> usize {
        4
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem,
        t: f64,
        y: &[f64],
        dt: f64,
        tolerance: Tolerance,
        y_new: &mut [f64],
    ) -> Result<StepAttempt, IntegrationFailure> {
        // Tsit5 Coefficients
        let c2 = 0.161;
        let c3 = 0.327;
        let c4 = 0.9;
        let c5 = 0.9800255409045097;

        let a21 = 0.161;

        let a31 = -0.008480655492356989;
        let a32 = 0.335480655492357;

        let a41 = 2.898;
        let a42 = -6.359447987781783;
        let a43 = 4.361447987781783;

        let a51 = 5.325864858437957;
        let a52 = -11.748883564062828;
        let a53 = 7.495539342889693;
        let a54 = -0.09249506636030195;

        let a61 = 5.86145544294642;
        let a62 = -12.92096931784711;
        let a63 = 8.159367898576159;
        let a64 = -0.071584973281401;
        let a65 = -0.02826857949054663;

        // b coefficients (5th order), FSAL: k7 is evaluated at the new state
        let b1 = 0.09646076681806523;
        let b2 = 0.01;
        let b3 = 0.4798896504144996;
        let b4 = 1.379008574103742;
        let b5 = -3.290069515436099;
        let b6 = 2.324710524099774;

        // difference between the 5th and embedded 4th order weights
        let e1 = -0.00178001105222577714;
        let e2 = -0.0008164344596567469;
        let e3 = 0.007880878010261995;
        let e4 = -0.1447110071732629;
        let e5 = 0.5823571654525552;
        let e6 = -0.45808210592918697;
        let e7 = 0.015151515151515152;

        let n = y.len();

        // k1
        if !self.k1_current {
            system.apply(t, y, &mut self.k1);
            self.k1_current = true;
        }

        // k2
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t + c2 * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t + c3 * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t + c4 * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = y[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t + c5 * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..n {
            self.stage6[i] = y[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t + dt, &self.stage6, &mut self.k6);

        // Proposed state
        for i in 0..n {
            y_new[i] = y[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        // k7
        system.apply(t + dt, y_new, &mut self.k7);

        for i in 0..n {
            self.err[i] = dt
                * (e1 * self.k1[i]
                    + e2 * self.k2[i]
                    + e3 * self.k3[i]
                    + e4 * self.k4[i]
                    + e5 * self.k5[i]
                    + e6 * self.k6[i]
                    + e7 * self.k7[i]);
        }

        // k6 and k7 share the abscissa t + dt, so their difference over the
        // state difference approximates the dominant eigenvalue.
        let denominator = l2_distance(y_new, &self.stage6);
        let stiffness = if denominator > 0.0 {
            dt.abs() * l2_distance(&self.k7, &self.k6) / denominator
        } else {
            0.0
        };

        Ok(StepAttempt {
            error_norm: error_norm(&self.err, y, y_new, tolerance),
            stiffness,
            end_derivative_finite: all_finite(&self.k7),
        })
    }

    fn accept(&mut self) {
        std::mem::swap(&mut self.k1, &mut self.k7);
        self.k1_current = true;
    }
}

/// Linearly implicit Rosenbrock 2(3) solver (Shampine & Reichelt, `ode23s`).
/// L-stable, with finite-difference Jacobian and time derivative.
pub struct Rosenbrock23 {
    f0: Vec<f64>,
    f2: Vec<f64>,
    scratch: Vec<f64>,
    shifted: Vec<f64>,
    jacobian: DMatrix<f64>,
    f0_current: bool,
}

impl Rosenbrock23 {
    pub fn new(dim: usize) -> Self {
        Self {
            f0: vec![0.0; dim],
            f2: vec![0.0; dim],
            scratch: vec![0.0; dim],
            shifted: vec![0.0; dim],
            jacobian: DMatrix::zeros(dim, dim),
            f0_current: false,
        }
    }

    fn update_jacobian(&mut self, system: &impl DynamicalSystem, t: f64, y: &[f64]) {
        let n = y.len();
        self.shifted.copy_from_slice(y);
        for j in 0..n {
            let delta = f64::EPSILON.sqrt() * y[j].abs().max(1.0);
            self.shifted[j] = y[j] + delta;
            system.apply(t, &self.shifted, &mut self.scratch);
            for i in 0..n {
                self.jacobian[(i, j)] = (self.scratch[i] - self.f0[i]) / delta;
            }
            self.shifted[j] = y[j];
        }
    }

    fn jacobian_norm(&self) -> f64 {
        self.jacobian
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }
}

impl AdaptiveStepper for Rosenbrock23 {
    fn error_order(&self) -> usize {
        2
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem,
        t: f64,
        y: &[f64],
        h: f64,
        tolerance: Tolerance,
        y_new: &mut [f64],
    ) -> Result<StepAttempt, IntegrationFailure> {
        let n = y.len();
        let d = 1.0 / (2.0 + SQRT_2);
        let e32 = 6.0 + SQRT_2;

        if !self.f0_current {
            system.apply(t, y, &mut self.f0);
            self.f0_current = true;
        }
        self.update_jacobian(system, t, y);

        let dt_fd = f64::EPSILON.sqrt() * t.abs().max(1.0);
        system.apply(t + dt_fd, y, &mut self.scratch);
        let dfdt = DVector::from_iterator(n, (0..n).map(|i| (self.scratch[i] - self.f0[i]) / dt_fd));

        let w = DMatrix::<f64>::identity(n, n) - &self.jacobian * (h * d);
        let lu = w.lu();
        let f0 = DVector::from_column_slice(&self.f0);

        let k1 = lu
            .solve(&(&f0 + &dfdt * (h * d)))
            .ok_or(IntegrationFailure::SingularMatrix)?;

        for i in 0..n {
            self.shifted[i] = y[i] + 0.5 * h * k1[i];
        }
        system.apply(t + 0.5 * h, &self.shifted, &mut self.scratch);
        let f1 = DVector::from_column_slice(&self.scratch);

        let k2 = lu
            .solve(&(&f1 - &k1))
            .ok_or(IntegrationFailure::SingularMatrix)?
            + &k1;

        for i in 0..n {
            y_new[i] = y[i] + h * k2[i];
        }
        system.apply(t + h, y_new, &mut self.f2);
        let f2 = DVector::from_column_slice(&self.f2);

        let rhs = &f2 - (&k2 - &f1) * e32 - (&k1 - &f0) * 2.0 + &dfdt * (h * d);
        let k3 = lu.solve(&rhs).ok_or(IntegrationFailure::SingularMatrix)?;

        let err: Vec<f64> = (0..n)
            .map(|i| h / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]))
            .collect();

        Ok(StepAttempt {
            error_norm: error_norm(&err, y, y_new, tolerance),
            stiffness: h.abs() * self.jacobian_norm(),
            end_derivative_finite: all_finite(&self.f2),
        })
    }

    fn accept(&mut self) {
        std::mem::swap(&mut self.f0, &mut self.f2);
        self.f0_current = true;
    }
}

enum ActiveStepper {
    Tsit5(Tsit5),
    Rosenbrock23(Rosenbrock23),
}

impl ActiveStepper {
    fn build(method: Method, dim: usize) -> Self {
        match method {
            Method::Auto | Method::Tsit5 => ActiveStepper::Tsit5(Tsit5::new(dim)),
            Method::Rosenbrock23 => ActiveStepper::Rosenbrock23(Rosenbrock23::new(dim)),
        }
    }

    fn is_implicit(&self) -> bool {
        matches!(self, ActiveStepper::Rosenbrock23(_))
    }

    fn error_order(&self) -> usize {
        match self {
            ActiveStepper::Tsit5(s) => s.error_order(),
            ActiveStepper::Rosenbrock23(s) => s.error_order(),
        }
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem,
        t: f64,
        y: &[f64],
        h: f64,
        tolerance: Tolerance,
        y_new: &mut [f64],
    ) -> Result<StepAttempt, IntegrationFailure> {
        match self {
            ActiveStepper::Tsit5(s) => s.attempt(system, t, y, h, tolerance, y_new),
            ActiveStepper::Rosenbrock23(s) => s.attempt(system, t, y, h, tolerance, y_new),
        }
    }

    fn accept(&mut self) {
        match self {
            ActiveStepper::Tsit5(s) => s.accept(),
            ActiveStepper::Rosenbrock23(s) => s.accept(),
        }
    }
}

/// Wraps a system and counts right-hand side evaluations.
struct Counted<'a, S> {
    inner: &'a S,
    calls: Cell<usize>,
}

impl<S: DynamicalSystem> DynamicalSystem for Counted<'_, S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.calls.set(self.calls.get() + 1);
        self.inner.apply(t, x, out);
    }

    fn check_domain(&self, x: &[f64]) -> Option<usize> {
        self.inner.check_domain(x)
    }
}

/// Hairer's starting step heuristic.
fn initial_step(
    system: &impl DynamicalSystem,
    t0: f64,
    y0: &[f64],
    f0: &[f64],
    order: usize,
    tolerance: Tolerance,
    span: f64,
) -> f64 {
    let scale: Vec<f64> = y0
        .iter()
        .map(|y| tolerance.atol + tolerance.rtol * y.abs())
        .collect();
    let rms = |values: &[f64]| {
        (values
            .iter()
            .zip(&scale)
            .map(|(v, s)| (v / s).powi(2))
            .sum::<f64>()
            / values.len().max(1) as f64)
            .sqrt()
    };

    let d0 = rms(y0);
    let d1 = rms(f0);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    }
    .min(span);

    let y1: Vec<f64> = y0.iter().zip(f0).map(|(y, f)| y + h0 * f).collect();
    let mut f1 = vec![0.0; y0.len()];
    system.apply(t0 + h0, &y1, &mut f1);
    let diff: Vec<f64> = f1.iter().zip(f0).map(|(a, b)| a - b).collect();
    let d2 = rms(&diff) / h0;

    let bound = d1.max(d2);
    let h1 = if bound <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / bound).powf(1.0 / (order as f64 + 1.0))
    };
    (100.0 * h0).min(h1).min(span)
}

fn failed(
    failure: IntegrationFailure,
    t: f64,
    mut partial: Solution,
    evaluations: usize,
) -> IntegrationError {
    partial.stats.rhs_evaluations = evaluations;
    tracing::warn!(%failure, t, accepted = partial.stats.accepted, "integration failed");
    IntegrationError {
        failure,
        t,
        partial,
    }
}

/// Integrates `system` from `t_span.0` to `t_span.1` with adaptive steps.
///
/// Every accepted step is recorded; the last entry sits exactly at
/// `t_span.1`. On failure the error carries the accepted steps.
pub fn integrate<S: DynamicalSystem>(
    system: &S,
    t_span: (f64, f64),
    y0: &[f64],
    settings: &IntegrationSettings,
) -> Result<Solution, IntegrationError> {
    let (t0, t_end) = t_span;
    let system = Counted {
        inner: system,
        calls: Cell::new(0),
    };
    let mut solution = Solution::default();

    if let Err(failure) = settings.validate() {
        return Err(failed(failure, t0, solution, 0));
    }
    if !(t0.is_finite() && t_end.is_finite() && t_end > t0) {
        let failure = IntegrationFailure::InvalidSettings(
            "integration span must be finite and increasing".to_string(),
        );
        return Err(failed(failure, t0, solution, 0));
    }
    let dim = system.dimension();
    if y0.len() != dim {
        let failure = IntegrationFailure::InvalidSettings(format!(
            "initial state has {} components, system has {}",
            y0.len(),
            dim
        ));
        return Err(failed(failure, t0, solution, 0));
    }
    if !all_finite(y0) {
        return Err(failed(IntegrationFailure::NonFinite, t0, solution, 0));
    }

    solution.t.push(t0);
    solution.y.push(y0.to_vec());

    let tolerance = settings.tolerance();
    let mut stepper = ActiveStepper::build(settings.method, dim);
    let max_step = settings.max_step.unwrap_or(f64::INFINITY).min(t_end - t0);

    let mut f0 = vec![0.0; dim];
    system.apply(t0, y0, &mut f0);
    if !all_finite(&f0) {
        return Err(failed(
            IntegrationFailure::NonFinite,
            t0,
            solution,
            system.calls.get(),
        ));
    }
    let mut h = match settings.first_step {
        Some(h) => h,
        None => initial_step(
            &system,
            t0,
            y0,
            &f0,
            stepper.error_order(),
            tolerance,
            t_end - t0,
        ),
    }
    .min(max_step);

    let mut t = t0;
    let mut y = y0.to_vec();
    let mut y_new = vec![0.0; dim];
    let mut attempts = 0usize;
    let mut rejected_last = false;
    let mut stiff_run = 0usize;
    let mut nonstiff_run = 0usize;

    while t < t_end {
        if attempts >= settings.max_steps {
            let failure = IntegrationFailure::TooManySteps {
                max_steps: settings.max_steps,
            };
            return Err(failed(failure, t, solution, system.calls.get()));
        }
        attempts += 1;

        let floor = settings.min_step.max(16.0 * f64::EPSILON * t.abs());
        if !(h >= floor) {
            let failure = IntegrationFailure::StepSizeTooSmall { step: h, min: floor };
            return Err(failed(failure, t, solution, system.calls.get()));
        }

        let last = t + h >= t_end || t_end - (t + h) <= floor;
        if last {
            h = t_end - t;
        }

        let attempt = match stepper.attempt(&system, t, &y, h, tolerance, &mut y_new) {
            Ok(attempt) => attempt,
            Err(failure) => return Err(failed(failure, t, solution, system.calls.get())),
        };
        let exponent = 1.0 / (stepper.error_order() as f64 + 1.0);
        let norm = attempt.error_norm;

        if !(norm <= 1.0) || !all_finite(&y_new) {
            let factor = if norm.is_finite() && all_finite(&y_new) {
                (settings.safety * norm.powf(-exponent)).clamp(settings.min_factor, 1.0)
            } else {
                settings.min_factor
            };
            h *= factor;
            solution.stats.rejected += 1;
            rejected_last = true;
            continue;
        }

        t = if last { t_end } else { t + h };
        std::mem::swap(&mut y, &mut y_new);
        stepper.accept();

        if let Some(component) = system.check_domain(&y) {
            let failure = IntegrationFailure::StateOutOfDomain {
                component,
                value: y[component],
            };
            return Err(failed(failure, t, solution, system.calls.get()));
        }
        if !attempt.end_derivative_finite {
            return Err(failed(
                IntegrationFailure::NonFinite,
                t,
                solution,
                system.calls.get(),
            ));
        }

        solution.t.push(t);
        solution.y.push(y.clone());
        solution.stats.accepted += 1;

        let mut factor = if norm == 0.0 {
            settings.max_factor
        } else {
            (settings.safety * norm.powf(-exponent)).clamp(settings.min_factor, settings.max_factor)
        };
        if rejected_last {
            factor = factor.min(1.0);
        }
        rejected_last = false;
        h = (h * factor).min(max_step);

        if settings.method == Method::Auto {
            if stepper.is_implicit() {
                nonstiff_run = if attempt.stiffness < NONSTIFF_THRESHOLD {
                    nonstiff_run + 1
                } else {
                    0
                };
                if nonstiff_run >= NONSTIFF_RUN {
                    tracing::debug!(t, "problem no longer stiff, switching to Tsit5");
                    stepper = ActiveStepper::Tsit5(Tsit5::new(dim));
                    nonstiff_run = 0;
                    solution.stats.method_switches += 1;
                }
            } else {
                stiff_run = if attempt.stiffness > STIFF_THRESHOLD {
                    stiff_run + 1
                } else {
                    0
                };
                if stiff_run >= STIFF_RUN {
                    tracing::debug!(t, "stiffness detected, switching to Rosenbrock23");
                    stepper = ActiveStepper::Rosenbrock23(Rosenbrock23::new(dim));
                    stiff_run = 0;
                    solution.stats.method_switches += 1;
                }
            }
        }
    }

    solution.stats.rhs_evaluations = system.calls.get();
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * x[0];
        }
    }

    /// y' = -k (y - cos t): stiff for large k, with solution close to cos t.
    struct StiffRelaxation {
        k: f64,
    }

    impl DynamicalSystem for StiffRelaxation {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.k * (x[0] - t.cos());
        }
    }

    /// y' = -1 with y restricted to positive values.
    struct Drain;

    impl DynamicalSystem for Drain {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -1.0;
        }

        fn check_domain(&self, x: &[f64]) -> Option<usize> {
            if x[0] > 0.0 {
                None
            } else {
                Some(0)
            }
        }
    }

    fn settings(method: Method, rtol: f64, atol: f64) -> IntegrationSettings {
        IntegrationSettings {
            method,
            rtol,
            atol,
            ..IntegrationSettings::default()
        }
    }

    #[test]
    fn tsit5_tracks_exponential_decay() {
        let solution = integrate(
            &Decay { rate: 1.0 },
            (0.0, 2.0),
            &[1.0],
            &settings(Method::Tsit5, 1e-8, 1e-10),
        )
        .expect("integration should succeed");

        let last = solution.y.last().expect("final state")[0];
        assert!((last - (-2.0f64).exp()).abs() < 1e-6, "got {last}");
        assert_eq!(*solution.t.last().expect("final time"), 2.0);
        assert_eq!(solution.t.len(), solution.stats.accepted + 1);
    }

    #[test]
    fn rosenbrock23_tracks_exponential_decay() {
        let solution = integrate(
            &Decay { rate: 1.0 },
            (0.0, 2.0),
            &[1.0],
            &settings(Method::Rosenbrock23, 1e-5, 1e-8),
        )
        .expect("integration should succeed");

        let last = solution.y.last().expect("final state")[0];
        assert!((last - (-2.0f64).exp()).abs() < 1e-3, "got {last}");
    }

    #[test]
    fn accepted_times_increase_strictly() {
        let solution = integrate(
            &Decay { rate: 3.0 },
            (1.0, 11.0),
            &[2.0],
            &IntegrationSettings::default(),
        )
        .expect("integration should succeed");

        assert_eq!(solution.t[0], 1.0);
        assert!(solution.t.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(*solution.t.last().expect("final time"), 11.0);
        assert_eq!(solution.t.len(), solution.y.len());
        assert!(solution.stats.rhs_evaluations > solution.stats.accepted);
    }

    #[test]
    fn implicit_stepper_needs_fewer_steps_on_stiff_problem() {
        let system = StiffRelaxation { k: 500.0 };
        let explicit = integrate(&system, (0.0, 2.0), &[1.0], &settings(Method::Tsit5, 1e-4, 1e-7))
            .expect("explicit integration");
        let implicit = integrate(
            &system,
            (0.0, 2.0),
            &[1.0],
            &settings(Method::Rosenbrock23, 1e-4, 1e-7),
        )
        .expect("implicit integration");

        let expected = 2.0f64.cos();
        for solution in [&explicit, &implicit] {
            let last = solution.y.last().expect("final state")[0];
            assert!((last - expected).abs() < 1e-2, "got {last}");
        }
        assert!(
            implicit.stats.accepted < explicit.stats.accepted,
            "implicit {} vs explicit {}",
            implicit.stats.accepted,
            explicit.stats.accepted
        );
    }

    #[test]
    fn auto_method_solves_stiff_problem() {
        let system = StiffRelaxation { k: 500.0 };
        let solution = integrate(&system, (0.0, 5.0), &[1.0], &settings(Method::Auto, 1e-4, 1e-7))
            .expect("integration should succeed");
        let last = solution.y.last().expect("final state")[0];
        assert!((last - 5.0f64.cos()).abs() < 1e-2, "got {last}");
    }

    #[test]
    fn step_budget_is_enforced_with_partial_solution() {
        let limited = IntegrationSettings {
            max_steps: 3,
            ..settings(Method::Tsit5, 1e-10, 1e-12)
        };
        let err = integrate(&Decay { rate: 1.0 }, (0.0, 10.0), &[1.0], &limited)
            .expect_err("budget should be exhausted");
        assert_eq!(err.failure, IntegrationFailure::TooManySteps { max_steps: 3 });
        assert_eq!(err.partial.t[0], 0.0);
        assert!(err.partial.t.len() <= 4);
    }

    #[test]
    fn leaving_the_domain_is_reported_not_clamped() {
        let err = integrate(&Drain, (0.0, 3.0), &[1.0], &IntegrationSettings::default())
            .expect_err("state should leave the domain");
        match err.failure {
            IntegrationFailure::StateOutOfDomain { component, value } => {
                assert_eq!(component, 0);
                assert!(value <= 0.0);
            }
            other => panic!("unexpected failure {other:?}"),
        }
        assert!(err.partial.y.iter().all(|state| state[0] > 0.0));
        assert!(err.t >= 1.0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad = IntegrationSettings {
            rtol: 0.0,
            ..IntegrationSettings::default()
        };
        let err = integrate(&Decay { rate: 1.0 }, (0.0, 1.0), &[1.0], &bad).expect_err("bad rtol");
        assert!(matches!(err.failure, IntegrationFailure::InvalidSettings(_)));

        let err = integrate(
            &Decay { rate: 1.0 },
            (1.0, 1.0),
            &[1.0],
            &IntegrationSettings::default(),
        )
        .expect_err("empty span");
        assert!(matches!(err.failure, IntegrationFailure::InvalidSettings(_)));

        let err = integrate(
            &Decay { rate: 1.0 },
            (0.0, 1.0),
            &[1.0, 2.0],
            &IntegrationSettings::default(),
        )
        .expect_err("dimension mismatch");
        assert!(matches!(err.failure, IntegrationFailure::InvalidSettings(_)));
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("LSODA".parse::<Method>(), Ok(Method::Auto));
        assert_eq!("tsit5".parse::<Method>(), Ok(Method::Tsit5));
        assert_eq!("ode23s".parse::<Method>(), Ok(Method::Rosenbrock23));
        assert!("RK45".parse::<Method>().is_err());
    }

    #[test]
    fn max_step_bounds_every_step() {
        let bounded = IntegrationSettings {
            max_step: Some(0.1),
            ..IntegrationSettings::default()
        };
        let solution = integrate(&Decay { rate: 0.1 }, (0.0, 1.0), &[1.0], &bounded)
            .expect("integration should succeed");
        assert!(solution.t.windows(2).all(|w| w[1] - w[0] <= 0.1 + 1e-12));
        assert!(solution.stats.accepted >= 10);
    }
}
