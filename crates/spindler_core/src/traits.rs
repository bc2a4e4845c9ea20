/// Right-hand side of a first-order ODE system `dx/dt = f(t, x)`.
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current independent variable
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);

    /// Index of the first state component outside the system's domain, if any.
    /// Checked after every accepted step.
    fn check_domain(&self, _x: &[f64]) -> Option<usize> {
        None
    }
}

/// Result of one trial step of an adaptive stepper.
#[derive(Debug, Clone, Copy)]
pub struct StepAttempt {
    /// Weighted RMS norm of the local error estimate; the step is acceptable
    /// when it is at most 1.
    pub error_norm: f64,
    /// Step size times an estimate of the dominant Jacobian eigenvalue
    /// magnitude.
    pub stiffness: f64,
    /// Whether the derivative at the end of the step is finite.
    pub end_derivative_finite: bool,
}

/// Absolute and relative error tolerances.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

/// A solver that attempts single adaptive steps.
pub trait AdaptiveStepper {
    /// Order of the embedded error estimate; step control uses the exponent
    /// `1 / (order + 1)`.
    fn error_order(&self) -> usize;

    /// Attempts a step of size `h` from `(t, y)`, writing the proposed state
    /// into `y_new`. Nothing is committed until [`AdaptiveStepper::accept`].
    fn attempt(
        &mut self,
        system: &impl DynamicalSystem,
        t: f64,
        y: &[f64],
        h: f64,
        tolerance: Tolerance,
        y_new: &mut [f64],
    ) -> Result<StepAttempt, crate::error::IntegrationFailure>;

    /// Called after the driver accepts the last attempted step.
    fn accept(&mut self) {}
}
