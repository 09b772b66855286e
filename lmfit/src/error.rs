/// Errors that stop a fit from running, or stop it partway through.
///
/// Numerical trouble inside the iteration loop (a damped system that can't
/// be factored, a candidate model the residual function rejects) is never
/// reported here. The optimizer absorbs it by growing the damping.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum FitError {
    /// The cost at the starting model was NaN or infinite.
    /// Either the starting guess is bad or the residual function is broken.
    #[error("Initial parameters are bad: the cost at the starting model is {cost}")]
    NonFiniteInitialCost {
        /// The cost that was computed.
        cost: f64,
    },
    /// The starting model has the wrong number of parameters.
    #[error("Expected a starting model with {expected} parameters, but it had {actual}")]
    WrongModelLength {
        /// Number of parameters the optimizer was built for.
        expected: usize,
        /// Number of parameters actually supplied.
        actual: usize,
    },
    /// Neither observations nor states were supplied.
    #[error("Cannot fit a model without any observations or states")]
    NoObservations,
    /// Observations and states were both supplied, but their lengths differ.
    #[error(
        "Observations and states must be parallel, but there were {observed} observations and {states} states"
    )]
    MismatchedObservations {
        /// How many observations were given.
        observed: usize,
        /// How many states were given.
        states: usize,
    },
    /// The optimizer was configured with zero model parameters.
    #[error("The model must have at least one parameter")]
    NoModelParameters,
    /// The residual function reported zero residuals per observation.
    #[error("The residual function must produce at least one residual per observation")]
    NoResidualFunctions,
    /// A convergence tolerance was negative or not finite.
    #[error("Tolerance {name} must be finite and non-negative, but was {value}")]
    InvalidTolerance {
        /// Which tolerance was invalid.
        name: &'static str,
        /// Its value.
        value: f64,
    },
    /// The damping parameter must stay strictly positive and finite.
    #[error("The initial damping must be finite and strictly positive, but was {0}")]
    InvalidLambda(f64),
    /// The iteration observer asked the optimizer to stop.
    #[error("Fit was cancelled after {iterations} iterations")]
    Cancelled {
        /// How many iterations had completed.
        iterations: usize,
    },
}
