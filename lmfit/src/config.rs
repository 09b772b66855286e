use crate::FitError;

/// Default damping applied to the first step.
pub const DEFAULT_INITIAL_LAMBDA: f64 = 0.001;
/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Square root of machine epsilon, the default for both `xtol` and `ftol`.
pub fn default_tolerance() -> f64 {
    libm::sqrt(f64::EPSILON)
}

/// Settings for a [`LevenbergMarquardt`](crate::LevenbergMarquardt) optimizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    /// Number of model parameters being optimized.
    /// Fixed for the optimizer's lifetime.
    pub num_model_param: usize,
    /// Step-size tolerance used by the X-test.
    pub xtol: f64,
    /// Cost-reduction tolerance used by the F-test.
    pub ftol: f64,
    /// Upper bound on iterations. Failed solves count as iterations.
    pub max_iterations: usize,
    /// Damping used for the first step.
    pub initial_lambda: f64,
}

impl Config {
    /// Default settings for a model with this many parameters.
    pub fn new(num_model_param: usize) -> Self {
        Self {
            num_model_param,
            xtol: default_tolerance(),
            ftol: default_tolerance(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            initial_lambda: DEFAULT_INITIAL_LAMBDA,
        }
    }

    /// Set the X-test tolerance.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    /// Set the F-test tolerance.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the damping used for the first step.
    pub fn with_initial_lambda(mut self, initial_lambda: f64) -> Self {
        self.initial_lambda = initial_lambda;
        self
    }

    /// Check every setting, returning the first problem found.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.num_model_param == 0 {
            return Err(FitError::NoModelParameters);
        }
        validate_tolerance("xtol", self.xtol)?;
        validate_tolerance("ftol", self.ftol)?;
        validate_lambda(self.initial_lambda)
    }
}

fn validate_tolerance(name: &'static str, value: f64) -> Result<(), FitError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FitError::InvalidTolerance { name, value })
    }
}

pub(crate) fn validate_lambda(lambda: f64) -> Result<(), FitError> {
    if lambda.is_finite() && lambda > 0.0 {
        Ok(())
    } else {
        Err(FitError::InvalidLambda(lambda))
    }
}
