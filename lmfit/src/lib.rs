//! Levenberg-Marquardt nonlinear least-squares fitting.
//!
//! Fits a parametric model to observations by minimizing the sum of squared
//! residuals. You supply a [`ResidualFunction`] and either an analytic
//! [`DerivativeProvider`] or let [`NumericalJacobian`] estimate derivatives
//! by finite differences. The damped normal equations are solved with a
//! rank-revealing, column-pivoted QR, so poorly determined parameter
//! combinations get no correction instead of an amplified, noisy one.
//!
//! ```
//! use lmfit::{Config, LevenbergMarquardt, ResidualFunction};
//!
//! /// y = a·x + b
//! #[derive(Clone, Default)]
//! struct Line {
//!     a: f64,
//!     b: f64,
//! }
//!
//! impl ResidualFunction for Line {
//!     type Observed = (f64, f64);
//!     type State = ();
//!
//!     fn num_functions(&self) -> usize {
//!         1
//!     }
//!
//!     fn set_model(&mut self, model: &[f64]) {
//!         self.a = model[0];
//!         self.b = model[1];
//!     }
//!
//!     fn compute_residuals(&self, point: Option<&(f64, f64)>, _: Option<&()>, out: &mut [f64]) -> bool {
//!         let Some(&(x, y)) = point else { return false };
//!         out[0] = self.a * x + self.b - y;
//!         true
//!     }
//! }
//!
//! let points: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
//! let mut lm = LevenbergMarquardt::with_numerical_jacobian(Config::new(2), Line::default()).unwrap();
//! let outcome = lm.process(&[0.0, 0.0], Some(&points[..]), None).unwrap();
//! assert!((outcome.parameters()[0] - 2.0).abs() < 1e-3);
//! assert!((outcome.parameters()[1] - 1.0).abs() < 1e-3);
//! ```

pub use crate::config::{Config, DEFAULT_INITIAL_LAMBDA, DEFAULT_MAX_ITERATIONS, default_tolerance};
pub use crate::error::FitError;
pub use crate::fit_outcome::{Control, FitOutcome, IterationStats, StepKind, Termination};
pub use crate::function::{DerivativeProvider, ResidualFunction};
pub use crate::linalg::{FactorError, PivotedQr};
pub use crate::numerical::NumericalJacobian;
pub use crate::solver::LevenbergMarquardt;

/// Optimizer settings.
mod config;
/// Errors from fitting.
mod error;
/// What a fit produced, and per-iteration progress.
mod fit_outcome;
/// Interfaces the caller implements.
mod function;
/// Dense linear algebra for the damped normal equations.
mod linalg;
/// Finite-difference derivatives.
mod numerical;
/// The optimizer itself.
mod solver;
