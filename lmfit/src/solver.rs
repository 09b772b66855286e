use faer::Mat;
use tracing::{debug, trace, warn};

use crate::{
    Config, Control, DerivativeProvider, FitError, FitOutcome, IterationStats, ResidualFunction,
    StepKind, Termination, config::validate_lambda, linalg::PivotedQr,
    numerical::NumericalJacobian,
};

use self::assembly::Observations;

/// Building the normal equations from residuals and derivatives.
mod assembly;
/// F-test and X-test stopping rules.
mod convergence;

/// Damping is multiplied by this after a rejected step, and divided by it after an accepted one.
const LAMBDA_FACTOR: f64 = 10.0;

/// Levenberg-Marquardt minimizer of summed squared residuals.
///
/// Every buffer whose size depends only on the number of model parameters
/// is allocated here, once. The stacked Jacobian and residuals depend on the
/// number of observations too, so they're sized at the start of each
/// [`process`](Self::process) call and reused across its iterations.
///
/// Don't share one optimizer between threads; build one per worker instead.
pub struct LevenbergMarquardt<R, D> {
    config: Config,
    function: R,
    derivative: D,
    /// Residuals per observation (F).
    num_functions: usize,

    /// Last accepted estimate.
    working: Vec<f64>,
    /// Trial step under evaluation.
    candidate: Vec<f64>,
    initial_cost: f64,
    final_cost: f64,

    /// Gauss-Newton Hessian approximation, Σ J·Jᵀ.
    hessian: Mat<f64>,
    /// Negated gradient, −Σ r·J, so that working + correction moves downhill.
    descent: Vec<f64>,
    /// Hessian with its diagonal scaled by (1 + λ).
    damped: Mat<f64>,
    correction: Vec<f64>,
    solver: PivotedQr,

    /// One observation's derivatives, F×P.
    gradient: Mat<f64>,
    /// One observation's residuals, length F.
    residual_block: Vec<f64>,
    /// Every observation's derivatives stacked, (N·F)×P.
    jacobian: Mat<f64>,
    /// Every observation's residuals stacked, length N·F.
    residuals: Vec<f64>,
    /// Scratch for the F-test's linearized residuals, length N·F.
    predicted: Vec<f64>,
}

impl<R, D> LevenbergMarquardt<R, D>
where
    R: ResidualFunction,
    D: DerivativeProvider<R::Observed, R::State>,
{
    /// Build an optimizer with an analytic derivative.
    pub fn new(config: Config, function: R, derivative: D) -> Result<Self, FitError> {
        config.validate()?;
        let num_functions = function.num_functions();
        if num_functions == 0 {
            return Err(FitError::NoResidualFunctions);
        }
        let p = config.num_model_param;
        Ok(Self {
            config,
            function,
            derivative,
            num_functions,
            working: vec![0.0; p],
            candidate: vec![0.0; p],
            initial_cost: f64::NAN,
            final_cost: f64::NAN,
            hessian: Mat::zeros(p, p),
            descent: vec![0.0; p],
            damped: Mat::zeros(p, p),
            correction: vec![0.0; p],
            solver: PivotedQr::new(p),
            gradient: Mat::zeros(num_functions, p),
            residual_block: vec![0.0; num_functions],
            jacobian: Mat::zeros(0, p),
            residuals: Vec::new(),
            predicted: Vec::new(),
        })
    }

    /// Fit the model, starting from `initial_model`.
    ///
    /// `observed` and `states` are parallel; either may be `None`, but not both.
    /// Returns an error if the inputs are malformed or the starting cost isn't
    /// finite. Otherwise the fit always produces an outcome, even if it
    /// didn't improve anything; check [`FitOutcome::termination`].
    pub fn process(
        &mut self,
        initial_model: &[f64],
        observed: Option<&[R::Observed]>,
        states: Option<&[R::State]>,
    ) -> Result<FitOutcome, FitError> {
        self.process_cb(initial_model, observed, states, |_| Control::Continue)
    }

    /// Like [`process`](Self::process), but calls `on_iter` at the end of every
    /// iteration. Returning [`Control::Cancel`] stops the fit; the working
    /// model reached so far is still available from
    /// [`model_parameters`](Self::model_parameters).
    pub fn process_cb<Cb>(
        &mut self,
        initial_model: &[f64],
        observed: Option<&[R::Observed]>,
        states: Option<&[R::State]>,
        mut on_iter: Cb,
    ) -> Result<FitOutcome, FitError>
    where
        Cb: FnMut(&IterationStats) -> Control,
    {
        let p = self.config.num_model_param;
        if initial_model.len() != p {
            return Err(FitError::WrongModelLength {
                expected: p,
                actual: initial_model.len(),
            });
        }
        let data = Observations::new(observed, states)?;

        self.working.copy_from_slice(initial_model);
        self.candidate.copy_from_slice(initial_model);
        self.resize_stacked(data.len());

        let mut lambda = self.config.initial_lambda;
        let mut prev_cost = assembly::cost(
            &mut self.function,
            &self.working,
            &data,
            &mut self.residual_block,
        );
        self.initial_cost = prev_cost;
        self.final_cost = prev_cost;
        if !prev_cost.is_finite() {
            return Err(FitError::NonFiniteInitialCost { cost: prev_cost });
        }

        let mut recompute = true;
        let mut accepted_steps = 0;
        let mut iterations = 0;
        let mut termination = None;

        while iterations < self.config.max_iterations && prev_cost > 0.0 {
            let iteration = iterations;
            iterations += 1;

            if recompute {
                self.compute_matrices(&data);
            }
            self.compute_damped(lambda);

            if let Err(error) = self.solver.factor(&self.damped) {
                lambda *= LAMBDA_FACTOR;
                recompute = false;
                trace!(
                    iteration,
                    lambda,
                    rank = self.solver.rank(),
                    pivot_product = self.solver.pivot_product(),
                    %error,
                    "damped system unusable, growing damping"
                );
                let stats = IterationStats {
                    iteration,
                    lambda,
                    reference_cost: prev_cost,
                    candidate_cost: None,
                    step: StepKind::SolveFailed,
                };
                if matches!(on_iter(&stats), Control::Cancel) {
                    self.final_cost = prev_cost;
                    return Err(FitError::Cancelled { iterations });
                }
                continue;
            }
            self.solver.solve(&self.descent, &mut self.correction);

            for ((candidate, working), correction) in self
                .candidate
                .iter_mut()
                .zip(&self.working)
                .zip(&self.correction)
            {
                *candidate = working + correction;
            }
            let cost = assembly::cost(
                &mut self.function,
                &self.candidate,
                &data,
                &mut self.residual_block,
            );

            let step = if cost < prev_cost {
                self.working.copy_from_slice(&self.candidate);
                lambda = (lambda / LAMBDA_FACTOR).max(f64::MIN_POSITIVE);
                recompute = true;
                accepted_steps += 1;
                StepKind::Accepted
            } else {
                lambda *= LAMBDA_FACTOR;
                recompute = false;
                StepKind::Rejected
            };
            debug!(
                iteration,
                lambda,
                reference_cost = prev_cost,
                candidate_cost = cost,
                ?step,
                "levenberg-marquardt step"
            );

            let stats = IterationStats {
                iteration,
                lambda,
                reference_cost: prev_cost,
                candidate_cost: Some(cost),
                step,
            };
            if matches!(on_iter(&stats), Control::Cancel) {
                self.final_cost = prev_cost;
                return Err(FitError::Cancelled { iterations });
            }

            if convergence::f_test(
                &self.jacobian,
                &self.residuals,
                &self.correction,
                &mut self.predicted,
                prev_cost,
                cost,
                self.config.ftol,
            ) {
                termination = Some(Termination::FTest);
                break;
            }
            if convergence::x_test(&self.working, lambda, self.config.xtol) {
                termination = Some(Termination::XTest);
                break;
            }

            // The reference only moves on accepted steps; rejected candidates
            // keep being compared against the last accepted cost.
            if recompute {
                prev_cost = cost;
            }
        }

        self.final_cost = prev_cost;
        let termination = termination.unwrap_or(if prev_cost <= 0.0 {
            Termination::ZeroCost
        } else if accepted_steps == 0 {
            Termination::Stalled
        } else {
            Termination::MaxIterations
        });
        log_termination(termination, iterations, self.initial_cost, self.final_cost);

        Ok(FitOutcome {
            parameters: self.working.clone(),
            initial_cost: self.initial_cost,
            final_cost: self.final_cost,
            iterations,
            accepted_steps,
            termination,
        })
    }

    /// Scale the Hessian's diagonal by (1 + λ).
    fn compute_damped(&mut self, lambda: f64) {
        self.damped.copy_from(&self.hessian);
        for i in 0..self.config.num_model_param {
            self.damped[(i, i)] *= 1.0 + lambda;
        }
    }

    fn resize_stacked(&mut self, num_observations: usize) {
        let rows = num_observations * self.num_functions;
        if self.jacobian.nrows() != rows {
            self.jacobian = Mat::zeros(rows, self.config.num_model_param);
        }
        self.residuals.resize(rows, 0.0);
        self.predicted.resize(rows, 0.0);
    }
}

impl<R, D> LevenbergMarquardt<R, D> {
    /// The working model: the best parameters found by the last fit.
    pub fn model_parameters(&self) -> &[f64] {
        &self.working
    }

    /// Cost at the starting model of the last fit.
    pub fn initial_cost(&self) -> f64 {
        self.initial_cost
    }

    /// Cost the last fit finished with.
    pub fn final_cost(&self) -> f64 {
        self.final_cost
    }

    /// Residuals per observation.
    pub fn num_functions(&self) -> usize {
        self.num_functions
    }

    /// Current settings.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Damping used for the first step.
    pub fn initial_lambda(&self) -> f64 {
        self.config.initial_lambda
    }

    /// Change the damping used for the first step of subsequent fits.
    pub fn set_initial_lambda(&mut self, initial_lambda: f64) -> Result<(), FitError> {
        validate_lambda(initial_lambda)?;
        self.config.initial_lambda = initial_lambda;
        Ok(())
    }

    /// Iteration cap.
    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    /// Change the iteration cap for subsequent fits.
    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.config.max_iterations = max_iterations;
    }
}

impl<R> LevenbergMarquardt<R, NumericalJacobian<R>>
where
    R: ResidualFunction + Clone,
{
    /// Build an optimizer that estimates derivatives by finite differences.
    pub fn with_numerical_jacobian(config: Config, function: R) -> Result<Self, FitError> {
        let derivative = NumericalJacobian::new(function.clone());
        Self::new(config, function, derivative)
    }
}

#[mutants::skip]
fn log_termination(termination: Termination, iterations: usize, initial_cost: f64, final_cost: f64) {
    if termination == Termination::Stalled {
        warn!(
            iterations,
            cost = final_cost,
            "levenberg-marquardt accepted no steps"
        );
    } else {
        debug!(
            ?termination,
            iterations, initial_cost, final_cost, "levenberg-marquardt finished"
        );
    }
}
