/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum Termination {
    /// The cost was behaving linearly and further reductions were negligible.
    FTest,
    /// The damping grew so large relative to the parameters that the step was negligible.
    XTest,
    /// The model fits the observations exactly.
    ZeroCost,
    /// Ran out of iterations after making some progress.
    MaxIterations,
    /// Ran out of iterations without accepting a single step.
    Stalled,
}

impl Termination {
    /// Did a stopping rule fire, rather than the iteration cap?
    pub fn is_converged(self) -> bool {
        matches!(self, Self::FTest | Self::XTest | Self::ZeroCost)
    }
}

/// What happened to the step tried in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// The candidate lowered the cost and became the working model.
    Accepted,
    /// The candidate didn't lower the cost (or was invalid) and was discarded.
    Rejected,
    /// The damped system couldn't be solved, so no candidate was tried.
    SolveFailed,
}

/// Progress report passed to the iteration observer.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStats {
    /// Zero-based iteration number.
    pub iteration: usize,
    /// The damping after this iteration's update.
    pub lambda: f64,
    /// Cost the candidate was compared against.
    pub reference_cost: f64,
    /// Cost of this iteration's candidate, if one was evaluated.
    /// Infinite when the residual function rejected the candidate.
    pub candidate_cost: Option<f64>,
    /// What happened to the step.
    pub step: StepKind,
}

/// Returned by the iteration observer to keep going or stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep iterating.
    Continue,
    /// Stop now, returning [`FitError::Cancelled`](crate::FitError::Cancelled).
    Cancel,
}

/// Data from a completed fit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub struct FitOutcome {
    pub(crate) parameters: Vec<f64>,
    pub(crate) initial_cost: f64,
    pub(crate) final_cost: f64,
    pub(crate) iterations: usize,
    pub(crate) accepted_steps: usize,
    pub(crate) termination: Termination,
}

impl FitOutcome {
    /// The fitted model parameters.
    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Sum of squared residuals at the starting model.
    pub fn initial_cost(&self) -> f64 {
        self.initial_cost
    }

    /// Sum of squared residuals the run finished with.
    ///
    /// This is the reference cost at exit, which only moves on accepted steps.
    /// If a stopping rule fires in the same iteration that accepts a step,
    /// it is the cost from before that step.
    pub fn final_cost(&self) -> f64 {
        self.final_cost
    }

    /// How many iterations ran, including ones where the solve failed.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// How many candidate steps were accepted.
    pub fn accepted_steps(&self) -> usize {
        self.accepted_steps
    }

    /// Why the run stopped.
    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Did a stopping rule fire, rather than the iteration cap?
    pub fn is_converged(&self) -> bool {
        self.termination.is_converged()
    }

    /// Did the run end without accepting any step?
    pub fn is_stalled(&self) -> bool {
        self.termination == Termination::Stalled
    }
}
