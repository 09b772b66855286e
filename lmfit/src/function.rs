use faer::Mat;

/// Computes the residuals of one observation given the current model.
///
/// The model is pushed in with [`ResidualFunction::set_model`] before any
/// residuals are requested, so implementations can precompute whatever
/// depends only on the parameters.
pub trait ResidualFunction {
    /// What was measured for one observation. Use `()` if unused.
    type Observed;
    /// The known system state for one observation. Use `()` if unused.
    type State;

    /// How many residuals each observation produces.
    /// Queried once, when the optimizer is built.
    fn num_functions(&self) -> usize;

    /// Use these parameters for subsequent residual evaluations.
    fn set_model(&mut self, model: &[f64]);

    /// Write `num_functions()` residuals into `out`.
    /// Returns false if the current model is invalid for this observation,
    /// in which case the contents of `out` are ignored.
    fn compute_residuals(
        &self,
        observed: Option<&Self::Observed>,
        state: Option<&Self::State>,
        out: &mut [f64],
    ) -> bool;
}

/// Computes partial derivatives of each residual with respect to each model parameter.
pub trait DerivativeProvider<Observed, State> {
    /// Use these parameters for subsequent derivative evaluations.
    fn set_model(&mut self, model: &[f64]);

    /// Fill `gradient`, an F×P matrix, so that row `f` holds the gradient
    /// of residual `f` with respect to all P parameters.
    /// The matrix is zeroed before each call.
    fn compute_derivative(
        &mut self,
        observed: Option<&Observed>,
        state: Option<&State>,
        gradient: &mut Mat<f64>,
    );
}

/// Lets callers lend a residual function to the optimizer instead of moving it in.
impl<R: ResidualFunction + ?Sized> ResidualFunction for &mut R {
    type Observed = R::Observed;
    type State = R::State;

    fn num_functions(&self) -> usize {
        (**self).num_functions()
    }

    fn set_model(&mut self, model: &[f64]) {
        (**self).set_model(model);
    }

    fn compute_residuals(
        &self,
        observed: Option<&Self::Observed>,
        state: Option<&Self::State>,
        out: &mut [f64],
    ) -> bool {
        (**self).compute_residuals(observed, state, out)
    }
}

impl<O, S, D: DerivativeProvider<O, S> + ?Sized> DerivativeProvider<O, S> for &mut D {
    fn set_model(&mut self, model: &[f64]) {
        (**self).set_model(model);
    }

    fn compute_derivative(
        &mut self,
        observed: Option<&O>,
        state: Option<&S>,
        gradient: &mut Mat<f64>,
    ) {
        (**self).compute_derivative(observed, state, gradient);
    }
}
