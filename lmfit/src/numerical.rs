use faer::Mat;

use crate::{DerivativeProvider, ResidualFunction};

/// Approximates the Jacobian of a [`ResidualFunction`] by forward differences.
///
/// Each parameter is perturbed in turn by `√ε·|x|` (or `√ε` when it's zero),
/// which balances truncation error against rounding error for double
/// precision. If the perturbed model is invalid, a backward difference is
/// tried instead, and if that fails too the column is left at zero.
#[derive(Debug, Clone)]
pub struct NumericalJacobian<R> {
    function: R,
    difference_scale: f64,
    model: Vec<f64>,
    perturbed: Vec<f64>,
    base: Vec<f64>,
    shifted: Vec<f64>,
}

impl<R: ResidualFunction> NumericalJacobian<R> {
    /// Differentiate this residual function.
    /// The function is owned, so it can be moved to perturbed models without
    /// disturbing the optimizer's own copy.
    pub fn new(function: R) -> Self {
        let num_functions = function.num_functions();
        Self {
            function,
            difference_scale: libm::sqrt(f64::EPSILON),
            model: Vec::new(),
            perturbed: Vec::new(),
            base: vec![0.0; num_functions],
            shifted: vec![0.0; num_functions],
        }
    }

    /// The function being differentiated.
    pub fn function(&self) -> &R {
        &self.function
    }

    fn evaluate_at_perturbed(
        &mut self,
        observed: Option<&R::Observed>,
        state: Option<&R::State>,
    ) -> bool {
        self.function.set_model(&self.perturbed);
        self.function
            .compute_residuals(observed, state, &mut self.shifted)
    }
}

impl<R: ResidualFunction> DerivativeProvider<R::Observed, R::State> for NumericalJacobian<R> {
    fn set_model(&mut self, model: &[f64]) {
        self.model.clear();
        self.model.extend_from_slice(model);
        self.perturbed.clear();
        self.perturbed.extend_from_slice(model);
    }

    fn compute_derivative(
        &mut self,
        observed: Option<&R::Observed>,
        state: Option<&R::State>,
        gradient: &mut Mat<f64>,
    ) {
        self.function.set_model(&self.model);
        if !self
            .function
            .compute_residuals(observed, state, &mut self.base)
        {
            gradient.fill(0.0);
            return;
        }

        for param in 0..self.model.len() {
            let x = self.model[param];
            let h = if x == 0.0 {
                self.difference_scale
            } else {
                self.difference_scale * x.abs()
            };

            // Round the step so that x + h is exactly representable.
            let forward = x + h;
            let h = forward - x;
            self.perturbed[param] = forward;
            if self.evaluate_at_perturbed(observed, state) {
                for (f, (&shifted, &base)) in self.shifted.iter().zip(&self.base).enumerate() {
                    gradient[(f, param)] = (shifted - base) / h;
                }
            } else {
                let backward = x - h;
                let h = x - backward;
                self.perturbed[param] = backward;
                let valid = self.evaluate_at_perturbed(observed, state);
                for (f, (&shifted, &base)) in self.shifted.iter().zip(&self.base).enumerate() {
                    gradient[(f, param)] = if valid { (base - shifted) / h } else { 0.0 };
                }
            }
            self.perturbed[param] = x;
        }

        self.function.set_model(&self.model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// r = [a·x² + b − y, a·b·x]
    #[derive(Clone, Default)]
    struct Quadratic {
        a: f64,
        b: f64,
    }

    impl ResidualFunction for Quadratic {
        type Observed = f64;
        type State = f64;

        fn num_functions(&self) -> usize {
            2
        }

        fn set_model(&mut self, model: &[f64]) {
            self.a = model[0];
            self.b = model[1];
        }

        fn compute_residuals(&self, y: Option<&f64>, x: Option<&f64>, out: &mut [f64]) -> bool {
            let (x, y) = (*x.unwrap(), *y.unwrap());
            out[0] = self.a * x * x + self.b - y;
            out[1] = self.a * self.b * x;
            true
        }
    }

    #[test]
    fn matches_analytic_derivative() {
        let mut jacobian = NumericalJacobian::new(Quadratic::default());
        let mut gradient = Mat::zeros(2, 2);
        let (a, b, x, y) = (1.5, -0.25, 3.0, 2.0);
        jacobian.set_model(&[a, b]);
        jacobian.compute_derivative(Some(&y), Some(&x), &mut gradient);

        let expected = [[x * x, 1.0], [b * x, a * x]];
        for (f, row) in expected.iter().enumerate() {
            for (p, want) in row.iter().enumerate() {
                let got = gradient[(f, p)];
                assert!((got - want).abs() < 1e-6, "d r{f}/d p{p}: got {got}, want {want}");
            }
        }
    }

    #[test]
    fn zero_parameter_uses_absolute_step() {
        let mut jacobian = NumericalJacobian::new(Quadratic::default());
        let mut gradient = Mat::zeros(2, 2);
        jacobian.set_model(&[0.0, 0.0]);
        jacobian.compute_derivative(Some(&1.0), Some(&2.0), &mut gradient);
        assert!((gradient[(0, 0)] - 4.0).abs() < 1e-6);
        assert!((gradient[(0, 1)] - 1.0).abs() < 1e-6);
        assert!(gradient[(1, 0)].abs() < 1e-6);
        assert!(gradient[(1, 1)].abs() < 1e-6);
    }

    /// Only valid for p ≤ 1, so forward steps from exactly 1 are rejected.
    #[derive(Clone)]
    struct Bounded {
        p: f64,
    }

    impl ResidualFunction for Bounded {
        type Observed = ();
        type State = ();

        fn num_functions(&self) -> usize {
            1
        }

        fn set_model(&mut self, model: &[f64]) {
            self.p = model[0];
        }

        fn compute_residuals(&self, _: Option<&()>, _: Option<&()>, out: &mut [f64]) -> bool {
            out[0] = 3.0 * self.p;
            self.p <= 1.0
        }
    }

    #[test]
    fn falls_back_to_backward_difference() {
        let mut jacobian = NumericalJacobian::new(Bounded { p: 0.0 });
        let mut gradient = Mat::zeros(1, 1);
        jacobian.set_model(&[1.0]);
        jacobian.compute_derivative(None, Some(&()), &mut gradient);
        assert!((gradient[(0, 0)] - 3.0).abs() < 1e-6);
        // The owned function is left at the unperturbed model.
        assert_eq!(jacobian.function().p.to_bits(), 1.0f64.to_bits());
    }

    #[test]
    fn invalid_model_gives_zero_gradient() {
        let mut jacobian = NumericalJacobian::new(Bounded { p: 0.0 });
        let mut gradient = Mat::zeros(1, 1);
        gradient[(0, 0)] = 7.0;
        jacobian.set_model(&[2.0]);
        jacobian.compute_derivative(None, Some(&()), &mut gradient);
        assert_eq!(gradient[(0, 0)].to_bits(), 0.0f64.to_bits());
    }
}
