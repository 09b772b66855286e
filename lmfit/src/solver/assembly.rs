use crate::{DerivativeProvider, FitError, ResidualFunction};

use super::LevenbergMarquardt;

/// Parallel observations and states, at least one of them present.
pub(super) struct Observations<'a, O, S> {
    observed: Option<&'a [O]>,
    states: Option<&'a [S]>,
    len: usize,
}

impl<'a, O, S> Observations<'a, O, S> {
    pub(super) fn new(observed: Option<&'a [O]>, states: Option<&'a [S]>) -> Result<Self, FitError> {
        let len = match (observed, states) {
            (None, None) => return Err(FitError::NoObservations),
            (Some(o), Some(s)) if o.len() != s.len() => {
                return Err(FitError::MismatchedObservations {
                    observed: o.len(),
                    states: s.len(),
                });
            }
            (Some(o), _) => o.len(),
            (None, Some(s)) => s.len(),
        };
        Ok(Self {
            observed,
            states,
            len,
        })
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    pub(super) fn get(&self, i: usize) -> (Option<&'a O>, Option<&'a S>) {
        (
            self.observed.map(|o| &o[i]),
            self.states.map(|s| &s[i]),
        )
    }
}

/// Sum of squared residuals over every observation, or +∞ if the residual
/// function rejects the model for any of them.
pub(super) fn cost<R: ResidualFunction>(
    function: &mut R,
    model: &[f64],
    data: &Observations<'_, R::Observed, R::State>,
    block: &mut [f64],
) -> f64 {
    function.set_model(model);
    let mut total = 0.0;
    for i in 0..data.len() {
        let (observed, state) = data.get(i);
        if !function.compute_residuals(observed, state, block) {
            return f64::INFINITY;
        }
        total += block.iter().map(|r| r * r).sum::<f64>();
    }
    total
}

impl<R, D> LevenbergMarquardt<R, D>
where
    R: ResidualFunction,
    D: DerivativeProvider<R::Observed, R::State>,
{
    /// Recompute the Hessian approximation, the descent direction, and the
    /// stacked Jacobian and residuals, all at the working model.
    pub(super) fn compute_matrices(&mut self, data: &Observations<'_, R::Observed, R::State>) {
        self.hessian.fill(0.0);
        self.descent.fill(0.0);
        self.function.set_model(&self.working);
        self.derivative.set_model(&self.working);

        let p = self.config.num_model_param;
        let mut row = 0;
        for i in 0..data.len() {
            let (observed, state) = data.get(i);
            let valid = self
                .function
                .compute_residuals(observed, state, &mut self.residual_block);
            debug_assert!(valid, "the working model always has valid residuals");

            self.gradient.fill(0.0);
            self.derivative
                .compute_derivative(observed, state, &mut self.gradient);

            for f in 0..self.num_functions {
                let r = self.residual_block[f];
                for a in 0..p {
                    let ga = self.gradient[(f, a)];
                    for b in 0..p {
                        self.hessian[(a, b)] += ga * self.gradient[(f, b)];
                    }
                    self.descent[a] -= r * ga;
                    self.jacobian[(row, a)] = ga;
                }
                self.residuals[row] = r;
                row += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, tests::LineFit};

    #[test]
    fn observations_need_a_source() {
        assert!(matches!(
            Observations::<(), ()>::new(None, None),
            Err(FitError::NoObservations)
        ));
        assert!(matches!(
            Observations::<u8, u8>::new(Some(&[1, 2][..]), Some(&[1][..])),
            Err(FitError::MismatchedObservations {
                observed: 2,
                states: 1
            })
        ));
        let states = [1u8, 2, 3];
        let data = Observations::<(), u8>::new(None, Some(&states[..])).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.get(1), (None, Some(&2)));
    }

    #[test]
    fn cost_is_sum_of_squares() {
        let points = [(0.0, 1.0), (1.0, 3.0), (2.0, 6.0)];
        let data = Observations::<(f64, f64), ()>::new(Some(&points[..]), None).unwrap();
        let mut line = LineFit::default();
        let mut block = [0.0];
        // Residuals at a = 2, b = 1 are 0, 0, 1.
        let c = cost(&mut line, &[2.0, 1.0], &data, &mut block);
        assert!((c - 1.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_model_costs_infinity() {
        let points = [(0.0, 1.0)];
        let data = Observations::<(f64, f64), ()>::new(Some(&points[..]), None).unwrap();
        let mut line = LineFit {
            max_slope: Some(1.0),
            ..LineFit::default()
        };
        let mut block = [0.0];
        assert!(cost(&mut line, &[2.0, 1.0], &data, &mut block).is_infinite());
    }

    #[test]
    fn assembles_normal_equations() {
        // r = a·x + b − y, so each Jacobian row is [x, 1].
        let points = [(1.0, 2.0), (2.0, 2.0)];
        let data = Observations::<(f64, f64), ()>::new(Some(&points[..]), None).unwrap();
        let mut lm = LevenbergMarquardt::new(Config::new(2), LineFit::default(), LineFit::default())
            .unwrap();
        lm.working.copy_from_slice(&[1.0, 0.0]);
        lm.resize_stacked(data.len());
        lm.compute_matrices(&data);

        // Residuals are -1 and 0.
        assert_eq!(lm.residuals, vec![-1.0, 0.0]);
        let expected_h: [[f64; 2]; 2] = [[5.0, 3.0], [3.0, 2.0]];
        for (a, row) in expected_h.iter().enumerate() {
            for (b, want) in row.iter().enumerate() {
                assert_eq!(lm.hessian[(a, b)].to_bits(), want.to_bits());
            }
        }
        // −Σ r·J = [1, 1]
        assert_eq!(lm.descent, vec![1.0, 1.0]);
        assert_eq!(lm.jacobian[(0, 0)].to_bits(), 1.0f64.to_bits());
        assert_eq!(lm.jacobian[(1, 0)].to_bits(), 2.0f64.to_bits());
        assert_eq!(lm.jacobian[(1, 1)].to_bits(), 1.0f64.to_bits());
    }
}
