use faer::{Accum, ColMut, ColRef, Mat, Par, linalg::matmul::matmul};

fn l2_norm(values: &[f64]) -> f64 {
    libm::sqrt(values.iter().map(|v| v * v).sum())
}

/// Has the cost become approximately linear, so that further nonlinear gains are unlikely?
///
/// Costs are sums of squares. `predicted` is scratch space for the residuals
/// extrapolated linearly by the step, `jacobian · correction + residuals`.
/// The stacked residuals themselves are left untouched, so a rejected step
/// followed by another F-test still extrapolates from the working model.
pub(super) fn f_test(
    jacobian: &Mat<f64>,
    residuals: &[f64],
    correction: &[f64],
    predicted: &mut [f64],
    prev_cost: f64,
    candidate_cost: f64,
    ftol: f64,
) -> bool {
    predicted.copy_from_slice(residuals);
    matmul(
        ColMut::from_slice_mut(&mut *predicted),
        Accum::Add,
        jacobian,
        ColRef::from_slice(correction),
        1.0,
        Par::Seq,
    );

    let prev_norm = libm::sqrt(prev_cost);
    let candidate_norm = libm::sqrt(candidate_cost);
    let predicted_norm = l2_norm(predicted);

    // Relative actual and predicted reductions.
    let actred = 1.0 - candidate_norm / prev_norm;
    let prered = 1.0 - predicted_norm / prev_norm;

    if prered > ftol {
        return false;
    }
    if actred.abs() > ftol {
        return false;
    }
    actred > 2.0 * prered
}

/// Has the damping grown so large relative to the parameters that the step is negligible?
pub(super) fn x_test(model: &[f64], lambda: f64, xtol: f64) -> bool {
    1.0 <= xtol * l2_norm(model) * lambda
}
