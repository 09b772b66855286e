//! Benchmarks for the Levenberg-Marquardt optimizer.
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use faer::Mat;
use lmfit::{Config, DerivativeProvider, LevenbergMarquardt, ResidualFunction};

/// y = a·x + b
#[derive(Clone, Default)]
struct Line {
    a: f64,
    b: f64,
}

impl ResidualFunction for Line {
    type Observed = (f64, f64);
    type State = ();

    fn num_functions(&self) -> usize {
        1
    }

    fn set_model(&mut self, model: &[f64]) {
        self.a = model[0];
        self.b = model[1];
    }

    fn compute_residuals(&self, point: Option<&(f64, f64)>, _: Option<&()>, out: &mut [f64]) -> bool {
        let Some(&(x, y)) = point else { return false };
        out[0] = self.a * x + self.b - y;
        true
    }
}

impl DerivativeProvider<(f64, f64), ()> for Line {
    fn set_model(&mut self, _model: &[f64]) {}

    fn compute_derivative(&mut self, point: Option<&(f64, f64)>, _: Option<&()>, gradient: &mut Mat<f64>) {
        let Some(&(x, _)) = point else { return };
        gradient[(0, 0)] = x;
        gradient[(0, 1)] = 1.0;
    }
}

/// y = a·exp(b·x), y observed, x as the state.
#[derive(Clone, Default)]
struct Exponential {
    a: f64,
    b: f64,
}

impl ResidualFunction for Exponential {
    type Observed = f64;
    type State = f64;

    fn num_functions(&self) -> usize {
        1
    }

    fn set_model(&mut self, model: &[f64]) {
        self.a = model[0];
        self.b = model[1];
    }

    fn compute_residuals(&self, y: Option<&f64>, x: Option<&f64>, out: &mut [f64]) -> bool {
        let (Some(y), Some(x)) = (y, x) else { return false };
        out[0] = self.a * libm::exp(self.b * x) - y;
        out[0].is_finite()
    }
}

fn line_points(n: usize) -> Vec<(f64, f64)> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            // Deterministic wobble so the fit isn't exact.
            let wobble = if i % 2 == 0 { 0.1 } else { -0.1 };
            (x, 2.0 * x + 1.0 + wobble)
        })
        .collect()
}

fn fit_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_line");
    for size in [10, 100, 1000] {
        let points = line_points(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &points, |b, points| {
            let mut lm = LevenbergMarquardt::new(Config::new(2), Line::default(), Line::default())
                .unwrap();
            b.iter(|| {
                let _actual = black_box(lm.process(&[0.0, 0.0], Some(&points[..]), None).unwrap());
            });
        });
    }
    group.finish();
}

fn fit_exponential_numerically(c: &mut Criterion) {
    let xs: Vec<f64> = (0..50u8).map(|i| f64::from(i) * 0.04).collect();
    let ys: Vec<f64> = xs.iter().map(|x| 2.0 * libm::exp(0.5 * x)).collect();
    c.bench_function("fit_exponential_numerically", |b| {
        let mut lm =
            LevenbergMarquardt::with_numerical_jacobian(Config::new(2), Exponential::default())
                .unwrap();
        b.iter(|| {
            let _actual = black_box(
                lm.process(&[1.0, 0.0], Some(&ys[..]), Some(&xs[..]))
                    .unwrap(),
            );
        });
    });
}

criterion_group!(benches, fit_line, fit_exponential_numerically);
criterion_main!(benches);
