use criterion::{criterion_group, criterion_main, Criterion};

use mcmix::callbacks::SinkCallback;
use mcmix::core::{DefaultMeasure, Settings, Solver};
use mcmix::variables::{Continuous, Variable};
use mcmix::{integrate, Configuration};

use rand_pcg::Pcg64;

fn benchmark_vegas() {
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
        &[vec![2]],
        1,
    )
    .unwrap();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap();
        let u = x.value(0);
        let v = x.value(1);
        out[0] = (-(u * u) - v * v).exp();
    };

    let settings = Settings {
        solver: Solver::Vegas,
        neval: 10_000,
        niter: 2,
        ..Settings::default()
    };

    let _ = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings,
        &SinkCallback {},
    )
    .unwrap();
}

fn criterion_vegas_benchmark(c: &mut Criterion) {
    c.bench_function("vegas gaussian 2d", |b| b.iter(benchmark_vegas));
}

criterion_group!(benches, criterion_vegas_benchmark);
criterion_main!(benches);
