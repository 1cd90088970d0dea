use mcmix::callbacks::SinkCallback;
use mcmix::core::{DefaultMeasure, Settings, Snapshot, Solver};
use mcmix::variables::{Composite, Continuous, Discrete, FermiK, Variable};
use mcmix::{integrate, Configuration};

use rand_pcg::Pcg64;
use std::f64::consts::PI;

fn settings(solver: Solver, neval: u64, niter: usize, ignore: usize) -> Settings {
    Settings {
        solver,
        neval,
        niter,
        ignore,
        ..Settings::default()
    }
}

/// The deviation allowed between an estimate and its target: a few reported
/// standard errors, with an absolute floor against an optimistic error
/// estimate.
fn tolerance(std: f64, floor: f64) -> f64 {
    (5.0 * std).max(floor)
}

#[test]
fn vegasmc_integrates_a_singular_integrand() {
    // int_0^1 log(x)/sqrt(x) dx = -4
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
        &[vec![1]],
        1234,
    )
    .unwrap();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap().value(0);
        out[0] = x.ln() / x.sqrt();
    };

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::VegasMc, 100_000, 10, 3),
        &SinkCallback {},
    )
    .unwrap();

    let mean = result.mean(0);
    let std = result.std(0);
    assert!(
        (mean + 4.0).abs() < tolerance(std, 0.03),
        "mean = {mean} +- {std}"
    );

    // the mixture reweights must remain a probability vector
    let reweight = result
        .checkpoints()
        .last()
        .unwrap()
        .configuration()
        .reweight();
    let sum: f64 = reweight.iter().sum();
    assert!((sum - 1.0).abs() < 1e-12);
    assert!(reweight.iter().all(|w| *w >= 1e-10));
}

#[test]
fn vegas_integrates_a_four_dimensional_gaussian() {
    // int exp(-100 sum (x_i - 1/2)^2) * 1013.2118364296 d^4x = 1
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
        &[vec![4]],
        42,
    )
    .unwrap();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap();
        let mut exponent = 0.0;
        for i in 0..4 {
            let d = x.value(i) - 0.5;
            exponent += d * d;
        }
        out[0] = (-100.0 * exponent).exp() * 1013.211_836_429_6;
    };

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::Vegas, 100_000, 10, 3),
        &SinkCallback {},
    )
    .unwrap();

    let mean = result.mean(0);
    let std = result.std(0);
    assert!(
        (mean - 1.0).abs() < tolerance(std, 0.02),
        "mean = {mean} +- {std}"
    );
    // the iterations must be statistically consistent
    assert!(result.chi2(0) < 5.0, "chi2/dof = {}", result.chi2(0));
}

#[test]
fn vegas_estimates_three_correlated_integrands_at_once() {
    // {f, f x_1, f x_1^2} with f = exp(-200 sum (x_i - 1/2)^2) * 1000 in 4-D
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
        &[vec![4], vec![4], vec![4]],
        2718,
    )
    .unwrap();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap();
        let mut exponent = 0.0;
        for i in 0..4 {
            let d = x.value(i) - 0.5;
            exponent += d * d;
        }
        let f = (-200.0 * exponent).exp() * 1000.0;
        out[0] = f;
        out[1] = f * x.value(0);
        out[2] = f * x.value(0) * x.value(0);
    };

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::Vegas, 10_000, 10, 3),
        &SinkCallback {},
    )
    .unwrap();

    let targets = [0.246_740_1, 0.123_370_1, 0.062_302_0];
    for (k, target) in targets.iter().enumerate() {
        let mean = result.mean(k);
        let std = result.std(k);
        assert!(
            (mean - target).abs() < tolerance(std, 0.01),
            "integrand {k}: mean = {mean} +- {std}, target = {target}"
        );
    }
}

#[test]
fn a_discrete_sum_of_ones_is_exact() {
    // sum_{n=1}^{8} 1 = 8
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Discrete(
            Discrete::new(1, 8).unwrap().with_adapt(false),
        )],
        &[vec![1]],
        7,
    )
    .unwrap();

    let integrand = |_vars: &[Variable<f64>], out: &mut [f64]| out[0] = 1.0;

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::Vegas, 1000, 3, 0),
        &SinkCallback {},
    )
    .unwrap();

    assert!(
        (result.mean(0) - 8.0).abs() < 1e-9,
        "mean = {}",
        result.mean(0)
    );
}

#[test]
fn a_momentum_shell_volume_is_recovered() {
    // int_shell d^3k / (2 pi)^3 with |k| in [0.5, 1.5)
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::FermiK(FermiK::new(3, 1.0, 0.5, 10.0).unwrap())],
        &[vec![1]],
        99,
    )
    .unwrap();

    let integrand =
        |_vars: &[Variable<f64>], out: &mut [f64]| out[0] = 1.0 / (2.0 * PI).powi(3);

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::Vegas, 100_000, 10, 0),
        &SinkCallback {},
    )
    .unwrap();

    let target = (4.0 * PI / 3.0) * (1.5f64.powi(3) - 0.5f64.powi(3)) / (2.0 * PI).powi(3);
    let mean = result.mean(0);
    let std = result.std(0);
    assert!(
        (mean - target).abs() < tolerance(std, 0.003),
        "mean = {mean} +- {std}, target = {target}"
    );
}

#[test]
fn mcmc_estimates_two_moments_of_the_unit_interval() {
    // int_0^1 x dx = 1/2 and int_0^1 x^2 dx = 1/3
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
        &[vec![1], vec![1]],
        4321,
    )
    .unwrap();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap().value(0);
        out[0] = x;
        out[1] = x * x;
    };

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::Mcmc, 200_000, 10, 2),
        &SinkCallback {},
    )
    .unwrap();

    for (k, target) in [0.5, 1.0 / 3.0].iter().enumerate() {
        let mean = result.mean(k);
        let std = result.std(k);
        assert!(
            (mean - target).abs() < tolerance(std, 0.03),
            "integrand {k}: mean = {mean} +- {std}, target = {target}"
        );
    }
}

#[test]
fn a_composite_pool_sums_over_its_discrete_member() {
    // sum_{n=1}^{2} int_0^1 x^n dx = 1/2 + 1/3 = 5/6
    let composite = Composite::new(vec![
        Variable::Continuous(Continuous::new(0.0, 1.0).unwrap()),
        Variable::Discrete(Discrete::new(1, 2).unwrap().with_adapt(false)),
    ])
    .unwrap();
    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Composite(composite)],
        &[vec![1]],
        13,
    )
    .unwrap();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let pair = vars[0].as_composite().unwrap();
        let x = pair.children()[0].as_continuous().unwrap().value(0);
        let n = pair.children()[1].as_discrete().unwrap().value(0);
        out[0] = x.powi(n as i32);
    };

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        config,
        &settings(Solver::Vegas, 50_000, 10, 2),
        &SinkCallback {},
    )
    .unwrap();

    let mean = result.mean(0);
    let std = result.std(0);
    assert!(
        (mean - 5.0 / 6.0).abs() < tolerance(std, 0.02),
        "mean = {mean} +- {std}"
    );
}

#[test]
fn results_do_not_depend_on_the_worker_count() {
    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap();
        out[0] = (x.value(0) * x.value(1)).sqrt();
    };

    let run = |workers: usize| {
        let config: Configuration<f64, Pcg64> = Configuration::new(
            vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
            &[vec![2]],
            555,
        )
        .unwrap();
        let settings = Settings {
            solver: Solver::Vegas,
            neval: 20_000,
            niter: 3,
            workers,
            ..Settings::default()
        };
        integrate(&integrand, &DefaultMeasure, config, &settings, &SinkCallback {}).unwrap()
    };

    let single = run(1);
    let parallel = run(4);

    for (a, b) in single.checkpoints().iter().zip(parallel.checkpoints()) {
        for (ea, eb) in a.estimators().iter().zip(b.estimators()) {
            use mcmix::core::estimators::BasicEstimators;
            assert_eq!(ea.mean(), eb.mean());
            assert_eq!(ea.var(), eb.var());
        }
    }
}

#[test]
fn snapshots_restart_an_integration() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();

    let integrand = |vars: &[Variable<f64>], out: &mut [f64]| {
        let x = vars[0].as_continuous().unwrap().value(0);
        out[0] = 1.5 * x.sqrt();
    };

    let config: Configuration<f64, Pcg64> = Configuration::new(
        vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
        &[vec![1]],
        31,
    )
    .unwrap();

    let mut first = settings(Solver::Vegas, 10_000, 3, 0);
    first.save = Some(Snapshot {
        path: path.clone(),
        every: 1,
    });
    let _ = integrate(&integrand, &DefaultMeasure, config, &first, &SinkCallback {}).unwrap();

    // resume from the persisted state, trained maps included
    let json = std::fs::read_to_string(&path).unwrap();
    let restored: Configuration<f64, Pcg64> = serde_json::from_str(&json).unwrap();

    let result = integrate(
        &integrand,
        &DefaultMeasure,
        restored,
        &settings(Solver::Vegas, 10_000, 2, 0),
        &SinkCallback {},
    )
    .unwrap();

    let mean = result.mean(0);
    let std = result.std(0);
    assert!(
        (mean - 1.0).abs() < tolerance(std, 0.02),
        "mean = {mean} +- {std}"
    );
}
