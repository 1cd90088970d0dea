//! Core traits and types shared by every integrator.

pub mod estimators;

use crate::configuration::Configuration;
use crate::core::estimators::{MeanVar, WeightedAverage};
use crate::variables::Variable;
use num_traits::float::FloatConst;
use num_traits::{Float, FromPrimitive, ToPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};
use std::path::PathBuf;
use std::time::Duration;

/// Numeric bound shared by every sampler in this crate.
///
/// Implemented for `f32`, `f64`, and any custom floating-point type that
/// provides the `num-traits` interfaces along with serde support.
pub trait McFloat:
    Float
    + FloatConst
    + FromPrimitive
    + ToPrimitive
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Display
    + Debug
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
}

impl<F> McFloat for F where
    F: Float
        + FloatConst
        + FromPrimitive
        + ToPrimitive
        + AddAssign
        + SubAssign
        + MulAssign
        + DivAssign
        + Display
        + Debug
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static
{
}

/// Trait which every integrand must implement.
///
/// A single call evaluates *all* integrands of the problem on the shared
/// sample held by the variable pools, writing one weight per integrand into
/// `out`. The call must be deterministic in the pool values and must not
/// retain references to the pool slots.
///
/// The trait is implemented for plain closures of the matching signature, so
/// an integrand can be passed as
/// `|vars: &[Variable<f64>], out: &mut [f64]| { ... }`.
pub trait Integrand<T: Copy>: Send + Sync {
    /// Evaluates every integrand on the current sample.
    fn call(&self, vars: &[Variable<T>], out: &mut [T]);
}

impl<T, F> Integrand<T> for F
where
    T: Copy,
    F: Fn(&[Variable<T>], &mut [T]) + Send + Sync,
{
    fn call(&self, vars: &[Variable<T>], out: &mut [T]) {
        self(vars, out);
    }
}

/// User-supplied measurement folding relative weights into the observable
/// accumulator.
///
/// `relative` holds, for every integrand, the weight of the current sample
/// divided by the sampling probability; the measurement must add its
/// contribution to `obs` and leave the pools untouched. Measurements are
/// called from a single thread per block.
pub trait Measure<T: Copy>: Send + Sync {
    /// Folds the relative weights of one sample into `obs`.
    fn measure(&self, vars: &[Variable<T>], obs: &mut [T], relative: &[T]);
}

/// The default measurement: accumulate the relative weight of every
/// integrand.
pub struct DefaultMeasure;

impl<T: McFloat> Measure<T> for DefaultMeasure {
    fn measure(&self, _vars: &[Variable<T>], obs: &mut [T], relative: &[T]) {
        for (o, r) in obs.iter_mut().zip(relative) {
            *o += *r;
        }
    }
}

/// The sampling engine driving the integration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Solver {
    /// Independent importance sampling through the product of the learned
    /// maps.
    Vegas,
    /// A single Markov chain over the reweighted integrand mixture that
    /// observes every integrand each step.
    VegasMc,
    /// A Markov chain over the joint state of current integrand and sample,
    /// observing only the current integrand.
    Mcmc,
}

/// Periodic snapshot of the configuration written during a run.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// File the JSON snapshot is written to.
    pub path: PathBuf,
    /// Snapshot period in iterations.
    pub every: usize,
}

/// Options of the iteration controller.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The sampling engine.
    pub solver: Solver,
    /// Integrand evaluations per iteration, distributed over the blocks.
    pub neval: u64,
    /// Number of iterations; the maps retrain after each one.
    pub niter: usize,
    /// Number of blocks, rounded up to a multiple of `workers`.
    pub block: usize,
    /// Number of worker threads.
    pub workers: usize,
    /// Markov-chain engines measure every this many steps.
    pub measurefreq: u64,
    /// Leading iterations excluded from the combined result.
    pub ignore: usize,
    /// Exponent of the reweighting rescale factor.
    pub reweight_alpha: f64,
    /// Apply the `(1 - r) / ln(1/r)` remap to the visit ratio instead of the
    /// plain `avg / visited` rescale.
    pub reweight_remap: bool,
    /// Total evaluations after which reweight retuning begins.
    pub reweight_after: u64,
    /// Minimum time between progress reports from the inner loop; reports are
    /// emitted through `log` and polled every 1000 steps.
    pub print_interval: Option<Duration>,
    /// Periodic configuration snapshot.
    pub save: Option<Snapshot>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            solver: Solver::Vegas,
            neval: 10_000,
            niter: 10,
            block: 16,
            workers: 1,
            measurefreq: 2,
            ignore: 0,
            reweight_alpha: 1.0,
            reweight_remap: false,
            reweight_after: 0,
            print_interval: None,
            save: None,
        }
    }
}

/// A checkpoint saves the per-integrand estimators of one iteration together
/// with the configuration state that produced them. Checkpoints can be used
/// to inspect the learned maps or to resume a run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Checkpoint<T, R> {
    estimators: Vec<MeanVar<T>>,
    config: Configuration<T, R>,
}

impl<T, R> Checkpoint<T, R> {
    pub(crate) fn new(estimators: Vec<MeanVar<T>>, config: Configuration<T, R>) -> Self {
        Self { estimators, config }
    }

    /// Per-integrand block-level mean and variance of this iteration.
    pub fn estimators(&self) -> &[MeanVar<T>] {
        &self.estimators
    }

    /// The configuration after this iteration, trained maps included.
    pub const fn configuration(&self) -> &Configuration<T, R> {
        &self.config
    }
}

/// The outcome of an integration: the full iteration history plus the warm-up
/// policy applied when the iterations are combined.
///
/// All iterations are stored; `ignore` only affects the combination, so the
/// warm-up can be re-examined after the run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IntegrationResult<T, R> {
    checkpoints: Vec<Checkpoint<T, R>>,
    ignore: usize,
}

impl<T: McFloat, R> IntegrationResult<T, R> {
    pub(crate) fn new(checkpoints: Vec<Checkpoint<T, R>>, ignore: usize) -> Self {
        Self { checkpoints, ignore }
    }

    /// The per-iteration checkpoints, warm-up iterations included.
    pub fn checkpoints(&self) -> &[Checkpoint<T, R>] {
        &self.checkpoints
    }

    /// Number of leading iterations excluded from the combination.
    pub const fn ignore(&self) -> usize {
        self.ignore
    }

    /// Number of integrands estimated by the run.
    pub fn integrands(&self) -> usize {
        self.checkpoints.first().map_or(0, |c| c.estimators().len())
    }

    fn combined(&self, integrand: usize) -> WeightedAverage<T> {
        let start = self.ignore.min(self.checkpoints.len());
        let history: Vec<_> = self.checkpoints[start..]
            .iter()
            .map(|c| c.estimators()[integrand])
            .collect();
        WeightedAverage::from_history(&history)
    }

    /// Inverse-variance weighted mean of `integrand` over the combined
    /// iterations.
    pub fn mean(&self, integrand: usize) -> T {
        use crate::core::estimators::BasicEstimators;
        self.combined(integrand).mean()
    }

    /// Standard deviation of the combined mean of `integrand`.
    pub fn std(&self, integrand: usize) -> T {
        use crate::core::estimators::BasicEstimators;
        self.combined(integrand).std()
    }

    /// Reduced chi-square of `integrand` over the combined iterations.
    pub fn chi2(&self, integrand: usize) -> T {
        self.combined(integrand).chi2()
    }

    /// Human-readable `mean(std)` representation of `integrand`.
    pub fn format_uncertainty(&self, integrand: usize) -> String {
        estimators::format_uncertainty(
            self.mean(integrand).to_f64().unwrap_or(f64::NAN),
            self.std(integrand).to_f64().unwrap_or(f64::NAN),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::estimators::MeanVar;
    use rand_pcg::Pcg64;

    fn result_with_history(
        history: Vec<Vec<MeanVar<f64>>>,
        ignore: usize,
    ) -> IntegrationResult<f64, Pcg64> {
        let config = crate::configuration::Configuration::<f64, Pcg64>::new(
            vec![crate::variables::Variable::Continuous(
                crate::variables::Continuous::new(0.0, 1.0).unwrap(),
            )],
            &[vec![1]],
            42,
        )
        .unwrap();

        IntegrationResult::new(
            history
                .into_iter()
                .map(|estimators| Checkpoint::new(estimators, config.clone()))
                .collect(),
            ignore,
        )
    }

    #[test]
    fn ignore_drops_the_warm_up_iterations() {
        let full = result_with_history(
            vec![
                vec![MeanVar::new(10.0, 0.01)],
                vec![MeanVar::new(1.0, 0.01)],
                vec![MeanVar::new(1.2, 0.01)],
            ],
            1,
        );
        let tail = result_with_history(
            vec![vec![MeanVar::new(1.0, 0.01)], vec![MeanVar::new(1.2, 0.01)]],
            0,
        );

        assert_eq!(full.mean(0), tail.mean(0));
        assert_eq!(full.std(0), tail.std(0));
        assert_eq!(full.chi2(0), tail.chi2(0));
    }

    #[test]
    fn identical_iterations_have_zero_chi2() {
        let result = result_with_history(
            vec![vec![MeanVar::new(2.5, 0.04)], vec![MeanVar::new(2.5, 0.04)]],
            0,
        );
        assert!(result.chi2(0).abs() < 1e-12);
    }
}
