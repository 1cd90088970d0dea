//! Plain Markov chain over the joint state of integrand and sample.

use crate::configuration::Configuration;
use crate::core::{Integrand, McFloat, Measure, Settings};
use crate::errors::{McError, McResult};
use crate::integrators::ProgressTimer;
use crate::updates::{
    change_integrand, change_variable_current, swap_variable_current, ChainState,
};
use rand::distributions::{Distribution, Standard};
use rand::Rng;

/// Runs one block of the plain chain.
///
/// The chain walks the joint state of current integrand `k` and sample `x`,
/// jumping between integrands with dimension-changing proposals. Only the
/// current integrand is observed at a measurement: `observable[k]` gains
/// $\mathrm{sign}(f_k) / r_k$ and, while the chain sits on the synthetic
/// normalization integrand, the normalization gains $1 / r_\mathrm{norm}$.
/// The estimate of integrand `k` is `observable[k] / normalization`.
pub(crate) fn integrate_block<T, R, I, M>(
    integrand: &I,
    measure: &M,
    config: &mut Configuration<T, R>,
    neval: u64,
    settings: &Settings,
) -> McResult<Vec<T>>
where
    T: McFloat,
    R: Rng,
    I: Integrand<T>,
    M: Measure<T>,
    Standard: Distribution<T>,
{
    config.clear_statistics();
    config.initialize();

    // the chain starts on the normalization integrand, whose weight is one
    // everywhere
    config.curr = config.norm();
    let n = config.integrands();
    let mut state = ChainState::new(n);

    let mut rel = vec![T::zero(); n];
    let mut timer = ProgressTimer::new(settings.print_interval);
    let warmup = neval / 100;
    let measurefreq = settings.measurefreq.max(1);

    for step in 0..neval {
        if step % 1000 == 0 && timer.due() {
            log::info!("mcmc block at {step} of {neval} steps");
        }

        match config.rng.gen_range(0..3) {
            0 => change_integrand(config, integrand, &mut state)?,
            1 => change_variable_current(config, integrand, &mut state)?,
            _ => swap_variable_current(config, integrand, &mut state)?,
        }

        if step >= warmup && step % measurefreq == 0 {
            observe(config, measure, &state, &mut rel);
        }
    }

    if config.normalization <= T::zero() {
        return Err(McError::NonPositiveNormalization {
            value: config.normalization.to_f64().unwrap_or(f64::NAN),
            neval: config.neval,
        });
    }

    Ok(config
        .observable
        .iter()
        .map(|o| *o / config.normalization)
        .collect())
}

/// Folds the current chain position into the accumulators.
fn observe<T, R, M>(
    config: &mut Configuration<T, R>,
    measure: &M,
    state: &ChainState<T>,
    rel: &mut [T],
) where
    T: McFloat,
    M: Measure<T>,
{
    let curr = config.curr;
    config.visited[curr] += T::one();

    if curr == config.norm() {
        config.normalization += config.reweight[curr].recip();
        return;
    }

    let abs = state.weight.abs();
    if abs <= T::zero() {
        return;
    }
    for r in rel.iter_mut() {
        *r = T::zero();
    }
    rel[curr] = state.weight / (abs * config.reweight[curr]);
    measure.measure(&config.vars, &mut config.observable, rel);
}
