//! Reweighted Markov chain over the padded integrand mixture.

use crate::configuration::Configuration;
use crate::core::{Integrand, McFloat, Measure, Settings};
use crate::errors::{McError, McResult};
use crate::integrators::ProgressTimer;
use crate::updates::{change_variable_mixture, swap_variable_mixture, MixtureState};
use crate::variables::TINY;
use rand::distributions::{Distribution, Standard};
use rand::Rng;

/// Runs one block of the reweighted chain.
///
/// The chain samples the mixture density
/// $p(x) = \sum_i r_i \, \mathrm{pad}_i(x) \, |f_i(x)|$, the synthetic
/// normalization integrand included, and observes *every* integrand at each
/// measurement: `observable[i]` accumulates $f_i \, \mathrm{pad}_i / p$ and
/// the normalization accumulates $\mathrm{pad}_\mathrm{norm} / p$. This is
/// what makes the engine efficient for several correlated integrands; a
/// single-integrand chain would spend most of its measurements elsewhere.
///
/// The chain cannot cross regions where every integrand vanishes. That is a
/// property of the algorithm, not a defect; a stalled chain is detected at
/// block end and reported through `log`.
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

    let n = config.integrands();
    let mut state = MixtureState::new(n);
    state.refresh(config, integrand)?;
    if state.mixture <= T::zero() {
        log::warn!("the chain starts where every integrand vanishes; expect a long burn-in");
    }

    let mut rel = vec![T::zero(); n];
    let mut timer = ProgressTimer::new(settings.print_interval);
    let warmup = neval / 100;
    let measurefreq = settings.measurefreq.max(1);

    for step in 0..neval {
        if step % 1000 == 0 && timer.due() {
            log::info!("vegas-mc block at {step} of {neval} steps");
        }

        if config.rng.gen_range(0..2) == 0 {
            change_variable_mixture(config, integrand, &mut state)?;
        } else {
            swap_variable_mixture(config, integrand, &mut state)?;
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

    let norm_visits = config.visited[config.norm()];
    if norm_visits > T::zero()
        && config.normalization / norm_visits < T::from_f64(TINY).unwrap()
    {
        log::warn!("the chain may have stalled in a region where every integrand vanishes");
    }

    Ok(config
        .observable
        .iter()
        .map(|o| *o / config.normalization)
        .collect())
}

/// Folds the current chain state into the accumulators: the observables, the
/// normalization, the per-integrand visits, and the map histograms.
fn observe<T, R, M>(
    config: &mut Configuration<T, R>,
    measure: &M,
    state: &MixtureState<T>,
    rel: &mut [T],
) where
    T: McFloat,
    M: Measure<T>,
{
    let p = state.mixture;
    if p <= T::zero() {
        return;
    }
    let n = config.integrands();
    let norm = config.norm();
    config.probability = p;

    for ((r, w), pad) in rel.iter_mut().zip(&state.weights).zip(&state.pads) {
        *r = *w * *pad / p;
    }
    measure.measure(&config.vars, &mut config.observable, rel);
    config.normalization += state.pads[norm] / p;

    for (i, v) in config.visited.iter_mut().enumerate() {
        let share = if i == norm {
            config.reweight[norm] * state.pads[norm]
        } else {
            config.reweight[i] * state.pads[i] * state.weights[i].abs()
        };
        *v += share / p;
    }

    for vi in 0..config.vars.len() {
        let offset = config.vars[vi].offset();
        for j in 0..config.maxdof()[vi] {
            let q = config.vars[vi].prob(offset + j);
            if q <= T::zero() {
                continue;
            }
            let mut weight = T::zero();
            for i in 0..n {
                if config.dof()[i][vi] > j {
                    weight += state.weights[i] * state.weights[i] * state.pads[i] / (p * q);
                }
            }
            if weight > T::zero() {
                config.vars[vi].accumulate(offset + j, weight);
            }
        }
    }
}
