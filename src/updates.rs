//! Proposal moves of the Markov-chain engines.
//!
//! Every move proposes a change to the configuration, evaluates the affected
//! integrands, and accepts or rejects with the Metropolis rule, rolling the
//! pools back on rejection. The reweighted mixture engine targets the padded
//! mixture density over all integrands at once; the plain chain targets the
//! current integrand only and jumps between integrands with dimension
//! changing proposals.

use crate::configuration::Configuration;
use crate::core::{Integrand, McFloat};
use crate::errors::{McError, McResult};
use rand::distributions::{Distribution, Standard};
use rand::Rng;

/// Index of the integrand-changing move in the proposal counters.
pub(crate) const MOVE_INTEGRAND: usize = 0;

/// Index of the variable-changing move in the proposal counters.
pub(crate) const MOVE_VARIABLE: usize = 1;

/// Rejects a block when any integrand weight is `inf` or `nan`.
pub(crate) fn ensure_finite<T: McFloat>(weights: &[T], neval: u64) -> McResult<()> {
    for (k, w) in weights.iter().enumerate() {
        if !w.is_finite() {
            return Err(McError::NonFiniteIntegrand {
                integrand: k,
                neval,
            });
        }
    }
    Ok(())
}

/// Cached evaluation state of the reweighted chain over the padded integrand
/// mixture
/// $p(x) = \sum_i r_i \, \mathrm{pad}_i(x) \, |f_i(x)| + r_\mathrm{norm} \,
/// \mathrm{pad}_\mathrm{norm}(x)$.
pub(crate) struct MixtureState<T> {
    /// Signed weight of every user integrand at the current sample.
    pub weights: Vec<T>,
    /// Padding probability of every integrand, the normalization last.
    pub pads: Vec<T>,
    /// Padded mixture density at the current sample.
    pub mixture: T,
    new_weights: Vec<T>,
    new_pads: Vec<T>,
}

impl<T: McFloat> MixtureState<T> {
    pub fn new(integrands: usize) -> Self {
        Self {
            weights: vec![T::zero(); integrands],
            pads: vec![T::zero(); integrands + 1],
            mixture: T::zero(),
            new_weights: vec![T::zero(); integrands],
            new_pads: vec![T::zero(); integrands + 1],
        }
    }

    /// Evaluates all integrands and the mixture density at the current
    /// sample, e.g. after the pools were freshly initialized.
    pub fn refresh<R, I>(
        &mut self,
        config: &mut Configuration<T, R>,
        integrand: &I,
    ) -> McResult<()>
    where
        I: Integrand<T>,
    {
        integrand.call(&config.vars, &mut self.weights);
        config.neval += 1;
        ensure_finite(&self.weights, config.neval)?;
        config.padding_probabilities(&mut self.pads);
        self.mixture = mixture_density(config, &self.weights, &self.pads);
        Ok(())
    }

    fn commit(&mut self, mixture: T) {
        std::mem::swap(&mut self.weights, &mut self.new_weights);
        std::mem::swap(&mut self.pads, &mut self.new_pads);
        self.mixture = mixture;
    }
}

/// The padded mixture density at the sample described by `weights` and
/// `pads`.
fn mixture_density<T: McFloat, R>(
    config: &Configuration<T, R>,
    weights: &[T],
    pads: &[T],
) -> T {
    let norm = config.norm();
    let mut p = config.reweight[norm] * pads[norm];
    for ((w, pad), r) in weights.iter().zip(pads).zip(&config.reweight) {
        p += *r * *pad * w.abs();
    }
    p
}

/// Shifts one slot of one pool and accepts on the ratio of mixture
/// densities.
pub(crate) fn change_variable_mixture<T, R, I>(
    config: &mut Configuration<T, R>,
    integrand: &I,
    state: &mut MixtureState<T>,
) -> McResult<()>
where
    T: McFloat,
    R: Rng,
    I: Integrand<T>,
    Standard: Distribution<T>,
{
    let vi = config.rng.gen_range(0..config.vars.len());
    let d = config.maxdof()[vi];
    if d == 0 {
        return Ok(());
    }
    let offset = config.vars[vi].offset();
    let idx = offset + config.rng.gen_range(0..d);

    let curr = config.curr;
    config.propose[MOVE_VARIABLE][curr][vi] += T::one();

    let prop = config.vars[vi].shift(idx, &mut config.rng);
    if prop <= T::zero() {
        config.vars[vi].shift_rollback(idx);
        return Ok(());
    }

    integrand.call(&config.vars, &mut state.new_weights);
    config.neval += 1;
    ensure_finite(&state.new_weights, config.neval)?;
    config.padding_probabilities(&mut state.new_pads);
    let mixture = mixture_density(config, &state.new_weights, &state.new_pads);

    let accept = if state.mixture > T::zero() {
        let u: T = config.rng.gen();
        u < prop * mixture / state.mixture
    } else {
        true
    };
    if accept {
        config.accept[MOVE_VARIABLE][curr][vi] += T::one();
        state.commit(mixture);
    } else {
        config.vars[vi].shift_rollback(idx);
    }

    Ok(())
}

/// Swaps two slots of one pool and accepts on the ratio of mixture
/// densities.
pub(crate) fn swap_variable_mixture<T, R, I>(
    config: &mut Configuration<T, R>,
    integrand: &I,
    state: &mut MixtureState<T>,
) -> McResult<()>
where
    T: McFloat,
    R: Rng,
    I: Integrand<T>,
    Standard: Distribution<T>,
{
    let vi = config.rng.gen_range(0..config.vars.len());
    let d = config.maxdof()[vi];
    if d < 2 {
        return Ok(());
    }
    let offset = config.vars[vi].offset();
    let a = config.rng.gen_range(0..d);
    let b = (a + 1 + config.rng.gen_range(0..d - 1)) % d;
    let (a, b) = (offset + a, offset + b);

    let _ = config.vars[vi].swap(a, b);

    integrand.call(&config.vars, &mut state.new_weights);
    config.neval += 1;
    ensure_finite(&state.new_weights, config.neval)?;
    config.padding_probabilities(&mut state.new_pads);
    let mixture = mixture_density(config, &state.new_weights, &state.new_pads);

    let accept = if state.mixture > T::zero() {
        let u: T = config.rng.gen();
        u < mixture / state.mixture
    } else {
        true
    };
    if accept {
        state.commit(mixture);
    } else {
        config.vars[vi].swap_rollback(a, b);
    }

    Ok(())
}

/// Cached evaluation state of the plain chain over the current integrand.
pub(crate) struct ChainState<T> {
    /// Signed weight of the current integrand at the current sample.
    pub weight: T,
    scratch: Vec<T>,
}

impl<T: McFloat> ChainState<T> {
    pub fn new(integrands: usize) -> Self {
        Self {
            weight: T::one(),
            scratch: vec![T::zero(); integrands],
        }
    }
}

/// Weight of the current integrand at the current sample; the normalization
/// integrand is constant one and costs no evaluation.
fn eval_current<T, R, I>(
    config: &mut Configuration<T, R>,
    integrand: &I,
    buf: &mut [T],
) -> McResult<T>
where
    T: McFloat,
    I: Integrand<T>,
{
    if config.curr == config.norm() {
        return Ok(T::one());
    }
    integrand.call(&config.vars, buf);
    config.neval += 1;
    ensure_finite(buf, config.neval)?;
    Ok(buf[config.curr])
}

/// Shifts one slot used by the current integrand and accepts on the
/// integrand ratio. Reweight and padding cancel because the integrand does
/// not change.
pub(crate) fn change_variable_current<T, R, I>(
    config: &mut Configuration<T, R>,
    integrand: &I,
    state: &mut ChainState<T>,
) -> McResult<()>
where
    T: McFloat,
    R: Rng,
    I: Integrand<T>,
    Standard: Distribution<T>,
{
    let vi = config.rng.gen_range(0..config.vars.len());
    let curr = config.curr;
    let d = config.dof()[curr][vi];
    if d == 0 {
        return Ok(());
    }
    let offset = config.vars[vi].offset();
    let idx = offset + config.rng.gen_range(0..d);

    config.propose[MOVE_VARIABLE][curr][vi] += T::one();

    let prop = config.vars[vi].shift(idx, &mut config.rng);
    if prop <= T::zero() {
        config.vars[vi].shift_rollback(idx);
        return Ok(());
    }

    let weight = eval_current(config, integrand, &mut state.scratch)?;
    let old = state.weight.abs();
    let accept = if old > T::zero() {
        let u: T = config.rng.gen();
        u < prop * weight.abs() / old
    } else {
        true
    };
    if accept {
        config.accept[MOVE_VARIABLE][curr][vi] += T::one();
        state.weight = weight;
        config.abs_weight = weight.abs();
    } else {
        config.vars[vi].shift_rollback(idx);
    }

    Ok(())
}

/// Swaps two slots used by the current integrand and accepts on the
/// integrand ratio.
pub(crate) fn swap_variable_current<T, R, I>(
    config: &mut Configuration<T, R>,
    integrand: &I,
    state: &mut ChainState<T>,
) -> McResult<()>
where
    T: McFloat,
    R: Rng,
    I: Integrand<T>,
    Standard: Distribution<T>,
{
    let vi = config.rng.gen_range(0..config.vars.len());
    let d = config.dof()[config.curr][vi];
    if d < 2 {
        return Ok(());
    }
    let offset = config.vars[vi].offset();
    let a = config.rng.gen_range(0..d);
    let b = (a + 1 + config.rng.gen_range(0..d - 1)) % d;
    let (a, b) = (offset + a, offset + b);

    let _ = config.vars[vi].swap(a, b);

    let weight = eval_current(config, integrand, &mut state.scratch)?;
    let old = state.weight.abs();
    let accept = if old > T::zero() {
        let u: T = config.rng.gen();
        u < weight.abs() / old
    } else {
        true
    };
    if accept {
        state.weight = weight;
        config.abs_weight = weight.abs();
    } else {
        config.vars[vi].swap_rollback(a, b);
    }

    Ok(())
}

/// Jumps to another integrand, creating the additional sample slots its
/// degrees of freedom require or pricing in the abandoned ones, and accepts
/// on the reweighted integrand ratio.
pub(crate) fn change_integrand<T, R, I>(
    config: &mut Configuration<T, R>,
    integrand: &I,
    state: &mut ChainState<T>,
) -> McResult<()>
where
    T: McFloat,
    R: Rng,
    I: Integrand<T>,
    Standard: Distribution<T>,
{
    let total = config.norm() + 1;
    if total < 2 {
        return Ok(());
    }
    let curr = config.curr;
    let new = (curr + 1 + config.rng.gen_range(0..total - 1)) % total;

    config.propose[MOVE_INTEGRAND][curr][new] += T::one();

    let mut prop = T::one();
    for vi in 0..config.vars.len() {
        let d_old = config.dof()[curr][vi];
        let d_new = config.dof()[new][vi];
        let offset = config.vars[vi].offset();
        if d_new > d_old {
            for j in d_old..d_new {
                let created = config.vars[vi].create(offset + j, &mut config.rng);
                if created <= T::zero() {
                    // degenerate draw; the slots above the current degrees of
                    // freedom stay dead, so nothing needs to be undone
                    return Ok(());
                }
                prop = prop * created;
            }
        } else {
            for j in d_new..d_old {
                prop = prop * config.vars[vi].remove(offset + j);
            }
        }
    }

    let weight = if new == config.norm() {
        T::one()
    } else {
        integrand.call(&config.vars, &mut state.scratch);
        config.neval += 1;
        ensure_finite(&state.scratch, config.neval)?;
        state.scratch[new]
    };

    let denominator = config.abs_weight * config.reweight[curr];
    let accept = if denominator > T::zero() {
        let u: T = config.rng.gen();
        u < prop * weight.abs() * config.reweight[new] / denominator
    } else {
        true
    };
    if accept {
        config.accept[MOVE_INTEGRAND][curr][new] += T::one();
        config.curr = new;
        state.weight = weight;
        config.abs_weight = weight.abs();
    }

    Ok(())
}
