//! Importance-sampled estimator over the product of the learned maps.

use crate::configuration::Configuration;
use crate::core::{Integrand, McFloat, Measure, Settings};
use crate::errors::{McError, McResult};
use crate::integrators::ProgressTimer;
use crate::updates::ensure_finite;
use rand::distributions::{Distribution, Standard};
use rand::Rng;

/// Runs one block of independent importance sampling.
///
/// Every evaluation draws fresh samples for all slots any integrand uses,
/// evaluates all integrands on the shared sample, and accumulates
/// $f_k \, \mathrm{pad}_k / q$ per integrand along with the squared relative
/// weights that train the maps. The block estimate of integrand $k$ is
/// `observable[k] / normalization`.
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

    let n = config.integrands();
    let norm = config.norm();
    let nvar = config.vars.len();
    let mut weights = vec![T::zero(); n];
    let mut pads = vec![T::zero(); n + 1];
    let mut rel = vec![T::zero(); n];
    let mut timer = ProgressTimer::new(settings.print_interval);

    'eval: for step in 0..neval {
        if step % 1000 == 0 && timer.due() {
            log::info!("vegas block at {step} of {neval} evaluations");
        }

        for vi in 0..nvar {
            let offset = config.vars[vi].offset();
            for j in 0..config.maxdof()[vi] {
                let created = config.vars[vi].create(offset + j, &mut config.rng);
                if created <= T::zero() {
                    // degenerate draw; discard the sample
                    continue 'eval;
                }
            }
        }

        integrand.call(&config.vars, &mut weights);
        config.neval += 1;
        ensure_finite(&weights, config.neval)?;

        config.padding_probabilities(&mut pads);
        // the normalization integrand pads every slot, so its padding is the
        // full sampling probability of the point
        let sampling = pads[norm];
        if sampling <= T::zero() {
            continue;
        }
        config.probability = sampling;

        for ((r, w), pad) in rel.iter_mut().zip(&weights).zip(&pads) {
            *r = *w * *pad / sampling;
        }
        measure.measure(&config.vars, &mut config.observable, &rel);
        config.normalization += pads[norm] / sampling;

        for (k, r) in rel.iter().enumerate() {
            let squared = *r * *r;
            for vi in 0..nvar {
                let offset = config.vars[vi].offset();
                for j in 0..config.dof()[k][vi] {
                    config.vars[vi].accumulate(offset + j, squared);
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{Continuous, Variable};
    use rand_pcg::Pcg64;

    #[test]
    fn a_constant_integrand_recovers_the_interval_length() {
        let mut config: Configuration<f64, Pcg64> = Configuration::new(
            vec![Variable::Continuous(Continuous::new(0.0, 3.0).unwrap())],
            &[vec![1]],
            11,
        )
        .unwrap();

        let one = |_vars: &[Variable<f64>], out: &mut [f64]| out[0] = 1.0;
        let means = integrate_block(
            &one,
            &crate::core::DefaultMeasure,
            &mut config,
            5000,
            &Settings::default(),
        )
        .unwrap();

        // int_0^3 dx = 3 up to Monte Carlo error on the uniform start map
        assert!((means[0] - 3.0).abs() < 0.2, "mean = {}", means[0]);
    }

    #[test]
    fn a_non_finite_integrand_aborts_the_block() {
        let mut config: Configuration<f64, Pcg64> = Configuration::new(
            vec![Variable::Continuous(Continuous::new(0.0, 1.0).unwrap())],
            &[vec![1]],
            11,
        )
        .unwrap();

        let bad = |_vars: &[Variable<f64>], out: &mut [f64]| out[0] = f64::NAN;
        let result = integrate_block(
            &bad,
            &crate::core::DefaultMeasure,
            &mut config,
            100,
            &Settings::default(),
        );

        assert!(matches!(result, Err(McError::NonFiniteIntegrand { .. })));
    }
}
