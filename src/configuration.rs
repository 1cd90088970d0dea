//! The aggregate sampling state handed to the integrand.

use crate::core::McFloat;
use crate::errors::{McError, McResult};
use crate::variables::Variable;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Floor kept under every reweight entry.
const REWEIGHT_FLOOR: f64 = 1e-10;

/// The complete state of one sampling stream: the variable pools, the
/// degrees-of-freedom table, the reweight vector of the integrand mixture,
/// proposal bookkeeping, measurement accumulators, and the random number
/// generator.
///
/// A configuration estimates `N` user integrands plus a synthetic
/// normalization integrand that is constant one; the latter has index
/// [`Configuration::norm`] and consumes no degrees of freedom. Each block of
/// an integration owns its own configuration; the learned maps are the only
/// state that flows between iterations.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Configuration<T, R> {
    pub(crate) vars: Vec<Variable<T>>,
    dof: Vec<Vec<usize>>,
    maxdof: Vec<usize>,
    integrands: usize,
    pub(crate) reweight: Vec<T>,
    reweight_goal: Vec<T>,
    pub(crate) visited: Vec<T>,
    pub(crate) propose: Vec<Vec<Vec<T>>>,
    pub(crate) accept: Vec<Vec<Vec<T>>>,
    pub(crate) curr: usize,
    pub(crate) neval: u64,
    pub(crate) abs_weight: T,
    pub(crate) probability: T,
    pub(crate) observable: Vec<T>,
    pub(crate) normalization: T,
    pub(crate) rng: R,
    seed: u64,
}

impl<T: McFloat, R> Configuration<T, R> {
    /// Builds a configuration from the variable tuple and the
    /// degrees-of-freedom table `dof`, one row per user integrand listing how
    /// many slots the integrand consumes from each pool.
    ///
    /// Fails fast on an empty tuple, a misshaped table, or a row that asks
    /// for more slots than a pool provides.
    pub fn new(vars: Vec<Variable<T>>, dof: &[Vec<usize>], seed: u64) -> McResult<Self>
    where
        R: SeedableRng,
    {
        if vars.is_empty() {
            return Err(McError::EmptyVariableTuple);
        }
        if dof.is_empty() {
            return Err(McError::InvalidSettings(
                "at least one integrand row is required in the dof table".to_owned(),
            ));
        }

        for (k, row) in dof.iter().enumerate() {
            if row.len() != vars.len() {
                return Err(McError::DofShape {
                    integrand: k,
                    expected: vars.len(),
                    found: row.len(),
                });
            }
            for (v, d) in row.iter().enumerate() {
                let available = vars[v].capacity() - 1 - vars[v].offset();
                if *d > available {
                    return Err(McError::DofOverflow {
                        integrand: k,
                        pool: v,
                        needed: *d,
                        available,
                    });
                }
            }
        }

        let integrands = dof.len();
        let total = integrands + 1;

        let mut table = dof.to_vec();
        // the normalization integrand consumes no degrees of freedom
        table.push(vec![0; vars.len()]);

        let maxdof = (0..vars.len())
            .map(|v| table.iter().map(|row| row[v]).max().unwrap_or(0))
            .collect();

        let uniform = T::from_usize(total).unwrap().recip();
        let moves = total.max(vars.len());

        Ok(Self {
            vars,
            dof: table,
            maxdof,
            integrands,
            reweight: vec![uniform; total],
            reweight_goal: vec![T::one(); total],
            visited: vec![T::zero(); total],
            propose: vec![vec![vec![T::zero(); moves]; total]; 2],
            accept: vec![vec![vec![T::zero(); moves]; total]; 2],
            curr: integrands,
            neval: 0,
            abs_weight: T::one(),
            probability: T::one(),
            observable: vec![T::zero(); integrands],
            normalization: T::zero(),
            rng: R::seed_from_u64(seed),
            seed,
        })
    }

    /// Sets the target visit ratios of the integrand mixture, one entry per
    /// integrand with the normalization integrand last.
    pub fn with_reweight_goal(mut self, goal: Vec<T>) -> McResult<Self> {
        if goal.len() != self.integrands + 1 {
            return Err(McError::InvalidSettings(format!(
                "reweight goal needs {} entries, got {}",
                self.integrands + 1,
                goal.len()
            )));
        }
        self.reweight_goal = goal;
        Ok(self)
    }

    /// The variable pools.
    pub fn vars(&self) -> &[Variable<T>] {
        &self.vars
    }

    /// Mutable access to the pools, e.g. to place external momenta into
    /// reserved slots before the run.
    pub fn vars_mut(&mut self) -> &mut [Variable<T>] {
        &mut self.vars
    }

    /// The degrees-of-freedom table, the appended normalization row included.
    pub fn dof(&self) -> &[Vec<usize>] {
        &self.dof
    }

    /// Per-pool maximum of the degrees of freedom over all integrands.
    pub fn maxdof(&self) -> &[usize] {
        &self.maxdof
    }

    /// Number of user integrands.
    pub const fn integrands(&self) -> usize {
        self.integrands
    }

    /// Index of the synthetic normalization integrand.
    pub const fn norm(&self) -> usize {
        self.integrands
    }

    /// The reweight vector of the integrand mixture; positive and summing to
    /// one.
    pub fn reweight(&self) -> &[T] {
        &self.reweight
    }

    /// Accumulated visits per integrand in the current iteration.
    pub fn visited(&self) -> &[T] {
        &self.visited
    }

    /// Integrand evaluations performed so far.
    pub const fn neval(&self) -> u64 {
        self.neval
    }

    /// The normalization accumulator of the current block.
    pub fn normalization(&self) -> T {
        self.normalization
    }

    /// The observable accumulator of the current block.
    pub fn observable(&self) -> &[T] {
        &self.observable
    }

    /// The base seed of this configuration.
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Reseeds the generator deterministically for a numbered sampling
    /// stream.
    pub(crate) fn reseed(&mut self, stream: u64)
    where
        R: SeedableRng,
    {
        self.rng = R::seed_from_u64(self.seed.wrapping_add(stream));
    }

    /// Draws fresh samples into every non-reserved slot of every pool.
    pub fn initialize(&mut self)
    where
        R: rand::Rng,
        rand::distributions::Standard: rand::distributions::Distribution<T>,
    {
        for var in &mut self.vars {
            var.initialize(&mut self.rng);
        }
    }

    /// Resets the per-block counters and accumulators, keeping the pools and
    /// the reweight vector.
    pub(crate) fn clear_statistics(&mut self) {
        for o in &mut self.observable {
            *o = T::zero();
        }
        for v in &mut self.visited {
            *v = T::zero();
        }
        for kind in &mut self.propose {
            for row in kind.iter_mut() {
                for p in row.iter_mut() {
                    *p = T::zero();
                }
            }
        }
        for kind in &mut self.accept {
            for row in kind.iter_mut() {
                for a in row.iter_mut() {
                    *a = T::zero();
                }
            }
        }
        self.normalization = T::zero();
        self.neval = 0;
        self.abs_weight = T::one();
        self.probability = T::one();
        self.curr = self.integrands;
    }

    /// Padding probability of integrand `k`: the product of the proposal
    /// densities of every slot that belongs to the mixture but not to `k`.
    pub fn padding_probability(&self, k: usize) -> T {
        let mut pad = T::one();
        for (v, var) in self.vars.iter().enumerate() {
            let offset = var.offset();
            for idx in self.dof[k][v]..self.maxdof[v] {
                pad = pad * var.prob(offset + idx);
            }
        }
        pad
    }

    /// Fills `out` with the padding probabilities of every integrand, the
    /// normalization integrand last.
    pub(crate) fn padding_probabilities(&self, out: &mut [T]) {
        for (k, pad) in out.iter_mut().enumerate() {
            *pad = self.padding_probability(k);
        }
    }

    /// Retrains every adaptive pool from its merged histograms.
    pub(crate) fn train(&mut self) {
        for var in &mut self.vars {
            var.train();
        }
    }

    /// Adds the histograms and counters accumulated by another block.
    pub(crate) fn merge_statistics(&mut self, other: &Self) {
        for (var, o) in self.vars.iter_mut().zip(&other.vars) {
            var.merge_histogram(o);
        }
        for (v, o) in self.visited.iter_mut().zip(&other.visited) {
            *v += *o;
        }
        for (kind, okind) in self.propose.iter_mut().zip(&other.propose) {
            for (row, orow) in kind.iter_mut().zip(okind) {
                for (p, op) in row.iter_mut().zip(orow) {
                    *p += *op;
                }
            }
        }
        for (kind, okind) in self.accept.iter_mut().zip(&other.accept) {
            for (row, orow) in kind.iter_mut().zip(okind) {
                for (a, oa) in row.iter_mut().zip(orow) {
                    *a += *oa;
                }
            }
        }
        self.neval += other.neval;
    }

    /// Retunes the reweight vector from the visit counts of the last
    /// iteration so that under-visited integrands gain mixture weight.
    ///
    /// Without `remap` the plain `(avg / visited)^alpha` rescale is used.
    /// With `remap` the normalized inverse visit counts are pushed through
    /// the `(1 - r) / ln(1/r)` damping before the exponent is applied, which
    /// softens the correction for integrands that were hardly visited at
    /// all. The result is multiplied by the user goal, clamped, and
    /// normalized back to a probability vector.
    pub(crate) fn retune_reweight(&mut self, alpha: f64, remap: bool) {
        let mut total = T::zero();
        for v in &self.visited {
            total += *v;
        }
        if total <= T::zero() {
            return;
        }

        let alpha = T::from_f64(alpha).unwrap();
        let avg = total / T::from_usize(self.reweight.len()).unwrap();

        // importance of an integrand: its normalized inverse visit count
        let mut inverse_sum = T::zero();
        for v in &self.visited {
            inverse_sum += v.max(T::one()).recip();
        }

        for ((w, v), goal) in self
            .reweight
            .iter_mut()
            .zip(&self.visited)
            .zip(&self.reweight_goal)
        {
            let factor = if remap {
                let r = v.max(T::one()).recip() / inverse_sum;
                if r > T::zero() && r < T::one() {
                    ((T::one() - r) / -r.ln()).powf(alpha)
                } else {
                    T::one()
                }
            } else if *v > T::one() {
                (avg / *v).powf(alpha)
            } else {
                avg.powf(alpha)
            };
            *w = *w * factor * *goal;
        }

        self.normalize_reweight();
    }

    fn normalize_reweight(&mut self) {
        let mut sum = T::zero();
        for w in &self.reweight {
            sum += *w;
        }
        if sum <= T::zero() {
            let uniform = T::from_usize(self.reweight.len()).unwrap().recip();
            for w in &mut self.reweight {
                *w = uniform;
            }
            return;
        }

        let floor = T::from_f64(REWEIGHT_FLOOR).unwrap();
        for w in &mut self.reweight {
            *w = (*w / sum).max(floor);
        }
        // the clamp may have nudged the sum away from one
        let mut clamped = T::zero();
        for w in &self.reweight {
            clamped += *w;
        }
        for w in &mut self.reweight {
            *w /= clamped;
        }
    }

    /// Reports the acceptance rates of the last iteration through `log`.
    pub(crate) fn log_acceptance(&self, iteration: usize) {
        for (kind, name) in [(0, "integrand"), (1, "variable")] {
            let mut proposed = T::zero();
            let mut accepted = T::zero();
            for (prow, arow) in self.propose[kind].iter().zip(&self.accept[kind]) {
                for (p, a) in prow.iter().zip(arow) {
                    proposed += *p;
                    accepted += *a;
                }
            }
            if proposed > T::zero() {
                log::debug!(
                    "iteration {}: {} moves accepted {} of {}",
                    iteration,
                    name,
                    accepted,
                    proposed
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{Continuous, Discrete};
    use assert_approx_eq::assert_approx_eq;
    use rand_pcg::Pcg64;

    fn two_pool_config() -> Configuration<f64, Pcg64> {
        Configuration::new(
            vec![
                Variable::Continuous(Continuous::new(0.0, 1.0).unwrap()),
                Variable::Discrete(Discrete::new(0, 4).unwrap()),
            ],
            &[vec![2, 0], vec![1, 1]],
            7,
        )
        .unwrap()
    }

    #[test]
    fn construction_appends_the_normalization_row() {
        let config = two_pool_config();

        assert_eq!(config.integrands(), 2);
        assert_eq!(config.norm(), 2);
        assert_eq!(config.dof().len(), 3);
        assert_eq!(config.dof()[2], vec![0, 0]);
        assert_eq!(config.maxdof(), &[2, 1]);

        let sum: f64 = config.reweight().iter().sum();
        assert_approx_eq!(sum, 1.0, 1e-14);
    }

    #[test]
    fn misshaped_dof_tables_are_rejected() {
        let vars = vec![Variable::<f64>::Continuous(
            Continuous::new(0.0, 1.0).unwrap(),
        )];
        assert!(Configuration::<f64, Pcg64>::new(vars.clone(), &[vec![1, 1]], 0).is_err());
        assert!(Configuration::<f64, Pcg64>::new(vars.clone(), &[vec![40]], 0).is_err());
        assert!(Configuration::<f64, Pcg64>::new(vars, &[], 0).is_err());
        assert!(Configuration::<f64, Pcg64>::new(vec![], &[vec![1]], 0).is_err());
    }

    #[test]
    fn padding_is_the_product_of_the_unused_slots() {
        let mut config = two_pool_config();
        config.initialize();

        let q0 = config.vars()[0].prob(0);
        let q1 = config.vars()[0].prob(1);
        let p0 = config.vars()[1].prob(0);

        // integrand 0 uses both continuous slots and no discrete slot
        assert_approx_eq!(config.padding_probability(0), p0, 1e-14);
        // integrand 1 leaves one continuous slot unused
        assert_approx_eq!(config.padding_probability(1), q1, 1e-14);
        // the normalization integrand pads every slot
        assert_approx_eq!(config.padding_probability(2), q0 * q1 * p0, 1e-14);
    }

    #[test]
    fn retuned_reweight_stays_a_probability_vector() {
        let mut config = two_pool_config();
        config.visited = vec![900.0, 50.0, 50.0];
        config.retune_reweight(1.0, false);

        let sum: f64 = config.reweight().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(config.reweight().iter().all(|w| *w > 0.0));
        // the over-visited integrand loses weight to the others
        assert!(config.reweight()[0] < config.reweight()[1]);

        config.visited = vec![1.0, 1e9, 1.0];
        config.retune_reweight(1.0, true);
        let sum: f64 = config.reweight().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn snapshots_round_trip_through_json() {
        let mut config = two_pool_config();
        config.initialize();

        let json = serde_json::to_string(&config).unwrap();
        let restored: Configuration<f64, Pcg64> = serde_json::from_str(&json).unwrap();

        assert_eq!(
            serde_json::to_string(&restored).unwrap(),
            json,
            "snapshot must round-trip losslessly"
        );
    }
}
