//! Discrete variable pool over a finite index set.

use super::TINY;
use crate::core::McFloat;
use crate::errors::{McError, McResult};
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default sharpening exponent applied when the distribution is retrained.
const DEFAULT_ALPHA: f64 = 1.5;

/// A pool of samples of an integer in `[lower, upper]`, drawn from an
/// adaptive categorical distribution.
///
/// The normalized `distribution` is kept alongside its cumulative sums, with
/// a leading zero and a trailing one, so a sample is found by binary search
/// of a uniform number. Training sharpens the distribution towards the bins
/// where the accumulated weights concentrate.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Discrete<T> {
    data: Vec<i64>,
    prob: Vec<T>,
    offset: usize,
    lower: i64,
    upper: i64,
    distribution: Vec<T>,
    accumulation: Vec<T>,
    histogram: Vec<T>,
    alpha: T,
    adapt: bool,
}

impl<T: McFloat> Discrete<T> {
    /// Creates a pool over the inclusive range `[lower, upper]` with a
    /// uniform initial distribution.
    pub fn new(lower: i64, upper: i64) -> McResult<Self> {
        if upper < lower {
            return Err(McError::EmptyDiscreteRange { lower, upper });
        }

        let size = usize::try_from(upper - lower).map_err(|_| McError::EmptyDiscreteRange {
            lower,
            upper,
        })? + 1;
        let capacity = super::DEFAULT_CAPACITY;
        let mut pool = Self {
            data: vec![lower; capacity],
            prob: vec![T::one(); capacity],
            offset: 0,
            lower,
            upper,
            distribution: vec![T::from_usize(size).unwrap().recip(); size],
            accumulation: vec![T::zero(); size + 1],
            histogram: vec![T::from_f64(TINY).unwrap(); size],
            alpha: T::from_f64(DEFAULT_ALPHA).unwrap(),
            adapt: true,
        };
        pool.rebuild_accumulation();

        Ok(pool)
    }

    /// Sets the sharpening exponent used during training.
    #[must_use]
    pub fn with_alpha(mut self, alpha: T) -> Self {
        self.alpha = alpha;
        self
    }

    /// Enables or disables retraining of the distribution between iterations.
    #[must_use]
    pub fn with_adapt(mut self, adapt: bool) -> Self {
        self.adapt = adapt;
        self
    }

    /// Reserves the first `offset` slots; they are never touched by proposals.
    pub fn with_offset(mut self, offset: usize) -> McResult<Self> {
        if offset + 1 >= self.data.len() {
            return Err(McError::OffsetOutOfRange {
                offset,
                capacity: self.data.len(),
            });
        }
        self.offset = offset;
        Ok(self)
    }

    /// Resizes the pool to `capacity` slots, scratch slot included.
    pub fn with_capacity(mut self, capacity: usize) -> McResult<Self> {
        if capacity < self.offset + 2 {
            return Err(McError::OffsetOutOfRange {
                offset: self.offset,
                capacity,
            });
        }
        self.data = vec![self.lower; capacity];
        self.prob = vec![T::one(); capacity];
        Ok(self)
    }

    /// Number of slots, scratch slot included.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of reserved leading slots.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the distribution retrains between iterations.
    pub const fn adapt(&self) -> bool {
        self.adapt
    }

    /// Integer held by slot `idx`.
    pub fn value(&self, idx: usize) -> i64 {
        self.data[idx]
    }

    /// Proposal probability of the sample held by slot `idx`.
    pub fn prob(&self, idx: usize) -> T {
        self.prob[idx]
    }

    /// The normalized categorical distribution.
    pub fn distribution(&self) -> &[T] {
        &self.distribution
    }

    const fn scratch(&self) -> usize {
        self.data.len() - 1
    }

    fn bin_of(&self, value: i64) -> usize {
        usize::try_from(value - self.lower).unwrap_or(0)
    }

    /// Draws a fresh sample into slot `idx` and returns the inverse proposal
    /// probability.
    pub fn create<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let u: T = rng.gen();
        let bin = self
            .accumulation
            .partition_point(|a| *a <= u)
            .saturating_sub(1)
            .min(self.distribution.len() - 1);

        self.data[idx] = self.lower + bin as i64;
        self.prob[idx] = self.distribution[bin];
        self.prob[idx].recip()
    }

    /// Probability of the sample currently held by slot `idx`, used when the
    /// slot is abandoned by a dimension-changing proposal.
    pub fn remove(&mut self, idx: usize) -> T {
        self.distribution[self.bin_of(self.data[idx])]
    }

    /// Redraws slot `idx` and returns the proposal ratio
    /// $q_\mathrm{old} / q_\mathrm{new}$. The previous sample is kept in the
    /// scratch slot for rollback.
    pub fn shift<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let scratch = self.scratch();
        self.data[scratch] = self.data[idx];
        self.prob[scratch] = self.prob[idx];

        let q_old = self.prob[idx];
        let _ = self.create(idx, rng);
        q_old / self.prob[idx]
    }

    /// Restores slot `idx` from the scratch slot.
    pub fn shift_rollback(&mut self, idx: usize) {
        let scratch = self.scratch();
        self.data[idx] = self.data[scratch];
        self.prob[idx] = self.prob[scratch];
    }

    /// Exchanges the samples of two slots; the proposal ratio is one.
    pub fn swap(&mut self, a: usize, b: usize) -> T {
        self.data.swap(a, b);
        self.prob.swap(a, b);
        T::one()
    }

    /// Undoes a swap of the same two slots.
    pub fn swap_rollback(&mut self, a: usize, b: usize) {
        let _ = self.swap(a, b);
    }

    /// Adds `weight` to the histogram bin of the sample in slot `idx`.
    pub fn accumulate(&mut self, idx: usize, weight: T) {
        if self.adapt && weight.is_finite() {
            let bin = self.bin_of(self.data[idx]);
            self.histogram[bin] += weight;
        }
    }

    /// Fills every non-reserved slot outside the scratch slot with a fresh
    /// sample.
    pub fn initialize<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        for idx in self.offset..self.capacity() - 1 {
            let _ = self.create(idx, rng);
        }
    }

    /// Retrains the categorical distribution from the accumulated histogram
    /// and resets the histogram to its floor.
    pub fn train(&mut self) {
        if !self.adapt {
            self.reset_histogram();
            return;
        }

        let mut sum = T::zero();
        for h in &self.histogram {
            sum += *h;
        }
        if sum <= T::zero() {
            self.reset_histogram();
            return;
        }

        let mut total = T::zero();
        for (d, h) in self.distribution.iter_mut().zip(&self.histogram) {
            let r = *h / sum;
            let mut w = if r <= T::zero() {
                T::zero()
            } else if r >= T::one() {
                T::one()
            } else {
                ((T::one() - r) / -r.ln()).powf(self.alpha)
            };
            if !w.is_finite() {
                w = T::one();
            }
            *d = w;
            total += w;
        }
        if total > T::zero() {
            for d in &mut self.distribution {
                *d /= total;
            }
        } else {
            let uniform = T::from_usize(self.distribution.len()).unwrap().recip();
            for d in &mut self.distribution {
                *d = uniform;
            }
        }
        self.rebuild_accumulation();

        self.reset_histogram();
    }

    /// Merges the histogram of another pool, used for the cross-block
    /// reduction before training.
    pub fn merge_histogram(&mut self, other: &Self) {
        debug_assert_eq!(self.histogram.len(), other.histogram.len());
        for (h, o) in self.histogram.iter_mut().zip(&other.histogram) {
            *h += *o;
        }
    }

    fn rebuild_accumulation(&mut self) {
        let size = self.distribution.len();
        self.accumulation[0] = T::zero();
        for i in 0..size {
            self.accumulation[i + 1] = self.accumulation[i] + self.distribution[i];
        }
        self.accumulation[size] = T::one();
    }

    fn reset_histogram(&mut self) {
        let floor = T::from_f64(TINY).unwrap();
        for h in &mut self.histogram {
            *h = floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand_pcg::Pcg64;

    fn rng() -> Pcg64 {
        Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96)
    }

    #[test]
    fn create_samples_the_index_set() {
        let mut pool = Discrete::<f64>::new(1, 8).unwrap();
        let mut rng = rng();

        let mut seen = [false; 8];
        for _ in 0..1000 {
            let ratio = pool.create(0, &mut rng);
            let v = pool.value(0);
            assert!((1..=8).contains(&v));
            assert_approx_eq!(ratio, 8.0, 1e-12);
            seen[(v - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn shift_rollback_restores_the_slot() {
        let mut pool = Discrete::<f64>::new(-3, 12).unwrap();
        let mut rng = rng();
        pool.initialize(&mut rng);

        let data: Vec<_> = (0..pool.capacity() - 1).map(|i| pool.value(i)).collect();
        for _ in 0..100 {
            let ratio = pool.shift(2, &mut rng);
            assert!(ratio > 0.0);
            pool.shift_rollback(2);
            for i in 0..pool.capacity() - 1 {
                assert_eq!(pool.value(i), data[i]);
            }
        }
    }

    #[test]
    fn training_normalizes_and_rebuilds_the_accumulation() {
        let mut pool = Discrete::<f64>::new(0, 3).unwrap().with_alpha(1.0);
        let mut rng = rng();

        for _ in 0..4000 {
            let _ = pool.create(0, &mut rng);
            // weight the upper half of the range twice as strongly
            let w = if pool.value(0) >= 2 { 2.0 } else { 1.0 };
            pool.accumulate(0, w);
        }
        pool.train();

        let mut sum = 0.0;
        for d in pool.distribution() {
            assert!(*d > 0.0);
            sum += d;
        }
        assert_approx_eq!(sum, 1.0, 1e-12);
        assert!(pool.distribution()[3] > pool.distribution()[0]);

        assert_eq!(pool.accumulation[0], 0.0);
        assert_eq!(pool.accumulation[4], 1.0);
        for i in 0..4 {
            assert!(pool.accumulation[i] < pool.accumulation[i + 1]);
        }
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(Discrete::<f64>::new(3, 2).is_err());
    }
}
