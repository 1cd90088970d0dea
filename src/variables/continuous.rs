//! Continuous variable pool with an adaptive piecewise-linear map.

use super::TINY;
use crate::core::McFloat;
use crate::errors::{McError, McResult};
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Half width of a local shift proposal in map space.
const SHIFT_WIDTH: f64 = 0.2;

/// Default number of increments of the adaptive map.
const DEFAULT_GRID_SIZE: usize = 1000;

/// Default smoothing exponent applied when the map is retrained.
const DEFAULT_ALPHA: f64 = 3.0;

/// A pool of samples of a scalar in $[a, b)$, drawn through a piecewise-linear
/// map in the spirit of the VEGAS algorithm.
///
/// The map is defined by a monotone grid $a = x_0 < x_1 < \ldots < x_N = b$.
/// A uniform number $y \in [0, 1)$ falling into increment $i$ is mapped to
///
/// $$ x(y) = x_i + (y N - i)(x_{i+1} - x_i) $$
///
/// with proposal density $1 / (N (x_{i+1} - x_i))$. Training squeezes the
/// increments towards the regions where the accumulated weights concentrate,
/// so that the integrand becomes as flat as possible in $y$.
///
/// The last slot of the pool is scratch space used to undo the latest shift
/// proposal; it never holds a live sample.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Continuous<T> {
    data: Vec<T>,
    prob: Vec<T>,
    bin: Vec<usize>,
    offset: usize,
    lower: T,
    upper: T,
    grid: Vec<T>,
    histogram: Vec<T>,
    alpha: T,
    adapt: bool,
}

impl<T: McFloat> Continuous<T> {
    /// Creates a pool over the interval `[lower, upper)` with the default
    /// capacity, grid size, and smoothing exponent.
    pub fn new(lower: T, upper: T) -> McResult<Self> {
        if !(lower < upper) || !lower.is_finite() || !upper.is_finite() {
            return Err(McError::EmptyRange {
                lower: lower.to_f64().unwrap_or(f64::NAN),
                upper: upper.to_f64().unwrap_or(f64::NAN),
            });
        }

        let capacity = super::DEFAULT_CAPACITY;
        let mut pool = Self {
            data: vec![lower; capacity],
            prob: vec![T::one(); capacity],
            bin: vec![0; capacity],
            offset: 0,
            lower,
            upper,
            grid: Vec::new(),
            histogram: Vec::new(),
            alpha: T::from_f64(DEFAULT_ALPHA).unwrap(),
            adapt: true,
        };
        pool.rebuild_grid(DEFAULT_GRID_SIZE);

        Ok(pool)
    }

    /// Replaces the map by a fresh uniform grid with `size` increments.
    #[must_use]
    pub fn with_grid_size(mut self, size: usize) -> Self {
        self.rebuild_grid(size);
        self
    }

    /// Sets the smoothing exponent used during training.
    #[must_use]
    pub fn with_alpha(mut self, alpha: T) -> Self {
        self.alpha = alpha;
        self
    }

    /// Enables or disables retraining of the map between iterations.
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
        self.bin = vec![0; capacity];
        Ok(self)
    }

    fn rebuild_grid(&mut self, size: usize) {
        let size = size.max(2);
        let range = self.upper - self.lower;
        let nf = T::from_usize(size).unwrap();
        self.grid = (0..=size)
            .map(|i| self.lower + range * T::from_usize(i).unwrap() / nf)
            .collect();
        self.grid[size] = self.upper;
        self.histogram = vec![T::from_f64(TINY).unwrap(); size];
    }

    /// Number of slots, scratch slot included.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of reserved leading slots.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the map retrains between iterations.
    pub const fn adapt(&self) -> bool {
        self.adapt
    }

    /// Value held by slot `idx`.
    pub fn value(&self, idx: usize) -> T {
        self.data[idx]
    }

    /// Proposal density of the sample held by slot `idx`.
    pub fn prob(&self, idx: usize) -> T {
        self.prob[idx]
    }

    /// The current map grid, `size + 1` monotone points from `lower` to
    /// `upper`.
    pub fn grid(&self) -> &[T] {
        &self.grid
    }

    const fn scratch(&self) -> usize {
        self.data.len() - 1
    }

    /// Maps `y` in `[0, 1)` through the grid into slot `idx`.
    fn map_slot(&mut self, idx: usize, y: T) {
        let n = self.histogram.len();
        let scaled = y * T::from_usize(n).unwrap();
        let bin = scaled.to_usize().unwrap_or(0).min(n - 1);
        let frac = scaled - T::from_usize(bin).unwrap();
        let width = self.grid[bin + 1] - self.grid[bin];

        self.data[idx] = self.grid[bin] + frac * width;
        self.prob[idx] = (T::from_usize(n).unwrap() * width).recip();
        self.bin[idx] = bin;
    }

    /// Map-space position of the sample held by slot `idx`.
    fn inverse(&self, idx: usize) -> T {
        let bin = self.bin[idx];
        let width = self.grid[bin + 1] - self.grid[bin];
        (T::from_usize(bin).unwrap() + (self.data[idx] - self.grid[bin]) / width)
            / T::from_usize(self.histogram.len()).unwrap()
    }

    fn find_bin(&self, x: T) -> usize {
        let hint = self.grid.partition_point(|g| *g <= x);
        hint.saturating_sub(1).min(self.histogram.len() - 1)
    }

    /// Proposal density of an arbitrary point under the current map; zero
    /// outside `[lower, upper)`.
    pub fn density(&self, x: T) -> T {
        if x < self.lower || x >= self.upper {
            return T::zero();
        }
        let bin = self.find_bin(x);
        ((self.grid[bin + 1] - self.grid[bin]) * T::from_usize(self.histogram.len()).unwrap())
            .recip()
    }

    /// Draws a fresh sample from the map into slot `idx` and returns the
    /// inverse proposal density $1 / q_\mathrm{new}$.
    pub fn create<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let y: T = rng.gen();
        self.map_slot(idx, y);
        self.prob[idx].recip()
    }

    /// Density of the sample currently held by slot `idx`, used when the slot
    /// is abandoned by a dimension-changing proposal.
    pub fn remove(&mut self, idx: usize) -> T {
        self.density(self.data[idx])
    }

    /// Proposes a new value for slot `idx` and returns the proposal ratio
    /// $q_\mathrm{old} / q_\mathrm{new}$.
    ///
    /// With probability one half the slot is redrawn from the map; otherwise
    /// the map-space position is perturbed by up to `±0.2` with wrap-around.
    /// The previous sample is kept in the scratch slot for rollback.
    pub fn shift<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let scratch = self.scratch();
        self.data[scratch] = self.data[idx];
        self.prob[scratch] = self.prob[idx];
        self.bin[scratch] = self.bin[idx];

        let q_old = self.prob[idx];
        let choice: T = rng.gen();
        if choice < T::from_f64(0.5).unwrap() {
            let y: T = rng.gen();
            self.map_slot(idx, y);
        } else {
            let width = T::from_f64(SHIFT_WIDTH).unwrap();
            let u: T = rng.gen();
            let mut y = self.inverse(idx) + (u + u - T::one()) * width;
            if y >= T::one() {
                y = y - T::one();
            }
            if y < T::zero() {
                y = y + T::one();
            }
            self.map_slot(idx, y);
        }

        q_old / self.prob[idx]
    }

    /// Restores slot `idx` from the scratch slot.
    pub fn shift_rollback(&mut self, idx: usize) {
        let scratch = self.scratch();
        self.data[idx] = self.data[scratch];
        self.prob[idx] = self.prob[scratch];
        self.bin[idx] = self.bin[scratch];
    }

    /// Exchanges the samples of two slots; the proposal ratio is one.
    pub fn swap(&mut self, a: usize, b: usize) -> T {
        self.data.swap(a, b);
        self.prob.swap(a, b);
        self.bin.swap(a, b);
        T::one()
    }

    /// Undoes a swap of the same two slots.
    pub fn swap_rollback(&mut self, a: usize, b: usize) {
        let _ = self.swap(a, b);
    }

    /// Adds `weight` to the histogram bin that produced the sample in slot
    /// `idx`.
    pub fn accumulate(&mut self, idx: usize, weight: T) {
        if self.adapt && weight.is_finite() {
            self.histogram[self.bin[idx]] += weight;
        }
    }

    /// Fills every non-reserved slot outside the scratch slot with a fresh
    /// sample from the map.
    pub fn initialize<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        for idx in self.offset..self.capacity() - 1 {
            let _ = self.create(idx, rng);
        }
    }

    /// Retrains the map from the accumulated histogram and resets the
    /// histogram to its floor.
    ///
    /// The accumulated weights are smoothed over neighbouring increments,
    /// sharpened with the exponent `alpha`, and the interior grid points are
    /// moved so that every increment carries the same share of the total
    /// importance. The endpoints stay fixed.
    pub fn train(&mut self) {
        if !self.adapt {
            self.reset_histogram();
            return;
        }

        let n = self.histogram.len();
        let mut smoothed = self.histogram.clone();
        if n > 2 {
            let six = T::from_f64(6.0).unwrap();
            let seven = T::from_f64(7.0).unwrap();
            let eight = T::from_f64(8.0).unwrap();
            smoothed[0] = (seven * self.histogram[0] + self.histogram[1]) / eight;
            smoothed[n - 1] = (self.histogram[n - 2] + seven * self.histogram[n - 1]) / eight;
            for i in 1..n - 1 {
                smoothed[i] = (self.histogram[i - 1]
                    + six * self.histogram[i]
                    + self.histogram[i + 1])
                    / eight;
            }
        }

        let mut sum = T::zero();
        for s in &smoothed {
            sum += *s;
        }
        if sum <= T::zero() {
            self.reset_histogram();
            return;
        }

        let mut total = T::zero();
        for s in &mut smoothed {
            let r = *s / sum;
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
            *s = w;
            total += w;
        }
        if total <= T::zero() {
            self.reset_histogram();
            return;
        }

        // move every interior grid point to the spot where the accumulated
        // importance equals its share of the total
        let target = total / T::from_usize(n).unwrap();
        let mut new_grid = self.grid.clone();
        let mut acc = T::zero();
        let mut j = 0;
        for (k, point) in new_grid.iter_mut().enumerate().take(n).skip(1) {
            let goal = target * T::from_usize(k).unwrap();
            while j < n - 1 && acc + smoothed[j] < goal {
                acc += smoothed[j];
                j += 1;
            }
            let depth = if smoothed[j] > T::zero() {
                (goal - acc) / smoothed[j]
            } else {
                T::zero()
            };
            *point = self.grid[j] + depth * (self.grid[j + 1] - self.grid[j]);
        }
        new_grid[0] = self.lower;
        new_grid[n] = self.upper;
        self.grid = new_grid;

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

    fn reset_histogram(&mut self) {
        let floor = T::from_f64(TINY).unwrap();
        for h in &mut self.histogram {
            *h = floor;
        }
    }
}
