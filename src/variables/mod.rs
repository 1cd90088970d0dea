//! Variable pools holding the sampled points of each integration variable.
//!
//! A pool stores a fixed-capacity array of sample slots together with the
//! proposal density of every slot, so that proposals never allocate and the
//! latest shift can be undone in constant time through the scratch slot. The
//! adaptive kinds additionally carry a histogram of accumulated weights from
//! which their importance-sampling map is retrained between iterations.

pub mod composite;
pub mod continuous;
pub mod discrete;
pub mod fermik;

pub use composite::Composite;
pub use continuous::Continuous;
pub use discrete::Discrete;
pub use fermik::FermiK;

use crate::core::McFloat;
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Floor kept in every histogram bin so that training never divides by zero.
pub const TINY: f64 = 1e-10;

/// Default pool capacity: sixteen sample slots plus the scratch slot.
pub(crate) const DEFAULT_CAPACITY: usize = 17;

/// A variable pool of any kind, with a common operation set.
///
/// Every operation that proposes a change returns the forward proposal ratio
/// $q_\mathrm{old} / q_\mathrm{new}$ to be applied against the integrand
/// ratio in a Metropolis step; a zero return marks a degenerate proposal that
/// must be rejected. Dispatch is by plain matching, and [`Composite`] pools
/// forward to their children.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Variable<T> {
    /// Scalar in a real interval, sampled through an adaptive map.
    Continuous(Continuous<T>),
    /// Integer in a finite range, sampled from an adaptive categorical
    /// distribution.
    Discrete(Discrete<T>),
    /// Momentum drawn from a spherical shell; not adaptive.
    FermiK(FermiK<T>),
    /// Several pools bound to the same slot index.
    Composite(Composite<T>),
}

impl<T: McFloat> Variable<T> {
    /// Number of slots, scratch slot included.
    pub fn capacity(&self) -> usize {
        match self {
            Self::Continuous(v) => v.capacity(),
            Self::Discrete(v) => v.capacity(),
            Self::FermiK(v) => v.capacity(),
            Self::Composite(v) => v.capacity(),
        }
    }

    /// Number of reserved leading slots.
    pub fn offset(&self) -> usize {
        match self {
            Self::Continuous(v) => v.offset(),
            Self::Discrete(v) => v.offset(),
            Self::FermiK(v) => v.offset(),
            Self::Composite(v) => v.offset(),
        }
    }

    /// Whether this pool retrains between iterations.
    pub fn adapt(&self) -> bool {
        match self {
            Self::Continuous(v) => v.adapt(),
            Self::Discrete(v) => v.adapt(),
            Self::FermiK(_) => false,
            Self::Composite(v) => v.adapt(),
        }
    }

    /// Proposal density of the sample held by slot `idx`.
    pub fn prob(&self, idx: usize) -> T {
        match self {
            Self::Continuous(v) => v.prob(idx),
            Self::Discrete(v) => v.prob(idx),
            Self::FermiK(v) => v.prob(idx),
            Self::Composite(v) => v.prob(idx),
        }
    }

    /// Draws a fresh sample into slot `idx` and returns the inverse proposal
    /// density, or zero for a degenerate draw.
    pub fn create<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        match self {
            Self::Continuous(v) => v.create(idx, rng),
            Self::Discrete(v) => v.create(idx, rng),
            Self::FermiK(v) => v.create(idx, rng),
            Self::Composite(v) => v.create(idx, rng),
        }
    }

    /// Density of the sample currently held by slot `idx`, used when the slot
    /// is abandoned by a dimension-changing proposal.
    pub fn remove(&mut self, idx: usize) -> T {
        match self {
            Self::Continuous(v) => v.remove(idx),
            Self::Discrete(v) => v.remove(idx),
            Self::FermiK(v) => v.remove(idx),
            Self::Composite(v) => v.remove(idx),
        }
    }

    /// Proposes a new value for slot `idx` and returns the proposal ratio
    /// $q_\mathrm{old} / q_\mathrm{new}$, or zero for a degenerate proposal.
    /// The previous sample is kept for rollback.
    pub fn shift<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        match self {
            Self::Continuous(v) => v.shift(idx, rng),
            Self::Discrete(v) => v.shift(idx, rng),
            Self::FermiK(v) => v.shift(idx, rng),
            Self::Composite(v) => v.shift(idx, rng),
        }
    }

    /// Restores slot `idx` from the scratch slot.
    pub fn shift_rollback(&mut self, idx: usize) {
        match self {
            Self::Continuous(v) => v.shift_rollback(idx),
            Self::Discrete(v) => v.shift_rollback(idx),
            Self::FermiK(v) => v.shift_rollback(idx),
            Self::Composite(v) => v.shift_rollback(idx),
        }
    }

    /// Exchanges the samples of two slots; the proposal ratio is one.
    pub fn swap(&mut self, a: usize, b: usize) -> T {
        match self {
            Self::Continuous(v) => v.swap(a, b),
            Self::Discrete(v) => v.swap(a, b),
            Self::FermiK(v) => v.swap(a, b),
            Self::Composite(v) => v.swap(a, b),
        }
    }

    /// Undoes a swap of the same two slots.
    pub fn swap_rollback(&mut self, a: usize, b: usize) {
        match self {
            Self::Continuous(v) => v.swap_rollback(a, b),
            Self::Discrete(v) => v.swap_rollback(a, b),
            Self::FermiK(v) => v.swap_rollback(a, b),
            Self::Composite(v) => v.swap_rollback(a, b),
        }
    }

    /// Adds `weight` to the histogram bin that produced the sample in slot
    /// `idx`; a no-op for non-adaptive pools.
    pub fn accumulate(&mut self, idx: usize, weight: T) {
        match self {
            Self::Continuous(v) => v.accumulate(idx, weight),
            Self::Discrete(v) => v.accumulate(idx, weight),
            Self::FermiK(_) => {}
            Self::Composite(v) => v.accumulate(idx, weight),
        }
    }

    /// Fills every non-reserved slot outside the scratch slot with a fresh
    /// sample, so that all slot probabilities are strictly positive.
    pub fn initialize<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        match self {
            Self::Continuous(v) => v.initialize(rng),
            Self::Discrete(v) => v.initialize(rng),
            Self::FermiK(v) => v.initialize(rng),
            Self::Composite(v) => v.initialize(rng),
        }
    }

    /// Retrains the importance-sampling map from the accumulated histogram;
    /// a no-op for non-adaptive pools.
    pub fn train(&mut self) {
        match self {
            Self::Continuous(v) => v.train(),
            Self::Discrete(v) => v.train(),
            Self::FermiK(_) => {}
            Self::Composite(v) => v.train(),
        }
    }

    /// Merges the histograms of another pool of the same kind, used for the
    /// cross-block reduction before training.
    pub fn merge_histogram(&mut self, other: &Self) {
        match (self, other) {
            (Self::Continuous(v), Self::Continuous(o)) => v.merge_histogram(o),
            (Self::Discrete(v), Self::Discrete(o)) => v.merge_histogram(o),
            (Self::FermiK(_), Self::FermiK(_)) => {}
            (Self::Composite(v), Self::Composite(o)) => v.merge_histogram(o),
            _ => debug_assert!(false, "histogram merge across pool kinds"),
        }
    }

    /// The continuous pool behind this variable, if it is one.
    pub const fn as_continuous(&self) -> Option<&Continuous<T>> {
        match self {
            Self::Continuous(v) => Some(v),
            _ => None,
        }
    }

    /// The discrete pool behind this variable, if it is one.
    pub const fn as_discrete(&self) -> Option<&Discrete<T>> {
        match self {
            Self::Discrete(v) => Some(v),
            _ => None,
        }
    }

    /// The momentum pool behind this variable, if it is one.
    pub const fn as_fermi_k(&self) -> Option<&FermiK<T>> {
        match self {
            Self::FermiK(v) => Some(v),
            _ => None,
        }
    }

    /// The composite pool behind this variable, if it is one.
    pub const fn as_composite(&self) -> Option<&Composite<T>> {
        match self {
            Self::Composite(v) => Some(v),
            _ => None,
        }
    }
}
