//! Product pool binding several variable pools to the same slot index.

use super::Variable;
use crate::core::McFloat;
use crate::errors::{McError, McResult};
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A tuple of variable pools that are sampled, shifted, and swapped together,
/// slot by slot.
///
/// All children must share offset and capacity. The proposal density of a
/// slot is the product of the children's densities and is recomputed from the
/// children on every read, so it can never go stale.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Composite<T> {
    children: Vec<Variable<T>>,
}

impl<T: McFloat> Composite<T> {
    /// Binds `children` into a product pool.
    pub fn new(children: Vec<Variable<T>>) -> McResult<Self> {
        let first = children.first().ok_or(McError::EmptyVariableTuple)?;
        let offset = first.offset();
        let capacity = first.capacity();
        if children
            .iter()
            .any(|c| c.offset() != offset || c.capacity() != capacity)
        {
            return Err(McError::CompositeShape);
        }

        Ok(Self { children })
    }

    /// The bound pools, in the order they were given.
    pub fn children(&self) -> &[Variable<T>] {
        &self.children
    }

    /// Number of slots, scratch slot included.
    pub fn capacity(&self) -> usize {
        self.children[0].capacity()
    }

    /// Number of reserved leading slots.
    pub fn offset(&self) -> usize {
        self.children[0].offset()
    }

    /// Whether any child retrains between iterations.
    pub fn adapt(&self) -> bool {
        self.children.iter().any(Variable::adapt)
    }

    /// Product of the children's proposal densities at slot `idx`.
    pub fn prob(&self, idx: usize) -> T {
        self.children
            .iter()
            .fold(T::one(), |acc, c| acc * c.prob(idx))
    }

    /// Draws every child at slot `idx`; returns the product of the inverse
    /// proposal densities, or zero if any child is degenerate.
    pub fn create<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let mut ratio = T::one();
        for child in &mut self.children {
            let r = child.create(idx, rng);
            if r <= T::zero() {
                return T::zero();
            }
            ratio = ratio * r;
        }
        ratio
    }

    /// Product of the children's densities of the samples in slot `idx`.
    pub fn remove(&mut self, idx: usize) -> T {
        self.children
            .iter_mut()
            .fold(T::one(), |acc, c| acc * c.remove(idx))
    }

    /// Shifts every child at slot `idx`; returns the product of the proposal
    /// ratios, or zero if any child is degenerate.
    pub fn shift<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let mut ratio = T::one();
        for child in &mut self.children {
            let r = child.shift(idx, rng);
            if r <= T::zero() {
                ratio = T::zero();
            }
            ratio = ratio * r;
        }
        ratio
    }

    /// Restores slot `idx` of every child from its scratch slot.
    pub fn shift_rollback(&mut self, idx: usize) {
        for child in &mut self.children {
            child.shift_rollback(idx);
        }
    }

    /// Exchanges two slots in every child; the proposal ratio is one.
    pub fn swap(&mut self, a: usize, b: usize) -> T {
        for child in &mut self.children {
            let _ = child.swap(a, b);
        }
        T::one()
    }

    /// Undoes a swap of the same two slots.
    pub fn swap_rollback(&mut self, a: usize, b: usize) {
        let _ = self.swap(a, b);
    }

    /// Accumulates `weight` into every adaptive child.
    pub fn accumulate(&mut self, idx: usize, weight: T) {
        for child in &mut self.children {
            child.accumulate(idx, weight);
        }
    }

    /// Fills every child's non-reserved slots with fresh samples.
    pub fn initialize<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        for child in &mut self.children {
            child.initialize(rng);
        }
    }

    /// Retrains every adaptive child.
    pub fn train(&mut self) {
        for child in &mut self.children {
            child.train();
        }
    }

    /// Merges the histograms of another composite, child by child.
    pub fn merge_histogram(&mut self, other: &Self) {
        debug_assert_eq!(self.children.len(), other.children.len());
        for (c, o) in self.children.iter_mut().zip(&other.children) {
            c.merge_histogram(o);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{Continuous, Discrete};
    use assert_approx_eq::assert_approx_eq;
    use rand_pcg::Pcg64;

    fn rng() -> Pcg64 {
        Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96)
    }

    fn pair() -> Composite<f64> {
        Composite::new(vec![
            Variable::Continuous(Continuous::new(0.0, 1.0).unwrap().with_grid_size(8)),
            Variable::Discrete(Discrete::new(0, 3).unwrap()),
        ])
        .unwrap()
    }

    #[test]
    fn slot_probability_is_the_product_of_the_children() {
        let mut composite = pair();
        let mut rng = rng();

        let ratio = composite.create(0, &mut rng);
        let expected = composite.children()[0].prob(0) * composite.children()[1].prob(0);
        assert_approx_eq!(composite.prob(0), expected, 1e-14);
        assert_approx_eq!(ratio, 1.0 / expected, 1e-12);
    }

    #[test]
    fn shift_rollback_restores_every_child() {
        let mut composite = pair();
        let mut rng = rng();
        composite.initialize(&mut rng);

        let before: Vec<f64> = (0..composite.capacity() - 1)
            .map(|i| composite.prob(i))
            .collect();

        for _ in 0..50 {
            let _ = composite.shift(1, &mut rng);
            composite.shift_rollback(1);
        }

        for (i, b) in before.iter().enumerate() {
            assert_eq!(composite.prob(i), *b);
        }
    }

    #[test]
    fn mismatched_children_are_rejected() {
        let narrow = Continuous::<f64>::new(0.0, 1.0)
            .unwrap()
            .with_capacity(4)
            .unwrap();
        let wide = Continuous::<f64>::new(0.0, 1.0).unwrap();
        assert!(Composite::new(vec![
            Variable::Continuous(narrow),
            Variable::Continuous(wide),
        ])
        .is_err());
        assert!(Composite::<f64>::new(vec![]).is_err());
    }
}
