//! Momentum pool over a spherical shell around the Fermi surface.

use crate::core::McFloat;
use crate::errors::{McError, McResult};
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Largest factor by which a scale proposal stretches the momentum magnitude.
const SCALE_LAMBDA: f64 = 1.5;

/// A pool of free momenta drawn isotropically from the shell
/// $|k| \in [k_F - \delta k, k_F + \delta k)$.
///
/// The magnitude is uniform over the shell and the direction uniform over the
/// sphere (2-D: circle), so the proposal density of a three-dimensional
/// momentum is $1 / (2\delta k \cdot 2\pi \cdot \pi \sin\theta \, k^2)$ and of
/// a two-dimensional one $1 / (2\delta k \cdot 2\pi \, k)$.
///
/// This pool is not adaptive; training and histogram accumulation are no-ops.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FermiK<T> {
    data: Vec<[T; 3]>,
    prob: Vec<T>,
    offset: usize,
    dim: usize,
    k_fermi: T,
    delta_k: T,
    max_k: T,
}

impl<T: McFloat> FermiK<T> {
    /// Creates a pool of `dim`-dimensional momenta (`dim` is 2 or 3) around
    /// the Fermi momentum `k_fermi` with shell half width `delta_k` and
    /// magnitude cutoff `max_k`.
    pub fn new(dim: usize, k_fermi: T, delta_k: T, max_k: T) -> McResult<Self> {
        let valid = (dim == 2 || dim == 3)
            && k_fermi > T::zero()
            && delta_k > T::zero()
            && max_k >= k_fermi + delta_k;
        if !valid {
            return Err(McError::InvalidShell {
                dim,
                k_fermi: k_fermi.to_f64().unwrap_or(f64::NAN),
                delta_k: delta_k.to_f64().unwrap_or(f64::NAN),
                max_k: max_k.to_f64().unwrap_or(f64::NAN),
            });
        }

        let capacity = super::DEFAULT_CAPACITY;
        Ok(Self {
            data: vec![[T::zero(); 3]; capacity],
            prob: vec![T::one(); capacity],
            offset: 0,
            dim,
            k_fermi,
            delta_k,
            max_k,
        })
    }

    /// Reserves the first `offset` slots, typically external momenta set by
    /// the caller; they are never touched by proposals.
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
        self.data = vec![[T::zero(); 3]; capacity];
        self.prob = vec![T::one(); capacity];
        Ok(self)
    }

    /// Stores an external momentum in a reserved slot.
    pub fn set_momentum(&mut self, idx: usize, k: [T; 3]) {
        self.data[idx] = k;
        self.prob[idx] = T::one();
    }

    /// Number of slots, scratch slot included.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of reserved leading slots.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Spatial dimension of the momenta, 2 or 3.
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Momentum held by slot `idx`; the third component is zero in two
    /// dimensions.
    pub fn momentum(&self, idx: usize) -> [T; 3] {
        self.data[idx]
    }

    /// Proposal density of the sample held by slot `idx`.
    pub fn prob(&self, idx: usize) -> T {
        self.prob[idx]
    }

    const fn scratch(&self) -> usize {
        self.data.len() - 1
    }

    fn magnitude(&self, k: &[T; 3]) -> T {
        let planar = k[0] * k[0] + k[1] * k[1];
        if self.dim == 3 {
            (planar + k[2] * k[2]).sqrt()
        } else {
            planar.sqrt()
        }
    }

    /// Proposal density of an arbitrary momentum; zero for a vanishing
    /// magnitude or one beyond the cutoff.
    pub fn density(&self, k: &[T; 3]) -> T {
        let kamp = self.magnitude(k);
        if kamp <= T::zero() || kamp > self.max_k {
            return T::zero();
        }

        let two_pi = T::PI() + T::PI();
        let shell = self.delta_k + self.delta_k;
        if self.dim == 3 {
            let sin_theta = (k[0] * k[0] + k[1] * k[1]).sqrt() / kamp;
            let vol = shell * two_pi * T::PI() * sin_theta * kamp * kamp;
            if vol > T::zero() {
                vol.recip()
            } else {
                T::zero()
            }
        } else {
            (shell * two_pi * kamp).recip()
        }
    }

    /// Draws a fresh momentum from the shell into slot `idx` and returns the
    /// inverse proposal density, or zero for a degenerate draw.
    pub fn create<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let u: T = rng.gen();
        let kamp = self.k_fermi + (u + u - T::one()) * self.delta_k;
        if kamp <= T::zero() {
            return T::zero();
        }

        let two_pi = T::PI() + T::PI();
        let shell = self.delta_k + self.delta_k;
        let phi: T = rng.gen::<T>() * two_pi;

        if self.dim == 3 {
            let theta: T = rng.gen::<T>() * T::PI();
            let sin_theta = theta.sin();
            let vol = shell * two_pi * T::PI() * sin_theta * kamp * kamp;
            if vol <= T::zero() {
                return T::zero();
            }
            self.data[idx] = [
                kamp * sin_theta * phi.cos(),
                kamp * sin_theta * phi.sin(),
                kamp * theta.cos(),
            ];
            self.prob[idx] = vol.recip();
            vol
        } else {
            let vol = shell * two_pi * kamp;
            self.data[idx] = [kamp * phi.cos(), kamp * phi.sin(), T::zero()];
            self.prob[idx] = vol.recip();
            vol
        }
    }

    /// Density of the momentum currently held by slot `idx`, used when the
    /// slot is abandoned by a dimension-changing proposal.
    pub fn remove(&mut self, idx: usize) -> T {
        let k = self.data[idx];
        self.density(&k)
    }

    /// Proposes a new momentum for slot `idx` and returns the proposal ratio,
    /// or zero when the proposal leaves the allowed magnitude range.
    ///
    /// One of three sub-moves is chosen with equal probability: rescale the
    /// magnitude by a factor in $[1/\lambda, \lambda]$, rotate isotropically
    /// at fixed magnitude, or displace the momentum inside a cube of edge
    /// $\delta k$. The previous sample is kept in the scratch slot for
    /// rollback.
    pub fn shift<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let scratch = self.scratch();
        self.data[scratch] = self.data[idx];
        self.prob[scratch] = self.prob[idx];

        let ratio = match rng.gen_range(0..3) {
            0 => self.scale_move(idx, rng),
            1 => self.rotate_move(idx, rng),
            _ => self.cube_move(idx, rng),
        };
        if ratio <= T::zero() {
            return T::zero();
        }

        let k = self.data[idx];
        let q = self.density(&k);
        if q <= T::zero() {
            return T::zero();
        }
        self.prob[idx] = q;

        ratio
    }

    fn scale_move<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let lambda = T::from_f64(SCALE_LAMBDA).unwrap();
        let inv = lambda.recip();
        let u: T = rng.gen();
        let factor = inv + u * (lambda - inv);

        let kamp = self.magnitude(&self.data[idx]) * factor;
        if kamp <= T::zero() || kamp > self.max_k {
            return T::zero();
        }
        for component in &mut self.data[idx] {
            *component = *component * factor;
        }

        // the radial volume element absorbs the stretch in three dimensions
        if self.dim == 3 {
            factor
        } else {
            T::one()
        }
    }

    fn rotate_move<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let kamp = self.magnitude(&self.data[idx]);
        if kamp <= T::zero() {
            return T::zero();
        }

        let two_pi = T::PI() + T::PI();
        let phi: T = rng.gen::<T>() * two_pi;
        if self.dim == 3 {
            let k = &self.data[idx];
            let sin_old = (k[0] * k[0] + k[1] * k[1]).sqrt() / kamp;
            if sin_old <= T::zero() {
                return T::zero();
            }
            let theta: T = rng.gen::<T>() * T::PI();
            let sin_new = theta.sin();
            self.data[idx] = [
                kamp * sin_new * phi.cos(),
                kamp * sin_new * phi.sin(),
                kamp * theta.cos(),
            ];
            sin_new / sin_old
        } else {
            self.data[idx] = [kamp * phi.cos(), kamp * phi.sin(), T::zero()];
            T::one()
        }
    }

    fn cube_move<R>(&mut self, idx: usize, rng: &mut R) -> T
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        let half = T::from_f64(0.5).unwrap();
        for component in self.data[idx].iter_mut().take(self.dim) {
            let u: T = rng.gen();
            *component = *component + (u - half) * self.delta_k;
        }

        let kamp = self.magnitude(&self.data[idx]);
        if kamp <= T::zero() || kamp > self.max_k {
            return T::zero();
        }
        T::one()
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

    /// Fills every non-reserved slot outside the scratch slot with a fresh
    /// momentum, redrawing degenerate proposals.
    pub fn initialize<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
        Standard: Distribution<T>,
    {
        for idx in self.offset..self.capacity() - 1 {
            let mut drawn = false;
            for _ in 0..100 {
                if self.create(idx, rng) > T::zero() {
                    drawn = true;
                    break;
                }
            }
            if !drawn {
                log::warn!("no valid momentum after 100 draws; the shell may be degenerate");
            }
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

    fn magnitude(k: &[f64; 3]) -> f64 {
        (k[0] * k[0] + k[1] * k[1] + k[2] * k[2]).sqrt()
    }

    #[test]
    fn create_stays_inside_the_shell() {
        let mut pool = FermiK::new(3, 1.0, 0.5, 10.0).unwrap();
        let mut rng = rng();

        for _ in 0..1000 {
            let ratio = pool.create(0, &mut rng);
            assert!(ratio > 0.0);
            let kamp = magnitude(&pool.momentum(0));
            assert!((0.5..1.5).contains(&kamp), "kamp = {kamp}");
            assert_approx_eq!(pool.prob(0), 1.0 / ratio, 1e-12);
            assert_approx_eq!(pool.prob(0), pool.density(&pool.momentum(0)), 1e-12);
        }
    }

    #[test]
    fn two_dimensional_momenta_stay_planar() {
        let mut pool = FermiK::new(2, 1.0, 0.2, 5.0).unwrap();
        let mut rng = rng();

        for _ in 0..100 {
            let ratio = pool.create(1, &mut rng);
            assert!(ratio > 0.0);
            assert_eq!(pool.momentum(1)[2], 0.0);
        }
    }

    #[test]
    fn shift_rollback_restores_the_slot() {
        let mut pool = FermiK::new(3, 1.0, 0.5, 10.0).unwrap();
        let mut rng = rng();
        pool.initialize(&mut rng);

        let data: Vec<_> = (0..pool.capacity() - 1).map(|i| pool.momentum(i)).collect();
        let prob: Vec<_> = (0..pool.capacity() - 1).map(|i| pool.prob(i)).collect();

        for _ in 0..300 {
            let _ = pool.shift(4, &mut rng);
            pool.shift_rollback(4);
            for i in 0..pool.capacity() - 1 {
                assert_eq!(pool.momentum(i), data[i]);
                assert_eq!(pool.prob(i), prob[i]);
            }
        }
    }

    #[test]
    fn shift_keeps_the_magnitude_bounded() {
        let mut pool = FermiK::new(3, 1.0, 0.5, 2.0).unwrap();
        let mut rng = rng();
        pool.initialize(&mut rng);

        for _ in 0..500 {
            let ratio = pool.shift(0, &mut rng);
            if ratio <= 0.0 {
                pool.shift_rollback(0);
            }
            let kamp = magnitude(&pool.momentum(0));
            assert!(kamp > 0.0 && kamp <= 2.0, "kamp = {kamp}");
        }
    }

    #[test]
    fn invalid_shells_are_rejected() {
        assert!(FermiK::<f64>::new(4, 1.0, 0.5, 10.0).is_err());
        assert!(FermiK::<f64>::new(3, -1.0, 0.5, 10.0).is_err());
        assert!(FermiK::<f64>::new(3, 1.0, 0.5, 1.0).is_err());
    }
}
