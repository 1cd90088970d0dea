//! This module contains everything related to estimators.

use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Floor applied to a standard error before it is inverted into a combination
/// weight, so that an exactly-zero error (constant integrand) does not divide
/// by zero.
const ERROR_FLOOR: f64 = 1e-10;

/// Basic estimators, like the mean, variance, and the standard deviation.
pub trait BasicEstimators<T: Float> {
    /// Returns the mean value.
    fn mean(&self) -> T;

    /// Returns the variance, $V$.
    fn var(&self) -> T;

    /// Returns the standard deviation, $\sigma = \sqrt{V}$.
    fn std(&self) -> T {
        self.var().sqrt()
    }
}

/// A struct implementing the `BasicEstimators<T>` trait.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct MeanVar<T> {
    mean: T,
    var: T,
}

impl<T> MeanVar<T> {
    /// Constructor.
    pub const fn new(mean: T, var: T) -> Self {
        Self { mean, var }
    }
}

impl<T: Float> BasicEstimators<T> for MeanVar<T> {
    fn mean(&self) -> T {
        self.mean
    }

    fn var(&self) -> T {
        self.var
    }
}

/// Inverse-variance weighted combination of per-iteration estimates.
///
/// Given the per-iteration pairs $(m_i, e_i)$ the combination uses the weights
/// $w_i = 1/e_i^2$ and exposes
///
/// $$ \bar{m} = \frac{\sum w_i m_i}{\sum w_i}, \qquad
///    \bar{e} = \frac{1}{\sqrt{\sum w_i}}, \qquad
///    \chi^2_\nu = \frac{\sum w_i (m_i - \bar{m})^2}{n - 1}. $$
///
/// The reduced chi-square is the consistency check between iterations; values
/// far above one indicate that the per-iteration errors are underestimated.
#[derive(Clone, Copy, Debug)]
pub struct WeightedAverage<T> {
    mean: T,
    var: T,
    chi2: T,
}

impl<T: Float> WeightedAverage<T> {
    /// Combine a history of per-iteration estimators into a single estimate.
    ///
    /// An empty history yields a zero estimate with zero weight.
    pub fn from_history(history: &[MeanVar<T>]) -> Self {
        let floor = T::from(ERROR_FLOOR).unwrap();

        let mut weight_sum = T::zero();
        let mut mean_sum = T::zero();
        for entry in history {
            let err = entry.std().max(floor);
            let weight = (err * err).recip();
            weight_sum = weight_sum + weight;
            mean_sum = mean_sum + weight * entry.mean();
        }

        if weight_sum == T::zero() {
            return Self {
                mean: T::zero(),
                var: T::zero(),
                chi2: T::zero(),
            };
        }

        let mean = mean_sum / weight_sum;
        let var = weight_sum.recip();

        let chi2 = if history.len() > 1 {
            let mut sum = T::zero();
            for entry in history {
                let err = entry.std().max(floor);
                let weight = (err * err).recip();
                let diff = entry.mean() - mean;
                sum = sum + weight * diff * diff;
            }
            sum / T::from(history.len() - 1).unwrap()
        } else {
            T::zero()
        };

        Self { mean, var, chi2 }
    }

    /// Returns the reduced chi-square over the combined iterations.
    pub fn chi2(&self) -> T {
        self.chi2
    }
}

impl<T: Float> BasicEstimators<T> for WeightedAverage<T> {
    fn mean(&self) -> T {
        self.mean
    }

    fn var(&self) -> T {
        self.var
    }
}

/// Format `mean ± std` as `mean(std)` with the uncertainty rounded to two
/// significant digits and the mean truncated to the matching decimal.
pub fn format_uncertainty(mean: f64, std: f64) -> String {
    if !mean.is_finite() || !std.is_finite() {
        return format!("{mean:e} ± {std:e}");
    }

    if std <= 0.0 {
        return format!("{mean}(0)");
    }

    // decimal position of the second significant digit of the error
    let digits = (1.0 - std.log10().floor()) as i32;

    if digits <= 0 {
        let scale = 10f64.powi(-digits);
        format!("{}({})", (mean / scale).round() * scale, std.round())
    } else {
        let scale = 10f64.powi(digits);
        format!("{:.*}({:.0})", digits as usize, mean, (std * scale).round())
    }
}
