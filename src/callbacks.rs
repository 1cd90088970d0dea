//! Implementation of different callback functions.

use crate::core::estimators::{BasicEstimators, MeanVar, WeightedAverage};
use crate::core::{Checkpoint, McFloat};

/// Trait for implementing callbacks for iterative MC algorithms.
pub trait Callback<T, R> {
    /// This method is called after each successfully finished iteration and
    /// may print information about it.
    fn print(&self, chkpts: &[Checkpoint<T, R>]);
}

/// A callback function that does nothing.
pub struct SinkCallback {}

impl<T, R> Callback<T, R> for SinkCallback {
    fn print(&self, _: &[Checkpoint<T, R>]) {}
}

/// A callback function that prints the result of each individual iteration.
pub struct SimpleCallback {}

impl<T, R> Callback<T, R> for SimpleCallback
where
    T: McFloat,
{
    fn print(&self, chkpts: &[Checkpoint<T, R>]) {
        if let Some(chkpt) = chkpts.last() {
            let iteration = chkpts.len() - 1;
            println!("iteration {iteration} finished.");
            for (k, estimator) in chkpt.estimators().iter().enumerate() {
                println!(
                    "integrand {}: E={} \u{b1} {}",
                    k,
                    estimator.mean(),
                    estimator.std()
                );
            }
        }
    }
}

/// Simple cumulative callback that shows the result of the individual
/// iteration together with the combined result over all iterations so far.
pub struct SimpleCumulativeCallback {}

impl<T, R> Callback<T, R> for SimpleCumulativeCallback
where
    T: McFloat,
{
    fn print(&self, chkpts: &[Checkpoint<T, R>]) {
        let Some(chkpt) = chkpts.last() else {
            return;
        };
        let iteration = chkpts.len() - 1;

        for (k, estimator) in chkpt.estimators().iter().enumerate() {
            let history = chkpts
                .iter()
                .map(|c| c.estimators()[k])
                .collect::<Vec<MeanVar<T>>>();
            let combined = WeightedAverage::from_history(&history);

            println!(
                "[iteration {}, integrand {}: E={} \u{b1} {}] [cumulative: E={} \u{b1} {}, chi2/dof={}]",
                iteration,
                k,
                estimator.mean(),
                estimator.std(),
                combined.mean(),
                combined.std(),
                combined.chi2()
            );
        }
    }
}
