//! The iteration controller and the sampling engines it drives.

mod mcmc;
mod vegas;
mod vegasmc;

use crate::callbacks::Callback;
use crate::configuration::Configuration;
use crate::core::estimators::MeanVar;
use crate::core::{Checkpoint, Integrand, IntegrationResult, McFloat, Measure, Settings, Solver};
use crate::errors::{McError, McResult};
use rand::distributions::{Distribution, Standard};
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Stopwatch polled by the inner loops every thousand steps; firing only
/// emits a log line and never touches the integration state.
pub(crate) struct ProgressTimer {
    interval: Option<Duration>,
    last: Instant,
}

impl ProgressTimer {
    pub(crate) fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    pub(crate) fn due(&mut self) -> bool {
        match self.interval {
            Some(interval) if self.last.elapsed() >= interval => {
                self.last = Instant::now();
                true
            }
            _ => false,
        }
    }
}

fn validate(settings: &Settings) -> McResult<()> {
    if settings.workers == 0 {
        return Err(McError::InvalidSettings(
            "at least one worker is required".to_owned(),
        ));
    }
    if settings.block == 0 {
        return Err(McError::InvalidSettings(
            "at least one block is required".to_owned(),
        ));
    }
    if settings.niter == 0 {
        return Err(McError::InvalidSettings(
            "at least one iteration is required".to_owned(),
        ));
    }
    if settings.measurefreq == 0 {
        return Err(McError::InvalidSettings(
            "the measurement frequency must be positive".to_owned(),
        ));
    }
    if let Some(snapshot) = &settings.save {
        if snapshot.every == 0 {
            return Err(McError::InvalidSettings(
                "the snapshot period must be positive".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Runs the configured number of iterations of the chosen engine and
/// combines them into an [`IntegrationResult`].
///
/// Each iteration distributes its blocks over the worker threads; every block
/// owns a clone of the configuration with a deterministically derived seed,
/// so a run with fixed seed and block layout is reproducible regardless of
/// the worker count. After the cross-block reduction the adaptive maps are
/// retrained from the merged histograms, the reweight vector is retuned from
/// the visit counts, and the per-iteration estimators are appended to the
/// history together with a configuration snapshot.
///
/// The `config` argument may come from [`Configuration::new`] or from a
/// deserialized snapshot of an earlier run, in which case the learned maps
/// carry over.
pub fn integrate<T, R, I, M, C>(
    integrand: &I,
    measure: &M,
    mut config: Configuration<T, R>,
    settings: &Settings,
    callback: &C,
) -> McResult<IntegrationResult<T, R>>
where
    T: McFloat,
    R: Rng + SeedableRng + Clone + Send + Sync + Serialize,
    I: Integrand<T>,
    M: Measure<T>,
    C: Callback<T, R>,
    Standard: Distribution<T>,
{
    validate(settings)?;

    let workers = settings.workers;
    let blocks = settings.block.div_ceil(workers) * workers;
    let neval_block = (settings.neval / blocks as u64).max(1);
    let n = config.integrands();

    let mut checkpoints = Vec::with_capacity(settings.niter);
    let mut total_neval: u64 = 0;

    for iteration in 0..settings.niter {
        let root = &config;
        let worker_results = crossbeam::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                handles.push(scope.spawn(move |_| -> McResult<_> {
                    let mut finished: Vec<(usize, Vec<T>, Configuration<T, R>)> = Vec::new();

                    let mut block = worker;
                    while block < blocks {
                        let mut cfg = root.clone();
                        let stream =
                            (iteration as u64) * (blocks as u64) + block as u64 + 1;
                        cfg.reseed(stream);

                        let block_means = match settings.solver {
                            Solver::Vegas => vegas::integrate_block(
                                integrand, measure, &mut cfg, neval_block, settings,
                            )?,
                            Solver::VegasMc => vegasmc::integrate_block(
                                integrand, measure, &mut cfg, neval_block, settings,
                            )?,
                            Solver::Mcmc => mcmc::integrate_block(
                                integrand, measure, &mut cfg, neval_block, settings,
                            )?,
                        };
                        finished.push((block, block_means, cfg));
                        block += workers;
                    }

                    Ok(finished)
                }));
            }

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        // the reduction: sum the block means and their squares, and fold the
        // block histograms and counters into the root configuration. Blocks
        // are reduced in block order so the outcome does not depend on how
        // they were distributed over the workers.
        let mut reduced = Vec::with_capacity(blocks);
        for result in worker_results {
            reduced.extend(result?);
        }
        reduced.sort_by_key(|(block, _, _)| *block);
        if reduced.len() != blocks {
            return Err(McError::BlockMismatch {
                expected: blocks,
                found: reduced.len(),
            });
        }

        let mut obs_sum = vec![T::zero(); n];
        let mut obs_sq_sum = vec![T::zero(); n];
        for (_, block_means, cfg) in &reduced {
            for (k, m) in block_means.iter().enumerate() {
                obs_sum[k] += *m;
                obs_sq_sum[k] += *m * *m;
            }
            config.merge_statistics(cfg);
        }

        let b = T::from_usize(blocks).unwrap();
        let estimators = (0..n)
            .map(|k| {
                let mean = obs_sum[k] / b;
                let var = if blocks > 1 {
                    ((obs_sq_sum[k] / b - mean * mean) / (b - T::one())).max(T::zero())
                } else {
                    T::zero()
                };
                MeanVar::new(mean, var)
            })
            .collect::<Vec<_>>();

        total_neval += config.neval();

        config.train();
        if settings.solver != Solver::Vegas && total_neval >= settings.reweight_after {
            config.retune_reweight(settings.reweight_alpha, settings.reweight_remap);
        }
        config.log_acceptance(iteration);

        checkpoints.push(Checkpoint::new(estimators, config.clone()));
        callback.print(&checkpoints);

        if let Some(snapshot) = &settings.save {
            if (iteration + 1) % snapshot.every == 0 {
                save_snapshot(&config, snapshot)?;
            }
        }

        config.clear_statistics();
    }

    Ok(IntegrationResult::new(checkpoints, settings.ignore))
}

fn save_snapshot<T, R>(
    config: &Configuration<T, R>,
    snapshot: &crate::core::Snapshot,
) -> McResult<()>
where
    T: McFloat,
    R: Serialize,
{
    let json = serde_json::to_string(config).map_err(|err| McError::Snapshot {
        path: snapshot.path.clone(),
        reason: err.to_string(),
    })?;
    std::fs::write(&snapshot.path, json).map_err(|err| McError::Snapshot {
        path: snapshot.path.clone(),
        reason: err.to_string(),
    })
}
