#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! The crate `mcmix` provides adaptive [Monte Carlo integration] routines for
//! high-dimensional [integrals] whose integrand evaluations are expensive and
//! whose integration variables may be of mixed type: continuous real
//! intervals, discrete index sets, or free momenta drawn from a spherical
//! shell. It is aimed at quantum field-theoretic and statistical-physics
//! calculations in which several related integrands share the same underlying
//! random variables and must be estimated simultaneously with
//! correlated-sample statistics.
//!
//! # Features
//!
//! This library was designed with the following features as essential in
//! mind:
//!
//! - **Mixed variable pools**. Integration variables live in fixed-capacity
//! sample pools ([`variables::Continuous`], [`variables::Discrete`],
//! [`variables::FermiK`], and [`variables::Composite`] products thereof) that
//! propose moves without allocating and can undo the latest proposal in
//! constant time.
//! - **Simultaneous integrands**. A single run estimates a whole family of
//! integrands on shared samples. A degrees-of-freedom table declares how many
//! slots of each pool every integrand consumes, and a synthetic normalization
//! integrand ties the family together.
//! - **Three sampling engines**. Independent importance sampling through a
//! product of learned maps ([`Solver::Vegas`]), a reweighted Markov chain
//! over the padded integrand mixture that observes all integrands each step
//! ([`Solver::VegasMc`]), and a plain Markov chain over the joint state of
//! integrand and sample ([`Solver::Mcmc`]).
//! - **Adaptive maps**. The continuous and discrete pools retrain their
//! importance-sampling maps between iterations from accumulated weight
//! histograms, and the mixture reweights retune themselves to balance the
//! visits between integrands.
//! - **Generic numeric type**. The numeric type is a generic parameter, so
//! the routines can be used with either `f32`, `f64`, or a custom type
//! implementing the `Float` trait from the `num-traits` crate.
//! - **Generic random number generator**. Every random number generator that
//! implements the `Rng` trait from the `rand` crate can be used.
//! - **Reproducibility**. Results depend only on the seed and the block
//! layout, never on the number of worker threads: every block derives its
//! generator deterministically from the base seed and its own index.
//! - **Non-finite number filtering**. An integrand returning `inf` or `nan`
//! aborts the affected block with a diagnostic instead of silently poisoning
//! the learned maps.
//! - **Snapshots**. The complete sampling state, learned maps included,
//! serializes losslessly, so long runs can be inspected or resumed.
//!
//! # What is ...?
//!
//! This section is a dictionary of terms that are used in this documentation.
//!
//! - the number of *evaluations* (`neval`) is the number of times the
//! integrand family is called per iteration. We assume that this is the
//! expensive operation;
//! - a *block* is an independent sample run with its own configuration; the
//! unit of parallelism and of the statistical error estimate;
//! - an *iteration* is a round of blocks after which the maps retrain and the
//! reweights retune; the per-iteration estimates are combined with inverse
//! variance weights into the final mean, standard deviation, and reduced
//! chi-square;
//! - the *padding probability* of an integrand is the product of the proposal
//! densities of the slots that belong to the mixture but are unused by that
//! integrand; it puts all integrands on the common sample space;
//! - the *integrand mixture* is the density
//! $\sum_i r_i \, \mathrm{pad}_i \, |f_i|$ sampled by the reweighted chain,
//! with the synthetic normalization integrand ≡ 1 included.
//!
//! [Monte Carlo integration]: https://en.wikipedia.org/wiki/Monte_Carlo_integration
//! [integrals]: https://en.wikipedia.org/wiki/Integral

pub mod callbacks;
pub mod configuration;
pub mod core;
pub mod errors;
pub mod integrators;
mod updates;
pub mod variables;

pub use crate::configuration::Configuration;
pub use crate::core::*;
pub use crate::errors::{McError, McResult};
pub use crate::integrators::integrate;
