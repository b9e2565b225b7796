//! Driver core for iterative energy minimization of a particle system distributed
//! across worker processes. Each rank owns a disjoint set of particles; boundary
//! (ghost) particles are reconciled through explicit exchange and reduction calls,
//! never shared memory.
//!
//! This crate is the orchestration layer only: it decides when spatial locality
//! structures must be rebuilt, clears and re-accumulates forces through pluggable
//! force-field modules in a fixed order, reduces convergence norms across ranks, and
//! hands control to a pluggable descent/line-search strategy. The concrete descent
//! algorithms (SD, CG, quasi-Newton, FIRE) and the force-field kernels themselves
//! live behind traits.
//!
//! We use f64 throughout. Forces are the negative energy gradient; convergence is
//! judged on global L2 and L-infinity norms of the combined force vector, which
//! includes any extra degrees of freedom registered by extension modules (e.g. box
//! dimensions, or per-particle scalars such as fluctuating charges).
//!
//! Ordering note: every collective call (norm reduction, exchange, borders) is a
//! barrier. All ranks must reach the same calls in the same order, or the run
//! deadlocks. Any control flow that could diverge per rank (e.g. the reneighbor
//! decision) must be driven by globally consistent state.

use std::fmt;

pub mod comm;
pub mod consumer;
pub mod decomp;
pub mod extension;
pub mod forcefield;
pub mod minimize;
pub mod report;
pub mod system;


/// A fatal configuration problem: a missing required collaborator, an invalid
/// option value, or an unsupported combination of collaborators. Reported
/// immediately; never retried.
#[derive(Debug, Clone)]
pub struct MinError {
    pub descrip: String,
}

impl MinError {
    pub fn new(descrip: &str) -> Self {
        Self {
            descrip: descrip.to_owned(),
        }
    }
}

impl fmt::Display for MinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.descrip)
    }
}

impl std::error::Error for MinError {}
