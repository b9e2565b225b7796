//! Downstream consumers of energy/virial data (thermodynamic reporting, pressure
//! observers, per-particle dumps). The evaluation step computes the optional
//! quantities only on steps where some registered consumer wants them; each
//! consumer expresses its own cadence through `matches_step`.

use crate::system::Accumulators;

/// Which categories a consumer is interested in at all. Queried when consumer
/// lists are rebuilt (init/setup), not every step.
#[derive(Clone, Copy, Debug, Default)]
pub struct Needs {
    pub energy_global: bool,
    pub energy_per_particle: bool,
    pub virial_global: bool,
    pub virial_per_particle: bool,
}

pub trait Consumer: Send {
    fn needs(&self) -> Needs;

    /// Whether this consumer wants its data at `step`. Called every evaluation for
    /// consumers on the rebuilt lists; implementations typically check a cadence.
    fn matches_step(&mut self, step: u64) -> bool;

    /// Notify a time-dependent consumer that the run stops at `step`, so any
    /// scheduled invocation times can be pulled forward.
    fn advance_to(&mut self, _step: u64) {}

    /// Marks the one required potential-energy aggregator.
    fn is_potential_energy(&self) -> bool {
        false
    }

    /// Scalar result for reporting consumers.
    fn scalar(&mut self, _accum: &Accumulators) -> f64 {
        0.
    }
}

/// The potential-energy aggregator every minimization requires: reports the summed
/// module energies for the current configuration. Wants global energy on every
/// step.
#[derive(Default)]
pub struct PotentialEnergy;

impl Consumer for PotentialEnergy {
    fn needs(&self) -> Needs {
        Needs {
            energy_global: true,
            ..Default::default()
        }
    }

    fn matches_step(&mut self, _step: u64) -> bool {
        true
    }

    fn is_potential_energy(&self) -> bool {
        true
    }

    fn scalar(&mut self, accum: &Accumulators) -> f64 {
        accum.energy
    }
}
