//! Force-field module slots and the fixed dispatch order. Modules are black boxes
//! to the minimizer: each one accumulates energy, force, and (when asked) virial
//! contributions into the shared buffers, and must be idempotent with no side
//! effects beyond those buffers.

use crate::system::{Accumulators, ParticleStore};

/// Which energy quantities modules should produce this step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnergyFlags {
    pub global: bool,
    pub per_particle: bool,
}

/// How the pairwise portion of the global virial is accumulated. Chosen once per
/// run from the accumulation strategy; the numeric meaning is a module-internal
/// convention the driver only threads through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirialMode {
    /// Explicit sum over pair interactions.
    PairwiseSum,
    /// Implicit F·r sum including ghost particles.
    GhostDot,
}

/// Which virial quantities modules should produce this step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VirialFlags {
    pub global: Option<VirialMode>,
    pub per_particle: bool,
}

/// One energy/force kernel: pairwise, bonded, or long-range. The flags are an
/// optimization only; a module that computes more than asked is wasteful, not
/// wrong.
pub trait ForceModule: Send {
    /// One-time hook before the first dispatch of a run (e.g. long-range grid
    /// initialization after the box was finalized).
    fn setup(&mut self, _store: &ParticleStore) {}

    fn compute(
        &mut self,
        store: &mut ParticleStore,
        accum: &mut Accumulators,
        eflags: EnergyFlags,
        vflags: VirialFlags,
    );
}

/// The configured set of force-field modules. Presence of each slot is a runtime
/// configuration fact. Dispatch order is fixed and deterministic: pair, then the
/// bonded modules in {bond, angle, dihedral, improper} order when the system has
/// topology, then long-range.
#[derive(Default)]
pub struct ForceField {
    pub pair: Option<Box<dyn ForceModule>>,
    pub bond: Option<Box<dyn ForceModule>>,
    pub angle: Option<Box<dyn ForceModule>>,
    pub dihedral: Option<Box<dyn ForceModule>>,
    pub improper: Option<Box<dyn ForceModule>>,
    pub long_range: Option<Box<dyn ForceModule>>,
    /// Compute-locally-then-reduce accumulation: modules also accumulate onto
    /// ghosts, and a reverse-communication fold reconciles owners afterwards.
    pub ghost_reduce: bool,
}

impl ForceField {
    pub(crate) fn setup_modules(&mut self, store: &ParticleStore) {
        for slot in [
            &mut self.pair,
            &mut self.bond,
            &mut self.angle,
            &mut self.dihedral,
            &mut self.improper,
            &mut self.long_range,
        ] {
            if let Some(module) = slot {
                module.setup(store);
            }
        }
    }

    pub(crate) fn dispatch(
        &mut self,
        store: &mut ParticleStore,
        accum: &mut Accumulators,
        eflags: EnergyFlags,
        vflags: VirialFlags,
    ) {
        if let Some(pair) = &mut self.pair {
            pair.compute(store, accum, eflags, vflags);
        }

        if store.molecular {
            for slot in [
                &mut self.bond,
                &mut self.angle,
                &mut self.dihedral,
                &mut self.improper,
            ] {
                if let Some(module) = slot {
                    module.compute(store, accum, eflags, vflags);
                }
            }
        }

        if let Some(long_range) = &mut self.long_range {
            long_range.compute(store, accum, eflags, vflags);
        }
    }
}
