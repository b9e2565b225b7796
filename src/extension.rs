//! Extension modules: collaborators that hook into the evaluation step and may
//! contribute extra degrees of freedom to the minimization problem. Global DOF
//! (e.g. box dimensions under a box-relax extension) come from `dof()` /
//! `energy_contribution()`; per-particle DOF are registered against the
//! [`DofRegistry`] during `min_init` and refreshed through `min_pull`.

use crate::{
    forcefield::VirialFlags,
    minimize::extra_dof::{DofHandle, DofRegistry},
    system::ParticleStore,
};

/// Index of an extension within the configured set. Stable for the lifetime of
/// the set; used by the registry to route pull callbacks back to the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleId(pub usize);

/// All hooks are synchronous in-process calls with default no-op bodies;
/// extensions override what they need.
pub trait Extension: Send {
    /// Registration window: called once per `init`, after the registry was reset.
    /// Extensions owning per-particle DOF register them here and keep the handle.
    fn min_init(&mut self, _id: ModuleId, _reg: &mut DofRegistry) {}

    /// Runs before migration on reneighboring evaluations.
    fn pre_exchange(&mut self, _store: &mut ParticleStore) {}

    /// Runs after force clearing, before the force-field dispatch.
    fn pre_force(&mut self, _store: &mut ParticleStore, _vflags: VirialFlags) {}

    /// Runs after the force-field dispatch and DOF pulls; may modify forces
    /// (e.g. to impose constraints).
    fn post_force(&mut self, _store: &mut ParticleStore, _vflags: VirialFlags) {}

    /// Number of extra global scalar unknowns this extension contributes.
    fn dof(&self) -> usize {
        0
    }

    /// Fill in the forces on this extension's slice of the global DOF vector and
    /// return its energy contribution.
    fn energy_contribution(&mut self, _global_forces: &mut [f64]) -> f64 {
        0.
    }

    /// Refresh the registry's value/force buffers for one of this extension's
    /// per-particle DOF after a possible migration.
    fn min_pull(&mut self, _handle: DofHandle, _reg: &mut DofRegistry, _store: &ParticleStore) {}
}

/// The configured, ordered set of extensions.
#[derive(Default)]
pub struct Extensions {
    items: Vec<Box<dyn Extension>>,
}

impl Extensions {
    pub fn push(&mut self, ext: Box<dyn Extension>) -> ModuleId {
        self.items.push(ext);
        ModuleId(self.items.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn min_init_all(&mut self, reg: &mut DofRegistry) {
        for (i, ext) in self.items.iter_mut().enumerate() {
            ext.min_init(ModuleId(i), reg);
        }
    }

    pub(crate) fn pre_exchange_all(&mut self, store: &mut ParticleStore) {
        for ext in &mut self.items {
            ext.pre_exchange(store);
        }
    }

    pub(crate) fn pre_force_all(&mut self, store: &mut ParticleStore, vflags: VirialFlags) {
        for ext in &mut self.items {
            ext.pre_force(store, vflags);
        }
    }

    pub(crate) fn post_force_all(&mut self, store: &mut ParticleStore, vflags: VirialFlags) {
        for ext in &mut self.items {
            ext.post_force(store, vflags);
        }
    }

    pub(crate) fn dof_total(&self) -> usize {
        self.items.iter().map(|e| e.dof()).sum()
    }

    /// Sum extension energy contributions for the extra global DOF, handing each
    /// extension its own slice of the force vector.
    pub(crate) fn min_energy(&mut self, global_forces: &mut [f64]) -> f64 {
        let mut energy = 0.;
        let mut offset = 0;

        for ext in &mut self.items {
            let n = ext.dof();
            energy += ext.energy_contribution(&mut global_forces[offset..offset + n]);
            offset += n;
        }
        energy
    }

    pub(crate) fn pull(
        &mut self,
        owner: ModuleId,
        handle: DofHandle,
        reg: &mut DofRegistry,
        store: &ParticleStore,
    ) {
        self.items[owner.0].min_pull(handle, reg, store);
    }
}
