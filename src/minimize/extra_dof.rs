//! Bookkeeping for extra degrees of freedom beyond particle positions. The
//! registry, not the owning extensions, owns the buffers; extensions reference
//! their entries only through the opaque handle returned at registration. The
//! per-particle entry list is append-only within one init/cleanup cycle, so every
//! handle stays valid until the next full reset.

use crate::extension::ModuleId;

/// Opaque, zero-based handle to one registered per-particle DOF extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DofHandle(pub(crate) usize);

impl DofHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct PerParticleDof {
    owner: ModuleId,
    /// Values per local particle.
    per_particle: usize,
    /// Maximum-magnitude bound a line search may move one value by.
    max_step: f64,
    values: Vec<f64>,
    forces: Vec<f64>,
}

/// Registry of extra global and per-particle unknowns participating in the same
/// clearing/norm/convergence machinery as particle positions.
///
/// Invariant: each per-particle buffer holds `n_local * per_particle` values,
/// re-established after every migration.
#[derive(Default)]
pub struct DofRegistry {
    global_forces: Vec<f64>,
    entries: Vec<PerParticleDof>,
}

impl DofRegistry {
    /// Full reset; all previously issued handles become invalid.
    pub(crate) fn reset(&mut self) {
        self.global_forces.clear();
        self.entries.clear();
    }

    /// Append a per-particle DOF entry of `per_particle` values per particle.
    /// Growth always succeeds; there is no removal.
    pub fn register(&mut self, owner: ModuleId, per_particle: usize, max_step: f64) -> DofHandle {
        assert!(per_particle > 0);
        self.entries.push(PerParticleDof {
            owner,
            per_particle,
            max_step,
            values: Vec::new(),
            forces: Vec::new(),
        });
        DofHandle(self.entries.len() - 1)
    }

    /// Fix the global DOF count for this run and zero the force vector. Constant
    /// size after setup.
    pub(crate) fn set_global_len(&mut self, n: usize) {
        self.global_forces.clear();
        self.global_forces.resize(n, 0.);
    }

    pub fn n_global(&self) -> usize {
        self.global_forces.len()
    }

    /// Number of registered per-particle extensions.
    pub fn n_per_particle(&self) -> usize {
        self.entries.len()
    }

    /// Sum of per-particle multiplicities over all entries.
    pub fn per_particle_width(&self) -> usize {
        self.entries.iter().map(|e| e.per_particle).sum()
    }

    /// Combined length of all per-particle buffers.
    pub fn total_len(&self) -> usize {
        self.entries.iter().map(|e| e.values.len()).sum()
    }

    /// Size all buffers for `n_local` particles, zeroed. Run once at setup.
    pub(crate) fn allocate(&mut self, n_local: usize) {
        for entry in &mut self.entries {
            let len = entry.per_particle * n_local;
            entry.values.clear();
            entry.values.resize(len, 0.);
            entry.forces.clear();
            entry.forces.resize(len, 0.);
        }
    }

    /// Re-establish the buffer-length invariant after migration changed `n_local`.
    /// Handles are unaffected; surviving prefix values are kept (owners refresh
    /// contents through their pull callbacks anyway).
    pub(crate) fn resize(&mut self, n_local: usize) {
        for entry in &mut self.entries {
            let len = entry.per_particle * n_local;
            entry.values.resize(len, 0.);
            entry.forces.resize(len, 0.);
        }
    }

    pub fn values(&self, handle: DofHandle) -> &[f64] {
        &self.entries[handle.0].values
    }

    pub fn values_mut(&mut self, handle: DofHandle) -> &mut [f64] {
        &mut self.entries[handle.0].values
    }

    pub fn forces(&self, handle: DofHandle) -> &[f64] {
        &self.entries[handle.0].forces
    }

    pub fn forces_mut(&mut self, handle: DofHandle) -> &mut [f64] {
        &mut self.entries[handle.0].forces
    }

    pub fn max_step(&self, handle: DofHandle) -> f64 {
        self.entries[handle.0].max_step
    }

    /// (handle, owner) pairs for routing pull callbacks.
    pub(crate) fn owners(&self) -> Vec<(DofHandle, ModuleId)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (DofHandle(i), e.owner))
            .collect()
    }

    pub(crate) fn per_particle_forces(&self) -> impl Iterator<Item = &[f64]> {
        self.entries.iter().map(|e| e.forces.as_slice())
    }

    pub fn global_forces(&self) -> &[f64] {
        &self.global_forces
    }

    pub(crate) fn global_forces_mut(&mut self) -> &mut [f64] {
        &mut self.global_forces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_length_is_count_times_summed_multiplicity() {
        let mut reg = DofRegistry::default();
        reg.register(ModuleId(0), 1, 0.1);
        reg.register(ModuleId(0), 3, 0.1);
        reg.register(ModuleId(1), 2, 0.5);

        let n_local = 10;
        reg.allocate(n_local);

        assert_eq!(reg.total_len(), n_local * (1 + 3 + 2));
        assert_eq!(reg.per_particle_width(), 6);
    }

    #[test]
    fn resize_after_migration_keeps_handles() {
        let mut reg = DofRegistry::default();
        let a = reg.register(ModuleId(0), 1, 0.1);
        let b = reg.register(ModuleId(1), 2, 0.1);
        reg.allocate(8);

        reg.values_mut(a)[0] = 1.5;
        reg.forces_mut(b)[3] = -2.0;

        // Migration halved the local particle count.
        reg.resize(4);

        assert_eq!(reg.values(a).len(), 4);
        assert_eq!(reg.values(b).len(), 8);
        assert_eq!(reg.forces(b).len(), 8);
        // Same handles, surviving prefix intact.
        assert_eq!(reg.values(a)[0], 1.5);
        assert_eq!(reg.forces(b)[3], -2.0);
    }

    #[test]
    fn reset_invalidates_everything() {
        let mut reg = DofRegistry::default();
        reg.register(ModuleId(0), 2, 0.1);
        reg.set_global_len(3);
        reg.allocate(5);

        reg.reset();

        assert_eq!(reg.n_per_particle(), 0);
        assert_eq!(reg.n_global(), 0);
        assert_eq!(reg.total_len(), 0);
    }
}
