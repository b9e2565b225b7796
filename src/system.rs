//! The particle buffers the minimizer drives: positions and forces for local and
//! ghost particles, optional torque and auxiliary scalar-force fields, and a small
//! registry of named per-particle storage rows that migrate with particles.

use lin_alg::f64::Vec3;
use rayon::prelude::*;

/// Handle to a named per-particle storage block. Stable until the block is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageHandle(usize);

struct ExtraStorage {
    /// Values per local particle.
    per: usize,
    data: Vec<f64>,
}

/// Particle state for one rank. Indexing is local particles first, then ghosts.
/// Local particles are exclusively owned by this rank; ghosts are read-only replicas
/// of neighbors' boundary particles, except that force modules may accumulate
/// partial forces on them for a later reverse-communication fold.
pub struct ParticleStore {
    pub posit: Vec<Vec3>,
    pub force: Vec<Vec3>,
    /// Present only for particle styles with rotational state.
    pub torque: Option<Vec<Vec3>>,
    /// Present only for particle styles carrying an auxiliary scalar force
    /// (e.g. an electron radius force).
    pub aux_force: Option<Vec<f64>>,
    pub n_local: usize,
    pub n_ghost: usize,
    /// Particle count over all ranks. Used for energy normalization.
    pub n_global: u64,
    /// Whether the system has bonded topology; gates the bonded module dispatches.
    pub molecular: bool,
    storage: Vec<Option<ExtraStorage>>,
}

impl ParticleStore {
    pub fn new(n_local: usize, n_global: u64) -> Self {
        Self {
            posit: vec![Vec3::new_zero(); n_local],
            force: vec![Vec3::new_zero(); n_local],
            torque: None,
            aux_force: None,
            n_local,
            n_ghost: 0,
            n_global,
            molecular: false,
            storage: Vec::new(),
        }
    }

    pub fn n_all(&self) -> usize {
        self.n_local + self.n_ghost
    }

    /// Zero the force buffer, and the torque/auxiliary buffers if they exist.
    /// Ghost forces are cleared too when modules accumulate on ghosts for a
    /// reverse-communication fold. Must run before every force-field dispatch;
    /// skipping it would compound forces across iterations.
    pub fn clear_forces(&mut self, include_ghosts: bool) {
        let n = if include_ghosts {
            self.n_local + self.n_ghost
        } else {
            self.n_local
        };

        self.force[..n].par_iter_mut().for_each(|f| *f = Vec3::new_zero());

        if let Some(torque) = &mut self.torque {
            for t in torque[..n].iter_mut() {
                *t = Vec3::new_zero();
            }
        }
        if let Some(aux) = &mut self.aux_force {
            for v in aux[..n].iter_mut() {
                *v = 0.;
            }
        }
    }

    /// Register a named storage block of `per` values per local particle, zeroed.
    /// Implementations of `Decomposition::exchange` must keep these rows aligned
    /// with their particles during migration.
    pub fn add_storage(&mut self, per: usize) -> StorageHandle {
        assert!(per > 0);
        let block = ExtraStorage {
            per,
            data: vec![0.; per * self.n_local],
        };

        // Reuse a freed slot if one exists, so other handles stay valid.
        for (i, slot) in self.storage.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(block);
                return StorageHandle(i);
            }
        }
        self.storage.push(Some(block));
        StorageHandle(self.storage.len() - 1)
    }

    pub fn remove_storage(&mut self, handle: StorageHandle) {
        self.storage[handle.0] = None;
    }

    pub fn storage(&self, handle: StorageHandle) -> &[f64] {
        &self.storage[handle.0].as_ref().unwrap().data
    }

    pub fn storage_mut(&mut self, handle: StorageHandle) -> &mut [f64] {
        &mut self.storage[handle.0].as_mut().unwrap().data
    }

    /// Split borrow for callers that read positions while rewriting a storage block.
    pub fn posit_and_storage_mut(&mut self, handle: StorageHandle) -> (&[Vec3], &mut [f64]) {
        let block = self.storage[handle.0].as_mut().unwrap();
        (&self.posit, &mut block.data)
    }

    /// Resize every storage block to the current local particle count. Called after
    /// migration has changed `n_local`.
    pub fn sync_storage(&mut self) {
        for slot in &mut self.storage {
            if let Some(block) = slot {
                block.data.resize(block.per * self.n_local, 0.);
            }
        }
    }
}

/// Shared accumulation target for force-field modules. Each dispatch adds its
/// contribution exactly once; the per-particle arrays are only sized when a
/// consumer asked for per-particle data this step.
#[derive(Default)]
pub struct Accumulators {
    pub energy: f64,
    /// Symmetric stress tensor in Voigt order: xx, yy, zz, xy, xz, yz.
    pub virial: [f64; 6],
    pub per_particle_energy: Vec<f64>,
    pub per_particle_virial: Vec<[f64; 6]>,
}

impl Accumulators {
    /// Zero the scalars and size the per-particle arrays per this step's flags.
    pub(crate) fn prepare(&mut self, n_local: usize, per_particle_energy: bool, per_particle_virial: bool) {
        self.energy = 0.;
        self.virial = [0.; 6];

        if per_particle_energy {
            self.per_particle_energy.clear();
            self.per_particle_energy.resize(n_local, 0.);
        } else {
            self.per_particle_energy.clear();
        }

        if per_particle_virial {
            self.per_particle_virial.clear();
            self.per_particle_virial.resize(n_local, [0.; 6]);
        } else {
            self.per_particle_virial.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_forces_zeroes_everything_present() {
        let mut store = ParticleStore::new(3, 3);
        store.n_ghost = 2;
        store.posit = vec![Vec3::new_zero(); 5];
        store.force = vec![Vec3::new(1., -2., 3.); 5];
        store.torque = Some(vec![Vec3::new(0.5, 0.5, 0.5); 5]);
        store.aux_force = Some(vec![7.; 5]);

        store.clear_forces(true);

        for i in 0..5 {
            assert_eq!(store.force[i].magnitude_squared(), 0.);
            assert_eq!(store.torque.as_ref().unwrap()[i].magnitude_squared(), 0.);
            assert_eq!(store.aux_force.as_ref().unwrap()[i], 0.);
        }
    }

    #[test]
    fn clear_forces_leaves_ghosts_when_not_folding() {
        let mut store = ParticleStore::new(2, 2);
        store.n_ghost = 1;
        store.posit = vec![Vec3::new_zero(); 3];
        store.force = vec![Vec3::new(1., 1., 1.); 3];

        store.clear_forces(false);

        assert_eq!(store.force[0].magnitude_squared(), 0.);
        assert_eq!(store.force[1].magnitude_squared(), 0.);
        assert!(store.force[2].magnitude_squared() > 0.);
    }

    #[test]
    fn storage_handles_stay_valid_across_removal() {
        let mut store = ParticleStore::new(4, 4);
        let a = store.add_storage(1);
        let b = store.add_storage(3);

        store.storage_mut(b)[0] = 9.;
        store.remove_storage(a);

        assert_eq!(store.storage(b).len(), 12);
        assert_eq!(store.storage(b)[0], 9.);

        // The freed slot is reused; b is untouched.
        let c = store.add_storage(2);
        assert_eq!(c, a);
        assert_eq!(store.storage(b)[0], 9.);
    }
}
