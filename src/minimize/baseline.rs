//! Minimizer-private per-particle storage: the original position of each local
//! particle at the start of the run. Line searches measure trial displacements
//! against these; when a particle is wrapped across a periodic boundary, the
//! baseline must be re-expressed so the displacement stays minimum-image.

use lin_alg::f64::Vec3;

use crate::{
    decomp::Decomposition,
    system::{ParticleStore, StorageHandle},
};

pub(crate) struct Baseline {
    handle: StorageHandle,
}

impl Baseline {
    /// Register the backing storage with the particle store. Rows migrate with
    /// their particles like any named storage.
    pub fn register(store: &mut ParticleStore) -> Self {
        Self {
            handle: store.add_storage(3),
        }
    }

    /// Snapshot current local positions as the baseline.
    pub fn capture(&self, store: &mut ParticleStore) {
        let (posit, rows) = store.posit_and_storage_mut(self.handle);
        let n = rows.len() / 3;

        for i in 0..n {
            rows[3 * i] = posit[i].x;
            rows[3 * i + 1] = posit[i].y;
            rows[3 * i + 2] = posit[i].z;
        }
    }

    /// Re-baseline particles whose wrapped position no longer yields a
    /// minimum-image displacement from their stored origin.
    pub fn rebase(&self, store: &mut ParticleStore, decomp: &dyn Decomposition) {
        let (posit, rows) = store.posit_and_storage_mut(self.handle);
        let n = rows.len() / 3;

        for i in 0..n {
            let x = posit[i];
            let x0 = Vec3::new(rows[3 * i], rows[3 * i + 1], rows[3 * i + 2]);

            let d = x - x0;
            let d_wrapped = decomp.min_image(d);

            if (d - d_wrapped).magnitude_squared() > 0. {
                let shifted = x - d_wrapped;
                rows[3 * i] = shifted.x;
                rows[3 * i + 1] = shifted.y;
                rows[3 * i + 2] = shifted.z;
            }
        }
    }

    pub fn positions<'a>(&self, store: &'a ParticleStore) -> &'a [f64] {
        store.storage(self.handle)
    }

    pub fn remove(self, store: &mut ParticleStore) {
        store.remove_storage(self.handle);
    }
}
