//! The spatial-decomposition contract: migration, ghost borders, neighbor-list
//! rebuilds, and periodic wrapping. The minimizer consumes this as a service; the
//! decide/rebuild/exchange split is what lets it refresh ghosts cheaply on most
//! iterations and pay for full reneighboring only when particles have drifted.

use lin_alg::f64::Vec3;

use crate::system::ParticleStore;

/// Reneighboring cadence. Minimization overrides this to every-step for the run
/// duration, then restores the caller's settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebuildCadence {
    /// Rebuild every N steps (when not distance-checked).
    pub every: u64,
    /// Skip rebuilds for this many steps after the last one.
    pub delay: u64,
    /// Rebuild based on accumulated displacement instead of a fixed period.
    pub dist_check: bool,
}

impl RebuildCadence {
    pub const EVERY_STEP: Self = Self {
        every: 1,
        delay: 0,
        dist_check: true,
    };
}

/// Simulation cell (orthorhombic).
#[derive(Clone, Copy, Default)]
pub struct SimBox {
    pub bounds_low: Vec3,
    pub bounds_high: Vec3,
}

impl SimBox {
    pub fn new(bounds_low: Vec3, bounds_high: Vec3) -> Self {
        Self {
            bounds_low,
            bounds_high,
        }
    }

    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.bounds_high - self.bounds_low
    }

    /// Wrap an absolute coordinate back into the box.
    #[inline]
    pub fn wrap(&self, p: Vec3) -> Vec3 {
        let ext = self.extent();

        assert!(
            ext.x > 0.0 && ext.y > 0.0 && ext.z > 0.0,
            "SimBox edges must be > 0"
        );

        // rem_euclid keeps each component in [0, ext).
        Vec3::new(
            (p.x - self.bounds_low.x).rem_euclid(ext.x) + self.bounds_low.x,
            (p.y - self.bounds_low.y).rem_euclid(ext.y) + self.bounds_low.y,
            (p.z - self.bounds_low.z).rem_euclid(ext.z) + self.bounds_low.z,
        )
    }

    /// Minimum-image displacement vector (no √).
    #[inline]
    pub fn min_image(&self, dv: Vec3) -> Vec3 {
        let ext = self.extent();
        debug_assert!(ext.x > 0.0 && ext.y > 0.0 && ext.z > 0.0);

        Vec3::new(
            dv.x - (dv.x / ext.x).round() * ext.x,
            dv.y - (dv.y / ext.y).round() * ext.y,
            dv.z - (dv.z / ext.z).round() * ext.z,
        )
    }
}

/// Spatial decomposition, ghost exchange and neighbor-list service.
///
/// `exchange` (migration), `borders` and `fold_ghost_forces` are collectives:
/// every rank must call them in the same order. `exchange` must carry the store's
/// named storage rows along with their particles and keep them row-aligned.
pub trait Decomposition: Send {
    /// Whether migration/reneighboring is needed this call. The result must be
    /// globally consistent across ranks; diverging answers deadlock the exchange.
    fn decide(&mut self, store: &ParticleStore, step: u64) -> bool;

    /// Cheap path: refresh ghost positions from their owners. No migration.
    fn forward(&mut self, store: &mut ParticleStore);

    /// Wrap local coordinates back into the simulation domain.
    fn wrap_into_domain(&mut self, store: &mut ParticleStore);

    /// Whether the domain changed shape since the last rebuild (e.g. a box-relax
    /// extension moved the boundaries).
    fn box_changed(&self) -> bool {
        false
    }

    /// Re-derive the domain bounds from current state.
    fn reset_box(&mut self, _store: &mut ParticleStore) {}

    /// Rebuild binning structures after a box change.
    fn setup_bins(&mut self) {}

    /// Migrate particles to their owning ranks. May change `n_local`.
    fn exchange(&mut self, store: &mut ParticleStore);

    /// Re-derive ghost particles from the new ownership.
    fn borders(&mut self, store: &mut ParticleStore);

    /// Rebuild the neighbor list from current positions.
    fn rebuild_neighbors(&mut self, store: &mut ParticleStore);

    /// Reverse communication: fold partial forces accumulated on ghosts back into
    /// the owning particles. Only invoked when the force-field accumulation
    /// strategy computes locally and reduces afterwards.
    fn fold_ghost_forces(&mut self, store: &mut ParticleStore);

    fn min_image(&self, dv: Vec3) -> Vec3;

    fn cadence(&self) -> RebuildCadence;
    fn set_cadence(&mut self, cadence: RebuildCadence);
}

/// Single-rank decomposition over one orthorhombic cell: no migration, no ghosts.
/// The reneighbor decision tracks per-particle displacement against half the skin,
/// the same criterion the distance-checked cadence uses in multi-rank setups.
///
/// todo: Triclinic cells. `wrap` and `min_image` currently assume orthorhombic.
pub struct SingleDomain {
    pub cell: SimBox,
    pub skin: f64,
    cadence: RebuildCadence,
    ref_pos: Vec<Vec3>,
    last_build_step: u64,
}

impl SingleDomain {
    pub fn new(cell: SimBox, skin: f64) -> Self {
        Self {
            cell,
            skin,
            cadence: RebuildCadence::EVERY_STEP,
            ref_pos: Vec::new(),
            last_build_step: 0,
        }
    }

    fn max_displacement_sq(&self, store: &ParticleStore) -> f64 {
        let mut result: f64 = 0.;
        for (i, posit) in store.posit[..store.n_local].iter().enumerate() {
            let d = self.cell.min_image(*posit - self.ref_pos[i]);
            result = result.max(d.magnitude_squared());
        }
        result
    }
}

impl Decomposition for SingleDomain {
    fn decide(&mut self, store: &ParticleStore, step: u64) -> bool {
        // No reference positions yet: first call always rebuilds.
        if self.ref_pos.len() != store.n_local {
            self.last_build_step = step;
            return true;
        }

        if step < self.last_build_step + self.cadence.delay {
            return false;
        }

        let rebuild = if self.cadence.dist_check {
            self.max_displacement_sq(store) > 0.25 * self.skin * self.skin
        } else {
            self.cadence.every <= 1 || step % self.cadence.every == 0
        };

        if rebuild {
            self.last_build_step = step;
        }
        rebuild
    }

    fn forward(&mut self, _store: &mut ParticleStore) {
        // No ghosts to refresh.
    }

    fn wrap_into_domain(&mut self, store: &mut ParticleStore) {
        let n = store.n_local;
        for p in store.posit[..n].iter_mut() {
            *p = self.cell.wrap(*p);
        }
    }

    fn exchange(&mut self, store: &mut ParticleStore) {
        // Single rank owns everything; just keep storage rows sized.
        store.sync_storage();
    }

    fn borders(&mut self, store: &mut ParticleStore) {
        store.n_ghost = 0;
        store.posit.truncate(store.n_local);
        store.force.truncate(store.n_local);
    }

    fn rebuild_neighbors(&mut self, store: &mut ParticleStore) {
        self.ref_pos = store.posit[..store.n_local].to_vec();
    }

    fn fold_ghost_forces(&mut self, _store: &mut ParticleStore) {}

    fn min_image(&self, dv: Vec3) -> Vec3 {
        self.cell.min_image(dv)
    }

    fn cadence(&self) -> RebuildCadence {
        self.cadence
    }

    fn set_cadence(&mut self, cadence: RebuildCadence) {
        self.cadence = cadence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> SimBox {
        SimBox::new(Vec3::new(0., 0., 0.), Vec3::new(10., 10., 10.))
    }

    #[test]
    fn wrap_and_min_image() {
        let cell = cell();

        let w = cell.wrap(Vec3::new(11., -1., 5.));
        assert!((w.x - 1.).abs() < 1e-12);
        assert!((w.y - 9.).abs() < 1e-12);
        assert!((w.z - 5.).abs() < 1e-12);

        let d = cell.min_image(Vec3::new(9., 0., 0.));
        assert!((d.x + 1.).abs() < 1e-12);
    }

    #[test]
    fn decide_tracks_displacement_against_half_skin() {
        let mut decomp = SingleDomain::new(cell(), 2.0);
        let mut store = ParticleStore::new(1, 1);
        store.posit[0] = Vec3::new(5., 5., 5.);

        // First call: no reference positions yet.
        assert!(decomp.decide(&store, 0));
        decomp.rebuild_neighbors(&mut store);
        assert!(!decomp.decide(&store, 1));

        // Move by more than skin/2 = 1.0.
        store.posit[0] = Vec3::new(6.5, 5., 5.);
        assert!(decomp.decide(&store, 2));
    }
}
