//! Global convergence norms over the combined force vector: particle forces plus
//! every extra degree of freedom.
//!
//! Reduction order matters. Local particle and per-particle DOF forces are
//! rank-local partials and go through the collective; the extra *global* DOF
//! forces are already replicated identically on every rank, so they are folded in
//! only after the collective. Folding them in before it would count them once per
//! rank and silently inflate the norms.

use rayon::prelude::*;

use crate::{comm::Collective, minimize::extra_dof::DofRegistry, system::ParticleStore};

/// ||F||² over all ranks and all degrees of freedom.
pub fn force_norm_sqr(
    store: &ParticleStore,
    registry: &DofRegistry,
    comm: &dyn Collective,
) -> f64 {
    let mut local: f64 = store.force[..store.n_local]
        .par_iter()
        .map(|f| f.magnitude_squared())
        .sum();

    for forces in registry.per_particle_forces() {
        for &f in forces {
            local += f * f;
        }
    }

    let mut total = comm.sum(local);

    for &f in registry.global_forces() {
        total += f * f;
    }
    total
}

/// ||F||∞ over all ranks and all degrees of freedom.
pub fn force_norm_inf(
    store: &ParticleStore,
    registry: &DofRegistry,
    comm: &dyn Collective,
) -> f64 {
    let mut local = store.force[..store.n_local]
        .par_iter()
        .map(|f| f.x.abs().max(f.y.abs()).max(f.z.abs()))
        .reduce(|| 0., f64::max);

    for forces in registry.per_particle_forces() {
        for &f in forces {
            local = local.max(f.abs());
        }
    }

    let mut total = comm.max(local);

    for &f in registry.global_forces() {
        total = total.max(f.abs());
    }
    total
}

#[cfg(test)]
mod tests {
    use std::thread;

    use lin_alg::f64::Vec3;

    use super::*;
    use crate::comm::{CommWorld, SerialComm, ThreadedComm};

    fn store_with_forces(forces: &[Vec3]) -> ParticleStore {
        let mut store = ParticleStore::new(forces.len(), forces.len() as u64);
        store.force = forces.to_vec();
        store
    }

    #[test]
    fn l2_is_sum_of_squared_components() {
        let store = store_with_forces(&[Vec3::new(1., 2., 2.), Vec3::new(0., -3., 4.)]);
        let reg = DofRegistry::default();

        let n2 = force_norm_sqr(&store, &reg, &SerialComm);
        assert!((n2 - (9. + 25.)).abs() < 1e-12);

        let ninf = force_norm_inf(&store, &reg, &SerialComm);
        assert!((ninf - 4.).abs() < 1e-12);
    }

    #[test]
    fn norms_are_partition_invariant() {
        let all = [
            Vec3::new(1., -2., 0.5),
            Vec3::new(3., 0., -1.),
            Vec3::new(-0.25, 4., 2.),
            Vec3::new(0., 0., -5.),
        ];

        let reg = DofRegistry::default();
        let serial_n2 = force_norm_sqr(&store_with_forces(&all), &reg, &SerialComm);
        let serial_inf = force_norm_inf(&store_with_forces(&all), &reg, &SerialComm);

        // Same forces split unevenly across two ranks.
        let world = CommWorld::new(2);
        let splits = [&all[..1], &all[1..]];

        let mut handles = Vec::new();
        for (rank, part) in splits.iter().enumerate() {
            let comm = ThreadedComm::attach(&world, rank);
            let part = part.to_vec();
            handles.push(thread::spawn(move || {
                let store = store_with_forces(&part);
                let reg = DofRegistry::default();
                (
                    force_norm_sqr(&store, &reg, &comm),
                    force_norm_inf(&store, &reg, &comm),
                )
            }));
        }

        for h in handles {
            let (n2, ninf) = h.join().unwrap();
            assert!((n2 - serial_n2).abs() < 1e-12);
            assert!((ninf - serial_inf).abs() < 1e-12);
        }
    }

    #[test]
    fn global_dof_forces_count_once_not_per_rank() {
        // Both ranks carry the identical replicated global-DOF force of 2.0.
        // Its square must appear exactly once in the combined norm.
        let world = CommWorld::new(2);

        let mut handles = Vec::new();
        for rank in 0..2 {
            let comm = ThreadedComm::attach(&world, rank);
            handles.push(thread::spawn(move || {
                let store = store_with_forces(&[Vec3::new(1., 0., 0.)]);

                let mut reg = DofRegistry::default();
                reg.set_global_len(1);
                reg.global_forces_mut()[0] = 2.0;

                (
                    force_norm_sqr(&store, &reg, &comm),
                    force_norm_inf(&store, &reg, &comm),
                )
            }));
        }

        for h in handles {
            let (n2, ninf) = h.join().unwrap();
            // Two particle contributions of 1.0 plus one 2.0² — not two.
            assert!((n2 - 6.0).abs() < 1e-12);
            assert!((ninf - 2.0).abs() < 1e-12);
        }
    }
}
