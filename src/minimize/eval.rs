//! The per-iteration energy/force oracle, and the scheduler that decides which
//! optional energy/virial quantities force modules must produce each step.

use crate::{
    consumer::Consumer,
    forcefield::{EnergyFlags, VirialFlags, VirialMode},
    minimize::Minimizer,
};

/// Consumer index lists per category, rebuilt only when the consumer set changes
/// (init/setup) rather than every step.
pub(crate) struct EvalScheduler {
    elist_global: Vec<usize>,
    elist_atom: Vec<usize>,
    vlist_global: Vec<usize>,
    vlist_atom: Vec<usize>,
    virial_mode: VirialMode,
}

impl Default for EvalScheduler {
    fn default() -> Self {
        Self {
            elist_global: Vec::new(),
            elist_atom: Vec::new(),
            vlist_global: Vec::new(),
            vlist_atom: Vec::new(),
            virial_mode: VirialMode::PairwiseSum,
        }
    }
}

impl EvalScheduler {
    pub fn rebuild(&mut self, consumers: &[Box<dyn Consumer>], virial_mode: VirialMode) {
        self.elist_global.clear();
        self.elist_atom.clear();
        self.vlist_global.clear();
        self.vlist_atom.clear();
        self.virial_mode = virial_mode;

        for (i, c) in consumers.iter().enumerate() {
            let needs = c.needs();
            if needs.energy_global {
                self.elist_global.push(i);
            }
            if needs.energy_per_particle {
                self.elist_atom.push(i);
            }
            if needs.virial_global {
                self.vlist_global.push(i);
            }
            if needs.virial_per_particle {
                self.vlist_atom.push(i);
            }
        }
    }

    /// Flags for `step`. Global energy is always requested: every evaluation needs
    /// the energy scalar for convergence and reporting, whether or not a consumer
    /// asked. Everything else is driven purely by consumer cadences, and reverts
    /// the next step absent renewed requests.
    pub fn set_flags(
        &mut self,
        step: u64,
        consumers: &mut [Box<dyn Consumer>],
    ) -> (EnergyFlags, VirialFlags) {
        // Still poll the global-energy consumers so their step matching stays in
        // sync, even though the flag is unconditional.
        for &i in &self.elist_global {
            consumers[i].matches_step(step);
        }

        let mut eflags = EnergyFlags {
            global: true,
            per_particle: false,
        };
        for &i in &self.elist_atom {
            if consumers[i].matches_step(step) {
                eflags.per_particle = true;
            }
        }

        let mut vflags = VirialFlags::default();
        for &i in &self.vlist_global {
            if consumers[i].matches_step(step) {
                vflags.global = Some(self.virial_mode);
            }
        }
        for &i in &self.vlist_atom {
            if consumers[i].matches_step(step) {
                vflags.per_particle = true;
            }
        }

        (eflags, vflags)
    }
}

impl Minimizer {
    /// Evaluate potential energy and forces at the current configuration, possibly
    /// migrating particles first. Returns the energy, including extra global DOF
    /// contributions; the negative gradient lands in the store's force buffer and
    /// the registry's DOF force buffers.
    ///
    /// `allow_reset` gates the re-baselining of original-position bookkeeping
    /// after migration; the final evaluation of a run passes false so the record
    /// of boundary crossings survives for reporting.
    pub fn evaluate(&mut self, allow_reset: bool) -> f64 {
        // Always communicate: the strategy moved particles since the last call.
        let migrate = self.decomp.decide(&self.store, self.step);

        if !migrate {
            self.decomp.forward(&mut self.store);
        } else {
            self.extensions.pre_exchange_all(&mut self.store);
            self.decomp.wrap_into_domain(&mut self.store);
            if self.decomp.box_changed() {
                self.decomp.reset_box(&mut self.store);
                self.decomp.setup_bins();
            }
            self.decomp.exchange(&mut self.store);
            self.decomp.borders(&mut self.store);
            self.decomp.rebuild_neighbors(&mut self.store);
        }

        let energy = self.compute_forces();

        if migrate {
            if allow_reset {
                self.rebase_baseline();
            }
            // Migration changed the local count; per-particle DOF buffers must
            // track it. Owners refreshed contents through their pull callbacks.
            self.registry.resize(self.store.n_local);
        }
        self.migrated_last_eval = migrate;

        self.neval += 1;
        self.stats.e_current = energy;
        energy
    }

    /// Steps shared by `setup` and `evaluate`: flag selection, force clearing,
    /// module dispatch in fixed order, ghost fold, DOF pulls, hooks, and the
    /// energy total.
    pub(crate) fn compute_forces(&mut self) -> f64 {
        let (eflags, vflags) = self.scheduler.set_flags(self.step, &mut self.consumers);
        self.eflags = eflags;
        self.vflags = vflags;

        self.store.clear_forces(self.forces.ghost_reduce);
        self.accum
            .prepare(self.store.n_local, eflags.per_particle, vflags.per_particle);

        self.extensions.pre_force_all(&mut self.store, vflags);

        self.forces
            .dispatch(&mut self.store, &mut self.accum, eflags, vflags);

        if self.forces.ghost_reduce {
            self.decomp.fold_ghost_forces(&mut self.store);
        }

        // Let each per-particle DOF owner sync the registry's view of its values
        // and forces with whatever migration left behind.
        for (handle, owner) in self.registry.owners() {
            self.extensions
                .pull(owner, handle, &mut self.registry, &self.store);
        }

        self.extensions.post_force_all(&mut self.store, vflags);

        let pe = self
            .pe_index
            .expect("potential-energy consumer is resolved during setup()");
        let mut energy = self.consumers[pe].scalar(&self.accum);

        if self.registry.n_global() > 0 {
            energy += self.extensions.min_energy(self.registry.global_forces_mut());
        }
        if self.reporter.normalize_energy() {
            energy /= self.store.n_global as f64;
        }
        energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consumer::Needs,
        system::Accumulators,
    };

    /// Wants per-particle virial every `cadence` steps only.
    struct PressureDump {
        cadence: u64,
    }

    impl Consumer for PressureDump {
        fn needs(&self) -> Needs {
            Needs {
                virial_per_particle: true,
                ..Default::default()
            }
        }

        fn matches_step(&mut self, step: u64) -> bool {
            step % self.cadence == 0
        }
    }

    struct PressureGlobal;

    impl Consumer for PressureGlobal {
        fn needs(&self) -> Needs {
            Needs {
                virial_global: true,
                ..Default::default()
            }
        }

        fn matches_step(&mut self, _step: u64) -> bool {
            true
        }
    }

    #[test]
    fn per_particle_virial_flag_follows_consumer_cadence() {
        let mut consumers: Vec<Box<dyn Consumer>> = vec![Box::new(PressureDump { cadence: 4 })];

        let mut sched = EvalScheduler::default();
        sched.rebuild(&consumers, VirialMode::PairwiseSum);

        let (_, v) = sched.set_flags(4, &mut consumers);
        assert!(v.per_particle);
        assert_eq!(v.global, None);

        // Reverts the very next step absent a renewed request.
        let (_, v) = sched.set_flags(5, &mut consumers);
        assert!(!v.per_particle);
    }

    #[test]
    fn no_virial_consumers_means_no_virial_flags() {
        let mut consumers: Vec<Box<dyn Consumer>> = Vec::new();
        let mut sched = EvalScheduler::default();
        sched.rebuild(&consumers, VirialMode::GhostDot);

        let (e, v) = sched.set_flags(7, &mut consumers);
        // Global energy is unconditional; everything else off.
        assert!(e.global);
        assert!(!e.per_particle);
        assert_eq!(v, VirialFlags::default());
    }

    #[test]
    fn global_virial_carries_the_accumulation_mode() {
        let mut consumers: Vec<Box<dyn Consumer>> = vec![Box::new(PressureGlobal)];
        let mut sched = EvalScheduler::default();
        sched.rebuild(&consumers, VirialMode::GhostDot);

        let (_, v) = sched.set_flags(0, &mut consumers);
        assert_eq!(v.global, Some(VirialMode::GhostDot));
    }

    #[test]
    fn accumulators_sized_only_when_flagged() {
        let mut accum = Accumulators::default();
        accum.energy = 3.5;
        accum.prepare(8, true, false);

        assert_eq!(accum.energy, 0.);
        assert_eq!(accum.per_particle_energy.len(), 8);
        assert!(accum.per_particle_virial.is_empty());

        accum.prepare(8, false, true);
        assert!(accum.per_particle_energy.is_empty());
        assert_eq!(accum.per_particle_virial.len(), 8);
    }
}
