//! The minimization driver: lifecycle state machine, counters, settings, and the
//! contract concrete descent strategies plug into.
//!
//! Lifecycle is `init` → `setup` → `run` → `cleanup`, re-enterable at `init` for a
//! subsequent run. The driver owns all per-run mutable state explicitly; nothing
//! ambient survives between runs except the collaborators themselves.

pub mod baseline;
pub mod eval;
pub mod extra_dof;
pub mod norms;

use std::{fmt, str::FromStr};

use log::{info, warn};

use crate::{
    comm::Collective,
    consumer::Consumer,
    decomp::{Decomposition, RebuildCadence},
    extension::Extensions,
    forcefield::{EnergyFlags, ForceField, VirialFlags, VirialMode},
    minimize::{baseline::Baseline, eval::EvalScheduler, extra_dof::DofRegistry},
    report::{QuietReporter, Reporter},
    system::{Accumulators, ParticleStore},
    MinError,
};

/// Why an iteration strategy stopped. Not errors: each is handled gracefully,
/// with final output emitted before the run ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    MaxIterations,
    MaxEvaluations,
    EnergyTolerance,
    ForceTolerance,
    /// The search direction is not downhill.
    NotDownhill,
    /// Line search collapsed to a zero step.
    ZeroAlpha,
    ZeroForce,
    ZeroQuadraticFactors,
    TrustRegionTooSmall,
    SolverError,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::MaxIterations => "max iterations",
            Self::MaxEvaluations => "max force evaluations",
            Self::EnergyTolerance => "energy tolerance",
            Self::ForceTolerance => "force tolerance",
            Self::NotDownhill => "search direction is not downhill",
            Self::ZeroAlpha => "linesearch alpha is zero",
            Self::ZeroForce => "forces are zero",
            Self::ZeroQuadraticFactors => "quadratic factors are zero",
            Self::TrustRegionTooSmall => "trust region too small",
            Self::SolverError => "internal minimizer error",
        };
        write!(f, "{s}")
    }
}

/// Line-search policy for strategies that use one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineSearchStyle {
    #[default]
    Backtrack,
    Quadratic,
}

impl FromStr for LineSearchStyle {
    type Err = MinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backtrack" => Ok(Self::Backtrack),
            "quadratic" => Ok(Self::Quadratic),
            _ => Err(MinError::new(&format!("unknown line-search style: {s}"))),
        }
    }
}

/// User-facing knobs. Invalid values are rejected immediately, not at run time.
#[derive(Clone, Copy, Debug)]
pub struct MinSettings {
    /// Bound on how far any particle may move in one line-search step.
    pub dmax: f64,
    pub line: LineSearchStyle,
}

impl Default for MinSettings {
    fn default() -> Self {
        Self {
            dmax: 0.1,
            line: LineSearchStyle::Backtrack,
        }
    }
}

impl MinSettings {
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), MinError> {
        match key {
            "dmax" => {
                let v: f64 = value
                    .parse()
                    .map_err(|_| MinError::new(&format!("invalid dmax value: {value}")))?;
                if v <= 0. {
                    return Err(MinError::new("dmax must be > 0"));
                }
                self.dmax = v;
            }
            "line" => self.line = value.parse()?,
            _ => return Err(MinError::new(&format!("unknown minimize option: {key}"))),
        }
        Ok(())
    }
}

/// Initial/current/final energy and force norms, for the reporting collaborator.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    pub e_initial: f64,
    pub e_current: f64,
    pub e_final: f64,
    pub fnorm2_initial: f64,
    pub fnorminf_initial: f64,
    pub fnorm2_final: f64,
    pub fnorminf_final: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initialized,
    SetUp,
    Iterating,
    Stopped,
}

/// A pluggable descent/line-search strategy. The driver samples energy and forces
/// for it through [`Minimizer::evaluate`]; the strategy owns its own direction and
/// step bookkeeping.
///
/// After an `evaluate` during which particles migrated
/// ([`Minimizer::migrated_last_eval`] is true), any per-particle work vectors the
/// strategy keeps must be refreshed to the new local count.
pub trait SearchStyle {
    fn init_style(&mut self, _min: &mut Minimizer) {}

    fn setup_style(&mut self, _min: &mut Minimizer) -> Result<(), MinError> {
        Ok(())
    }

    /// Iterate up to `max_iter` steps, calling back into the driver for
    /// evaluations, and return why iteration stopped.
    fn iterate(&mut self, min: &mut Minimizer, max_iter: u64) -> StopReason;

    /// Whether this strategy damps steps through a proper line search. Undamped
    /// descent cannot safely handle dynamically-sized extra unknowns, so styles
    /// answering false are rejected at setup when extra DOF are registered.
    fn uses_line_search(&self) -> bool {
        true
    }
}

/// The minimization driver. Owns the particle buffers and all collaborators, and
/// sequences every collective in a globally consistent order.
pub struct Minimizer {
    pub settings: MinSettings,
    pub store: ParticleStore,
    pub decomp: Box<dyn Decomposition>,
    pub forces: ForceField,
    pub extensions: Extensions,
    pub consumers: Vec<Box<dyn Consumer>>,
    pub reporter: Box<dyn Reporter>,
    pub comm: Box<dyn Collective>,
    pub registry: DofRegistry,
    pub accum: Accumulators,

    phase: Phase,
    scheduler: EvalScheduler,
    baseline: Option<Baseline>,
    saved_cadence: Option<RebuildCadence>,
    pe_index: Option<usize>,

    step: u64,
    niter: u64,
    neval: u64,
    stop: Option<StopReason>,
    ndof_total: u64,
    migrated_last_eval: bool,

    pub stats: RunStats,
    pub(crate) eflags: EnergyFlags,
    pub(crate) vflags: VirialFlags,
}

impl Minimizer {
    pub fn new(
        store: ParticleStore,
        decomp: Box<dyn Decomposition>,
        forces: ForceField,
        comm: Box<dyn Collective>,
    ) -> Self {
        Self {
            settings: MinSettings::default(),
            store,
            decomp,
            forces,
            extensions: Extensions::default(),
            consumers: Vec::new(),
            reporter: Box::new(QuietReporter::default()),
            comm,
            registry: DofRegistry::default(),
            accum: Accumulators::default(),
            phase: Phase::Uninitialized,
            scheduler: EvalScheduler::default(),
            baseline: None,
            saved_cadence: None,
            pe_index: None,
            step: 0,
            niter: 0,
            neval: 0,
            stop: None,
            ndof_total: 0,
            migrated_last_eval: false,
            stats: RunStats::default(),
            eflags: EnergyFlags::default(),
            vflags: VirialFlags::default(),
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn niter(&self) -> u64 {
        self.niter
    }

    pub fn neval(&self) -> u64 {
        self.neval
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Total degrees of freedom over all ranks: particle coordinates, per-particle
    /// extras, and global extras. Valid after `setup`.
    pub fn ndof_total(&self) -> u64 {
        self.ndof_total
    }

    /// Whether the most recent `evaluate` migrated particles. Strategies check
    /// this to refresh their per-particle work vectors.
    pub fn migrated_last_eval(&self) -> bool {
        self.migrated_last_eval
    }

    /// Advance the global step clock by one minimizer iteration. Called by the
    /// iteration strategy once per accepted step.
    pub fn advance_iteration(&mut self) {
        self.step += 1;
        self.niter += 1;
    }

    /// Reset per-run state and open the registration window for extra DOF.
    pub fn init(&mut self, style: &mut dyn SearchStyle) {
        // Private per-particle storage for the original-position baseline.
        if let Some(b) = self.baseline.take() {
            b.remove(&mut self.store);
        }
        self.baseline = Some(Baseline::register(&mut self.store));

        // Extra DOF and consumer lists are rebuilt from scratch each cycle.
        self.registry.reset();
        self.extensions.min_init_all(&mut self.registry);

        let virial_mode = if self.forces.ghost_reduce {
            VirialMode::GhostDot
        } else {
            VirialMode::PairwiseSum
        };
        self.scheduler.rebuild(&self.consumers, virial_mode);

        // Minimization needs up-to-date neighbor lists every iteration. Save the
        // caller's cadence for restoration at cleanup.
        let prior = self.decomp.cadence();
        if prior != RebuildCadence::EVERY_STEP && self.comm.rank() == 0 {
            warn!("Resetting reneighboring cadence during minimization");
        }
        self.saved_cadence = Some(prior);
        self.decomp.set_cadence(RebuildCadence::EVERY_STEP);

        self.niter = 0;
        self.neval = 0;
        self.stop = None;
        self.stats = RunStats::default();

        style.init_style(self);
        self.phase = Phase::Initialized;
    }

    /// Resolve collaborators, do the one-time full rebuild, and seed the initial
    /// energy and norms with one force computation.
    pub fn setup(&mut self, style: &mut dyn SearchStyle) -> Result<(), MinError> {
        if self.phase != Phase::Initialized {
            return Err(MinError::new("setup() requires init() first"));
        }
        if self.comm.rank() == 0 {
            info!("Setting up minimization ...");
        }

        // Extra global DOF: count fixed here from the sum of extension requests.
        let n_global_dof = self.extensions.dof_total();
        self.registry.set_global_len(n_global_dof);

        self.pe_index = self.consumers.iter().position(|c| c.is_potential_energy());
        if self.pe_index.is_none() {
            return Err(MinError::new(
                "minimization requires a potential-energy consumer",
            ));
        }

        style.setup_style(self)?;

        // Total problem size, reduced over ranks. Global DOF are added after the
        // collective; they exist once, not per rank.
        let ndof_local = (3 + self.registry.per_particle_width()) as u64 * self.store.n_local as u64;
        self.ndof_total = self.comm.sum_count(ndof_local) + n_global_dof as u64;

        // One-time full rebuild: domain, migration, ghosts, neighbor list.
        self.decomp.wrap_into_domain(&mut self.store);
        self.decomp.reset_box(&mut self.store);
        self.decomp.setup_bins();
        self.decomp.exchange(&mut self.store);
        self.decomp.borders(&mut self.store);
        self.decomp.rebuild_neighbors(&mut self.store);

        // Migration may have changed the local count; size DOF buffers and the
        // baseline against what actually landed here.
        self.registry.allocate(self.store.n_local);
        if let Some(b) = &self.baseline {
            b.capture(&mut self.store);
        }

        if !style.uses_line_search() {
            if self.registry.n_global() > 0 {
                return Err(MinError::new(
                    "cannot minimize extra global degrees of freedom with a damped-dynamics style",
                ));
            }
            if self.registry.n_per_particle() > 0 {
                return Err(MinError::new(
                    "cannot minimize per-particle degrees of freedom with a damped-dynamics style",
                ));
            }
        }

        self.forces.setup_modules(&self.store);

        // Seed energy/forces. Not counted as a strategy evaluation.
        let energy = self.compute_forces();

        self.stats.e_current = energy;
        self.stats.e_initial = energy;
        self.stats.fnorm2_initial = self.fnorm_sqr().sqrt();
        self.stats.fnorminf_initial = self.fnorm_inf();
        self.reporter.setup_report(&self.stats);

        self.phase = Phase::SetUp;
        Ok(())
    }

    /// Setup for a resumed run: optional rebuild plus the seed force computation,
    /// without reporter setup. The collaborators from the previous `setup` are
    /// reused.
    pub fn setup_quiet(&mut self, rebuild: bool) -> Result<(), MinError> {
        if self.pe_index.is_none() {
            return Err(MinError::new("setup_quiet() requires a prior setup()"));
        }

        if rebuild {
            self.decomp.wrap_into_domain(&mut self.store);
            self.decomp.reset_box(&mut self.store);
            self.decomp.setup_bins();
            self.decomp.exchange(&mut self.store);
            self.decomp.borders(&mut self.store);
            self.decomp.rebuild_neighbors(&mut self.store);
            self.registry.resize(self.store.n_local);
        }

        let energy = self.compute_forces();

        self.stats.e_current = energy;
        self.stats.e_initial = energy;
        self.stats.fnorm2_initial = self.fnorm_sqr().sqrt();
        self.stats.fnorminf_initial = self.fnorm_inf();

        self.phase = Phase::SetUp;
        Ok(())
    }

    /// Delegate to the strategy for up to `n` iterations. On any early stop, pull
    /// output triggers back to the stopping step, notify time-dependent consumers,
    /// and run one final evaluation without re-baselining boundary bookkeeping.
    pub fn run(&mut self, style: &mut dyn SearchStyle, n: u64) -> StopReason {
        debug_assert!(self.phase == Phase::SetUp);
        self.phase = Phase::Iterating;

        let stop = style.iterate(self, n);
        self.stop = Some(stop);

        if stop != StopReason::MaxIterations {
            self.reporter.retarget(self.step);
            for c in &mut self.consumers {
                c.advance_to(self.step);
            }

            let energy = self.evaluate(false);
            self.stats.e_current = energy;
            self.reporter.write(self.step, &self.stats);
        }

        self.phase = Phase::Stopped;
        stop
    }

    /// Record final statistics, restore the reneighboring cadence, and release the
    /// minimizer-private storage.
    pub fn cleanup(&mut self) {
        self.stats.e_final = self.stats.e_current;
        self.stats.fnorm2_final = self.fnorm_sqr().sqrt();
        self.stats.fnorminf_final = self.fnorm_inf();

        if let Some(cadence) = self.saved_cadence.take() {
            self.decomp.set_cadence(cadence);
        }
        if let Some(b) = self.baseline.take() {
            b.remove(&mut self.store);
        }

        self.phase = Phase::Uninitialized;
    }

    /// ||F||² over all ranks and DOF. See [`norms`] for the reduction-order
    /// contract.
    pub fn fnorm_sqr(&self) -> f64 {
        norms::force_norm_sqr(&self.store, &self.registry, self.comm.as_ref())
    }

    /// ||F||∞ over all ranks and DOF.
    pub fn fnorm_inf(&self) -> f64 {
        norms::force_norm_inf(&self.store, &self.registry, self.comm.as_ref())
    }

    /// Flat xyz rows of each local particle's position at run start. Line-search
    /// strategies measure trial displacements against these. Empty before `init`.
    pub fn baseline_positions(&self) -> &[f64] {
        match &self.baseline {
            Some(b) => b.positions(&self.store),
            None => &[],
        }
    }

    pub(crate) fn rebase_baseline(&mut self) {
        if let Some(b) = &self.baseline {
            b.rebase(&mut self.store, self.decomp.as_ref());
        }
    }
}
