//! The output/reporting seam. Writing thermo lines, dumps, or restarts is not this
//! crate's business; the driver only needs to tell a reporter when a run stopped
//! early so scheduled triggers can be pulled back to the stopping step, and to ask
//! whether reported energies are normalized per particle.

use crate::minimize::RunStats;

pub trait Reporter: Send {
    /// One-time hook after setup seeded the initial energy and norms.
    fn setup_report(&mut self, _stats: &RunStats) {}

    /// Whether reported energies are divided by the global particle count.
    fn normalize_energy(&self) -> bool {
        false
    }

    /// Pull any scheduled output triggers (thermo/dump/restart) back to `step`.
    /// Called when a run terminates before its scheduled end.
    fn retarget(&mut self, _step: u64) {}

    /// Final output for the stopping step.
    fn write(&mut self, _step: u64, _stats: &RunStats) {}
}

/// No output at all; optionally normalizes energies.
#[derive(Default)]
pub struct QuietReporter {
    pub normalize: bool,
}

impl Reporter for QuietReporter {
    fn normalize_energy(&self) -> bool {
        self.normalize
    }
}
