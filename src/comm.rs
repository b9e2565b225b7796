//! Collective-reduction primitives. These are the only blocking operations in the
//! engine: every call is a synchronization barrier that all ranks must reach in the
//! same relative order.
//!
//! Two implementations: [`SerialComm`] for single-process runs, and
//! [`ThreadedComm`] for data-parallel runs where each rank is a thread of one
//! process. The trait is the seam a real message-passing transport would plug into.

use std::sync::{Arc, Barrier, Mutex};

/// A communicator over all worker ranks. Reductions return the combined value on
/// every rank.
pub trait Collective: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Sum-allreduce of one f64.
    fn sum(&self, value: f64) -> f64;

    /// Max-allreduce of one f64.
    fn max(&self, value: f64) -> f64;

    /// Sum-allreduce of one counter. Used for degree-of-freedom totals.
    fn sum_count(&self, value: u64) -> u64;
}

/// Single-rank world; every reduction is the identity.
pub struct SerialComm;

impl Collective for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn sum(&self, value: f64) -> f64 {
        value
    }

    fn max(&self, value: f64) -> f64 {
        value
    }

    fn sum_count(&self, value: u64) -> u64 {
        value
    }
}

/// Shared state for an in-process world of thread ranks.
pub struct CommWorld {
    size: usize,
    barrier: Barrier,
    // One contribution slot per rank. f64 values travel as their bit patterns so a
    // single buffer serves both float and counter reductions.
    slots: Mutex<Vec<u64>>,
}

impl CommWorld {
    pub fn new(size: usize) -> Arc<Self> {
        assert!(size > 0);
        Arc::new(Self {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![0; size]),
        })
    }
}

/// One rank's handle onto a [`CommWorld`]. Each participating thread owns its own
/// handle; reductions block until every rank has contributed.
pub struct ThreadedComm {
    world: Arc<CommWorld>,
    rank: usize,
}

impl ThreadedComm {
    pub fn attach(world: &Arc<CommWorld>, rank: usize) -> Self {
        assert!(rank < world.size);
        Self {
            world: Arc::clone(world),
            rank,
        }
    }

    /// Three-phase allreduce: publish, combine, release. The trailing barrier keeps
    /// a fast rank from starting the next round while others still read the slots.
    fn allreduce(&self, bits: u64, combine: impl Fn(u64, u64) -> u64) -> u64 {
        self.world.barrier.wait();
        {
            let mut slots = self.world.slots.lock().unwrap();
            slots[self.rank] = bits;
        }
        self.world.barrier.wait();
        let combined = {
            let slots = self.world.slots.lock().unwrap();
            slots.iter().copied().reduce(&combine).unwrap()
        };
        self.world.barrier.wait();
        combined
    }
}

impl Collective for ThreadedComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world.size
    }

    fn sum(&self, value: f64) -> f64 {
        let bits = self.allreduce(value.to_bits(), |a, b| {
            (f64::from_bits(a) + f64::from_bits(b)).to_bits()
        });
        f64::from_bits(bits)
    }

    fn max(&self, value: f64) -> f64 {
        let bits = self.allreduce(value.to_bits(), |a, b| {
            f64::from_bits(a).max(f64::from_bits(b)).to_bits()
        });
        f64::from_bits(bits)
    }

    fn sum_count(&self, value: u64) -> u64 {
        self.allreduce(value, |a, b| a + b)
    }
}
