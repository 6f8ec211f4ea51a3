//! Per-side navigation sequencer
//!
//! Each side keeps its own monotonically increasing counter. A listing that
//! resolves with a sequence number other than the side's latest is stale and
//! must be dropped, so a slow earlier navigation can never overwrite a faster
//! later one.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::pane::Side;

pub struct SideSequencer {
    counters: DashMap<Side, AtomicU64>,
}

impl SideSequencer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Issue the next sequence number. Starts at 1; 0 means "nothing issued".
    pub fn next(&self, side: Side) -> u64 {
        self.counters
            .entry(side)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    /// Latest issued value, without incrementing
    pub fn current(&self, side: Side) -> u64 {
        self.counters
            .get(&side)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn is_latest(&self, side: Side, seq: u64) -> bool {
        self.current(side) == seq
    }
}

impl Default for SideSequencer {
    fn default() -> Self {
        Self::new()
    }
}
