//! Resource ledger.
//!
//! Counts the process slots and memory not currently held by running jobs.
//! Only the scheduling loop mutates it: admission reserves, reaping releases.

use serde::{Deserialize, Serialize};

use crate::domain::MemLimit;

/// Available slots and memory against the configured maxima.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLedger {
    max_slots: u32,
    slots: u32,
    max_mem: MemLimit,
    mem: MemLimit,
}

impl ResourceLedger {
    /// Seed the ledger with everything available.
    pub fn new(max_slots: u32, max_mem: MemLimit) -> Self {
        Self {
            max_slots,
            slots: max_slots,
            max_mem,
            mem: max_mem,
        }
    }

    pub fn available_slots(&self) -> u32 {
        self.slots
    }

    pub fn available_mem(&self) -> MemLimit {
        self.mem
    }

    /// Check whether a demand fits what is currently available.
    pub fn fits(&self, procs: u32, mem: u64) -> bool {
        procs <= self.slots && self.mem.admits(mem)
    }

    /// Take resources for an admitted job.
    ///
    /// Returns false and leaves the ledger untouched if the demand does not fit.
    pub fn reserve(&mut self, procs: u32, mem: u64) -> bool {
        if !self.fits(procs, mem) {
            return false;
        }
        self.slots -= procs;
        if let MemLimit::Bytes(avail) = self.mem {
            self.mem = MemLimit::Bytes(avail - mem);
        }
        true
    }

    /// Return a reaped job's resources.
    ///
    /// Clamped to the configured maxima; returns false if clamping was needed,
    /// which means a release had no matching reserve.
    pub fn release(&mut self, procs: u32, mem: u64) -> bool {
        let mut balanced = true;

        let slots = self.slots.saturating_add(procs);
        if slots > self.max_slots {
            balanced = false;
        }
        self.slots = slots.min(self.max_slots);

        if let (MemLimit::Bytes(avail), MemLimit::Bytes(max)) = (self.mem, self.max_mem) {
            let restored = avail.saturating_add(mem);
            if restored > max {
                balanced = false;
            }
            self.mem = MemLimit::Bytes(restored.min(max));
        }

        balanced
    }

    /// True when nothing is reserved.
    pub fn is_idle(&self) -> bool {
        self.slots == self.max_slots && self.mem == self.max_mem
    }

    pub fn snapshot(&self, running: usize) -> LedgerSnapshot {
        LedgerSnapshot {
            max_slots: self.max_slots,
            available_slots: self.slots,
            max_mem: self.max_mem,
            available_mem: self.mem,
            running,
        }
    }
}

/// Point-in-time copy of the ledger, published by the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub max_slots: u32,
    pub available_slots: u32,
    pub max_mem: MemLimit,
    pub available_mem: MemLimit,
    pub running: usize,
}

impl LedgerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.available_slots == self.max_slots && self.available_mem == self.max_mem && self.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ledger_is_full() {
        let ledger = ResourceLedger::new(4, MemLimit::Bytes(1000));
        assert_eq!(ledger.available_slots(), 4);
        assert_eq!(ledger.available_mem(), MemLimit::Bytes(1000));
        assert!(ledger.is_idle());
    }

    #[test]
    fn test_reserve_and_release() {
        let mut ledger = ResourceLedger::new(4, MemLimit::Bytes(1000));
        assert!(ledger.reserve(3, 600));
        assert_eq!(ledger.available_slots(), 1);
        assert_eq!(ledger.available_mem(), MemLimit::Bytes(400));
        assert!(!ledger.is_idle());

        assert!(ledger.release(3, 600));
        assert!(ledger.is_idle());
    }

    #[test]
    fn test_reserve_refuses_oversized_demand() {
        let mut ledger = ResourceLedger::new(2, MemLimit::Bytes(100));
        assert!(!ledger.reserve(3, 0));
        assert!(!ledger.reserve(1, 101));
        assert!(ledger.is_idle());
    }

    #[test]
    fn test_unlimited_memory_is_never_counted() {
        let mut ledger = ResourceLedger::new(2, MemLimit::Unlimited);
        assert!(ledger.reserve(1, u64::MAX));
        assert_eq!(ledger.available_mem(), MemLimit::Unlimited);
        assert!(ledger.release(1, u64::MAX));
        assert!(ledger.is_idle());
    }

    #[test]
    fn test_release_without_reserve_is_clamped() {
        let mut ledger = ResourceLedger::new(2, MemLimit::Bytes(10));
        assert!(!ledger.release(1, 5));
        assert_eq!(ledger.available_slots(), 2);
        assert_eq!(ledger.available_mem(), MemLimit::Bytes(10));
    }

    #[test]
    fn test_ledger_stays_within_bounds_over_event_sequence() {
        let mut ledger = ResourceLedger::new(3, MemLimit::Bytes(300));
        let demands = [(1, 100), (2, 50), (1, 200), (3, 0), (1, 100)];
        let mut held: Vec<(u32, u64)> = Vec::new();

        for (i, (procs, mem)) in demands.iter().enumerate() {
            if ledger.reserve(*procs, *mem) {
                held.push((*procs, *mem));
            }
            if i % 2 == 1 {
                if let Some((p, m)) = held.pop() {
                    assert!(ledger.release(p, m));
                }
            }
            let reserved_slots: u32 = held.iter().map(|(p, _)| p).sum();
            let reserved_mem: u64 = held.iter().map(|(_, m)| m).sum();
            assert_eq!(ledger.available_slots() + reserved_slots, 3);
            assert_eq!(ledger.available_mem(), MemLimit::Bytes(300 - reserved_mem));
        }
    }

    #[test]
    fn test_snapshot() {
        let mut ledger = ResourceLedger::new(2, MemLimit::Unlimited);
        ledger.reserve(1, 0);
        let snap = ledger.snapshot(1);
        assert_eq!(snap.available_slots, 1);
        assert_eq!(snap.max_slots, 2);
        assert_eq!(snap.running, 1);
        assert!(!snap.is_idle());
    }
}
