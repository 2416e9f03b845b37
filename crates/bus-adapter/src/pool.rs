//! Fixed-capacity store of reusable operations.

use alloc::boxed::Box;

use crate::job::IoJob;
use crate::op::{BusOperation, Opcode, Ownership};

/// Arena of `N` preallocated operations, with heap fallback on exhaustion.
pub struct OperationPool<'a, const N: usize> {
    slots: [Option<BusOperation<'a>>; N],
    misses: u32,
    heap_frees: u32,
}

impl<'a, const N: usize> OperationPool<'a, N> {
    pub fn new() -> Self {
        let slots = core::array::from_fn(|idx| {
            let mut op = BusOperation::undefined(Opcode::Transmit, Ownership::Pool(idx));
            op.wipe();
            Some(op)
        });
        Self { slots, misses: 0, heap_frees: 0 }
    }

    /// Check out a clean operation. Never fails: when every slot is out the
    /// operation comes from the heap and a miss is recorded.
    pub fn take(&mut self, opcode: Opcode) -> IoJob<'a> {
        let free = self.slots.iter_mut().find_map(Option::take);
        match free {
            Some(mut op) => {
                op.prepare(opcode);
                IoJob::Pooled(op)
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                #[cfg(feature = "defmt")]
                defmt::debug!("operation pool exhausted ({} slots), using heap", N);
                let mut op = BusOperation::undefined(opcode, Ownership::Heap);
                op.prepare(opcode);
                IoJob::Heap(Box::new(op))
            }
        }
    }

    /// Dispose of a finished job according to its ownership.
    pub fn reclaim(&mut self, job: IoJob<'a>) {
        match job {
            IoJob::Pooled(mut op) => {
                let Ownership::Pool(idx) = op.ownership() else {
                    // Pooled jobs are only minted by `take`.
                    self.heap_frees = self.heap_frees.saturating_add(1);
                    return;
                };
                op.wipe();
                match self.slots.get_mut(idx) {
                    Some(slot) if slot.is_none() => *slot = Some(op),
                    _ => {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("pool slot {} not free on reclaim, dropping", idx);
                        self.heap_frees = self.heap_frees.saturating_add(1);
                    }
                }
            }
            IoJob::Heap(op) => {
                drop(op);
                self.heap_frees = self.heap_frees.saturating_add(1);
            }
            IoJob::Borrowed(_) => {}
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Clean operations currently sitting in the pool.
    pub fn available(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Requests served from the heap because the pool was empty.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Heap instances destroyed on reclaim.
    pub fn heap_frees(&self) -> u32 {
        self.heap_frees
    }

    /// Whether slot `idx` currently holds a clean operation.
    pub fn is_slot_free(&self, idx: usize) -> bool {
        self.slots.get(idx).is_some_and(Option::is_some)
    }
}

impl<const N: usize> Default for OperationPool<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
