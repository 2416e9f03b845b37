/// Diagnostic counters kept by an [`Adapter`](crate::Adapter).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdapterStats {
    /// Operations that reached `Complete`.
    pub total_xfers: u32,
    /// Operations that reached `Fault`.
    pub failed_xfers: u32,
    /// Operations served from the heap because the pool was empty.
    pub pool_misses: u32,
    /// Heap operations destroyed on reclaim.
    pub heap_frees: u32,
    /// Admissions refused because the queue was full.
    pub queue_floods: u32,
    /// `begin` calls that found the bus busy.
    pub busy_retries: u32,
}

impl core::fmt::Display for AdapterStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "xfers {} failed {} pool_misses {} heap_frees {} floods {} busy {}",
            self.total_xfers,
            self.failed_xfers,
            self.pool_misses,
            self.heap_frees,
            self.queue_floods,
            self.busy_retries
        )
    }
}
