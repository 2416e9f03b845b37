//! FIFO of admitted operations waiting for the bus.

use heapless::Deque;

use crate::job::IoJob;
use crate::op::BusOperation;

/// Bounded FIFO of admitted-but-not-started jobs.
///
/// `N` is the storage capacity; `max_depth` is the admission limit and may
/// be lower.
pub struct TransactionQueue<'a, const N: usize> {
    jobs: Deque<IoJob<'a>, N>,
    max_depth: usize,
}

impl<'a, const N: usize> TransactionQueue<'a, N> {
    /// `max_depth` is clamped to `1..=N`.
    pub fn new(max_depth: usize) -> Self {
        Self { jobs: Deque::new(), max_depth: max_depth.clamp(1, N.max(1)) }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn has_room(&self) -> bool {
        self.jobs.len() < self.max_depth && !self.jobs.is_full()
    }

    /// Append `job`, handing it back if the queue is at its limit.
    pub fn push_back(&mut self, job: IoJob<'a>) -> Result<(), IoJob<'a>> {
        if !self.has_room() {
            return Err(job);
        }
        self.jobs.push_back(job)
    }

    pub fn pop_front(&mut self) -> Option<IoJob<'a>> {
        self.jobs.pop_front()
    }

    pub fn front(&self) -> Option<&BusOperation<'a>> {
        self.jobs.front().map(|job| &**job)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BusOperation<'a>> {
        self.jobs.iter().map(|job| &**job)
    }

    /// Remove every job matching `pred`, keeping the rest in order.
    pub fn drain_matching<F>(&mut self, mut pred: F) -> heapless::Vec<IoJob<'a>, N>
    where
        F: FnMut(&BusOperation<'a>) -> bool,
    {
        let mut removed = heapless::Vec::new();
        for _ in 0..self.jobs.len() {
            let Some(job) = self.jobs.pop_front() else { break };
            // Neither push can overflow: every job came out of a deque of
            // capacity N.
            if pred(&*job) {
                let _ = removed.push(job);
            } else {
                let _ = self.jobs.push_back(job);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{BusOperation, Opcode};

    fn caller_job(addr: u8) -> IoJob<'static> {
        let op = alloc::boxed::Box::new(
            BusOperation::new(Opcode::Transmit).with_device_address(addr),
        );
        IoJob::Heap(op)
    }

    #[test]
    fn admission_is_bounded_by_max_depth() {
        let mut queue: TransactionQueue<'_, 4> = TransactionQueue::new(2);
        assert!(queue.push_back(caller_job(1)).is_ok());
        assert!(queue.push_back(caller_job(2)).is_ok());
        let rejected = queue.push_back(caller_job(3));
        assert!(rejected.is_err_and(|job| job.device_address() == 3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn max_depth_is_clamped() {
        let queue: TransactionQueue<'_, 4> = TransactionQueue::new(10);
        assert_eq!(queue.max_depth(), 4);
        let queue: TransactionQueue<'_, 4> = TransactionQueue::new(0);
        assert_eq!(queue.max_depth(), 1);
    }

    #[test]
    fn drain_preserves_survivor_order() {
        let mut queue: TransactionQueue<'_, 5> = TransactionQueue::new(5);
        for addr in 1..=5 {
            queue.push_back(caller_job(addr)).unwrap();
        }
        let removed = queue.drain_matching(|op| op.device_address() % 2 == 0);
        let removed: heapless::Vec<u8, 5> =
            removed.iter().map(|job| job.device_address()).collect();
        assert_eq!(removed.as_slice(), &[2, 4]);

        let left: heapless::Vec<u8, 5> =
            queue.iter().map(|op| op.device_address()).collect();
        assert_eq!(left.as_slice(), &[1, 3, 5]);
    }
}
