use alloc::collections::VecDeque;

use crate::callback::{CallAhead, CallbackOutcome, DeviceCallback, IoJobSink};
use crate::error::XferFault;
use crate::job::IoJob;
use crate::op::{BusOperation, Opcode, XferState};
use crate::pool::OperationPool;
use crate::queue::TransactionQueue;
use crate::slot::{CurrentSlot, Holder};
use crate::stats::AdapterStats;
use crate::stepper::{BeginOutcome, Stepper};

/// Runtime configuration for an [`Adapter`].
#[derive(Debug, Clone, Copy)]
pub struct AdapterConfig {
    /// Label used in diagnostics.
    pub name: &'static str,
    /// Admission limit for the transaction queue, clamped to `1..=DEPTH`.
    pub max_queue_depth: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self { name: "bus", max_queue_depth: usize::MAX }
    }
}

/// A terminal job waiting for its completion callback.
pub(crate) struct Retired<'a> {
    job: IoJob<'a>,
    recyclable: bool,
}

impl Retired<'_> {
    /// Run the device's completion callback. Must be called without the
    /// adapter borrowed, so the device may submit from inside it.
    pub(crate) fn notify(&mut self) -> CallbackOutcome {
        match self.job.callback() {
            Some(cb) => cb.io_op_callback(&mut self.job),
            None => CallbackOutcome::Reclaim,
        }
    }
}

/// Transaction engine for one physical bus.
///
/// Owns a pool of `POOL` reusable operations, a queue of up to `DEPTH`
/// admitted operations, and the single current-operation slot. Exactly one
/// operation can hold the bus at a time.
///
/// All methods take `&mut self`. When an interrupt handler also drives the
/// transport, share the adapter through a
/// [`SharedAdapter`](crate::SharedAdapter) so that every entry point runs in
/// a critical section.
///
/// Completion callbacks run at the end of the public call that retired the
/// job, after all bookkeeping for that call is done.
///
/// There is no built-in timeout. An integrator that needs one calls
/// [`abort_current`](Self::abort_current) with [`XferFault::Timeout`] once its
/// own deadline expires.
pub struct Adapter<'a, S: Stepper, const POOL: usize, const DEPTH: usize> {
    stepper: S,
    config: AdapterConfig,
    pool: OperationPool<'a, POOL>,
    queue: TransactionQueue<'a, DEPTH>,
    current: CurrentSlot<'a>,
    total_xfers: u32,
    failed_xfers: u32,
    queue_floods: u32,
    busy_retries: u32,
    queue_ready: bool,
    retired: VecDeque<Retired<'a>>,
    defer_callbacks: bool,
}

impl<'a, S: Stepper, const POOL: usize, const DEPTH: usize>
    Adapter<'a, S, POOL, DEPTH>
{
    pub fn new(stepper: S, config: AdapterConfig) -> Self {
        Self {
            stepper,
            config,
            pool: OperationPool::new(),
            queue: TransactionQueue::new(config.max_queue_depth),
            current: CurrentSlot::new(),
            total_xfers: 0,
            failed_xfers: 0,
            queue_floods: 0,
            busy_retries: 0,
            queue_ready: false,
            retired: VecDeque::new(),
            defer_callbacks: false,
        }
    }

    /// Bring up the transport hardware.
    pub fn init(&mut self) -> Result<(), XferFault> {
        self.stepper.bus_init()
    }

    /// Flush every queued and in-flight operation with
    /// [`XferFault::QueueFlush`], then shut the transport down. Returns the
    /// number of operations flushed.
    pub fn deinit(&mut self) -> usize {
        let mut flushed = self.flush(|_| true);
        self.abort_current(XferFault::QueueFlush);
        if let Some(job) = self.current.take_retired() {
            self.stepper.wipe();
            self.retire(job, false);
            flushed += 1;
        }
        self.stepper.bus_deinit();
        self.deliver_completions();
        flushed
    }

    /// Get a clean operation, from the pool when possible. Never fails.
    pub fn new_operation(
        &mut self,
        opcode: Opcode,
        callback: Option<&'a dyn DeviceCallback>,
    ) -> IoJob<'a> {
        let mut job = self.pool.take(opcode);
        job.set_callback(callback);
        job
    }

    /// Admit `job`. Never blocks.
    ///
    /// With the bus idle and nothing queued the job starts immediately,
    /// skipping the queue. Otherwise it is queued if there is room. A
    /// rejected job (wrong state, malformed, queue full) is faulted and
    /// completed right away, and the same fault is returned.
    pub fn queue_io_job(&mut self, job: IoJob<'a>) -> Result<(), XferFault> {
        let result = self.admit(job);
        self.deliver_completions();
        result
    }

    /// The scheduler tick.
    ///
    /// Retires the current operation if it is terminal, promotes the queue
    /// head into the vacant slot, and starts the current operation if it
    /// has not got the bus yet. Returns how many operations moved.
    pub fn advance_work_queue(&mut self) -> usize {
        let moved = self.tick();
        self.deliver_completions();
        moved
    }

    fn admit(&mut self, mut job: IoJob<'a>) -> Result<(), XferFault> {
        if job.state() != XferState::Idle {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "{}: refusing job in state {}",
                self.config.name,
                job.state()
            );
            job.force_fault(XferFault::IllegalState);
            self.retire(job, false);
            return Err(XferFault::IllegalState);
        }
        if let Err(fault) = job.validate() {
            job.abort(fault);
            self.retire(job, false);
            return Err(fault);
        }

        let mut job = if self.current.is_vacant() && self.queue.is_empty() {
            match self.current.occupy(job) {
                Ok(()) => {
                    self.dispatch();
                    return Ok(());
                }
                Err(job) => job,
            }
        } else {
            job
        };

        if !self.queue.has_room() {
            self.queue_floods = self.queue_floods.saturating_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "{}: queue flood ({} deep), rejecting {}",
                self.config.name,
                self.queue.len(),
                job.opcode()
            );
            job.abort(XferFault::QueueFull);
            self.retire(job, false);
            return Err(XferFault::QueueFull);
        }

        job.mark_queued();
        if let Err(mut job) = self.queue.push_back(job) {
            job.force_fault(XferFault::QueueFull);
            self.retire(job, false);
            return Err(XferFault::QueueFull);
        }
        Ok(())
    }

    fn tick(&mut self) -> usize {
        self.queue_ready = false;
        let mut moved = 0;

        if let Some(job) = self.current.take_retired() {
            self.stepper.wipe();
            self.retire(job, true);
            moved += 1;
        }

        if self.current.is_vacant() {
            if let Some(next) = self.queue.pop_front() {
                if let Err(job) = self.current.occupy(next) {
                    self.reclaim(job);
                }
            }
        }

        if matches!(
            self.dispatch(),
            Some(BeginOutcome::Started | BeginOutcome::Aborted)
        ) {
            moved += 1;
        }
        moved
    }

    /// Interrupt-context entry point: step the in-flight operation once.
    ///
    /// Only the current operation is touched; the pool and queue are left
    /// to foreground. Returns `false` if no transfer was in flight.
    pub fn on_interrupt(&mut self, status: S::Status) -> bool {
        let Some(op) = self.current.transport_mut() else {
            #[cfg(feature = "defmt")]
            defmt::debug!("{}: spurious interrupt", self.config.name);
            return false;
        };
        self.stepper.advance_operation(op, status);
        let done = op.state().is_terminal();
        if done {
            self.current.hand_back();
            self.queue_ready = true;
        }
        true
    }

    /// Abort the current operation, wherever it is, releasing the bus.
    /// Returns `false` if there was nothing to abort.
    pub fn abort_current(&mut self, fault: XferFault) -> bool {
        let aborted = match self.current.holder() {
            Holder::Transport => match self.current.transport_mut() {
                Some(op) => {
                    self.stepper.abort(op, fault);
                    true
                }
                None => false,
            },
            Holder::Foreground => match self.current.foreground_mut() {
                Some(op) if op.state().owns_bus() => {
                    self.stepper.abort(op, fault);
                    true
                }
                Some(op) => op.abort(fault),
                None => false,
            },
        };
        if aborted {
            #[cfg(feature = "defmt")]
            defmt::debug!("{}: current aborted with {}", self.config.name, fault);
            self.current.hand_back();
            self.queue_ready = true;
        }
        aborted
    }

    /// Flush queued (not current) operations matching `pred`. Each is
    /// faulted with [`XferFault::QueueFlush`] and completed.
    pub fn purge<F>(&mut self, pred: F) -> usize
    where
        F: FnMut(&BusOperation<'a>) -> bool,
    {
        let count = self.flush(pred);
        self.deliver_completions();
        count
    }

    fn flush<F>(&mut self, pred: F) -> usize
    where
        F: FnMut(&BusOperation<'a>) -> bool,
    {
        let removed = self.queue.drain_matching(pred);
        let count = removed.len();
        for mut job in removed {
            job.abort(XferFault::QueueFlush);
            self.retire(job, false);
        }
        #[cfg(feature = "defmt")]
        if count > 0 {
            defmt::debug!("{}: purged {} queued jobs", self.config.name, count);
        }
        count
    }

    /// Flush everything `device` has queued. Used on detach.
    pub fn purge_device(&mut self, device: &dyn DeviceCallback) -> usize {
        self.purge(|op| op.is_from(device))
    }

    /// Return a terminal job to wherever it came from: the pool, the heap
    /// allocator, or nowhere for caller-owned jobs.
    pub fn reclaim(&mut self, job: IoJob<'a>) {
        self.pool.reclaim(job);
    }

    /// Whether something finished since the last tick and
    /// [`advance_work_queue`](Self::advance_work_queue) should run. Clears
    /// the flag.
    pub fn take_queue_ready(&mut self) -> bool {
        core::mem::take(&mut self.queue_ready)
    }

    pub fn queue_ready(&self) -> bool {
        self.queue_ready
    }

    pub fn current(&self) -> Option<&BusOperation<'a>> {
        self.current.get()
    }

    /// Which side currently owns the current-operation slot.
    pub fn holder(&self) -> Holder {
        self.current.holder()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_vacant() && self.queue.is_empty()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> impl Iterator<Item = &BusOperation<'a>> {
        self.queue.iter()
    }

    pub fn pool_available(&self) -> usize {
        self.pool.available()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            total_xfers: self.total_xfers,
            failed_xfers: self.failed_xfers,
            pool_misses: self.pool.misses(),
            heap_frees: self.pool.heap_frees(),
            queue_floods: self.queue_floods,
            busy_retries: self.busy_retries,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn stepper(&self) -> &S {
        &self.stepper
    }

    pub fn stepper_mut(&mut self) -> &mut S {
        &mut self.stepper
    }

    /// Start the current operation if it does not have the bus yet.
    fn dispatch(&mut self) -> Option<BeginOutcome> {
        let op = self.current.foreground_mut()?;
        if !op.state().is_unstable() {
            return None;
        }

        let outcome = match op.callback() {
            Some(cb) if cb.io_op_callahead(op) == CallAhead::Recall => {
                op.abort(XferFault::IoRecall);
                BeginOutcome::Aborted
            }
            _ => self.stepper.begin(op),
        };
        if outcome == BeginOutcome::Aborted && !op.state().is_terminal() {
            op.abort(XferFault::IllegalState);
        }
        let terminal = op.state().is_terminal();

        match outcome {
            BeginOutcome::Started if !terminal => self.current.hand_to_transport(),
            BeginOutcome::Busy => {
                // Still unstable: the next tick asks again.
                self.busy_retries = self.busy_retries.saturating_add(1);
                self.queue_ready = true;
            }
            _ => {}
        }
        if terminal {
            self.queue_ready = true;
        }
        Some(outcome)
    }

    /// Count a terminal job and park it for its completion callback.
    fn retire(&mut self, mut job: IoJob<'a>, recyclable: bool) {
        match job.state() {
            XferState::Complete => {
                self.total_xfers = self.total_xfers.saturating_add(1);
            }
            XferState::Fault => {
                self.failed_xfers = self.failed_xfers.saturating_add(1);
            }
            _ => {
                job.force_fault(XferFault::IllegalState);
                self.failed_xfers = self.failed_xfers.saturating_add(1);
            }
        }
        #[cfg(feature = "defmt")]
        if let Some(fault) = job.fault() {
            defmt::debug!("{}: {} failed: {}", self.config.name, job.opcode(), fault);
        }

        self.retired.push_back(Retired { job, recyclable });
    }

    /// Run pending completion callbacks, unless a [`SharedAdapter`]
    /// delivers them outside its lock.
    ///
    /// [`SharedAdapter`]: crate::SharedAdapter
    fn deliver_completions(&mut self) {
        if self.defer_callbacks {
            return;
        }
        while let Some(mut retired) = self.retired.pop_front() {
            let outcome = retired.notify();
            self.finish(retired, outcome);
        }
    }

    pub(crate) fn defer_callbacks(&mut self) {
        self.defer_callbacks = true;
    }

    pub(crate) fn pop_retired(&mut self) -> Option<Retired<'a>> {
        self.retired.pop_front()
    }

    /// Recycle or reclaim a job whose callback has run.
    pub(crate) fn finish(&mut self, retired: Retired<'a>, outcome: CallbackOutcome) {
        let Retired { mut job, recyclable } = retired;
        if recyclable && outcome == CallbackOutcome::Recycle && job.recycle().is_ok() {
            // Any rejection is reported through the callback again.
            let _ = self.admit(job);
            return;
        }
        self.reclaim(job);
    }
}

impl<'a, S: Stepper, const POOL: usize, const DEPTH: usize> IoJobSink<'a>
    for Adapter<'a, S, POOL, DEPTH>
{
    fn new_operation(
        &mut self,
        opcode: Opcode,
        callback: Option<&'a dyn DeviceCallback>,
    ) -> IoJob<'a> {
        Adapter::new_operation(self, opcode, callback)
    }

    fn queue_io_job(&mut self, job: IoJob<'a>) -> Result<(), XferFault> {
        Adapter::queue_io_job(self, job)
    }
}

impl<S: Stepper, const POOL: usize, const DEPTH: usize> core::fmt::Display
    for Adapter<'_, S, POOL, DEPTH>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "-- {} adapter ({:?} holds slot)", self.config.name, self.holder())?;
        match self.current() {
            Some(op) => writeln!(f, "current: {}", op)?,
            None => writeln!(f, "current: none")?,
        }
        writeln!(
            f,
            "queue: {}/{}",
            self.queue.len(),
            self.queue.max_depth()
        )?;
        for (idx, op) in self.queue.iter().enumerate() {
            writeln!(f, "  {}: {}", idx, op)?;
        }
        writeln!(
            f,
            "pool: {}/{} free",
            self.pool.available(),
            self.pool.capacity()
        )?;
        write!(f, "{}", self.stats())
    }
}
