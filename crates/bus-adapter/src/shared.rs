use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicBool, Ordering};

use crate::adapter::Adapter;
use crate::callback::{DeviceCallback, IoJobSink};
use crate::error::XferFault;
use crate::job::IoJob;
use crate::op::Opcode;
use crate::stepper::Stepper;

/// An [`Adapter`] shared between foreground code and an interrupt handler.
///
/// Every entry point runs inside `M`'s critical section, so the interrupt
/// can never observe a half-finished promotion or reclamation. With
/// `CriticalSectionRawMutex` on a single-core target that means masking
/// interrupts for the duration of each call.
///
/// Device callbacks run after the critical section is left, on the
/// foreground side, so a device may submit follow-up work from
/// [`DeviceCallback::io_op_callback`] through this adapter. Interrupt-side
/// entry points ([`on_interrupt`](Self::on_interrupt),
/// [`abort_current`](Self::abort_current)) never run callbacks.
///
/// Completion is published two ways: a lock-free ready flag for polling
/// loops ([`poll`](Self::poll)) and a signal for async service tasks
/// ([`run`](Self::run)).
pub struct SharedAdapter<
    'a,
    M: RawMutex,
    S: Stepper,
    const POOL: usize,
    const DEPTH: usize,
> {
    inner: Mutex<M, RefCell<Adapter<'a, S, POOL, DEPTH>>>,
    ready: AtomicBool,
    wake: Signal<M, ()>,
}

impl<'a, M: RawMutex, S: Stepper, const POOL: usize, const DEPTH: usize>
    SharedAdapter<'a, M, S, POOL, DEPTH>
{
    pub fn new(mut adapter: Adapter<'a, S, POOL, DEPTH>) -> Self {
        adapter.defer_callbacks();
        Self {
            inner: Mutex::new(RefCell::new(adapter)),
            ready: AtomicBool::new(false),
            wake: Signal::new(),
        }
    }

    /// Run `f` on the adapter inside the critical section, then deliver
    /// any completions it produced.
    ///
    /// `f` must not call back into this `SharedAdapter`.
    pub fn lock<R>(
        &self,
        f: impl FnOnce(&mut Adapter<'a, S, POOL, DEPTH>) -> R,
    ) -> R {
        let result = self.critical(f);
        self.deliver_completions();
        result
    }

    fn critical<R>(
        &self,
        f: impl FnOnce(&mut Adapter<'a, S, POOL, DEPTH>) -> R,
    ) -> R {
        let (result, ready) = self.inner.lock(|cell| {
            let mut adapter = cell.borrow_mut();
            let result = f(&mut adapter);
            (result, adapter.take_queue_ready())
        });
        if ready {
            self.ready.store(true, Ordering::Release);
            self.wake.signal(());
        }
        result
    }

    /// Pop one retired job at a time and run its callback with the lock
    /// released.
    fn deliver_completions(&self) {
        while let Some(mut retired) = self.critical(|adapter| adapter.pop_retired()) {
            let outcome = retired.notify();
            self.critical(|adapter| adapter.finish(retired, outcome));
        }
    }

    pub fn new_operation(
        &self,
        opcode: Opcode,
        callback: Option<&'a dyn DeviceCallback>,
    ) -> IoJob<'a> {
        self.lock(|adapter| adapter.new_operation(opcode, callback))
    }

    pub fn queue_io_job(&self, job: IoJob<'a>) -> Result<(), XferFault> {
        self.lock(|adapter| adapter.queue_io_job(job))
    }

    pub fn advance_work_queue(&self) -> usize {
        self.ready.store(false, Ordering::Release);
        self.lock(|adapter| adapter.advance_work_queue())
    }

    /// Call from the transport's interrupt handler.
    pub fn on_interrupt(&self, status: S::Status) -> bool {
        self.critical(|adapter| adapter.on_interrupt(status))
    }

    /// Safe to call from a timer interrupt.
    pub fn abort_current(&self, fault: XferFault) -> bool {
        self.critical(|adapter| adapter.abort_current(fault))
    }

    pub fn purge_device(&self, device: &dyn DeviceCallback) -> usize {
        self.lock(|adapter| adapter.purge_device(device))
    }

    /// Whether a completion is waiting to be serviced. Does not lock.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Service the queue if a completion or a busy-bus retry was published
    /// since the last call.
    pub fn poll(&self) -> usize {
        if self.ready.swap(false, Ordering::AcqRel) {
            self.lock(|adapter| adapter.advance_work_queue())
        } else {
            0
        }
    }

    /// Wait until the queue needs servicing.
    pub async fn wait_ready(&self) {
        self.wake.wait().await;
    }

    /// Service loop for an async executor task.
    ///
    /// A busy bus re-signals on every tick, so the loop yields between
    /// rounds to let other tasks run while it waits for the line.
    pub async fn run(&self) -> ! {
        loop {
            self.wait_ready().await;
            while self.advance_work_queue() > 0 {}
            embassy_futures::yield_now().await;
        }
    }
}

impl<'a, M: RawMutex, S: Stepper, const POOL: usize, const DEPTH: usize>
    IoJobSink<'a> for &SharedAdapter<'a, M, S, POOL, DEPTH>
{
    fn new_operation(
        &mut self,
        opcode: Opcode,
        callback: Option<&'a dyn DeviceCallback>,
    ) -> IoJob<'a> {
        SharedAdapter::new_operation(self, opcode, callback)
    }

    fn queue_io_job(&mut self, job: IoJob<'a>) -> Result<(), XferFault> {
        SharedAdapter::queue_io_job(self, job)
    }
}
