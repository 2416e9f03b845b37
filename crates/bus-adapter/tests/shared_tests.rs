use std::cell::{Cell, RefCell};

use bus_adapter::{
    Adapter, AdapterConfig, BeginOutcome, BusOperation, CallbackOutcome, DeviceCallback,
    Holder, IoJobSink, Opcode, SharedAdapter, Stepper, XferFault, XferState,
};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex, RawMutex};

// ---------------------------------------------------------------------------
// Mock interrupt-driven transport
// ---------------------------------------------------------------------------

/// Takes the bus in `begin`; one interrupt finishes the transfer.
#[derive(Default)]
struct OneShotStepper {
    /// Report the line busy this many more times.
    busy_for: u32,
}

impl Stepper for OneShotStepper {
    type Status = Result<(), XferFault>;

    fn begin(&mut self, op: &mut BusOperation<'_>) -> BeginOutcome {
        if self.busy_for > 0 {
            self.busy_for -= 1;
            return BeginOutcome::Busy;
        }
        match op.advance_to(XferState::Initiate) {
            Ok(()) => BeginOutcome::Started,
            Err(_) => BeginOutcome::Aborted,
        }
    }

    fn advance_operation(&mut self, op: &mut BusOperation<'_>, status: Self::Status) {
        match status {
            Ok(()) => {
                op.advance_to(XferState::Stop).unwrap();
                op.mark_complete().unwrap();
            }
            Err(fault) => {
                op.abort(fault);
            }
        }
    }
}

/// Finishes every transfer inside `begin`.
struct SyncStepper;

impl Stepper for SyncStepper {
    type Status = ();

    fn begin(&mut self, op: &mut BusOperation<'_>) -> BeginOutcome {
        op.advance_to(XferState::Initiate).unwrap();
        op.advance_to(XferState::Stop).unwrap();
        op.mark_complete().unwrap();
        BeginOutcome::Started
    }

    fn advance_operation(&mut self, _op: &mut BusOperation<'_>, _status: ()) {}
}

#[derive(Default)]
struct Device {
    seen: RefCell<Vec<(u8, Option<XferFault>)>>,
}

impl DeviceCallback for Device {
    fn io_op_callback(&self, op: &mut BusOperation<'_>) -> CallbackOutcome {
        self.seen.borrow_mut().push((op.device_address(), op.fault()));
        CallbackOutcome::Reclaim
    }
}

type ChainBus = SharedAdapter<'static, CriticalSectionRawMutex, SyncStepper, 2, 2>;

/// Submits the next address from inside its completion callback.
#[derive(Default)]
struct Chained {
    bus: Cell<Option<&'static ChainBus>>,
    me: Cell<Option<&'static Chained>>,
    follow_ups: Cell<u8>,
    seen: RefCell<Vec<u8>>,
}

impl Chained {
    fn attach(follow_ups: u8) -> (&'static Chained, &'static ChainBus) {
        let device: &'static Chained = Box::leak(Box::default());
        let bus: &'static ChainBus = Box::leak(Box::new(SharedAdapter::new(Adapter::new(
            SyncStepper,
            AdapterConfig { name: "chain", ..Default::default() },
        ))));
        device.bus.set(Some(bus));
        device.me.set(Some(device));
        device.follow_ups.set(follow_ups);
        (device, bus)
    }

    fn submit(&self, address: u8) {
        let (Some(bus), Some(me)) = (self.bus.get(), self.me.get()) else {
            return;
        };
        let mut sink = bus;
        let mut job = sink.new_operation(Opcode::Transmit, Some(me as &dyn DeviceCallback));
        job.set_device_address(address);
        sink.queue_io_job(job).unwrap();
    }
}

impl DeviceCallback for Chained {
    fn io_op_callback(&self, op: &mut BusOperation<'_>) -> CallbackOutcome {
        self.seen.borrow_mut().push(op.device_address());
        let left = self.follow_ups.get();
        if left > 0 {
            self.follow_ups.set(left - 1);
            self.submit(op.device_address() + 1);
        }
        CallbackOutcome::Reclaim
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Shared<M> = SharedAdapter<'static, M, OneShotStepper, 2, 2>;

fn make_shared<M: RawMutex>() -> (Shared<M>, &'static Device) {
    let device: &'static Device = Box::leak(Box::default());
    let adapter = Adapter::new(
        OneShotStepper::default(),
        AdapterConfig { name: "irq", ..Default::default() },
    );
    (SharedAdapter::new(adapter), device)
}

/// Submit the way a device driver would, through the sink seam.
fn enqueue(sink: &mut impl IoJobSink<'static>, device: &'static Device, address: u8) {
    let mut job = sink.new_operation(Opcode::Transmit, Some(device as &dyn DeviceCallback));
    job.set_device_address(address);
    sink.queue_io_job(job).unwrap();
}

fn submit<M: RawMutex>(shared: &Shared<M>, device: &'static Device, address: u8) {
    let mut sink = shared;
    enqueue(&mut sink, device, address);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn interrupt_completion_wakes_foreground() {
    let (shared, device) = make_shared::<CriticalSectionRawMutex>();

    submit(&shared, device, 0x40);
    assert!(!shared.is_ready());
    assert_eq!(shared.lock(|bus| bus.holder()), Holder::Transport);

    assert!(shared.on_interrupt(Ok(())));
    assert!(shared.is_ready());

    shared.wait_ready().await;
    assert_eq!(shared.poll(), 1);
    assert!(!shared.is_ready());
    assert_eq!(*device.seen.borrow(), vec![(0x40, None)]);
}

#[futures_test::test]
async fn poll_without_completion_does_nothing() {
    let (shared, device) = make_shared::<NoopRawMutex>();

    submit(&shared, device, 0x41);
    assert_eq!(shared.poll(), 0);
    assert!(device.seen.borrow().is_empty());
    assert_eq!(shared.lock(|bus| bus.queue_depth()), 0);
}

#[futures_test::test]
async fn queued_job_promoted_after_interrupt() {
    let (shared, device) = make_shared::<CriticalSectionRawMutex>();

    submit(&shared, device, 1);
    submit(&shared, device, 2);
    assert_eq!(shared.lock(|bus| bus.queue_depth()), 1);

    shared.on_interrupt(Err(XferFault::DeviceFault));
    shared.wait_ready().await;
    assert_eq!(shared.poll(), 2);

    let current = shared.lock(|bus| bus.current().map(|op| op.device_address()));
    assert_eq!(current, Some(2));

    shared.on_interrupt(Ok(()));
    shared.wait_ready().await;
    shared.poll();
    assert_eq!(
        *device.seen.borrow(),
        vec![(1, Some(XferFault::DeviceFault)), (2, None)]
    );
    assert_eq!(shared.lock(|bus| bus.stats().failed_xfers), 1);
}

#[futures_test::test]
async fn abort_current_publishes_readiness() {
    let (shared, device) = make_shared::<NoopRawMutex>();

    submit(&shared, device, 0x42);
    assert!(shared.abort_current(XferFault::Timeout));
    assert!(shared.is_ready());

    shared.wait_ready().await;
    shared.poll();
    assert_eq!(*device.seen.borrow(), vec![(0x42, Some(XferFault::Timeout))]);
    // A late interrupt finds nothing in flight.
    assert!(!shared.on_interrupt(Ok(())));
}

#[futures_test::test]
async fn purge_device_under_lock() {
    let (shared, device) = make_shared::<NoopRawMutex>();

    submit(&shared, device, 1);
    submit(&shared, device, 2);
    assert_eq!(shared.purge_device(device), 1);
    assert_eq!(*device.seen.borrow(), vec![(2, Some(XferFault::QueueFlush))]);
}

#[futures_test::test]
async fn busy_line_is_retried_by_poll() {
    let (shared, device) = make_shared::<CriticalSectionRawMutex>();
    shared.lock(|bus| bus.stepper_mut().busy_for = 1);

    submit(&shared, device, 0x43);
    let state = shared.lock(|bus| bus.current().map(|op| op.state()));
    assert_eq!(state, Some(XferState::Idle));
    assert!(shared.is_ready());

    shared.wait_ready().await;
    assert_eq!(shared.poll(), 1);
    let state = shared.lock(|bus| bus.current().map(|op| op.state()));
    assert_eq!(state, Some(XferState::Initiate));
    assert_eq!(shared.lock(|bus| bus.holder()), Holder::Transport);
    assert_eq!(shared.lock(|bus| bus.stats().busy_retries), 1);
    assert!(!shared.is_ready());

    shared.on_interrupt(Ok(()));
    shared.poll();
    assert_eq!(*device.seen.borrow(), vec![(0x43, None)]);
}

#[futures_test::test]
async fn busy_line_keeps_poll_armed() {
    let (shared, device) = make_shared::<NoopRawMutex>();
    shared.lock(|bus| bus.stepper_mut().busy_for = 3);

    submit(&shared, device, 0x44);
    for _ in 0..3 {
        assert!(shared.is_ready());
        shared.poll();
    }
    let state = shared.lock(|bus| bus.current().map(|op| op.state()));
    assert_eq!(state, Some(XferState::Initiate));
    assert_eq!(shared.lock(|bus| bus.stats().busy_retries), 3);
}

#[futures_test::test]
async fn callback_can_submit_follow_up() {
    let (device, bus) = Chained::attach(2);

    device.submit(0x10);
    // Finished inside queue_io_job; retires on the next tick.
    assert!(bus.is_ready());
    bus.wait_ready().await;

    for _ in 0..3 {
        assert!(bus.is_ready());
        assert_eq!(bus.poll(), 1);
    }
    assert_eq!(*device.seen.borrow(), vec![0x10, 0x11, 0x12]);
    assert!(!bus.is_ready());
    assert!(bus.lock(|adapter| adapter.is_idle()));
    assert_eq!(bus.lock(|adapter| adapter.stats().total_xfers), 3);
    assert_eq!(bus.lock(|adapter| adapter.pool_available()), 2);
}
