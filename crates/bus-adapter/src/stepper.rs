use crate::error::XferFault;
use crate::op::BusOperation;

/// Result of asking a transport to start the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeginOutcome {
    /// The operation owns the bus (or already finished, for synchronous
    /// transports).
    Started,
    /// The operation was faulted before reaching the bus. It still runs the
    /// normal completion path.
    Aborted,
    /// The bus is held elsewhere. The operation is untouched and will be
    /// retried on the next scheduler tick.
    Busy,
}

/// Transport-specific logic that walks one operation through its physical
/// phases.
///
/// A synchronous transport finishes the whole transfer inside
/// [`begin`](Stepper::begin). An interrupt-driven one only requests the bus
/// there and performs the remaining transitions in
/// [`advance_operation`](Stepper::advance_operation), once per hardware event.
pub trait Stepper {
    /// Hardware event delivered to `advance_operation`.
    type Status;

    /// Platform setup: pins, clocks, interrupt priorities.
    fn bus_init(&mut self) -> Result<(), XferFault> {
        Ok(())
    }

    /// Platform teardown.
    fn bus_deinit(&mut self) {}

    /// Start `op`. Called with the bus idle and the device callahead already
    /// consulted.
    fn begin(&mut self, op: &mut BusOperation<'_>) -> BeginOutcome;

    /// Drive exactly one transition of `op` in response to `status`. Must not
    /// block.
    fn advance_operation(&mut self, op: &mut BusOperation<'_>, status: Self::Status);

    /// Terminate `op` with `fault`, releasing the bus if the transport holds
    /// it.
    fn abort(&mut self, op: &mut BusOperation<'_>, fault: XferFault) {
        op.abort(fault);
    }

    /// Reset transport-local scratch once the current operation has been
    /// retired.
    fn wipe(&mut self) {}
}
