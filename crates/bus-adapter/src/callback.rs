use crate::error::XferFault;
use crate::job::IoJob;
use crate::op::{BusOperation, Opcode};

/// Answer from [`DeviceCallback::io_op_callahead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallAhead {
    Proceed,
    /// Cancel the transfer before it touches the bus. The operation still
    /// completes, faulted with [`XferFault::IoRecall`].
    Recall,
}

/// Answer from [`DeviceCallback::io_op_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallbackOutcome {
    /// Return the operation to wherever it came from.
    Reclaim,
    /// Reset the operation to Idle and submit it again.
    Recycle,
}

/// Implemented by a device that issues bus operations.
pub trait DeviceCallback {
    /// Called right before the transfer begins.
    fn io_op_callahead(&self, _op: &BusOperation<'_>) -> CallAhead {
        CallAhead::Proceed
    }

    /// Called exactly once per terminal state with the finished operation.
    ///
    /// A faulted operation keeps whatever the transfer left in its buffer;
    /// check [`BusOperation::has_fault`] before trusting it.
    fn io_op_callback(&self, op: &mut BusOperation<'_>) -> CallbackOutcome;
}

/// The submission side of an adapter, as seen by a device.
///
/// A device's own `queue_io_job` usually just forwards here.
pub trait IoJobSink<'a> {
    fn new_operation(
        &mut self,
        opcode: Opcode,
        callback: Option<&'a dyn DeviceCallback>,
    ) -> IoJob<'a>;

    fn queue_io_job(&mut self, job: IoJob<'a>) -> Result<(), XferFault>;
}
