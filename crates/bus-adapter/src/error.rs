/// Reason a [`BusOperation`](crate::BusOperation) terminated abnormally.
///
/// Faults are recorded on the operation and surfaced to the issuing device
/// through [`DeviceCallback::io_op_callback`](crate::DeviceCallback::io_op_callback).
/// The engine never retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferFault {
    /// The bus is owned by another operation. Retry later.
    BusBusy,
    /// Admission was refused because the queue is at its maximum depth.
    QueueFull,
    /// The operation was flushed out of the queue (device detach, teardown).
    QueueFlush,
    /// The operation is malformed.
    BadParam,
    /// The operation was observed in a state inconsistent with the event.
    IllegalState,
    /// The peripheral reported a bus error or lost arbitration.
    BusFault,
    /// The addressed device misbehaved mid-transfer.
    DeviceFault,
    /// An interrupt kept firing without moving the transfer forward.
    HungIrq,
    /// The DMA engine reported an error or overrun.
    DmaFault,
    /// The transfer was aborted by an external deadline.
    Timeout,
    /// The device's callahead vetoed the transfer.
    IoRecall,
    /// The addressed peripheral did not respond.
    DeviceNotFound,
}

/// Coarse classification of [`XferFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultClass {
    /// Expected under load; not a failure of the transfer itself.
    Transient,
    /// The operation or the engine was misused.
    Configuration,
    /// The hardware reported a problem.
    Hardware,
    /// The device asked for it, or the target is absent.
    Application,
}

impl XferFault {
    pub const fn class(self) -> FaultClass {
        match self {
            XferFault::BusBusy | XferFault::QueueFull | XferFault::QueueFlush => {
                FaultClass::Transient
            }
            XferFault::BadParam | XferFault::IllegalState => {
                FaultClass::Configuration
            }
            XferFault::BusFault
            | XferFault::DeviceFault
            | XferFault::HungIrq
            | XferFault::DmaFault
            | XferFault::Timeout => FaultClass::Hardware,
            XferFault::IoRecall | XferFault::DeviceNotFound => {
                FaultClass::Application
            }
        }
    }

    pub const fn is_transient(self) -> bool {
        matches!(self.class(), FaultClass::Transient)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            XferFault::BusBusy => "BUS_BUSY",
            XferFault::QueueFull => "QUEUE_FULL",
            XferFault::QueueFlush => "QUEUE_FLUSH",
            XferFault::BadParam => "BAD_PARAM",
            XferFault::IllegalState => "ILLEGAL_STATE",
            XferFault::BusFault => "BUS_FAULT",
            XferFault::DeviceFault => "DEVICE_FAULT",
            XferFault::HungIrq => "HUNG_IRQ",
            XferFault::DmaFault => "DMA_FAULT",
            XferFault::Timeout => "TIMEOUT",
            XferFault::IoRecall => "IO_RECALL",
            XferFault::DeviceNotFound => "DEVICE_NOT_FOUND",
        }
    }
}

impl core::fmt::Display for XferFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
