#![no_std]
//! Transaction scheduling for a shared single-master peripheral bus.
//!
//! Devices on the bus build [`BusOperation`]s, usually checked out of the
//! adapter's fixed pool, and hand them to [`Adapter::queue_io_job`]. The
//! adapter serialises them through a bounded FIFO and a single
//! current-operation slot, and a transport-specific [`Stepper`] walks the
//! current operation through its physical phases. Every operation ends in
//! exactly one completion callback on the issuing device, after which it is
//! recycled, returned to the pool, or freed.

extern crate alloc;

mod adapter;
mod callback;
mod error;
mod job;
mod op;
mod pool;
mod queue;
mod shared;
mod slot;
mod stats;
mod stepper;

pub use adapter::{Adapter, AdapterConfig};
pub use callback::{CallAhead, CallbackOutcome, DeviceCallback, IoJobSink};
pub use error::{FaultClass, XferFault};
pub use job::IoJob;
pub use op::{
    BusOperation, Opcode, Ownership, SubAddress, XferBuffer, XferProgress, XferState,
    MAX_PARAMS,
};
pub use pool::OperationPool;
pub use queue::TransactionQueue;
pub use shared::SharedAdapter;
pub use slot::Holder;
pub use stats::AdapterStats;
pub use stepper::{BeginOutcome, Stepper};
