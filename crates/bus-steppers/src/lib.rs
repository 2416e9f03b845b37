#![no_std]
//! Reference transports for [`bus_adapter`].
//!
//! - [`BlockingSpiStepper`]: finishes each transfer synchronously over an
//!   `embedded-hal` [`SpiDevice`](embedded_hal::spi::SpiDevice).
//! - [`TwiStepper`]: an I2C master that advances one phase per peripheral
//!   interrupt, on top of a platform-supplied [`TwiPort`].

mod spi;
mod twi;

pub use spi::BlockingSpiStepper;
pub use twi::{TwiConfig, TwiPort, TwiStatus, TwiStepper};
