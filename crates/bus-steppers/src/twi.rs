//! Interrupt-driven two-wire (I2C master) transport.
//!
//! [`TwiStepper::begin`] only issues START and unmasks the peripheral
//! interrupt. Every later phase (address, header bytes, payload bytes,
//! repeated START, STOP) advances by exactly one step per interrupt, from
//! [`Adapter::on_interrupt`](bus_adapter::Adapter::on_interrupt).

use bitflags::bitflags;
use bus_adapter::{BeginOutcome, BusOperation, Stepper, XferFault, XferState};

bitflags! {
    /// Peripheral status latched by the TWI interrupt handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TwiStatus: u16 {
        /// Target acknowledged its address.
        const ADDR_ACK  = 1 << 0;
        /// Nobody acknowledged the address.
        const ADDR_NACK = 1 << 1;
        /// Last written byte left the shift register.
        const TX_DONE   = 1 << 2;
        /// Target refused a data byte.
        const DATA_NACK = 1 << 3;
        /// A received byte is waiting.
        const RX_READY  = 1 << 4;
        /// STOP condition sent, bus released.
        const STOP_DONE = 1 << 5;
        const ARB_LOST  = 1 << 6;
        const BUS_ERROR = 1 << 7;
        const DMA_ERROR = 1 << 8;
    }
}

impl TwiStatus {
    /// The fault this status reports, if any. Bus-level faults win over
    /// per-target ones.
    pub fn fault(self) -> Option<XferFault> {
        if self.intersects(TwiStatus::BUS_ERROR | TwiStatus::ARB_LOST) {
            Some(XferFault::BusFault)
        } else if self.contains(TwiStatus::DMA_ERROR) {
            Some(XferFault::DmaFault)
        } else if self.contains(TwiStatus::ADDR_NACK) {
            Some(XferFault::DeviceNotFound)
        } else if self.contains(TwiStatus::DATA_NACK) {
            Some(XferFault::DeviceFault)
        } else {
            None
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TwiStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "TwiStatus({=u16:#x})", self.bits())
    }
}

/// Register-level access to a TWI master peripheral.
///
/// Implemented by platform glue. Every method must return without waiting
/// for the bus; outcomes are reported later as [`TwiStatus`] through the
/// interrupt.
pub trait TwiPort {
    fn bus_init(&mut self) -> Result<(), XferFault> {
        Ok(())
    }

    fn bus_deinit(&mut self) {}

    /// Another master, or a stuck line, holds the bus.
    fn is_busy(&self) -> bool;

    /// Issue START (or repeated START) and the 7-bit `address` with the
    /// given direction.
    fn start(&mut self, address: u8, read: bool);

    fn write_byte(&mut self, byte: u8);

    fn read_byte(&mut self) -> u8;

    /// Whether to ACK the next received byte. NACK marks the last one.
    fn ack_next(&mut self, ack: bool);

    fn stop(&mut self);

    fn enable_irq(&mut self);

    fn disable_irq(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct TwiConfig {
    /// Interrupts tolerated without progress before the transfer is
    /// declared hung.
    pub max_idle_irqs: u8,
}

impl Default for TwiConfig {
    fn default() -> Self {
        Self { max_idle_irqs: 4 }
    }
}

/// Whether an interrupt moved the operation forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Progress,
    Idle,
}

pub struct TwiStepper<P> {
    port: P,
    config: TwiConfig,
}

impl<P: TwiPort> TwiStepper<P> {
    pub fn new(port: P, config: TwiConfig) -> Self {
        Self { port, config }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn config(&self) -> &TwiConfig {
        &self.config
    }

    fn fail(&mut self, op: &mut BusOperation<'_>, fault: XferFault) {
        #[cfg(feature = "defmt")]
        defmt::warn!(
            "twi {=u8:#x}: {} in {}",
            op.device_address(),
            fault,
            op.state()
        );
        self.port.stop();
        self.port.disable_irq();
        op.abort(fault);
    }

    fn stop(&mut self, op: &mut BusOperation<'_>) -> Result<(), XferFault> {
        op.advance_to(XferState::Stop)?;
        self.port.stop();
        Ok(())
    }

    fn send_header(&mut self, op: &mut BusOperation<'_>) -> Result<(), XferFault> {
        let idx = op.progress().header;
        let byte = op.header_byte(idx).ok_or(XferFault::IllegalState)?;
        self.port.write_byte(byte);
        op.progress_mut().header = idx + 1;
        Ok(())
    }

    fn send_payload(&mut self, op: &mut BusOperation<'_>) -> Result<(), XferFault> {
        let idx = op.progress().payload;
        let byte = op.buffer().get(idx).copied().ok_or(XferFault::IllegalState)?;
        self.port.write_byte(byte);
        op.progress_mut().payload = idx + 1;
        Ok(())
    }

    /// Repeated START in the read direction.
    fn restart_read(&mut self, op: &mut BusOperation<'_>) {
        let progress = op.progress_mut();
        progress.restart_pending = true;
        progress.payload = 0;
        self.port.start(op.device_address(), true);
    }

    /// Header done (or absent): move on to the buffer.
    fn enter_payload(&mut self, op: &mut BusOperation<'_>) -> Result<(), XferFault> {
        let len = op.buffer_len();
        if len == 0 {
            return self.stop(op);
        }
        if op.opcode().transmits() {
            op.advance_to(XferState::TransmitWait)?;
            return self.send_payload(op);
        }
        op.advance_to(XferState::ReceiveWait)?;
        if op.header_len() > 0 {
            self.restart_read(op);
        } else {
            // START already went out in the read direction.
            self.port.ack_next(len > 1);
        }
        Ok(())
    }

    fn receive(&mut self, op: &mut BusOperation<'_>) -> Result<(), XferFault> {
        let idx = op.progress().payload;
        let byte = self.port.read_byte();
        let slot = op.buffer_mut().get_mut(idx).ok_or(XferFault::IllegalState)?;
        *slot = byte;

        let received = idx + 1;
        op.progress_mut().payload = received;
        let len = op.buffer_len();
        if received == len {
            self.stop(op)?;
        } else if received + 1 == len {
            self.port.ack_next(false);
        }
        Ok(())
    }

    fn step(&mut self, op: &mut BusOperation<'_>, status: TwiStatus) -> Result<Step, XferFault> {
        let restart_pending = op.progress().restart_pending;
        match op.state() {
            XferState::Initiate => {
                if !status.contains(TwiStatus::ADDR_ACK) {
                    return Err(XferFault::IllegalState);
                }
                if op.is_probe() {
                    self.stop(op)?;
                } else {
                    op.advance_to(XferState::Addressing)?;
                    if op.header_len() > 0 {
                        self.send_header(op)?;
                    } else {
                        self.enter_payload(op)?;
                    }
                }
            }
            XferState::Addressing if status.contains(TwiStatus::TX_DONE) => {
                if op.progress().header < op.header_len() {
                    self.send_header(op)?;
                } else {
                    self.enter_payload(op)?;
                }
            }
            XferState::TransmitWait if status.contains(TwiStatus::TX_DONE) => {
                if op.progress().payload < op.buffer_len() {
                    self.send_payload(op)?;
                } else if op.opcode().receives() {
                    op.advance_to(XferState::ReceiveWait)?;
                    self.restart_read(op);
                } else {
                    self.stop(op)?;
                }
            }
            XferState::ReceiveWait
                if restart_pending && status.contains(TwiStatus::ADDR_ACK) =>
            {
                op.progress_mut().restart_pending = false;
                self.port.ack_next(op.buffer_len() > 1);
            }
            XferState::ReceiveWait
                if !restart_pending && status.contains(TwiStatus::RX_READY) =>
            {
                self.receive(op)?;
            }
            XferState::Stop if status.contains(TwiStatus::STOP_DONE) => {
                self.port.disable_irq();
                op.mark_complete()?;
            }
            state if state.owns_bus() => return Ok(Step::Idle),
            _ => return Err(XferFault::IllegalState),
        }
        Ok(Step::Progress)
    }
}

impl<P: TwiPort> Stepper for TwiStepper<P> {
    type Status = TwiStatus;

    fn bus_init(&mut self) -> Result<(), XferFault> {
        self.port.bus_init()
    }

    fn bus_deinit(&mut self) {
        self.port.disable_irq();
        self.port.bus_deinit();
    }

    fn begin(&mut self, op: &mut BusOperation<'_>) -> BeginOutcome {
        if self.port.is_busy() {
            return BeginOutcome::Busy;
        }
        if let Err(fault) = op.validate() {
            op.abort(fault);
            return BeginOutcome::Aborted;
        }
        if op.advance_to(XferState::Initiate).is_err() {
            op.abort(XferFault::IllegalState);
            return BeginOutcome::Aborted;
        }

        let opcode = op.opcode();
        let read = op.header_len() == 0 && opcode.receives() && !opcode.transmits();
        self.port.enable_irq();
        self.port.start(op.device_address(), read);
        BeginOutcome::Started
    }

    fn advance_operation(&mut self, op: &mut BusOperation<'_>, status: TwiStatus) {
        let step = match status.fault() {
            Some(fault) => Err(fault),
            None => self.step(op, status),
        };
        match step {
            Ok(Step::Progress) => op.progress_mut().idle_irqs = 0,
            Ok(Step::Idle) => {
                let progress = op.progress_mut();
                progress.idle_irqs = progress.idle_irqs.saturating_add(1);
                if progress.idle_irqs > self.config.max_idle_irqs {
                    self.fail(op, XferFault::HungIrq);
                }
            }
            Err(fault) => self.fail(op, fault),
        }
    }

    fn abort(&mut self, op: &mut BusOperation<'_>, fault: XferFault) {
        self.fail(op, fault);
    }
}
