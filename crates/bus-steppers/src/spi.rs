use core::convert::Infallible;

use bus_adapter::{BeginOutcome, BusOperation, Opcode, Stepper, XferFault, XferState, MAX_PARAMS};
use embedded_hal::spi::{Error as _, ErrorKind, Operation, SpiDevice};
use heapless::Vec;

/// Sub-address plus command parameters.
const MAX_HEADER: usize = 2 + MAX_PARAMS;

/// Synchronous transport over an `embedded-hal` SPI device.
///
/// The whole transfer runs inside [`Stepper::begin`] as one chip-select
/// framed transaction, so the operation is terminal by the time `begin`
/// returns and the adapter never hands the slot to interrupt context.
/// Chip-select arbitration belongs to the `SpiDevice`, so this transport
/// never reports the bus busy.
pub struct BlockingSpiStepper<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> BlockingSpiStepper<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn spi(&self) -> &SPI {
        &self.spi
    }

    pub fn spi_mut(&mut self) -> &mut SPI {
        &mut self.spi
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    /// Clock the header and payload in a single transaction.
    fn transfer(&mut self, op: &mut BusOperation<'_>) -> Result<(), XferFault> {
        let mut header: Vec<u8, MAX_HEADER> = Vec::new();
        for idx in 0..op.header_len() {
            let byte = op.header_byte(idx).ok_or(XferFault::BadParam)?;
            header.push(byte).map_err(|_| XferFault::BadParam)?;
        }

        let opcode = op.opcode();
        let buffer = op.buffer_mut();
        let payload = if buffer.is_empty() {
            None
        } else {
            Some(match opcode {
                Opcode::TransmitThenReceive => Operation::TransferInPlace(buffer),
                opcode if opcode.receives() => Operation::Read(buffer),
                _ => Operation::Write(buffer),
            })
        };

        let result = match (header.is_empty(), payload) {
            (true, Some(payload)) => self.spi.transaction(&mut [payload]),
            (false, Some(payload)) => self
                .spi
                .transaction(&mut [Operation::Write(&header), payload]),
            (false, None) => self.spi.transaction(&mut [Operation::Write(&header)]),
            (true, None) => Ok(()),
        };
        result.map_err(|err| fault_for(err.kind()))
    }
}

/// Walk from Initiate to the payload phase the opcode calls for.
fn walk_to_payload(op: &mut BusOperation<'_>) -> Result<(), XferFault> {
    op.advance_to(XferState::Addressing)?;
    if op.buffer_len() == 0 {
        return Ok(());
    }
    if op.opcode().transmits() {
        op.advance_to(XferState::TransmitWait)?;
    }
    if op.opcode().receives() {
        op.advance_to(XferState::ReceiveWait)?;
    }
    Ok(())
}

fn fault_for(kind: ErrorKind) -> XferFault {
    match kind {
        ErrorKind::Overrun => XferFault::DmaFault,
        ErrorKind::ModeFault | ErrorKind::ChipSelectFault => XferFault::BusFault,
        _ => XferFault::DeviceFault,
    }
}

impl<SPI: SpiDevice> Stepper for BlockingSpiStepper<SPI> {
    type Status = Infallible;

    fn begin(&mut self, op: &mut BusOperation<'_>) -> BeginOutcome {
        if let Err(fault) = op.validate() {
            op.abort(fault);
            return BeginOutcome::Aborted;
        }
        if op.advance_to(XferState::Initiate).is_err() {
            op.abort(XferFault::IllegalState);
            return BeginOutcome::Aborted;
        }

        if !op.is_probe() {
            if let Err(fault) = walk_to_payload(op) {
                op.abort(fault);
                return BeginOutcome::Aborted;
            }
            if let Err(fault) = self.transfer(op) {
                #[cfg(feature = "defmt")]
                defmt::warn!("spi {} failed in {}: {}", op.opcode(), op.state(), fault);
                op.abort(fault);
                return BeginOutcome::Started;
            }
        }

        if let Err(fault) = op.advance_to(XferState::Stop).and_then(|()| op.mark_complete()) {
            op.abort(fault);
        }
        BeginOutcome::Started
    }

    fn advance_operation(&mut self, _op: &mut BusOperation<'_>, status: Infallible) {
        match status {}
    }
}
