//! A single bus transaction and its lifecycle vocabulary.

use alloc::vec::Vec;

use crate::callback::DeviceCallback;
use crate::error::XferFault;

/// Maximum number of transfer parameter bytes an operation can carry.
pub const MAX_PARAMS: usize = 4;

/// The kind of transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    Receive,
    Transmit,
    /// Write the buffer, then read the reply back into the same buffer.
    TransmitThenReceive,
    /// Write the parameter bytes as a command, optionally followed by the buffer.
    TransmitCommand,
    /// Write the parameter bytes as a command, then read into the buffer.
    TransmitCommandThenReceive,
}

impl Opcode {
    /// Whether the payload phase ends by reading into the buffer.
    pub const fn receives(self) -> bool {
        matches!(
            self,
            Opcode::Receive
                | Opcode::TransmitThenReceive
                | Opcode::TransmitCommandThenReceive
        )
    }

    /// Whether the payload phase starts by writing the buffer.
    pub const fn transmits(self) -> bool {
        matches!(
            self,
            Opcode::Transmit
                | Opcode::TransmitThenReceive
                | Opcode::TransmitCommand
        )
    }

    /// Whether the parameter bytes are sent as a command header.
    pub const fn is_command(self) -> bool {
        matches!(
            self,
            Opcode::TransmitCommand | Opcode::TransmitCommandThenReceive
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Opcode::Receive => "RX",
            Opcode::Transmit => "TX",
            Opcode::TransmitThenReceive => "TX_WAIT_RX",
            Opcode::TransmitCommand => "TX_CMD",
            Opcode::TransmitCommandThenReceive => "TX_CMD_WAIT_RX",
        }
    }
}

/// Lifecycle phase of a [`BusOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferState {
    /// Freshly constructed.
    Undefined,
    /// Allocated, not yet admitted.
    Idle,
    /// Waiting in the transaction queue.
    Queued,
    /// Current operation, requesting bus control.
    Initiate,
    /// Address or command phase.
    Addressing,
    TransmitWait,
    ReceiveWait,
    /// Releasing the bus.
    Stop,
    Complete,
    Fault,
}

impl XferState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, XferState::Complete | XferState::Fault)
    }

    /// States in which the operation holds exclusive bus ownership.
    pub const fn owns_bus(self) -> bool {
        matches!(
            self,
            XferState::Initiate
                | XferState::Addressing
                | XferState::TransmitWait
                | XferState::ReceiveWait
                | XferState::Stop
        )
    }

    /// Admitted but without bus control yet.
    pub const fn is_unstable(self) -> bool {
        matches!(self, XferState::Idle | XferState::Queued)
    }

    /// Nominal transitions. `Fault` is reached through
    /// [`BusOperation::abort`], never through this table.
    pub const fn can_advance_to(self, next: XferState) -> bool {
        use XferState::*;
        matches!(
            (self, next),
            (Undefined, Idle)
                | (Idle, Queued)
                | (Idle, Initiate)
                | (Queued, Initiate)
                | (Initiate, Addressing)
                | (Initiate, Stop)
                | (Addressing, TransmitWait)
                | (Addressing, ReceiveWait)
                | (Addressing, Stop)
                | (TransmitWait, ReceiveWait)
                | (TransmitWait, Stop)
                | (ReceiveWait, Stop)
                | (Stop, Complete)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            XferState::Undefined => "UNDEF",
            XferState::Idle => "IDLE",
            XferState::Queued => "QUEUED",
            XferState::Initiate => "INITIATE",
            XferState::Addressing => "ADDR",
            XferState::TransmitWait => "TX_WAIT",
            XferState::ReceiveWait => "RX_WAIT",
            XferState::Stop => "STOP",
            XferState::Complete => "COMPLETE",
            XferState::Fault => "FAULT",
        }
    }
}

/// Register or memory address inside the target device, sent big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubAddress {
    #[default]
    None,
    Byte(u8),
    Word(u16),
}

impl SubAddress {
    pub const fn len(self) -> usize {
        match self {
            SubAddress::None => 0,
            SubAddress::Byte(_) => 1,
            SubAddress::Word(_) => 2,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, SubAddress::None)
    }

    fn byte(self, idx: usize) -> Option<u8> {
        match (self, idx) {
            (SubAddress::Byte(b), 0) => Some(b),
            (SubAddress::Word(w), 0) => Some((w >> 8) as u8),
            (SubAddress::Word(w), 1) => Some(w as u8),
            _ => None,
        }
    }
}

/// The byte region a transfer reads into or writes from.
///
/// `Empty` is the only zero-length form, so a present buffer always has a
/// non-zero length.
#[derive(Debug, Default)]
pub enum XferBuffer<'a> {
    #[default]
    Empty,
    /// Bytes owned by the device; the operation only borrows them.
    Borrowed(&'a mut [u8]),
    /// Bytes allocated on behalf of the operation.
    Owned(Vec<u8>),
}

impl<'a> XferBuffer<'a> {
    pub fn len(&self) -> usize {
        match self {
            XferBuffer::Empty => 0,
            XferBuffer::Borrowed(b) => b.len(),
            XferBuffer::Owned(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, XferBuffer::Empty)
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            XferBuffer::Empty => &[],
            XferBuffer::Borrowed(b) => b,
            XferBuffer::Owned(v) => v.as_slice(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            XferBuffer::Empty => &mut [],
            XferBuffer::Borrowed(b) => b,
            XferBuffer::Owned(v) => v.as_mut_slice(),
        }
    }
}

/// Where an operation instance lives, and so how it is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ownership {
    /// Slot index inside the adapter's operation pool.
    Pool(usize),
    /// Allocated because the pool was exhausted; freed on reclaim.
    Heap,
    /// Owned by the caller; the engine never reclaims it.
    Caller,
}

/// Transport scratch carried by the operation while it is on the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XferProgress {
    /// Header bytes already sent.
    pub header: usize,
    /// Payload bytes already moved.
    pub payload: usize,
    /// Consecutive interrupts that did not move the transfer forward.
    pub idle_irqs: u8,
    /// A repeated start was issued and its address outcome is pending.
    pub restart_pending: bool,
}

/// One discrete transaction on the bus.
pub struct BusOperation<'a> {
    opcode: Opcode,
    state: XferState,
    fault: Option<XferFault>,
    device_address: u8,
    sub_address: SubAddress,
    params: heapless::Vec<u8, MAX_PARAMS>,
    buffer: XferBuffer<'a>,
    callback: Option<&'a dyn DeviceCallback>,
    ownership: Ownership,
    progress: XferProgress,
}

impl<'a> BusOperation<'a> {
    /// Create a caller-owned operation, ready to be queued.
    pub fn new(opcode: Opcode) -> Self {
        let mut op = Self::undefined(opcode, Ownership::Caller);
        op.state = XferState::Idle;
        op
    }

    pub(crate) fn undefined(opcode: Opcode, ownership: Ownership) -> Self {
        Self {
            opcode,
            state: XferState::Undefined,
            fault: None,
            device_address: 0,
            sub_address: SubAddress::None,
            params: heapless::Vec::new(),
            buffer: XferBuffer::Empty,
            callback: None,
            ownership,
            progress: XferProgress::default(),
        }
    }

    pub fn with_device_address(mut self, address: u8) -> Self {
        self.device_address = address;
        self
    }

    pub fn with_sub_address(mut self, sub_address: SubAddress) -> Self {
        self.sub_address = sub_address;
        self
    }

    pub fn with_callback(mut self, callback: &'a dyn DeviceCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Change the opcode. Only allowed before the operation is dispatched.
    pub fn set_opcode(&mut self, opcode: Opcode) -> Result<(), XferFault> {
        if self.state != XferState::Idle {
            return Err(XferFault::IllegalState);
        }
        self.opcode = opcode;
        Ok(())
    }

    pub fn state(&self) -> XferState {
        self.state
    }

    pub fn fault(&self) -> Option<XferFault> {
        self.fault
    }

    /// Devices must check this before trusting the buffer contents: a
    /// faulted operation keeps whatever partial data the transfer left.
    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn set_device_address(&mut self, address: u8) {
        self.device_address = address;
    }

    pub fn sub_address(&self) -> SubAddress {
        self.sub_address
    }

    pub fn set_sub_address(&mut self, sub_address: SubAddress) {
        self.sub_address = sub_address;
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn set_params(&mut self, params: &[u8]) -> Result<(), XferFault> {
        self.params =
            heapless::Vec::from_slice(params).map_err(|_| XferFault::BadParam)?;
        Ok(())
    }

    pub fn buffer(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Borrow `bytes` for the duration of the transfer.
    pub fn set_buffer(&mut self, bytes: &'a mut [u8]) -> Result<(), XferFault> {
        if bytes.is_empty() {
            return Err(XferFault::BadParam);
        }
        self.buffer = XferBuffer::Borrowed(bytes);
        Ok(())
    }

    /// Hand the operation a buffer it owns outright.
    pub fn set_owned_buffer(&mut self, bytes: Vec<u8>) -> Result<(), XferFault> {
        if bytes.is_empty() {
            return Err(XferFault::BadParam);
        }
        self.buffer = XferBuffer::Owned(bytes);
        Ok(())
    }

    /// Detach the buffer, leaving the operation without one.
    pub fn take_buffer(&mut self) -> XferBuffer<'a> {
        core::mem::take(&mut self.buffer)
    }

    pub fn callback(&self) -> Option<&'a dyn DeviceCallback> {
        self.callback
    }

    pub fn set_callback(&mut self, callback: Option<&'a dyn DeviceCallback>) {
        self.callback = callback;
    }

    /// Whether `device` issued this operation.
    pub fn is_from(&self, device: &dyn DeviceCallback) -> bool {
        self.callback.is_some_and(|cb| core::ptr::addr_eq(cb, device))
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn progress(&self) -> &XferProgress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut XferProgress {
        &mut self.progress
    }

    /// A presence probe: no header and no payload.
    pub fn is_probe(&self) -> bool {
        self.header_len() == 0 && self.buffer.is_empty()
    }

    /// Bytes sent during the addressing phase: the sub-address, followed by
    /// the parameter bytes for command opcodes.
    pub fn header_len(&self) -> usize {
        let params = if self.opcode.is_command() { self.params.len() } else { 0 };
        self.sub_address.len() + params
    }

    pub fn header_byte(&self, idx: usize) -> Option<u8> {
        let sub = self.sub_address.len();
        if idx < sub {
            return self.sub_address.byte(idx);
        }
        if self.opcode.is_command() {
            return self.params.get(idx - sub).copied();
        }
        None
    }

    /// Check the operation is well formed for its opcode.
    pub fn validate(&self) -> Result<(), XferFault> {
        if self.opcode.receives() && self.buffer.is_empty() {
            return Err(XferFault::BadParam);
        }
        if self.opcode.is_command() && self.params.is_empty() {
            return Err(XferFault::BadParam);
        }
        Ok(())
    }

    /// Move to `next` along a nominal transition.
    pub fn advance_to(&mut self, next: XferState) -> Result<(), XferFault> {
        if !self.state.can_advance_to(next) {
            return Err(XferFault::IllegalState);
        }
        self.state = next;
        Ok(())
    }

    /// Terminate with `fault`. Returns `false` if the operation was
    /// already terminal, in which case nothing changes.
    pub fn abort(&mut self, fault: XferFault) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = XferState::Fault;
        self.fault = Some(fault);
        true
    }

    /// Finish the stop phase.
    pub fn mark_complete(&mut self) -> Result<(), XferFault> {
        self.advance_to(XferState::Complete)
    }

    /// Fault the operation regardless of its state. Used when an already
    /// terminal operation is handed back to the engine.
    pub(crate) fn force_fault(&mut self, fault: XferFault) {
        self.state = XferState::Fault;
        self.fault = Some(fault);
    }

    /// Arm a clean instance for `opcode`.
    pub(crate) fn prepare(&mut self, opcode: Opcode) {
        self.opcode = opcode;
        self.state = XferState::Idle;
    }

    /// Only called on operations already checked to be Idle.
    pub(crate) fn mark_queued(&mut self) {
        self.state = XferState::Queued;
    }

    /// Rearm a terminal operation for another round, keeping its opcode,
    /// addressing, buffer and callback.
    pub fn recycle(&mut self) -> Result<(), XferFault> {
        if !self.state.is_terminal() {
            return Err(XferFault::IllegalState);
        }
        self.state = XferState::Idle;
        self.fault = None;
        self.progress = XferProgress::default();
        Ok(())
    }

    /// Return to the clean Idle condition, dropping every reference.
    pub(crate) fn wipe(&mut self) {
        let ownership = self.ownership;
        *self = Self::undefined(Opcode::Transmit, ownership);
        self.state = XferState::Idle;
    }

    pub(crate) fn set_ownership(&mut self, ownership: Ownership) {
        self.ownership = ownership;
    }
}

impl core::fmt::Debug for BusOperation<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusOperation")
            .field("opcode", &self.opcode)
            .field("state", &self.state)
            .field("fault", &self.fault)
            .field("device_address", &self.device_address)
            .field("sub_address", &self.sub_address)
            .field("params", &self.params)
            .field("buffer_len", &self.buffer.len())
            .field("has_callback", &self.callback.is_some())
            .field("ownership", &self.ownership)
            .finish()
    }
}

impl core::fmt::Display for BusOperation<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} dev 0x{:02x} {} len {}",
            self.opcode.as_str(),
            self.device_address,
            self.state.as_str(),
            self.buffer.len()
        )?;
        if let Some(fault) = self.fault {
            write!(f, " fault {}", fault)?;
        }
        match self.ownership {
            Ownership::Pool(idx) => write!(f, " (pool {})", idx),
            Ownership::Heap => f.write_str(" (heap)"),
            Ownership::Caller => f.write_str(" (caller)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_path_is_legal() {
        let mut op = BusOperation::new(Opcode::Receive);
        for next in [
            XferState::Queued,
            XferState::Initiate,
            XferState::Addressing,
            XferState::ReceiveWait,
            XferState::Stop,
            XferState::Complete,
        ] {
            assert_eq!(op.advance_to(next), Ok(()));
        }
        assert!(op.state().is_terminal());
        assert!(!op.has_fault());
    }

    #[test]
    fn skipping_phases_is_illegal() {
        let mut op = BusOperation::new(Opcode::Transmit);
        assert_eq!(
            op.advance_to(XferState::TransmitWait),
            Err(XferFault::IllegalState)
        );
        assert_eq!(op.state(), XferState::Idle);
    }

    #[test]
    fn abort_only_from_non_terminal() {
        let mut op = BusOperation::new(Opcode::Transmit);
        assert!(op.abort(XferFault::Timeout));
        assert!(!op.abort(XferFault::BusFault));
        assert_eq!(op.fault(), Some(XferFault::Timeout));
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let mut bytes: [u8; 0] = [];
        let mut op = BusOperation::new(Opcode::Transmit);
        assert_eq!(op.set_buffer(&mut bytes), Err(XferFault::BadParam));
        assert_eq!(op.set_owned_buffer(Vec::new()), Err(XferFault::BadParam));
        assert_eq!(op.buffer_len(), 0);
    }

    #[test]
    fn header_concatenates_sub_address_and_command() {
        let mut op = BusOperation::new(Opcode::TransmitCommandThenReceive)
            .with_sub_address(SubAddress::Word(0x1234));
        op.set_params(&[0xaa, 0xbb]).unwrap();
        assert_eq!(op.header_len(), 4);
        let header: heapless::Vec<u8, 8> =
            (0..op.header_len()).filter_map(|i| op.header_byte(i)).collect();
        assert_eq!(header.as_slice(), &[0x12, 0x34, 0xaa, 0xbb]);

        // Plain opcodes ignore the parameter block.
        let mut plain = BusOperation::new(Opcode::Receive)
            .with_sub_address(SubAddress::Byte(0x0f));
        plain.set_params(&[1, 2, 3]).unwrap();
        assert_eq!(plain.header_len(), 1);
        assert_eq!(plain.header_byte(1), None);
    }

    #[test]
    fn too_many_params() {
        let mut op = BusOperation::new(Opcode::TransmitCommand);
        assert_eq!(op.set_params(&[0; 5]), Err(XferFault::BadParam));
    }

    #[test]
    fn validation_rules() {
        assert_eq!(
            BusOperation::new(Opcode::Receive).validate(),
            Err(XferFault::BadParam)
        );
        assert_eq!(
            BusOperation::new(Opcode::TransmitCommand).validate(),
            Err(XferFault::BadParam)
        );
        let probe = BusOperation::new(Opcode::Transmit).with_device_address(0x50);
        assert_eq!(probe.validate(), Ok(()));
        assert!(probe.is_probe());
    }

    #[test]
    fn recycle_keeps_buffer() {
        let mut bytes = [1u8, 2, 3];
        let mut op = BusOperation::new(Opcode::Transmit);
        op.set_buffer(&mut bytes).unwrap();
        assert_eq!(op.recycle(), Err(XferFault::IllegalState));
        op.abort(XferFault::DeviceFault);
        op.recycle().unwrap();
        assert_eq!(op.state(), XferState::Idle);
        assert_eq!(op.fault(), None);
        assert_eq!(op.buffer(), &[1, 2, 3]);
    }

    #[test]
    fn opcode_frozen_after_dispatch() {
        let mut op = BusOperation::new(Opcode::Transmit);
        op.set_opcode(Opcode::Receive).unwrap();
        op.advance_to(XferState::Initiate).unwrap();
        assert_eq!(
            op.set_opcode(Opcode::Transmit),
            Err(XferFault::IllegalState)
        );
        assert_eq!(op.opcode(), Opcode::Receive);
    }
}
