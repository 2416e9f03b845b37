//! The single "current operation" slot shared between foreground and the
//! transport's interrupt context.
//!
//! The slot always has exactly one holder. Foreground owns it while it
//! promotes, starts, or retires an operation. Once a transport has taken the
//! bus and left the operation mid-flight, foreground hands the slot over and
//! may no longer touch the operation; the transport hands it back when the
//! operation reaches a terminal state. Callers serialise access with a
//! critical section (see [`SharedAdapter`](crate::SharedAdapter)).

use crate::job::IoJob;
use crate::op::BusOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Holder {
    Foreground,
    Transport,
}

pub(crate) struct CurrentSlot<'a> {
    job: Option<IoJob<'a>>,
    holder: Holder,
}

impl<'a> CurrentSlot<'a> {
    pub(crate) const fn new() -> Self {
        Self { job: None, holder: Holder::Foreground }
    }

    pub(crate) fn is_vacant(&self) -> bool {
        self.job.is_none()
    }

    pub(crate) fn holder(&self) -> Holder {
        self.holder
    }

    pub(crate) fn get(&self) -> Option<&BusOperation<'a>> {
        self.job.as_deref()
    }

    /// Install `job` as current. Hands it back if the slot is taken.
    pub(crate) fn occupy(&mut self, job: IoJob<'a>) -> Result<(), IoJob<'a>> {
        if self.job.is_some() {
            return Err(job);
        }
        self.job = Some(job);
        self.holder = Holder::Foreground;
        Ok(())
    }

    /// Foreground access to the current operation.
    pub(crate) fn foreground_mut(&mut self) -> Option<&mut BusOperation<'a>> {
        match self.holder {
            Holder::Foreground => self.job.as_deref_mut(),
            Holder::Transport => None,
        }
    }

    /// Interrupt-side access to the current operation.
    pub(crate) fn transport_mut(&mut self) -> Option<&mut BusOperation<'a>> {
        match self.holder {
            Holder::Transport => self.job.as_deref_mut(),
            Holder::Foreground => None,
        }
    }

    /// Foreground has started a transfer that continues in the transport.
    pub(crate) fn hand_to_transport(&mut self) {
        if self.job.is_some() {
            self.holder = Holder::Transport;
        }
    }

    /// The transport is done with the current operation.
    pub(crate) fn hand_back(&mut self) {
        self.holder = Holder::Foreground;
    }

    /// Remove the current operation if foreground holds it and it is
    /// terminal.
    pub(crate) fn take_retired(&mut self) -> Option<IoJob<'a>> {
        let retired = self.holder == Holder::Foreground
            && self.job.as_ref().is_some_and(|job| job.state().is_terminal());
        if retired {
            self.job.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XferFault;
    use crate::op::{Opcode, XferState};
    use alloc::boxed::Box;

    fn job() -> IoJob<'static> {
        IoJob::Heap(Box::new(BusOperation::new(Opcode::Transmit)))
    }

    #[test]
    fn single_occupant() {
        let mut slot = CurrentSlot::new();
        assert!(slot.occupy(job()).is_ok());
        assert!(slot.occupy(job()).is_err());
    }

    #[test]
    fn holders_are_exclusive() {
        let mut slot = CurrentSlot::new();
        slot.occupy(job()).unwrap();
        slot.foreground_mut().unwrap().advance_to(XferState::Initiate).unwrap();
        slot.hand_to_transport();

        assert!(slot.foreground_mut().is_none());
        assert!(slot.take_retired().is_none());

        let op = slot.transport_mut().unwrap();
        op.abort(XferFault::BusFault);
        // Terminal, but the transport has not handed it back yet.
        assert!(slot.take_retired().is_none());

        slot.hand_back();
        assert!(slot.transport_mut().is_none());
        assert!(slot.take_retired().is_some());
        assert!(slot.is_vacant());
    }
}
