use alloc::boxed::Box;
use core::ops::{Deref, DerefMut};

use crate::op::{BusOperation, Ownership};

/// An operation together with the ownership that decides how it is
/// reclaimed.
///
/// Reclamation is a single match over this enum, so an instance can only
/// ever go back to one place.
pub enum IoJob<'a> {
    /// Checked out of the adapter's pool; the slot index is carried by the
    /// operation itself.
    Pooled(BusOperation<'a>),
    /// Allocated because the pool was empty.
    Heap(Box<BusOperation<'a>>),
    /// Owned by the caller, typically out of a `StaticCell`. See
    /// [`IoJob::borrowed`].
    Borrowed(&'a mut BusOperation<'a>),
}

impl<'a> IoJob<'a> {
    /// Wrap a caller-owned operation.
    ///
    /// The operation stays borrowed for the adapter's whole lifetime `'a`,
    /// not just for one transfer, so in practice it lives in `'static`
    /// storage next to a `'static` adapter. The adapter never hands it
    /// back: read the results in [`DeviceCallback::io_op_callback`], or
    /// answer [`CallbackOutcome::Recycle`] to run it again.
    ///
    /// [`DeviceCallback::io_op_callback`]: crate::DeviceCallback::io_op_callback
    /// [`CallbackOutcome::Recycle`]: crate::CallbackOutcome::Recycle
    pub fn borrowed(op: &'a mut BusOperation<'a>) -> Self {
        op.set_ownership(Ownership::Caller);
        IoJob::Borrowed(op)
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            IoJob::Pooled(op) => op.ownership(),
            IoJob::Heap(_) => Ownership::Heap,
            IoJob::Borrowed(_) => Ownership::Caller,
        }
    }
}

impl<'a> Deref for IoJob<'a> {
    type Target = BusOperation<'a>;

    #[inline]
    fn deref(&self) -> &BusOperation<'a> {
        match self {
            IoJob::Pooled(op) => op,
            IoJob::Heap(op) => op,
            IoJob::Borrowed(op) => op,
        }
    }
}

impl<'a> DerefMut for IoJob<'a> {
    #[inline]
    fn deref_mut(&mut self) -> &mut BusOperation<'a> {
        match self {
            IoJob::Pooled(op) => op,
            IoJob::Heap(op) => op,
            IoJob::Borrowed(op) => op,
        }
    }
}

impl core::fmt::Debug for IoJob<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&**self, f)
    }
}
