//! Common traits

use crate::messages::CanMessage;

/// A synchronous, shareable CAN sender
///
/// Implemented by bus drivers. It takes `&self` so that one sender can be shared by every
/// component that needs to put frames on the bus.
pub trait CanSender: Send + Sync {
    /// Send a message to the bus
    ///
    /// Returns the undelivered message if it could not be queued.
    fn send(&self, msg: CanMessage) -> Result<(), CanMessage>;
}

impl<T: CanSender + ?Sized> CanSender for &T {
    fn send(&self, msg: CanMessage) -> Result<(), CanMessage> {
        (**self).send(msg)
    }
}

#[cfg(feature = "std")]
impl<T: CanSender + ?Sized> CanSender for std::sync::Arc<T> {
    fn send(&self, msg: CanMessage) -> Result<(), CanMessage> {
        (**self).send(msg)
    }
}
