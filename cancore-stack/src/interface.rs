//! Binding between a CAN bus driver and the rest of the stack
//!
//! Components talk to the bus through [`CommInterface`]: they send frames with
//! [`CanSender::send`] and subscribe to received frames with
//! [`CommInterface::create_msg_listener`]. [`CanInterface`] implements both on top of any
//! [`CanSender`] and a [`Dispatcher`]; the driver's receive path passes every frame to
//! [`CanInterface::handle_frame`].

use std::sync::Arc;

use cancore_common::messages::CanMessage;
use cancore_common::traits::CanSender;

use crate::dispatcher::{Dispatcher, FrameDelegate, FrameListener, MsgFilter};

/// Sending and receiving access to one CAN bus
pub trait CommInterface: CanSender {
    /// Register a delegate for received frames matching `filter`
    ///
    /// The delegate is called from the thread delivering frames, and stays registered until the
    /// returned handle is dropped.
    fn create_msg_listener(&self, filter: MsgFilter, delegate: Arc<FrameDelegate>)
        -> FrameListener;
}

impl<T: CommInterface + ?Sized> CommInterface for Arc<T> {
    fn create_msg_listener(
        &self,
        filter: MsgFilter,
        delegate: Arc<FrameDelegate>,
    ) -> FrameListener {
        (**self).create_msg_listener(filter, delegate)
    }
}

/// A [`CommInterface`] built from a frame sender and a [`Dispatcher`]
#[derive(Debug)]
pub struct CanInterface<S> {
    sender: S,
    dispatcher: Dispatcher,
}

impl<S: CanSender> CanInterface<S> {
    /// Create an interface sending with `sender`
    pub fn new(sender: S) -> Self {
        Self {
            sender,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Deliver a received frame to the registered listeners
    ///
    /// Returns the number of listeners which received it.
    pub fn handle_frame(&self, msg: &CanMessage) -> usize {
        self.dispatcher.dispatch(msg)
    }

    /// The sender used for outgoing frames
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// The dispatcher routing received frames
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl<S: CanSender> CanSender for CanInterface<S> {
    fn send(&self, msg: CanMessage) -> Result<(), CanMessage> {
        self.sender.send(msg)
    }
}

impl<S: CanSender> CommInterface for CanInterface<S> {
    fn create_msg_listener(
        &self,
        filter: MsgFilter,
        delegate: Arc<FrameDelegate>,
    ) -> FrameListener {
        self.dispatcher.create_shared_listener(filter, delegate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cancore_common::messages::CanId;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CanMessage>>);

    impl CanSender for Recorder {
        fn send(&self, msg: CanMessage) -> Result<(), CanMessage> {
            self.0.lock().push(msg);
            Ok(())
        }
    }

    #[test]
    fn test_send_and_receive() {
        let iface = CanInterface::new(Recorder::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _listener = iface.create_msg_listener(
            MsgFilter::exact(CanId::std(0x181)),
            Arc::new(move |msg: &CanMessage| s.lock().push(*msg)),
        );

        iface.send(CanMessage::new(CanId::std(0x201), &[1, 2])).unwrap();
        assert_eq!(1, iface.sender().0.lock().len());

        assert_eq!(1, iface.handle_frame(&CanMessage::new(CanId::std(0x181), &[3])));
        assert_eq!(0, iface.handle_frame(&CanMessage::new(CanId::std(0x182), &[3])));
        assert_eq!(&[3], seen.lock()[0].data());
    }
}
