use std::sync::{Arc, Weak};
use std::time::Duration;

use cancore_common::messages::CanMessage;
use cancore_common::traits::CanSender;
use cancore_common::AtomicCell;
use cancore_stack::CanInterface;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub type SimInterface = CanInterface<SimBusSender>;

#[derive(Default)]
struct BusInner {
    next_port: AtomicCell<usize>,
    interfaces: Mutex<Vec<(usize, Weak<SimInterface>)>>,
    // Non interface channels for sending messages to, e.g. test listeners
    external_channels: Mutex<Vec<Sender<CanMessage>>>,
    fail_sends: AtomicCell<bool>,
}

impl BusInner {
    fn deliver(&self, from: Option<usize>, msg: CanMessage) {
        // Collect the targets first, so no lock is held while listeners run
        let targets: Vec<Arc<SimInterface>> = self
            .interfaces
            .lock()
            .iter()
            .filter(|(port, _)| Some(*port) != from)
            .filter_map(|(_, iface)| iface.upgrade())
            .collect();
        for iface in targets {
            iface.handle_frame(&msg);
        }
        for ext in self.external_channels.lock().iter() {
            ext.send(msg).ok();
        }
    }
}

/// An in-process CAN bus connecting any number of interfaces
#[derive(Clone, Default)]
pub struct SimBus {
    inner: Arc<BusInner>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new interface to the bus
    ///
    /// Frames sent through it reach every other interface and every receiver.
    pub fn new_interface(&self) -> Arc<SimInterface> {
        let port = self.inner.next_port.update(|n| n + 1);
        let iface = Arc::new(CanInterface::new(SimBusSender {
            bus: self.inner.clone(),
            port,
        }));
        self.inner
            .interfaces
            .lock()
            .push((port, Arc::downgrade(&iface)));
        iface
    }

    /// Create a receiver which sees every frame on the bus
    pub fn new_receiver(&self) -> SimBusReceiver {
        let (tx, rx) = unbounded();
        self.inner.external_channels.lock().push(tx);
        SimBusReceiver { channel_rx: rx }
    }

    /// Put a frame on the bus, as sent by a device which is not simulated
    pub fn inject(&self, msg: CanMessage) {
        self.inner.deliver(None, msg);
    }

    /// Make every sender refuse frames
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail);
    }
}

pub struct SimBusSender {
    bus: Arc<BusInner>,
    port: usize,
}

impl core::fmt::Debug for SimBusSender {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimBusSender")
            .field("port", &self.port)
            .finish()
    }
}

impl CanSender for SimBusSender {
    fn send(&self, msg: CanMessage) -> Result<(), CanMessage> {
        if self.bus.fail_sends.load() {
            return Err(msg);
        }
        self.bus.deliver(Some(self.port), msg);
        Ok(())
    }
}

pub struct SimBusReceiver {
    channel_rx: Receiver<CanMessage>,
}

impl SimBusReceiver {
    pub fn try_recv(&self) -> Option<CanMessage> {
        self.channel_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<CanMessage> {
        self.channel_rx.recv_timeout(timeout).ok()
    }

    /// Take every frame received so far
    pub fn drain(&self) -> Vec<CanMessage> {
        self.channel_rx.try_iter().collect()
    }

    pub fn flush(&self) {
        while self.channel_rx.try_recv().is_ok() {}
    }
}
