//! Runtime core of a CANopen master
//!
//! Cancore-stack provides the pieces a master needs to talk to the devices on a CAN bus, on top of
//! any bus driver which can send frames and hand over received ones:
//!
//! * A [`Dispatcher`] routing received frames to the components which registered for their IDs.
//! * A layered lifecycle ([`Layer`]) with ordered ([`LayerStack`]) and unordered
//!   ([`LayerGroup`]) composition, reporting through escalating [`LayerStatus`] values.
//! * A [`PdoMapper`] which binds the PDOs of one device to its object dictionary, so that mapped
//!   objects are exchanged with PDO frames instead of individual SDO transfers.
//!
//! # Getting Started
//!
//! ## Connecting the bus
//!
//! Wrap the driver's sending half in a [`CanInterface`], and pass every received frame to
//! [`CanInterface::handle_frame`]:
//!
//! ```ignore
//! let iface = Arc::new(CanInterface::new(driver_tx));
//! // In the receive thread
//! while let Some(msg) = driver_rx.recv() {
//!     iface.handle_frame(&msg);
//! }
//! ```
//!
//! ## Mapping PDOs
//!
//! The object dictionary of each device is accessed through the [`ObjectStorage`] trait. Given a
//! storage, a [`PdoMapper`] is a layer which can be put on a [`LayerStack`], typically above the
//! layer bringing the device to operational state:
//!
//! ```ignore
//! let config = StackConfig::load_from_file("cancore.toml")?;
//! let mapper = Arc::new(PdoMapper::with_config(iface.clone(), storage, config.pdo));
//! let stack = LayerStack::new("node5");
//! stack.add(mapper);
//!
//! let status = LayerStatus::new();
//! stack.init(&status);
//! ```
//!
//! ## Running the cycle
//!
//! The application drives the lifecycle from one thread. `read` brings received data up to date
//! and `write` pushes outgoing data:
//!
//! ```ignore
//! loop {
//!     let status = LayerStatus::new();
//!     stack.read(&status);
//!     application_step();
//!     stack.write(&status);
//!     if !status.bounded(Severity::Warn) {
//!         log::error!("Cycle failed: {}", status.reason());
//!     }
//! }
//! ```
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod dispatcher;
pub mod interface;
pub mod layer;
pub mod pdo;
pub mod status;
pub mod storage;

pub use cancore_common as common;

pub use dispatcher::{Dispatcher, FrameListener, MsgFilter};
pub use interface::{CanInterface, CommInterface};
pub use layer::{DiagGroup, Layer, LayerGroup, LayerStack};
pub use pdo::PdoMapper;
pub use status::{LayerReport, LayerStatus, Severity};
pub use storage::{ObjectKey, ObjectStorage, ObjectStorageExt};
