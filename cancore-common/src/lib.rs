//! Common definitions shared among the cancore crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `cancore-stack`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic_cell;
pub use atomic_cell::AtomicCell;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod config;
pub mod constants;
pub mod messages;
pub mod node_id;
pub mod pdo;
pub mod traits;

pub use messages::{CanId, CanMessage};
pub use node_id::NodeId;
