pub mod object_dict;
pub mod sim_bus;
pub mod utils;

pub mod prelude {
    pub use super::object_dict::MemoryStorage;
    pub use super::sim_bus::{SimBus, SimBusReceiver, SimBusSender, SimInterface};
    pub use super::utils::{BusLogger, CallLog, RecordingLayer};
    pub use cancore_common::messages::{CanId, CanMessage};
    pub use cancore_common::NodeId;
    pub use cancore_stack::storage::{DeviceInfo, ObjectKey, ObjectStorage, ObjectStorageExt};
    pub use cancore_stack::{
        Layer, LayerGroup, LayerReport, LayerStack, LayerStatus, PdoMapper, Severity,
    };
}
