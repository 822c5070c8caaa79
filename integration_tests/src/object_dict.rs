//! An in-memory object dictionary standing in for a remote device

use std::collections::BTreeMap;

use cancore_common::constants::{object_ids, pdo_comm_subs, pdo_map_subs};
use cancore_common::NodeId;
use cancore_stack::storage::{
    AccessSnafu, DelegateSnafu, DeviceInfo, NoSuchEntrySnafu, ObjectKey, ObjectStorage,
    ReadDelegate, SizeMismatchSnafu, StorageError, WriteDelegate,
};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt};

#[derive(Default)]
struct Entry {
    /// Configured value from the description
    value: Vec<u8>,
    init: Option<Vec<u8>>,
    adds_node_id: bool,
    /// Value currently held by the device
    device: Vec<u8>,
    cached: Vec<u8>,
    read: Option<ReadDelegate>,
    write: Option<WriteDelegate>,
    reject_writes: bool,
}

/// Object dictionary backed by a map, with the "device" side kept in the same map
///
/// Every write which reaches the device is appended to a log, so tests can check what was
/// configured and in which order.
pub struct MemoryStorage {
    node_id: NodeId,
    info: DeviceInfo,
    entries: Mutex<BTreeMap<ObjectKey, Entry>>,
    device_writes: Mutex<Vec<(ObjectKey, Vec<u8>)>>,
}

impl MemoryStorage {
    pub fn new(node_id: u8, info: DeviceInfo) -> Self {
        Self {
            node_id: NodeId::new(node_id).expect("invalid node id"),
            info,
            entries: Mutex::new(BTreeMap::new()),
            device_writes: Mutex::new(Vec::new()),
        }
    }

    /// Describe an entry, with `value` as both configured and current device value
    pub fn add(&self, index: u16, sub: u8, value: &[u8]) {
        self.entries.lock().insert(
            ObjectKey::new(index, sub),
            Entry {
                value: value.to_vec(),
                device: value.to_vec(),
                cached: value.to_vec(),
                ..Default::default()
            },
        );
    }

    pub fn add_u8(&self, index: u16, sub: u8, value: u8) {
        self.add(index, sub, &value.to_le_bytes());
    }

    pub fn add_u16(&self, index: u16, sub: u8, value: u16) {
        self.add(index, sub, &value.to_le_bytes());
    }

    pub fn add_u32(&self, index: u16, sub: u8, value: u32) {
        self.add(index, sub, &value.to_le_bytes());
    }

    /// Give an entry an initial value which has to be pushed to the device
    ///
    /// The configured value becomes the initial value as well.
    pub fn set_init(&self, index: u16, sub: u8, init: &[u8]) {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&ObjectKey::new(index, sub))
            .expect("no such entry");
        entry.value = init.to_vec();
        entry.init = Some(init.to_vec());
    }

    /// Mark a COB-ID entry as relative to the node ID
    ///
    /// The device is assumed to already hold the resolved ID.
    pub fn set_adds_node_id(&self, index: u16, sub: u8) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&ObjectKey::new(index, sub)) {
            entry.adds_node_id = true;
            if let Ok(raw) = <[u8; 4]>::try_from(entry.device.as_slice()) {
                let resolved = self.node_id.apply_offset(u32::from_le_bytes(raw));
                entry.device = resolved.to_le_bytes().to_vec();
                entry.cached = entry.device.clone();
            }
        }
    }

    /// Make every write to an entry fail
    pub fn reject_writes(&self, index: u16, sub: u8) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&ObjectKey::new(index, sub)) {
            entry.reject_writes = true;
        }
    }

    /// Value currently held by the device
    pub fn device_value(&self, index: u16, sub: u8) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .get(&ObjectKey::new(index, sub))
            .map(|e| e.device.clone())
    }

    pub fn device_u32(&self, index: u16, sub: u8) -> Option<u32> {
        let value = self.device_value(index, sub)?;
        Some(u32::from_le_bytes(value.try_into().ok()?))
    }

    pub fn device_u8(&self, index: u16, sub: u8) -> Option<u8> {
        self.device_value(index, sub)?.first().copied()
    }

    /// All writes which reached the device, oldest first
    pub fn device_writes(&self) -> Vec<(ObjectKey, Vec<u8>)> {
        self.device_writes.lock().clone()
    }

    pub fn clear_device_writes(&self) {
        self.device_writes.lock().clear();
    }

    /// Returns true if any delegate is bound to the entry
    pub fn is_mapped(&self, index: u16, sub: u8) -> bool {
        self.entries
            .lock()
            .get(&ObjectKey::new(index, sub))
            .is_some_and(|e| e.read.is_some() || e.write.is_some())
    }

    pub fn has_read_delegate(&self, index: u16, sub: u8) -> bool {
        self.entries
            .lock()
            .get(&ObjectKey::new(index, sub))
            .is_some_and(|e| e.read.is_some())
    }

    fn write_device(&self, key: ObjectKey, data: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&key).context(NoSuchEntrySnafu { key })?;
        if entry.reject_writes {
            return AccessSnafu {
                key,
                message: "write rejected",
            }
            .fail();
        }
        entry.device = data.to_vec();
        entry.cached = data.to_vec();
        self.device_writes.lock().push((key, data.to_vec()));
        Ok(())
    }

    /// Describe a device TPDO, received by the master as an RPDO
    pub fn add_device_tpdo(&self, num: u16, cob_id: u32, transmission_type: u8, mappings: &[u32]) {
        self.add_pdo(
            object_ids::TPDO_COMM_BASE + num,
            object_ids::TPDO_MAP_BASE + num,
            cob_id,
            transmission_type,
            mappings,
        );
    }

    /// Describe a device RPDO, sent by the master as a TPDO
    pub fn add_device_rpdo(&self, num: u16, cob_id: u32, transmission_type: u8, mappings: &[u32]) {
        self.add_pdo(
            object_ids::RPDO_COMM_BASE + num,
            object_ids::RPDO_MAP_BASE + num,
            cob_id,
            transmission_type,
            mappings,
        );
    }

    fn add_pdo(
        &self,
        com_index: u16,
        map_index: u16,
        cob_id: u32,
        transmission_type: u8,
        mappings: &[u32],
    ) {
        self.add_u8(com_index, pdo_comm_subs::NUM, pdo_comm_subs::EVENT_TIMER);
        self.add_u32(com_index, pdo_comm_subs::COB_ID, cob_id);
        self.add_u8(com_index, pdo_comm_subs::TRANSMISSION_TYPE, transmission_type);
        self.add_u16(com_index, pdo_comm_subs::INHIBIT_TIME, 0);
        self.add_u16(com_index, pdo_comm_subs::EVENT_TIMER, 0);
        self.add_u8(map_index, pdo_map_subs::NUM, mappings.len() as u8);
        for (i, mapping) in mappings.iter().enumerate() {
            self.add_u32(map_index, i as u8 + 1, *mapping);
        }
    }
}

impl ObjectStorage for MemoryStorage {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn device_info(&self) -> DeviceInfo {
        self.info
    }

    fn value(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError> {
        let entries = self.entries.lock();
        let entry = entries.get(&key).context(NoSuchEntrySnafu { key })?;
        Ok(entry.value.clone())
    }

    fn adds_node_id(&self, key: ObjectKey) -> bool {
        self.entries
            .lock()
            .get(&key)
            .is_some_and(|e| e.adds_node_id)
    }

    fn init_value(&self, key: ObjectKey) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock();
        let entry = entries.get(&key).context(NoSuchEntrySnafu { key })?;
        Ok(entry.init.clone())
    }

    fn get(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError> {
        let (delegate, mut data) = {
            let entries = self.entries.lock();
            let entry = entries.get(&key).context(NoSuchEntrySnafu { key })?;
            match &entry.read {
                Some(read) => (read.clone(), entry.cached.clone()),
                None => return Ok(entry.device.clone()),
            }
        };
        delegate(key, &mut data).context(DelegateSnafu { key })?;
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.cached = data.clone();
        }
        Ok(data)
    }

    fn get_cached(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError> {
        let entries = self.entries.lock();
        let entry = entries.get(&key).context(NoSuchEntrySnafu { key })?;
        Ok(entry.cached.clone())
    }

    fn set(&self, key: ObjectKey, data: &[u8]) -> Result<(), StorageError> {
        let delegate = {
            let entries = self.entries.lock();
            let entry = entries.get(&key).context(NoSuchEntrySnafu { key })?;
            if data.len() != entry.value.len() {
                return SizeMismatchSnafu {
                    key,
                    expected: entry.value.len(),
                    actual: data.len(),
                }
                .fail();
            }
            entry.write.clone()
        };
        match delegate {
            Some(write) => {
                write(key, data).context(DelegateSnafu { key })?;
                if let Some(entry) = self.entries.lock().get_mut(&key) {
                    entry.cached = data.to_vec();
                }
                Ok(())
            }
            None => self.write_device(key, data),
        }
    }

    fn map(
        &self,
        key: ObjectKey,
        read: Option<ReadDelegate>,
        write: Option<WriteDelegate>,
    ) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&key).context(NoSuchEntrySnafu { key })?;
        entry.read = read;
        entry.write = write;
        Ok(entry.value.len())
    }

    fn init(&self, key: ObjectKey) -> Result<(), StorageError> {
        let init = self.init_value(key)?;
        match init {
            Some(init) => self.write_device(key, &init),
            None => Ok(()),
        }
    }
}
