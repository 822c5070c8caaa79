//! Parsing a PDO mapping from the dictionary and binding its buffers
//!
//! One PDO is described by a communication parameter object (COB-ID, transmission type, timers)
//! and a mapping object (count at sub 0, one [`PdoMapping`] per following sub). Setting up a PDO
//! follows the usual CANopen sequence when anything has to be written to the device:
//!
//! 1. invalidate the PDO through its COB-ID
//! 2. clear the mapping count
//! 3. write the mapping entries
//! 4. write the communication parameters
//! 5. restore the mapping count
//! 6. write the final COB-ID, which validates the PDO again
//!
//! When neither object has initial values the device is left untouched, and the mapping is only
//! read back to create the buffers.

use std::sync::Arc;
use std::time::Duration;

use cancore_common::constants::{pdo_comm_subs, pdo_map_subs};
use cancore_common::pdo::{PdoCobId, PdoMapping, MAX_MAPPING_ENTRIES, MAX_PDO_BITS};
use defmt_or_log::debug;
use snafu::{ResultExt, Snafu};

use super::buffer::Buffer;
use crate::storage::{
    ObjectKey, ObjectStorage, ObjectStorageExt, ReadDelegate, StorageError, WriteDelegate,
};

/// Errors while setting up a PDO mapping
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MappingError {
    /// The mapped objects do not fit in one frame
    #[snafu(display(
        "Mapping 0x{map_index:04X} covers {bits} bits, a PDO carries at most {MAX_PDO_BITS}"
    ))]
    TooLong {
        /// The mapping object
        map_index: u16,
        /// Total mapped size in bits, rounded up to whole bytes per entry
        bits: u32,
    },
    /// A mapped object has a different size than its mapping entry declares
    #[snafu(display("Object {key} is {actual} bytes, but mapped as {expected}"))]
    LengthMismatch {
        /// The mapped object
        key: ObjectKey,
        /// Size declared by the mapping entry
        expected: usize,
        /// Size of the dictionary entry
        actual: usize,
    },
    /// A dictionary access failed
    #[snafu(display("Storage access failed while mapping: {source}"))]
    Storage {
        /// The underlying error
        source: StorageError,
    },
    /// A standard frame COB-ID with an id above 0x7FF
    #[snafu(display("COB-ID 0x{value:08X} of 0x{com_index:04X} is not a valid 11-bit id"))]
    CobIdRange {
        /// The communication parameter object
        com_index: u16,
        /// Raw COB-ID value
        value: u32,
    },
}

/// Which side of the PDO exchange this node is on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    /// The device transmits, dictionary reads are served from the buffers
    Receive,
    /// The device receives, dictionary writes fill the buffers
    Transmit,
}

/// The buffers of one PDO, in frame order, and the entries they are bound to
#[derive(Debug, Default)]
pub(crate) struct BoundMapping {
    pub buffers: Vec<Arc<Buffer>>,
    pub bound: Vec<ObjectKey>,
}

impl BoundMapping {
    /// Total payload size in bytes
    pub fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.size()).sum()
    }

    /// Remove the delegates bound into the dictionary
    pub fn release(&self, storage: &dyn ObjectStorage) {
        for &key in &self.bound {
            if let Err(e) = storage.map(key, None, None) {
                debug!("Failed to unbind {}: {}", key, e);
            }
        }
    }
}

fn check_map_changed(storage: &dyn ObjectStorage, map_index: u16, map_num: u8) -> bool {
    map_num <= MAX_MAPPING_ENTRIES
        && (0..=map_num).any(|sub| storage.has_init_value(ObjectKey::new(map_index, sub)))
}

fn check_com_changed(storage: &dyn ObjectStorage, com_index: u16) -> bool {
    (pdo_comm_subs::NUM..=pdo_comm_subs::SYNC_START)
        .any(|sub| storage.has_init_value(ObjectKey::new(com_index, sub)))
}

/// Write the initial values of the communication parameters
///
/// The COB-ID is written last by the caller, and the reserved sub is never touched. Subs the
/// dictionary does not describe are skipped.
fn push_comm_params(storage: &dyn ObjectStorage, com_index: u16) -> Result<(), StorageError> {
    let subs = storage.value_u8(ObjectKey::new(com_index, pdo_comm_subs::NUM))?;
    for sub in 1..=subs {
        if sub == pdo_comm_subs::COB_ID || sub == pdo_comm_subs::RESERVED {
            continue;
        }
        match storage.init(ObjectKey::new(com_index, sub)) {
            Err(e) if e.is_missing() => (),
            other => other?,
        }
    }
    Ok(())
}

fn bind_buffer(
    storage: &dyn ObjectStorage,
    key: ObjectKey,
    buffer: &Arc<Buffer>,
    direction: Direction,
) -> Result<(), MappingError> {
    let read: Option<ReadDelegate> = (direction == Direction::Receive).then(|| {
        let buffer = buffer.clone();
        Arc::new(move |_: ObjectKey, data: &mut [u8]| buffer.read_entry(data)) as ReadDelegate
    });
    let write: Option<WriteDelegate> = {
        let buffer = buffer.clone();
        Some(Arc::new(move |_: ObjectKey, data: &[u8]| buffer.write_entry(data)) as WriteDelegate)
    };
    let len = storage.map(key, read, write).context(StorageSnafu)?;
    if len != buffer.size() {
        // Leave nothing pointing at a buffer which will not be used
        storage.map(key, None, None).ok();
        return LengthMismatchSnafu {
            key,
            expected: buffer.size(),
            actual: len,
        }
        .fail();
    }
    Ok(())
}

/// Set up one PDO from the dictionary, and return its bound buffers
///
/// An empty [`BoundMapping`] means the PDO maps nothing. On error, delegates which were already
/// bound are removed again.
pub(crate) fn parse_and_set_mapping(
    storage: &dyn ObjectStorage,
    com_index: u16,
    map_index: u16,
    direction: Direction,
    timeout: Duration,
) -> Result<BoundMapping, MappingError> {
    let num_key = ObjectKey::new(map_index, pdo_map_subs::NUM);
    let cob_key = ObjectKey::new(com_index, pdo_comm_subs::COB_ID);

    let map_num = storage.value_u8(num_key).context(StorageSnafu)?;
    let map_changed = check_map_changed(storage, map_index, map_num);
    let com_changed = check_com_changed(storage, com_index);

    if map_changed || com_changed {
        let raw = storage.get_u32(cob_key).context(StorageSnafu)?;
        let mut cob_id = PdoCobId::from_object_value(raw);
        cob_id.invalid = true;
        storage
            .set_u32(cob_key, cob_id.to_object_value())
            .context(StorageSnafu)?;
    }

    let mut mapping = BoundMapping::default();
    if map_num > 0 && map_num <= MAX_MAPPING_ENTRIES {
        if map_changed {
            storage.set_u8(num_key, 0).context(StorageSnafu)?;
        }

        let mut entries = Vec::with_capacity(map_num as usize);
        for sub in 1..=map_num {
            let key = ObjectKey::new(map_index, sub);
            if let Some(init) = storage.init_value(key).context(StorageSnafu)? {
                storage.set(key, &init).context(StorageSnafu)?;
            }
            entries.push(PdoMapping::from_object_value(
                storage.get_cached_u32(key).context(StorageSnafu)?,
            ));
        }

        let bits: u32 = entries.iter().map(|m| m.byte_len() as u32 * 8).sum();
        if bits > MAX_PDO_BITS {
            return TooLongSnafu { map_index, bits }.fail();
        }

        for entry in entries {
            let buffer = Arc::new(Buffer::with_timeout(entry.byte_len(), timeout));
            if !entry.is_dummy() {
                let key = ObjectKey::new(entry.index, entry.sub);
                if let Err(e) = bind_buffer(storage, key, &buffer, direction) {
                    mapping.release(storage);
                    return Err(e);
                }
                mapping.bound.push(key);
            }
            buffer.clean();
            mapping.buffers.push(buffer);
        }
    }

    let finish = || -> Result<(), StorageError> {
        if com_changed {
            push_comm_params(storage, com_index)?;
        }
        if map_changed {
            storage.set_u8(num_key, map_num)?;
        }
        if map_changed || com_changed {
            match storage.init(cob_key) {
                Err(e) if e.is_missing() => (),
                other => other?,
            }
            storage.set_u32(cob_key, storage.cob_id_value(cob_key)?)?;
        }
        Ok(())
    };
    if let Err(e) = finish() {
        mapping.release(storage);
        return Err(e).context(StorageSnafu);
    }

    debug!(
        "Mapped 0x{:04X}: {} entries, {} bytes",
        map_index,
        mapping.buffers.len(),
        mapping.len()
    );
    Ok(mapping)
}
