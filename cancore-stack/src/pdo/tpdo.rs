//! Transmit side: PDOs received by the device

use std::time::Duration;

use cancore_common::constants::pdo_comm_subs;
use cancore_common::messages::{CanId, CanMessage};
use cancore_common::pdo::{transmission_type, PdoCobId};
use defmt_or_log::debug;
use parking_lot::Mutex;
use snafu::ResultExt;

use super::buffer::{BufferError, BufferRead};
use super::mapping::{
    parse_and_set_mapping, BoundMapping, CobIdRangeSnafu, Direction, MappingError, StorageSnafu,
};
use crate::interface::CommInterface;
use crate::storage::{ObjectKey, ObjectStorage, ObjectStorageExt, StorageError};

/// Outcome of one [`Tpdo::sync`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TpdoSync {
    /// Nothing changed, no frame was sent
    Unchanged,
    /// A frame was sent
    Sent,
    /// A frame was assembled but the sender refused it
    SendFailed,
}

/// A PDO sent to the device
///
/// Dictionary writes to mapped entries fill the buffers. Each write pass assembles the frame from
/// the buffers, and sends it only when at least one of them changed.
#[derive(Debug)]
pub struct Tpdo {
    cob_id: CanId,
    frame: Mutex<CanMessage>,
    mapping: BoundMapping,
}

impl Tpdo {
    /// Set up the TPDO matching a device RPDO
    ///
    /// Returns `None` if the PDO maps nothing or its COB-ID is invalid. A synchronous cyclic
    /// transmission type above 1 is changed to 1 on the device, since frames are only sent when
    /// the data changed.
    pub(crate) fn create(
        storage: &dyn ObjectStorage,
        com_index: u16,
        map_index: u16,
        timeout: Duration,
    ) -> Result<Option<Self>, MappingError> {
        let cob_key = ObjectKey::new(com_index, pdo_comm_subs::COB_ID);
        let tt_key = ObjectKey::new(com_index, pdo_comm_subs::TRANSMISSION_TYPE);
        let cob_id =
            PdoCobId::from_object_value(storage.cob_id_value(cob_key).context(StorageSnafu)?);

        let mapping =
            parse_and_set_mapping(storage, com_index, map_index, Direction::Transmit, timeout)?;
        if mapping.buffers.is_empty() || cob_id.invalid {
            debug!("TPDO 0x{:04X} is not in use", com_index);
            mapping.release(storage);
            return Ok(None);
        }
        let Some(can_id) = cob_id.can_id() else {
            mapping.release(storage);
            return CobIdRangeSnafu {
                com_index,
                value: cob_id.to_object_value(),
            }
            .fail();
        };

        let normalize = || -> Result<(), StorageError> {
            let tt = storage.value_u8(tt_key)?;
            if tt > 1 && transmission_type::is_cyclic(tt) {
                storage.set_u8(tt_key, 1)?;
            }
            Ok(())
        };
        if let Err(e) = normalize() {
            mapping.release(storage);
            return Err(e).context(StorageSnafu);
        }

        let payload = [0u8; 8];
        let frame = CanMessage::new(can_id, &payload[..mapping.len()]);
        debug!("TPDO {} active, {} bytes", can_id, mapping.len());
        Ok(Some(Self {
            cob_id: can_id,
            frame: Mutex::new(frame),
            mapping,
        }))
    }

    /// The CAN ID the PDO is sent on
    pub fn cob_id(&self) -> CanId {
        self.cob_id
    }

    /// Run one write pass
    pub(crate) fn sync(&self, interface: &dyn CommInterface) -> Result<TpdoSync, BufferError> {
        let frame = {
            let mut frame = self.frame.lock();
            let mut updated = false;
            let mut offset = 0;
            for buffer in &self.mapping.buffers {
                let end = offset + buffer.size();
                if buffer.read(&mut frame.data[offset..end])? == BufferRead::Dirty {
                    updated = true;
                }
                offset = end;
            }
            if !updated {
                return Ok(TpdoSync::Unchanged);
            }
            *frame
        };

        match interface.send(frame) {
            Ok(()) => Ok(TpdoSync::Sent),
            Err(_) => Ok(TpdoSync::SendFailed),
        }
    }

    /// Unbind the buffers from the dictionary
    pub(crate) fn release(&self, storage: &dyn ObjectStorage) {
        self.mapping.release(storage);
    }
}
