//! Receive side: PDOs transmitted by the device

use std::sync::Arc;
use std::time::Duration;

use cancore_common::config::FramingPolicy;
use cancore_common::constants::pdo_comm_subs;
use cancore_common::messages::{CanId, CanMessage};
use cancore_common::pdo::{transmission_type, PdoCobId};
use cancore_common::AtomicCell;
use defmt_or_log::{debug, warn};
use parking_lot::Mutex;
use snafu::ResultExt;

use super::mapping::{
    parse_and_set_mapping, BoundMapping, CobIdRangeSnafu, Direction, MappingError, StorageSnafu,
};
use crate::dispatcher::{FrameListener, MsgFilter};
use crate::interface::CommInterface;
use crate::status::{LayerReport, LayerStatus};
use crate::storage::{ObjectKey, ObjectStorage, ObjectStorageExt};

/// Number of read passes a cyclic RPDO may miss beyond its transmission type
const CYCLIC_GRACE: u32 = 2;
/// Number of read passes an RTR-only RPDO may miss
const RTR_GRACE: u32 = 3;

#[derive(Debug)]
struct Supervision {
    /// Remaining read passes before a timeout, `None` when not armed
    countdown: Option<u32>,
    /// A timeout was reported and no frame arrived since
    timed_out: bool,
}

#[derive(Debug)]
struct RpdoShared {
    cob_id: CanId,
    transmission_type: u8,
    /// Template of the frame, used for remote requests
    frame: CanMessage,
    len: usize,
    buffers: Vec<Arc<super::Buffer>>,
    supervision: Mutex<Supervision>,
    /// A frame with the wrong length arrived since the last read pass
    framing_fault: AtomicCell<bool>,
    framing_faults: AtomicCell<u32>,
    received: AtomicCell<u32>,
}

impl RpdoShared {
    fn supervised(&self) -> bool {
        transmission_type::is_cyclic(self.transmission_type) || self.polled()
    }

    fn polled(&self) -> bool {
        transmission_type::is_rtr_only(self.transmission_type) && self.frame.is_rtr()
    }

    fn initial_countdown(&self) -> Option<u32> {
        if transmission_type::is_cyclic(self.transmission_type) {
            Some(self.transmission_type as u32 + CYCLIC_GRACE)
        } else if self.polled() {
            Some(RTR_GRACE)
        } else {
            None
        }
    }

    fn handle_frame(&self, msg: &CanMessage) {
        if msg.is_rtr() {
            return;
        }
        let data = msg.data();
        if data.len() != self.len {
            // The whole frame is rejected, so the buffers never hold a partial update
            self.framing_faults.update(|n| n.saturating_add(1));
            self.framing_fault.store(true);
            warn!(
                "RPDO {} received {} bytes, mapping expects {}",
                self.cob_id,
                data.len(),
                self.len
            );
            return;
        }

        let mut offset = 0;
        for buffer in &self.buffers {
            let end = offset + buffer.size();
            if let Err(e) = buffer.write(&data[offset..end]) {
                warn!("RPDO {} buffer write failed: {}", self.cob_id, e);
            }
            offset = end;
        }
        self.received.update(|n| n.wrapping_add(1));

        let mut supervision = self.supervision.lock();
        supervision.countdown = self.initial_countdown();
        supervision.timed_out = false;
    }
}

/// A PDO received from the device
///
/// Received frames are split into the mapped buffers as they arrive, from the thread delivering
/// frames. [`Rpdo::sync`] runs once per read pass; it supervises cyclic and RTR-only PDOs, polls
/// RTR-only PDOs and reports framing faults.
#[derive(Debug)]
pub struct Rpdo {
    shared: Arc<RpdoShared>,
    mapping: BoundMapping,
    _listener: FrameListener,
}

impl Rpdo {
    /// Set up the RPDO matching a device TPDO
    ///
    /// Returns `None` if the PDO maps nothing or its COB-ID is invalid.
    pub(crate) fn create(
        interface: &dyn CommInterface,
        storage: &dyn ObjectStorage,
        com_index: u16,
        map_index: u16,
        timeout: Duration,
    ) -> Result<Option<Self>, MappingError> {
        let mapping =
            parse_and_set_mapping(storage, com_index, map_index, Direction::Receive, timeout)?;
        let cob_key = ObjectKey::new(com_index, pdo_comm_subs::COB_ID);
        let tt_key = ObjectKey::new(com_index, pdo_comm_subs::TRANSMISSION_TYPE);
        let setup = || {
            Ok::<_, MappingError>((
                PdoCobId::from_object_value(storage.cob_id_value(cob_key).context(StorageSnafu)?),
                storage.value_u8(tt_key).context(StorageSnafu)?,
            ))
        };
        let (cob_id, tt) = match setup() {
            Ok(v) => v,
            Err(e) => {
                mapping.release(storage);
                return Err(e);
            }
        };

        if mapping.buffers.is_empty() || cob_id.invalid {
            debug!("RPDO 0x{:04X} is not in use", com_index);
            mapping.release(storage);
            return Ok(None);
        }
        let (Some(can_id), Some(frame)) = (cob_id.can_id(), cob_id.frame()) else {
            mapping.release(storage);
            return CobIdRangeSnafu {
                com_index,
                value: cob_id.to_object_value(),
            }
            .fail();
        };

        let mut shared = RpdoShared {
            cob_id: can_id,
            transmission_type: tt,
            frame,
            len: mapping.len(),
            buffers: mapping.buffers.clone(),
            supervision: Mutex::new(Supervision {
                countdown: None,
                timed_out: false,
            }),
            framing_fault: AtomicCell::new(false),
            framing_faults: AtomicCell::new(0),
            received: AtomicCell::new(0),
        };
        shared.supervision.get_mut().countdown = shared.initial_countdown();
        let shared = Arc::new(shared);

        let handler = shared.clone();
        let listener = interface.create_msg_listener(
            MsgFilter::exact(shared.cob_id),
            Arc::new(move |msg: &CanMessage| handler.handle_frame(msg)),
        );
        debug!("RPDO {} active, transmission type {}", shared.cob_id, tt);

        Ok(Some(Self {
            shared,
            mapping,
            _listener: listener,
        }))
    }

    /// The CAN ID the PDO is received on
    pub fn cob_id(&self) -> CanId {
        self.shared.cob_id
    }

    /// Number of frames accepted so far
    pub fn received(&self) -> u32 {
        self.shared.received.load()
    }

    /// Number of frames rejected for having the wrong length
    pub fn framing_faults(&self) -> u32 {
        self.shared.framing_faults.load()
    }

    /// Returns true if the PDO timed out and nothing was received since
    pub fn timed_out(&self) -> bool {
        self.shared.supervision.lock().timed_out
    }

    /// Run one read pass
    pub(crate) fn sync(
        &self,
        interface: &dyn CommInterface,
        policy: FramingPolicy,
        status: &LayerStatus,
    ) {
        let shared = &self.shared;
        let expired = {
            let mut supervision = shared.supervision.lock();
            match supervision.countdown {
                Some(n) if shared.supervised() => {
                    let n = n.saturating_sub(1);
                    if n == 0 {
                        supervision.countdown = None;
                        supervision.timed_out = true;
                        true
                    } else {
                        supervision.countdown = Some(n);
                        false
                    }
                }
                _ => false,
            }
        };
        if expired {
            warn!("RPDO {} timeout", shared.cob_id);
            status.warn(&format!("RPDO {} timeout", shared.cob_id));
        }

        if shared.framing_fault.take() {
            let reason = format!("RPDO {} framing mismatch", shared.cob_id);
            match policy {
                FramingPolicy::Ignore => (),
                FramingPolicy::Warn => status.warn(&reason),
                FramingPolicy::Error => status.error(&reason),
            }
        }

        if shared.polled() && interface.send(shared.frame).is_err() {
            status.warn(&format!("RPDO {} poll failed", shared.cob_id));
        }
    }

    pub(crate) fn diag(&self, report: &mut LayerReport) {
        let key = format!("RPDO {}", self.shared.cob_id);
        report.add(
            key,
            format!(
                "received={} framing_faults={}",
                self.received(),
                self.framing_faults()
            ),
        );
        if self.timed_out() {
            report.warn(&format!("RPDO {} timeout", self.shared.cob_id));
        }
    }

    /// Unbind the buffers from the dictionary
    pub(crate) fn release(&self, storage: &dyn ObjectStorage) {
        self.mapping.release(storage);
    }
}
