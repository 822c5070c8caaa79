//! PDO mapping between a device's object dictionary and the bus
//!
//! The [`PdoMapper`] reads the PDO configuration of one device from its [`ObjectStorage`], pushes
//! any configured initial values to the device, and binds a [`Buffer`] per mapped object into the
//! dictionary's access path. From then on:
//!
//! - Device TPDOs are received as [`Rpdo`]s. Incoming frames are split into the buffers, and
//!   dictionary reads of the mapped objects are served from them.
//! - Device RPDOs are sent as [`Tpdo`]s. Dictionary writes of the mapped objects fill the
//!   buffers, and a frame goes out on the next write pass when any of them changed.
//!
//! The mapper is a [`Layer`]; `read` runs the RPDO pass and `write` the TPDO pass.

mod buffer;
mod mapping;
mod rpdo;
mod tpdo;

pub use buffer::{Buffer, BufferError, BufferRead};
pub use mapping::MappingError;
pub use rpdo::Rpdo;
pub use tpdo::Tpdo;

use std::sync::Arc;

use cancore_common::config::PdoConfig;
use cancore_common::constants::object_ids;
use cancore_common::AtomicCell;
use defmt_or_log::{info, warn};
use parking_lot::Mutex;

use crate::interface::CommInterface;
use crate::layer::Layer;
use crate::status::{LayerReport, LayerStatus};
use crate::storage::ObjectStorage;
use tpdo::TpdoSync;

#[derive(Debug, Default)]
struct PdoSet {
    rpdos: Vec<Arc<Rpdo>>,
    tpdos: Vec<Arc<Tpdo>>,
}

impl PdoSet {
    /// Unbind every PDO from the dictionary and drop it
    ///
    /// Dropping an RPDO removes its frame listener.
    fn release(self, storage: &dyn ObjectStorage) {
        for rpdo in &self.rpdos {
            rpdo.release(storage);
        }
        for tpdo in &self.tpdos {
            tpdo.release(storage);
        }
    }
}

/// Maps the PDOs of one device
///
/// ```ignore
/// let mapper = Arc::new(PdoMapper::new(interface, storage));
/// stack.add(mapper.clone());
/// stack.init(&status);
/// ```
pub struct PdoMapper {
    interface: Arc<dyn CommInterface>,
    storage: Arc<dyn ObjectStorage>,
    config: PdoConfig,
    pdos: Mutex<PdoSet>,
    halted: AtomicCell<bool>,
}

impl core::fmt::Debug for PdoMapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PdoMapper")
            .field("node_id", &self.storage.node_id())
            .field("config", &self.config)
            .field("pdos", &*self.pdos.lock())
            .finish()
    }
}

impl PdoMapper {
    /// Create a mapper with the default configuration
    pub fn new(interface: Arc<dyn CommInterface>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self::with_config(interface, storage, PdoConfig::default())
    }

    /// Create a mapper with a custom configuration
    pub fn with_config(
        interface: Arc<dyn CommInterface>,
        storage: Arc<dyn ObjectStorage>,
        config: PdoConfig,
    ) -> Self {
        Self {
            interface,
            storage,
            config,
            pdos: Mutex::new(PdoSet::default()),
            halted: AtomicCell::new(false),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &PdoConfig {
        &self.config
    }

    /// Read the PDO configuration from the dictionary and set up every PDO in use
    ///
    /// Any previous mapping is released first. On error, nothing stays mapped.
    pub fn map_pdos(&self) -> Result<(), MappingError> {
        self.release();

        let storage = &*self.storage;
        let info = storage.device_info();
        let timeout = self.config.buffer_timeout();
        let mut set = PdoSet::default();

        let mut build = || -> Result<(), MappingError> {
            for i in 0..info.tx_pdo_count as u16 {
                let com_index = object_ids::TPDO_COMM_BASE + i;
                let map_index = object_ids::TPDO_MAP_BASE + i;
                if let Some(rpdo) =
                    Rpdo::create(&*self.interface, storage, com_index, map_index, timeout)?
                {
                    set.rpdos.push(Arc::new(rpdo));
                }
            }
            for i in 0..info.rx_pdo_count as u16 {
                let com_index = object_ids::RPDO_COMM_BASE + i;
                let map_index = object_ids::RPDO_MAP_BASE + i;
                if let Some(tpdo) = Tpdo::create(storage, com_index, map_index, timeout)? {
                    set.tpdos.push(Arc::new(tpdo));
                }
            }
            Ok(())
        };
        if let Err(e) = build() {
            set.release(storage);
            return Err(e);
        }

        info!(
            "Node {}: mapped {} RPDOs and {} TPDOs",
            storage.node_id(),
            set.rpdos.len(),
            set.tpdos.len()
        );
        *self.pdos.lock() = set;
        Ok(())
    }

    fn release(&self) {
        let old = core::mem::take(&mut *self.pdos.lock());
        old.release(&*self.storage);
    }

    /// The active RPDOs
    pub fn rpdos(&self) -> Vec<Arc<Rpdo>> {
        self.pdos.lock().rpdos.clone()
    }

    /// The active TPDOs
    pub fn tpdos(&self) -> Vec<Arc<Tpdo>> {
        self.pdos.lock().tpdos.clone()
    }

    /// Run the RPDO pass: supervision, remote requests and framing faults
    pub fn sync_rpdos(&self, status: &LayerStatus) {
        for rpdo in self.rpdos() {
            rpdo.sync(&*self.interface, self.config.framing, status);
        }
    }

    /// Run the TPDO pass: send every PDO whose data changed
    pub fn sync_tpdos(&self, status: &LayerStatus) {
        if self.halted.load() {
            return;
        }
        for tpdo in self.tpdos() {
            match tpdo.sync(&*self.interface) {
                Ok(TpdoSync::Unchanged) | Ok(TpdoSync::Sent) => (),
                Ok(TpdoSync::SendFailed) => {
                    status.warn(&format!("TPDO {} send failed", tpdo.cob_id()));
                }
                Err(e) => {
                    status.error(&format!("TPDO {}: {}", tpdo.cob_id(), e));
                }
            }
        }
    }
}

impl Drop for PdoMapper {
    fn drop(&mut self) {
        self.release();
    }
}

impl Layer for PdoMapper {
    fn name(&self) -> &str {
        "pdo"
    }

    fn pending(&self, _status: &LayerStatus) {}

    fn read(&self, status: &LayerStatus) {
        self.sync_rpdos(status);
    }

    fn write(&self, status: &LayerStatus) {
        self.sync_tpdos(status);
    }

    fn diag(&self, report: &mut LayerReport) {
        let (rpdos, tpdos) = {
            let pdos = self.pdos.lock();
            (pdos.rpdos.clone(), pdos.tpdos.len())
        };
        report.add("node_id", self.storage.node_id());
        report.add("rpdos", rpdos.len());
        report.add("tpdos", tpdos);
        report.add("halted", self.halted.load());
        for rpdo in rpdos {
            rpdo.diag(report);
        }
    }

    fn init(&self, status: &LayerStatus) {
        self.halted.store(false);
        if let Err(e) = self.map_pdos() {
            warn!("PDO mapping of node {} failed: {}", self.storage.node_id(), e);
            status.error(&format!("PDO mapping failed: {e}"));
        }
    }

    fn shutdown(&self, _status: &LayerStatus) {
        self.release();
        self.halted.store(false);
    }

    fn halt(&self, _status: &LayerStatus) {
        self.halted.store(true);
    }

    fn recover(&self, _status: &LayerStatus) {
        self.halted.store(false);
    }
}
