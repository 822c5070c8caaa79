//! Constants defining standard object indices and sub indices
//!
//!

/// Object indices for standard objects
pub mod object_ids {
    /// The first RPDO communication parameter index. RPDO comm can be stored from 0x1400 to 0x15FF.
    pub const RPDO_COMM_BASE: u16 = 0x1400;
    ///  The first RPDO mapping parameter index. RPDO mappings can be stored from 0x1600 to 0x17FF;
    pub const RPDO_MAP_BASE: u16 = 0x1600;
    /// The first TPDO communication parameter index. TPDO comms can be stored from 0x1800 to 0x19FF.
    pub const TPDO_COMM_BASE: u16 = 0x1800;
    ///  The first TPDO mapping parameter index. TPDO mappings can be stored from 0x1A00 to 0x1BFF;
    pub const TPDO_MAP_BASE: u16 = 0x1A00;
}

/// Sub indices of the PDO communication parameter records (0x1400.., 0x1800..)
pub mod pdo_comm_subs {
    /// Highest sub index supported
    pub const NUM: u8 = 0;
    /// COB-ID used by the PDO
    pub const COB_ID: u8 = 1;
    /// Transmission type
    pub const TRANSMISSION_TYPE: u8 = 2;
    /// Inhibit time
    pub const INHIBIT_TIME: u8 = 3;
    /// Reserved, must not be written
    pub const RESERVED: u8 = 4;
    /// Event timer
    pub const EVENT_TIMER: u8 = 5;
    /// SYNC start value
    pub const SYNC_START: u8 = 6;
}

/// Sub indices of the PDO mapping parameter records (0x1600.., 0x1A00..)
pub mod pdo_map_subs {
    /// Number of mapped objects
    pub const NUM: u8 = 0;
}
