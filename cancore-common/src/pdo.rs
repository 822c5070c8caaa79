//! Definitions and data types related to PDOs

use crate::messages::{CanId, CanMessage, MAX_STD_ID};

/// The maximum number of payload bits a single PDO can carry
pub const MAX_PDO_BITS: u32 = 64;

/// The largest mapping count accepted in sub 0 of a mapping parameter object
pub const MAX_MAPPING_ENTRIES: u8 = 0x40;

/// Represents a PDO mapping
///
/// Each mapping specifies one sub-object to be included in the PDO data bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdoMapping {
    /// The object index
    pub index: u16,
    /// The object sub index
    pub sub: u8,
    /// The size of the object to map, in **bits**
    pub size: u8,
}

impl PdoMapping {
    /// Convert a PdoMapping object to the u32 representation stored in the mapping parameter
    pub fn to_object_value(&self) -> u32 {
        ((self.index as u32) << 16) | ((self.sub as u32) << 8) | (self.size as u32)
    }

    /// Create a PdoMapping object from the raw u32 representation stored in the mapping parameter
    pub fn from_object_value(value: u32) -> Self {
        let index = (value >> 16) as u16;
        let sub = ((value >> 8) & 0xff) as u8;
        let size = (value & 0xff) as u8;
        Self { index, sub, size }
    }

    /// Number of payload bytes occupied by the mapped object
    pub fn byte_len(&self) -> usize {
        (self.size as usize).div_ceil(8)
    }

    /// Returns true for mappings of dummy objects (index below 0x1000)
    ///
    /// Dummy entries take up space in the frame but are not backed by a dictionary entry.
    pub fn is_dummy(&self) -> bool {
        self.index < 0x1000
    }
}

/// The COB-ID word stored in sub 1 of a PDO communication parameter object
///
/// | bit   | meaning                            |
/// |-------|------------------------------------|
/// | 31    | PDO invalid                        |
/// | 30    | no RTR allowed                     |
/// | 29    | extended (29-bit) frame            |
/// | 0..28 | CAN ID                             |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdoCobId {
    /// The raw identifier, up to 29 bits
    pub id: u32,
    /// The PDO uses an extended frame
    pub extended: bool,
    /// Remote requests are not allowed on this PDO
    pub no_rtr: bool,
    /// The PDO is disabled
    pub invalid: bool,
}

impl PdoCobId {
    const INVALID_BIT: u32 = 1 << 31;
    const NO_RTR_BIT: u32 = 1 << 30;
    const EXTENDED_BIT: u32 = 1 << 29;
    const ID_MASK: u32 = (1 << 29) - 1;

    /// Decode the raw object value
    pub fn from_object_value(value: u32) -> Self {
        Self {
            id: value & Self::ID_MASK,
            extended: value & Self::EXTENDED_BIT != 0,
            no_rtr: value & Self::NO_RTR_BIT != 0,
            invalid: value & Self::INVALID_BIT != 0,
        }
    }

    /// Encode into the raw object value
    pub fn to_object_value(&self) -> u32 {
        let mut value = self.id & Self::ID_MASK;
        if self.extended {
            value |= Self::EXTENDED_BIT;
        }
        if self.no_rtr {
            value |= Self::NO_RTR_BIT;
        }
        if self.invalid {
            value |= Self::INVALID_BIT;
        }
        value
    }

    /// The CAN ID used by the PDO
    ///
    /// Returns `None` for a standard frame COB-ID whose id does not fit in 11 bits.
    pub fn can_id(&self) -> Option<CanId> {
        if self.extended {
            Some(CanId::extended(self.id))
        } else if self.id <= MAX_STD_ID as u32 {
            Some(CanId::std(self.id as u16))
        } else {
            None
        }
    }

    /// Build the frame template for this PDO
    ///
    /// The frame is a remote request template when RTR is allowed.
    pub fn frame(&self) -> Option<CanMessage> {
        let mut frame = CanMessage::new(self.can_id()?, &[]);
        frame.rtr = !self.no_rtr;
        Some(frame)
    }
}

/// Helpers for interpreting the PDO transmission type byte
pub mod transmission_type {
    /// Synchronous, acyclic
    pub const SYNC_ACYCLIC: u8 = 0;
    /// Highest synchronous cyclic type (every 240th SYNC)
    pub const SYNC_CYCLIC_MAX: u8 = 240;
    /// Synchronous, remote request only
    pub const RTR_SYNC: u8 = 0xFC;
    /// Event driven, remote request only
    pub const RTR_EVENT: u8 = 0xFD;
    /// Event driven, manufacturer specific
    pub const EVENT_MANUFACTURER: u8 = 0xFE;
    /// Event driven, device profile specific
    pub const EVENT_PROFILE: u8 = 0xFF;

    /// Returns true for the synchronous cyclic types 1..=240
    pub fn is_cyclic(tt: u8) -> bool {
        (1..=SYNC_CYCLIC_MAX).contains(&tt)
    }

    /// Returns true for the remote-request-only types
    pub fn is_rtr_only(tt: u8) -> bool {
        tt == RTR_SYNC || tt == RTR_EVENT
    }
}
