//! CAN identifiers and frames

/// The largest standard (11-bit) identifier
pub const MAX_STD_ID: u16 = 0x7FF;
/// The largest extended (29-bit) identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A CAN arbitration ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanId {
    /// An extended 29-bit identifier
    Extended(u32),
    /// A standard 11-bit identifier
    Std(u16),
}

impl CanId {
    /// Create a new extended ID, truncating any bits above bit 28
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id & MAX_EXTENDED_ID)
    }

    /// Create a new standard ID, truncating any bits above bit 10
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id & MAX_STD_ID)
    }

    /// Get the raw numeric value of the ID
    pub const fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true if this is an extended ID
    pub const fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

impl core::fmt::Display for CanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanId::Extended(id) => write!(f, "0x{id:08X}"),
            CanId::Std(id) => write!(f, "0x{id:03X}"),
        }
    }
}

/// A classic CAN frame, with up to 8 bytes of payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    /// The data payload. Only the first `dlc` bytes are meaningful.
    pub data: [u8; 8],
    /// The number of valid payload bytes
    pub dlc: u8,
    /// Remote transmission request flag
    pub rtr: bool,
    /// The arbitration ID
    pub id: CanId,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; 8],
            dlc: 0,
            rtr: false,
            id: CanId::Std(0),
        }
    }
}

impl CanMessage {
    /// Create a data frame
    ///
    /// Only the first 8 bytes of `data` are used.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(8);
        let mut buf = [0u8; 8];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            rtr: false,
        }
    }

    /// Create a remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            rtr: true,
            ..Default::default()
        }
    }

    /// The arbitration ID of the frame
    pub fn id(&self) -> CanId {
        self.id
    }

    /// The valid payload bytes of the frame
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Returns true if this is a remote transmission request
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_truncated() {
        assert_eq!(CanId::Std(0x7FF), CanId::std(0xFFFF));
        assert_eq!(CanId::Extended(0x1FFF_FFFF), CanId::extended(u32::MAX));
        assert_ne!(CanId::std(0x181), CanId::extended(0x181));
    }

    #[test]
    fn test_long_payload_is_clipped() {
        let msg = CanMessage::new(CanId::std(0x200), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(8, msg.dlc);
        assert_eq!(&[1, 2, 3, 4, 5, 6, 7, 8], msg.data());
    }

    #[test]
    fn test_rtr_has_no_data() {
        let msg = CanMessage::new_rtr(CanId::std(0x281));
        assert!(msg.is_rtr());
        assert!(msg.data().is_empty());
    }
}
