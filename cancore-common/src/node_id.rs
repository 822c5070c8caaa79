//! Node ID type and COB-ID offset handling
//!

use snafu::Snafu;

/// The node ID of a configured CANopen device (1..=127)
///
/// Many standard COB-IDs are defined as a base value plus the node ID of the device, e.g. the
/// default TPDO0 of node 5 is `0x180 + 5`. [`NodeId::apply_offset`] derives such IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(serde::Deserialize), serde(try_from = "u8"))]
pub struct NodeId(u8);

/// Error for converting u8 to a NodeId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("Invalid node ID {value}, must be in 1..=127"))]
pub struct InvalidNodeIdError {
    /// The rejected value
    pub value: u8,
}

impl NodeId {
    /// Try to create a new NodeId
    ///
    /// It will fail if value is outside of 1..=127
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value > 0 && value < 128 {
            Ok(NodeId(value))
        } else {
            Err(InvalidNodeIdError { value })
        }
    }

    /// Get the raw node ID as a u8
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Add the node ID to a base COB-ID value
    ///
    /// Only the 29 identifier bits take part in the addition; flag bits in the upper three bits
    /// of a COB-ID word are carried through unchanged.
    pub const fn apply_offset(&self, base: u32) -> u32 {
        const ID_MASK: u32 = (1 << 29) - 1;
        let id = (base & ID_MASK).wrapping_add(self.0 as u32) & ID_MASK;
        (base & !ID_MASK) | id
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}
