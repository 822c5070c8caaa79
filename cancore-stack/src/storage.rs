//! Interface to the object dictionary of a remote device
//!
//! The dictionary itself (its description, cached values, and how values travel to the device)
//! lives outside this crate. The PDO mapper only needs the operations of [`ObjectStorage`]:
//! reading and writing entries, looking at their configured and initial values, pushing initial
//! values to the device, and binding read/write delegates into an entry's access path.
//!
//! Values are exchanged as little-endian byte slices. [`ObjectStorageExt`] adds typed accessors
//! on top.

use std::sync::Arc;

use cancore_common::NodeId;
use paste::paste;
use snafu::Snafu;

use crate::pdo::BufferError;

/// Identifies one sub-object in the dictionary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
}

impl ObjectKey {
    /// Create a new ObjectKey
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }
}

impl core::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}sub{}", self.index, self.sub)
    }
}

/// Error returned by [`ObjectStorage`] operations
#[derive(Clone, Debug, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// The dictionary has no such entry
    ///
    /// For optional entries this is an expected outcome and is skipped by callers.
    #[snafu(display("No object {key}"))]
    NoSuchEntry {
        /// The missing entry
        key: ObjectKey,
    },
    /// A value with the wrong size was written
    #[snafu(display("Object {key} is {expected} bytes, got {actual}"))]
    SizeMismatch {
        /// The entry being accessed
        key: ObjectKey,
        /// Size of the entry
        expected: usize,
        /// Size of the provided value
        actual: usize,
    },
    /// A delegate bound with [`ObjectStorage::map`] failed
    #[snafu(display("Delegate for {key} failed: {source}"))]
    Delegate {
        /// The entry being accessed
        key: ObjectKey,
        /// The delegate error
        source: BufferError,
    },
    /// The device rejected the access
    #[snafu(display("Access to {key} failed: {message}"))]
    Access {
        /// The entry being accessed
        key: ObjectKey,
        /// Description of the failure
        message: String,
    },
}

impl StorageError {
    /// Returns true if the error only means the entry does not exist
    pub fn is_missing(&self) -> bool {
        matches!(self, StorageError::NoSuchEntry { .. })
    }
}

/// A delegate providing the current value of a mapped entry
///
/// It is called with a buffer of exactly the entry's size. Leaving the buffer untouched keeps the
/// cached value.
pub type ReadDelegate = Arc<dyn Fn(ObjectKey, &mut [u8]) -> Result<(), BufferError> + Send + Sync>;

/// A delegate receiving every value written to a mapped entry
pub type WriteDelegate = Arc<dyn Fn(ObjectKey, &[u8]) -> Result<(), BufferError> + Send + Sync>;

/// Static information about the device behind an [`ObjectStorage`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Number of receive PDOs the device supports
    pub rx_pdo_count: u8,
    /// Number of transmit PDOs the device supports
    pub tx_pdo_count: u8,
}

/// Access to a device's object dictionary
pub trait ObjectStorage: Send + Sync {
    /// Node ID of the device
    fn node_id(&self) -> NodeId;

    /// PDO capabilities of the device
    fn device_info(&self) -> DeviceInfo;

    /// The configured value of an entry, as given by the dictionary description
    fn value(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError>;

    /// Returns true if the configured value of the entry is relative to the node ID
    fn adds_node_id(&self, key: ObjectKey) -> bool;

    /// The initial value configured for an entry, if there is one
    ///
    /// An initial value means the entry has to be written to the device during setup.
    fn init_value(&self, key: ObjectKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Read the current value, going through a bound read delegate if there is one
    fn get(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError>;

    /// Read the last known value without accessing the device
    fn get_cached(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError>;

    /// Write a value, going through a bound write delegate if there is one
    fn set(&self, key: ObjectKey, data: &[u8]) -> Result<(), StorageError>;

    /// Bind delegates into the access path of an entry
    ///
    /// Passing `None` removes a previously bound delegate. Returns the size of the entry in
    /// bytes.
    fn map(
        &self,
        key: ObjectKey,
        read: Option<ReadDelegate>,
        write: Option<WriteDelegate>,
    ) -> Result<usize, StorageError>;

    /// Push the configured initial value of an entry to the device
    fn init(&self, key: ObjectKey) -> Result<(), StorageError>;
}

fn check_size(key: ObjectKey, data: &[u8], expected: usize) -> Result<(), StorageError> {
    if data.len() != expected {
        SizeMismatchSnafu {
            key,
            expected,
            actual: data.len(),
        }
        .fail()
    } else {
        Ok(())
    }
}

macro_rules! access_methods {
    ($type: ty) => {
        paste! {
            #[doc = concat!("Read a ", stringify!($type), " entry from the device")]
            fn [<get_ $type>](&self, key: ObjectKey) -> Result<$type, StorageError> {
                let data = self.get(key)?;
                check_size(key, &data, size_of::<$type>())?;
                let mut bytes = [0u8; size_of::<$type>()];
                bytes.copy_from_slice(&data);
                Ok(<$type>::from_le_bytes(bytes))
            }

            #[doc = concat!("Read the cached value of a ", stringify!($type), " entry")]
            fn [<get_cached_ $type>](&self, key: ObjectKey) -> Result<$type, StorageError> {
                let data = self.get_cached(key)?;
                check_size(key, &data, size_of::<$type>())?;
                let mut bytes = [0u8; size_of::<$type>()];
                bytes.copy_from_slice(&data);
                Ok(<$type>::from_le_bytes(bytes))
            }

            #[doc = concat!("Read the configured value of a ", stringify!($type), " entry")]
            fn [<value_ $type>](&self, key: ObjectKey) -> Result<$type, StorageError> {
                let data = self.value(key)?;
                check_size(key, &data, size_of::<$type>())?;
                let mut bytes = [0u8; size_of::<$type>()];
                bytes.copy_from_slice(&data);
                Ok(<$type>::from_le_bytes(bytes))
            }

            #[doc = concat!("Write a ", stringify!($type), " entry")]
            fn [<set_ $type>](&self, key: ObjectKey, value: $type) -> Result<(), StorageError> {
                self.set(key, &value.to_le_bytes())
            }
        }
    };
}

/// Typed accessors for every [`ObjectStorage`]
pub trait ObjectStorageExt: ObjectStorage {
    access_methods!(u8);
    access_methods!(u16);
    access_methods!(u32);

    /// Returns true if the entry has an initial value to push
    ///
    /// Missing entries have no initial value.
    fn has_init_value(&self, key: ObjectKey) -> bool {
        matches!(self.init_value(key), Ok(Some(_)))
    }

    /// The configured value of a COB-ID entry, with the node ID added when the entry is relative
    fn cob_id_value(&self, key: ObjectKey) -> Result<u32, StorageError> {
        let value = self.value_u32(key)?;
        if self.adds_node_id(key) {
            Ok(self.node_id().apply_offset(value))
        } else {
            Ok(value)
        }
    }
}

impl<T: ObjectStorage + ?Sized> ObjectStorageExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every entry reads back `data`
    struct Fixed {
        data: Vec<u8>,
    }

    impl ObjectStorage for Fixed {
        fn node_id(&self) -> NodeId {
            NodeId::new(5).unwrap()
        }

        fn device_info(&self) -> DeviceInfo {
            DeviceInfo::default()
        }

        fn value(&self, _key: ObjectKey) -> Result<Vec<u8>, StorageError> {
            Ok(self.data.clone())
        }

        fn adds_node_id(&self, key: ObjectKey) -> bool {
            key.sub == 1
        }

        fn init_value(&self, key: ObjectKey) -> Result<Option<Vec<u8>>, StorageError> {
            if key.sub == 0 {
                NoSuchEntrySnafu { key }.fail()
            } else {
                Ok(None)
            }
        }

        fn get(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError> {
            self.value(key)
        }

        fn get_cached(&self, key: ObjectKey) -> Result<Vec<u8>, StorageError> {
            self.value(key)
        }

        fn set(&self, _key: ObjectKey, _data: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }

        fn map(
            &self,
            _key: ObjectKey,
            _read: Option<ReadDelegate>,
            _write: Option<WriteDelegate>,
        ) -> Result<usize, StorageError> {
            Ok(self.data.len())
        }

        fn init(&self, _key: ObjectKey) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_typed_access() {
        let storage = Fixed {
            data: vec![0x80, 0x01, 0x00, 0x00],
        };
        let key = ObjectKey::new(0x1800, 2);
        assert_eq!(0x180, storage.get_u32(key).unwrap());
        assert_eq!(
            Err(StorageError::SizeMismatch {
                key,
                expected: 2,
                actual: 4
            }),
            storage.get_u16(key)
        );
    }

    #[test]
    fn test_cob_id_value_adds_node_id() {
        let storage = Fixed {
            data: 0x180u32.to_le_bytes().to_vec(),
        };
        assert_eq!(0x185, storage.cob_id_value(ObjectKey::new(0x1800, 1)).unwrap());
        assert_eq!(0x180, storage.cob_id_value(ObjectKey::new(0x1800, 2)).unwrap());
    }

    #[test]
    fn test_missing_entry_has_no_init_value() {
        let storage = Fixed { data: vec![0] };
        assert!(!storage.has_init_value(ObjectKey::new(0x1800, 0)));
        assert!(storage
            .init_value(ObjectKey::new(0x1800, 0))
            .unwrap_err()
            .is_missing());
    }

    #[test]
    fn test_key_display() {
        assert_eq!("0x1A00sub3", ObjectKey::new(0x1A00, 3).to_string());
    }
}
