use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use snafu::Snafu;

/// Errors from accessing a [`Buffer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BufferError {
    /// The access used a different size than the buffer was created with
    #[snafu(display("Buffer holds {expected} bytes, access used {actual}"))]
    TypeMismatch {
        /// Size of the buffer
        expected: usize,
        /// Size of the access
        actual: usize,
    },
    /// No data arrived before the read deadline
    #[snafu(display("No PDO data received within {timeout:?}"))]
    Timeout {
        /// The deadline which elapsed
        timeout: Duration,
    },
}

/// Outcome of a non-blocking [`Buffer::read`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRead {
    /// Nothing has been written yet, the destination was not touched
    Empty,
    /// Data was copied, and it had already been read before
    Clean,
    /// Data was copied, and it changed since the last read
    Dirty,
}

#[derive(Debug)]
struct BufferState {
    data: heapless::Vec<u8, 8>,
    empty: bool,
    dirty: bool,
}

/// Holds the bytes of one mapped object between the dictionary and the bus
///
/// The size is fixed at creation. Every access must use exactly that size, anything else is a
/// [`BufferError::TypeMismatch`].
#[derive(Debug)]
pub struct Buffer {
    size: usize,
    timeout: Duration,
    state: Mutex<BufferState>,
    changed: Condvar,
}

impl Buffer {
    /// Default deadline for [`Buffer::read_entry`]
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Create an empty buffer of `size` bytes
    ///
    /// # Panics
    ///
    /// If `size` is larger than a CAN frame payload (8 bytes)
    pub fn new(size: usize) -> Self {
        Self::with_timeout(size, Self::DEFAULT_TIMEOUT)
    }

    /// Create an empty buffer with a custom read deadline
    ///
    /// # Panics
    ///
    /// If `size` is larger than a CAN frame payload (8 bytes)
    pub fn with_timeout(size: usize, timeout: Duration) -> Self {
        assert!(size <= 8, "PDO buffer of {size} bytes does not fit in a frame");
        let mut data = heapless::Vec::new();
        // Cannot fail, capacity is checked above
        data.resize(size, 0).ok();
        Self {
            size,
            timeout,
            state: Mutex::new(BufferState {
                data,
                empty: true,
                dirty: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Size of the buffer in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if no data has been written since creation or the last [`Buffer::clean`]
    pub fn is_empty(&self) -> bool {
        self.state.lock().empty
    }

    /// Returns true if data has been written since the last read
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Forget the current content
    pub fn clean(&self) {
        let mut state = self.state.lock();
        state.empty = true;
        state.dirty = false;
    }

    fn check_size(&self, len: usize) -> Result<(), BufferError> {
        if len != self.size {
            TypeMismatchSnafu {
                expected: self.size,
                actual: len,
            }
            .fail()
        } else {
            Ok(())
        }
    }

    fn store(&self, src: &[u8]) -> Result<(), BufferError> {
        self.check_size(src.len())?;
        {
            let mut state = self.state.lock();
            state.data.copy_from_slice(src);
            state.empty = false;
            state.dirty = true;
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Copy the content into a frame payload without blocking, clearing the dirty flag
    pub fn read(&self, dest: &mut [u8]) -> Result<BufferRead, BufferError> {
        self.check_size(dest.len())?;
        let mut state = self.state.lock();
        if state.empty {
            return Ok(BufferRead::Empty);
        }
        dest.copy_from_slice(&state.data);
        let was_dirty = core::mem::replace(&mut state.dirty, false);
        Ok(if was_dirty {
            BufferRead::Dirty
        } else {
            BufferRead::Clean
        })
    }

    /// Store bytes received in a frame
    pub fn write(&self, src: &[u8]) -> Result<(), BufferError> {
        self.store(src)
    }

    /// Deliver the content to a dictionary read
    ///
    /// Waits until the buffer holds data, or fails with [`BufferError::Timeout`] once the
    /// deadline passes. `data` is only overwritten when the content changed since the last read,
    /// so it keeps the cached value otherwise.
    pub fn read_entry(&self, data: &mut [u8]) -> Result<(), BufferError> {
        self.check_size(data.len())?;
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();
        while state.empty {
            if self.changed.wait_until(&mut state, deadline).timed_out() && state.empty {
                return TimeoutSnafu {
                    timeout: self.timeout,
                }
                .fail();
            }
        }
        if state.dirty {
            data.copy_from_slice(&state.data);
            state.dirty = false;
        }
        Ok(())
    }

    /// Store a value written through the dictionary
    pub fn write_entry(&self, data: &[u8]) -> Result<(), BufferError> {
        self.store(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cancore_common::pdo::PdoMapping;
    use std::sync::Arc;

    #[test]
    fn test_write_then_read() {
        let mapping = PdoMapping::from_object_value(0x2000_0010);
        let buffer = Buffer::new(mapping.byte_len());
        assert_eq!(2, buffer.size());

        let mut out = [0u8; 2];
        assert_eq!(BufferRead::Empty, buffer.read(&mut out).unwrap());

        buffer.write(&[0x34, 0x12]).unwrap();
        assert!(buffer.is_dirty());
        assert_eq!(BufferRead::Dirty, buffer.read(&mut out).unwrap());
        assert_eq!([0x34, 0x12], out);
        assert!(!buffer.is_dirty());
        assert_eq!(BufferRead::Clean, buffer.read(&mut out).unwrap());
    }

    #[test]
    fn test_size_mismatch() {
        let buffer = Buffer::new(2);
        assert_eq!(
            Err(BufferError::TypeMismatch {
                expected: 2,
                actual: 4
            }),
            buffer.write(&[0; 4])
        );
        let mut out = [0u8; 1];
        assert!(buffer.read(&mut out).is_err());
        assert!(buffer.read_entry(&mut out).is_err());
        assert!(buffer.write_entry(&[1]).is_err());
    }

    #[test]
    fn test_clean_empties() {
        let buffer = Buffer::new(1);
        buffer.write_entry(&[5]).unwrap();
        buffer.clean();
        assert!(buffer.is_empty());
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn test_read_entry_times_out() {
        let buffer = Buffer::with_timeout(4, Duration::from_millis(20));
        let mut out = [0u8; 4];
        let start = Instant::now();
        assert_eq!(
            Err(BufferError::Timeout {
                timeout: Duration::from_millis(20)
            }),
            buffer.read_entry(&mut out)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_read_entry_keeps_cached_value() {
        let buffer = Buffer::new(1);
        buffer.write(&[7]).unwrap();
        let mut out = [0u8; 1];
        buffer.read_entry(&mut out).unwrap();
        assert_eq!([7], out);
        out[0] = 99;
        buffer.read_entry(&mut out).unwrap();
        assert_eq!([99], out);
    }

    #[test]
    fn test_read_entry_wakes_on_write() {
        let buffer = Arc::new(Buffer::with_timeout(2, Duration::from_secs(5)));
        let writer = buffer.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.write(&[1, 2]).unwrap();
        });
        let mut out = [0u8; 2];
        buffer.read_entry(&mut out).unwrap();
        assert_eq!([1, 2], out);
        handle.join().unwrap();
    }
}
