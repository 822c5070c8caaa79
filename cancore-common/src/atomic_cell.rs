use core::cell::Cell;

use critical_section::Mutex;

/// A cell holding a `Copy` value which can be shared between threads
///
/// Every access happens inside a critical section, so it is only suitable for small values which
/// are loaded and stored as a whole.
pub struct AtomicCell<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Copy> AtomicCell<T> {
    /// Create a new AtomicCell
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the current value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Replace the current value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value))
    }

    /// Replace the current value, returning the previous one
    pub fn swap(&self, value: T) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).replace(value))
    }

    /// Apply `f` to the current value and store the result, returning the new value
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let value = f(cell.get());
            cell.set(value);
            value
        })
    }
}

impl<T: Copy + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("AtomicCell").field(&self.load()).finish()
    }
}

impl<T: Copy + Default> AtomicCell<T> {
    /// Read the current value, leaving the default in its place
    pub fn take(&self) -> T {
        self.swap(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resets_to_default() {
        let cell = AtomicCell::new(Some(3u8));
        assert_eq!(Some(3), cell.take());
        assert_eq!(None, cell.load());
    }

    #[test]
    fn test_update() {
        let cell = AtomicCell::new(1u32);
        assert_eq!(3, cell.update(|v| v + 2));
        assert_eq!(3, cell.load());
    }
}
