//! Routing of received CAN frames to registered listeners
//!
//! A [`Dispatcher`] owns the set of registered delegates. Registering a delegate returns a
//! [`FrameListener`] handle, and dropping the handle removes the delegate again. A delegate
//! typically captures (an `Arc` of) the state it updates, so the handle must be dropped before
//! that state is torn down; the usual pattern is to store the handle next to the state.
//!
//! Exact-ID listeners are kept in a hash map keyed by [`CanId`], so the per-frame lookup does not
//! depend on how many IDs are registered. Masked listeners are matched by a linear scan, as they
//! are expected to be few.
//!
//! Both collections are copy-on-write snapshots. `dispatch` only holds the table lock long
//! enough to clone the `Arc` of the matching bucket, and then calls the delegates with no lock
//! held, so delegates are free to register or drop listeners themselves.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use cancore_common::messages::{CanId, CanMessage, MAX_EXTENDED_ID, MAX_STD_ID};
use defmt_or_log::debug;
use parking_lot::RwLock;

/// A callback receiving dispatched frames
pub type FrameDelegate = dyn Fn(&CanMessage) + Send + Sync;

/// Which frame formats a [`MsgFilter`] accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Only 11-bit frames
    Standard,
    /// Only 29-bit frames
    Extended,
    /// Both formats
    Any,
}

/// Selects the frames a listener receives
///
/// A frame matches when its format is accepted and `frame.id & mask == filter.id & mask`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgFilter {
    id: u32,
    mask: u32,
    format: FrameFormat,
}

impl MsgFilter {
    /// Match exactly one ID
    pub const fn exact(id: CanId) -> Self {
        match id {
            CanId::Std(raw) => Self {
                id: raw as u32,
                mask: MAX_STD_ID as u32,
                format: FrameFormat::Standard,
            },
            CanId::Extended(raw) => Self {
                id: raw,
                mask: MAX_EXTENDED_ID,
                format: FrameFormat::Extended,
            },
        }
    }

    /// Match every ID of the same format which agrees with `id` on the bits set in `mask`
    pub const fn masked(id: CanId, mask: u32) -> Self {
        let exact = Self::exact(id);
        Self {
            mask: mask & exact.mask,
            ..exact
        }
    }

    /// Match every frame
    pub const fn any() -> Self {
        Self {
            id: 0,
            mask: 0,
            format: FrameFormat::Any,
        }
    }

    /// Returns true if `id` passes the filter
    pub fn matches(&self, id: CanId) -> bool {
        let format_ok = match self.format {
            FrameFormat::Standard => !id.is_extended(),
            FrameFormat::Extended => id.is_extended(),
            FrameFormat::Any => true,
        };
        format_ok && (id.raw() & self.mask) == (self.id & self.mask)
    }

    /// The single ID matched by this filter, if it matches exactly one
    fn exact_id(&self) -> Option<CanId> {
        match self.format {
            FrameFormat::Standard if self.mask == MAX_STD_ID as u32 => {
                Some(CanId::Std(self.id as u16))
            }
            FrameFormat::Extended if self.mask == MAX_EXTENDED_ID => {
                Some(CanId::Extended(self.id))
            }
            _ => None,
        }
    }
}

impl From<CanId> for MsgFilter {
    fn from(id: CanId) -> Self {
        Self::exact(id)
    }
}

#[derive(Clone)]
struct Entry {
    key: u64,
    delegate: Arc<FrameDelegate>,
}

#[derive(Default)]
struct DispatchTable {
    next_key: u64,
    exact: HashMap<CanId, Arc<Vec<Entry>>>,
    filtered: Arc<Vec<(MsgFilter, Entry)>>,
}

impl DispatchTable {
    fn insert(&mut self, filter: MsgFilter, delegate: Arc<FrameDelegate>) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        let entry = Entry { key, delegate };
        match filter.exact_id() {
            Some(id) => Arc::make_mut(self.exact.entry(id).or_default()).push(entry),
            None => Arc::make_mut(&mut self.filtered).push((filter, entry)),
        }
        key
    }

    fn remove(&mut self, filter: &MsgFilter, key: u64) {
        match filter.exact_id() {
            Some(id) => {
                if let Some(bucket) = self.exact.get_mut(&id) {
                    Arc::make_mut(bucket).retain(|e| e.key != key);
                    if bucket.is_empty() {
                        self.exact.remove(&id);
                    }
                }
            }
            None => Arc::make_mut(&mut self.filtered).retain(|(_, e)| e.key != key),
        }
    }
}

/// Routes frames to the listeners whose filter matches
#[derive(Default)]
pub struct Dispatcher {
    table: Arc<RwLock<DispatchTable>>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `delegate` for all frames matching `filter`
    ///
    /// The delegate stays registered until the returned handle is dropped.
    pub fn create_listener<F>(&self, filter: impl Into<MsgFilter>, delegate: F) -> FrameListener
    where
        F: Fn(&CanMessage) + Send + Sync + 'static,
    {
        self.create_shared_listener(filter.into(), Arc::new(delegate))
    }

    /// Register an already shared delegate
    pub fn create_shared_listener(
        &self,
        filter: MsgFilter,
        delegate: Arc<FrameDelegate>,
    ) -> FrameListener {
        let key = self.table.write().insert(filter, delegate);
        debug!("Registered frame listener {} ({:?})", key, filter);
        FrameListener {
            key,
            filter,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Deliver a frame to every matching listener, in the calling thread
    ///
    /// Returns the number of delegates which were called. Frames nobody listens to are simply
    /// dropped.
    pub fn dispatch(&self, msg: &CanMessage) -> usize {
        let (exact, filtered) = {
            let table = self.table.read();
            (table.exact.get(&msg.id()).cloned(), table.filtered.clone())
        };

        let mut count = 0;
        if let Some(bucket) = exact {
            for entry in bucket.iter() {
                (entry.delegate)(msg);
                count += 1;
            }
        }
        for (filter, entry) in filtered.iter() {
            if filter.matches(msg.id()) {
                (entry.delegate)(msg);
                count += 1;
            }
        }
        count
    }

    /// Total number of registered listeners
    pub fn listener_count(&self) -> usize {
        let table = self.table.read();
        table.exact.values().map(|b| b.len()).sum::<usize>() + table.filtered.len()
    }
}

/// Registration handle returned by [`Dispatcher::create_listener`]
///
/// Dropping the handle deregisters the delegate. A dispatch which is already running on another
/// thread may still complete its call into the delegate, but no dispatch started after the drop
/// returns will reach it.
#[must_use = "the listener is removed when the handle is dropped"]
pub struct FrameListener {
    key: u64,
    filter: MsgFilter,
    table: Weak<RwLock<DispatchTable>>,
}

impl FrameListener {
    /// The filter this listener was registered with
    pub fn filter(&self) -> MsgFilter {
        self.filter
    }
}

impl core::fmt::Debug for FrameListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameListener")
            .field("key", &self.key)
            .field("filter", &self.filter)
            .finish()
    }
}

impl Drop for FrameListener {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.write().remove(&self.filter, self.key);
            debug!("Removed frame listener {}", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&CanMessage) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &CanMessage| {
            c.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn test_exact_match() {
        let dispatcher = Dispatcher::new();
        let (count, delegate) = counter();
        let _listener = dispatcher.create_listener(CanId::std(0x181), delegate);

        assert_eq!(1, dispatcher.dispatch(&CanMessage::new(CanId::std(0x181), &[1])));
        assert_eq!(0, dispatcher.dispatch(&CanMessage::new(CanId::std(0x182), &[1])));
        // Same numeric value in the other format is a different ID
        assert_eq!(0, dispatcher.dispatch(&CanMessage::new(CanId::extended(0x181), &[1])));
        assert_eq!(1, count.load(Ordering::Relaxed));
    }

    #[test]
    fn test_masked_match() {
        let dispatcher = Dispatcher::new();
        let (count, delegate) = counter();
        // All IDs 0x180..=0x1FF
        let _listener = dispatcher.create_listener(MsgFilter::masked(CanId::std(0x180), 0x780), delegate);

        dispatcher.dispatch(&CanMessage::new(CanId::std(0x180), &[]));
        dispatcher.dispatch(&CanMessage::new(CanId::std(0x1FF), &[]));
        dispatcher.dispatch(&CanMessage::new(CanId::std(0x200), &[]));
        assert_eq!(2, count.load(Ordering::Relaxed));
    }

    #[test]
    fn test_any_filter_sees_everything() {
        let dispatcher = Dispatcher::new();
        let (count, delegate) = counter();
        let _listener = dispatcher.create_listener(MsgFilter::any(), delegate);
        dispatcher.dispatch(&CanMessage::new(CanId::std(0x1), &[]));
        dispatcher.dispatch(&CanMessage::new(CanId::extended(0x1234_5678), &[]));
        assert_eq!(2, count.load(Ordering::Relaxed));
    }

    #[test]
    fn test_drop_deregisters() {
        let dispatcher = Dispatcher::new();
        let (count, delegate) = counter();
        let listener = dispatcher.create_listener(CanId::std(0x10), delegate);
        assert_eq!(1, dispatcher.listener_count());
        drop(listener);
        assert_eq!(0, dispatcher.listener_count());
        assert_eq!(0, dispatcher.dispatch(&CanMessage::new(CanId::std(0x10), &[])));
        assert_eq!(0, count.load(Ordering::Relaxed));
    }

    #[test]
    fn test_multiple_listeners_same_id() {
        let dispatcher = Dispatcher::new();
        let (count1, delegate1) = counter();
        let (count2, delegate2) = counter();
        let l1 = dispatcher.create_listener(CanId::std(0x20), delegate1);
        let _l2 = dispatcher.create_listener(CanId::std(0x20), delegate2);
        dispatcher.dispatch(&CanMessage::new(CanId::std(0x20), &[]));
        drop(l1);
        dispatcher.dispatch(&CanMessage::new(CanId::std(0x20), &[]));
        assert_eq!(1, count1.load(Ordering::Relaxed));
        assert_eq!(2, count2.load(Ordering::Relaxed));
    }

    #[test]
    fn test_listener_outliving_dispatcher() {
        let dispatcher = Dispatcher::new();
        let (_count, delegate) = counter();
        let listener = dispatcher.create_listener(CanId::std(0x30), delegate);
        drop(dispatcher);
        // Nothing left to deregister from, must not panic
        drop(listener);
    }

    #[test]
    fn test_delegate_may_register_listeners() {
        let dispatcher = Arc::new(Dispatcher::new());
        let held = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let d = dispatcher.clone();
        let h = held.clone();
        let _listener = dispatcher.create_listener(CanId::std(0x40), move |_| {
            h.lock().push(d.create_listener(CanId::std(0x41), |_| {}));
        });
        dispatcher.dispatch(&CanMessage::new(CanId::std(0x40), &[]));
        assert_eq!(2, dispatcher.listener_count());
        held.lock().clear();
        assert_eq!(1, dispatcher.listener_count());
    }
}
