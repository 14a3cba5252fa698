//! Projection items.
//!
//! A [`ViewItem`] wraps a source value (or a synthetic group id) for the
//! lifetime of the projection. Items carry a stable instance id, a selection
//! flag, a monotonically increasing version, and a back-reference to the
//! owning view.
//!
//! Items are created by the strategy pipeline when it first materialises a
//! position and are shared with consumers behind an [`ItemRef`]. The owner
//! back-reference is an id tag rather than a strong pointer: the view owns
//! its items, never the other way around, and `destroy()` clears the tag.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::FieldValue;

/// A global counter for assigning projection item instance ids.
static INSTANCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A shared handle to a projection item.
pub type ItemRef<T> = Arc<ViewItem<T>>;

/// The payload of a projection item: either a wrapped source record or a
/// synthetic group header carrying its group id.
#[derive(Debug, Clone)]
pub enum ItemContents<T> {
    /// A source record.
    Record(T),
    /// A group header; the value is the group id produced by the group
    /// function.
    Group(FieldValue),
}

/// A projection item: the engine's wrapper around one source value, or a
/// synthetic group-header row.
///
/// # Observable state
///
/// The `selected` flag and the `version` counter are the item's observable
/// state. The version is bumped whenever observable state mutates, so
/// consumers can cheaply detect staleness.
///
/// # Identity
///
/// `instance_id` is assigned at construction, is unique per process, and is
/// stable for the life of the item. Two items are the same item iff their
/// instance ids are equal (or, equivalently, the `Arc`s are the same
/// allocation).
pub struct ViewItem<T> {
    contents: RwLock<ItemContents<T>>,
    instance_id: u64,
    selected: AtomicBool,
    version: AtomicU64,
    /// Id tag of the owning view; 0 when detached.
    owner: AtomicU64,
}

impl<T: Clone> ViewItem<T> {
    /// Creates a new item wrapping a source record.
    pub(crate) fn new_record(value: T) -> ItemRef<T> {
        Arc::new(Self {
            contents: RwLock::new(ItemContents::Record(value)),
            instance_id: INSTANCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            selected: AtomicBool::new(false),
            version: AtomicU64::new(0),
            owner: AtomicU64::new(0),
        })
    }

    /// Creates a new group-header item for the given group id.
    pub(crate) fn new_group(id: FieldValue) -> ItemRef<T> {
        Arc::new(Self {
            contents: RwLock::new(ItemContents::Group(id)),
            instance_id: INSTANCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            selected: AtomicBool::new(false),
            version: AtomicU64::new(0),
            owner: AtomicU64::new(0),
        })
    }

    /// Returns a copy of the item's contents: the wrapped record, or the
    /// group id for a header.
    pub fn contents(&self) -> ItemContents<T> {
        self.contents.read().clone()
    }

    /// Returns a clone of the wrapped source record, or `None` for a group
    /// header.
    pub fn record(&self) -> Option<T> {
        match &*self.contents.read() {
            ItemContents::Record(value) => Some(value.clone()),
            ItemContents::Group(_) => None,
        }
    }

    /// Runs `f` against the wrapped source record without cloning it.
    ///
    /// Returns `None` for a group header.
    pub fn with_record<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &*self.contents.read() {
            ItemContents::Record(value) => Some(f(value)),
            ItemContents::Group(_) => None,
        }
    }

    /// Returns the group id, or `None` if this is a data item.
    pub fn group_id(&self) -> Option<FieldValue> {
        match &*self.contents.read() {
            ItemContents::Group(id) => Some(id.clone()),
            ItemContents::Record(_) => None,
        }
    }

    /// Returns `true` if this item is a synthetic group header.
    pub fn is_group(&self) -> bool {
        matches!(&*self.contents.read(), ItemContents::Group(_))
    }

    /// Replaces the wrapped record in place and bumps the version.
    ///
    /// Used when the source reports a per-item change: the item keeps its
    /// identity while its payload catches up with the source.
    pub(crate) fn set_record(&self, value: T) {
        *self.contents.write() = ItemContents::Record(value);
        self.bump_version();
    }
}

impl<T> ViewItem<T> {
    /// The item's stable instance id.
    #[inline]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Returns `true` if the item is currently selected.
    #[inline]
    pub fn is_selected(&self) -> bool {
        self.selected.load(Ordering::SeqCst)
    }

    /// The item's version counter.
    ///
    /// Bumped on every observable mutation (selection changes, payload
    /// updates).
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Id tag of the owning view, or 0 when detached.
    #[inline]
    pub fn owner_id(&self) -> u64 {
        self.owner.load(Ordering::SeqCst)
    }

    /// Sets the selection flag. Returns `true` if the flag changed; bumps
    /// the version on change.
    pub(crate) fn set_selected(&self, selected: bool) -> bool {
        let changed = self.selected.swap(selected, Ordering::SeqCst) != selected;
        if changed {
            self.bump_version();
        }
        changed
    }

    /// Bumps the version counter.
    pub(crate) fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Binds the item to its owning view.
    pub(crate) fn bind_owner(&self, view_id: u64) {
        self.owner.store(view_id, Ordering::SeqCst);
    }

    /// Clears the owner tag. Called when the owning view is destroyed.
    pub(crate) fn clear_owner(&self) {
        self.owner.store(0, Ordering::SeqCst);
    }

    /// Restores observable state during rehydration.
    pub(crate) fn restore_state(&self, selected: bool, version: u64) {
        self.selected.store(selected, Ordering::SeqCst);
        self.version.store(version, Ordering::SeqCst);
    }
}

impl<T> fmt::Debug for ViewItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewItem")
            .field("instance_id", &self.instance_id)
            .field(
                "kind",
                &if matches!(&*self.contents.read(), ItemContents::Group(_)) {
                    "group"
                } else {
                    "record"
                },
            )
            .field("selected", &self.is_selected())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_ids_are_unique_and_stable() {
        let a = ViewItem::new_record("a".to_string());
        let b = ViewItem::new_record("b".to_string());
        assert_ne!(a.instance_id(), b.instance_id());
        let id = a.instance_id();
        assert_eq!(a.instance_id(), id);
    }

    #[test]
    fn test_selection_bumps_version() {
        let item = ViewItem::new_record(1i64.to_string());
        assert_eq!(item.version(), 0);
        assert!(item.set_selected(true));
        assert_eq!(item.version(), 1);
        // Setting to the same value is a no-op.
        assert!(!item.set_selected(true));
        assert_eq!(item.version(), 1);
    }

    #[test]
    fn test_group_header_contents() {
        let header = ViewItem::<String>::new_group(FieldValue::from("A"));
        assert!(header.is_group());
        assert_eq!(header.group_id(), Some(FieldValue::from("A")));
        assert_eq!(header.record(), None);
    }

    #[test]
    fn test_owner_binding() {
        let item = ViewItem::new_record("x".to_string());
        assert_eq!(item.owner_id(), 0);
        item.bind_owner(7);
        assert_eq!(item.owner_id(), 7);
        item.clear_owner();
        assert_eq!(item.owner_id(), 0);
    }

    #[test]
    fn test_set_record_keeps_identity() {
        let item = ViewItem::new_record("old".to_string());
        let id = item.instance_id();
        let v = item.version();
        item.set_record("new".to_string());
        assert_eq!(item.instance_id(), id);
        assert_eq!(item.record().as_deref(), Some("new"));
        assert_eq!(item.version(), v + 1);
    }
}
