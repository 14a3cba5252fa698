//! The source-collection contract and a reference implementation.
//!
//! The projection never owns the data: it observes a source collection that
//! remains the single source of truth. This module defines what the engine
//! consumes from a source ([`SourceList`] plus the [`SourceSignals`] event
//! streams) and provides [`VecSource`], a vector-backed source with the full
//! mutation surface, used by applications that have no richer collection of
//! their own and by this crate's tests.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use vantage_core::Signal;

use crate::record::Record;

/// The action carried by a structural change event.
///
/// The same six values describe both source events and projection events;
/// the projection maps indices and items into its own space but never
/// invents a seventh action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListAction {
    /// The collection was rebuilt wholesale.
    Reset,
    /// Items were inserted.
    Add,
    /// Items were removed.
    Remove,
    /// Items were replaced in place.
    Replace,
    /// Items changed position.
    Move,
    /// Items changed state without moving.
    Change,
}

/// A structural change event.
///
/// `new_items`/`new_index` describe the post-change side of the action,
/// `old_items`/`old_index` the pre-change side. Which sides are populated
/// depends on the action; the constructors encode the convention.
#[derive(Debug, Clone)]
pub struct ListChange<T> {
    /// What happened.
    pub action: ListAction,
    /// Items on the post-change side.
    pub new_items: Vec<T>,
    /// Index of the first entry of `new_items`.
    pub new_index: usize,
    /// Items on the pre-change side.
    pub old_items: Vec<T>,
    /// Index of the first entry of `old_items`.
    pub old_index: usize,
}

impl<T> ListChange<T> {
    /// A wholesale rebuild.
    pub fn reset() -> Self {
        Self {
            action: ListAction::Reset,
            new_items: Vec::new(),
            new_index: 0,
            old_items: Vec::new(),
            old_index: 0,
        }
    }

    /// Items inserted at `index`.
    pub fn add(items: Vec<T>, index: usize) -> Self {
        Self {
            action: ListAction::Add,
            new_items: items,
            new_index: index,
            old_items: Vec::new(),
            old_index: 0,
        }
    }

    /// Items removed from `index`.
    pub fn remove(items: Vec<T>, index: usize) -> Self {
        Self {
            action: ListAction::Remove,
            new_items: Vec::new(),
            new_index: 0,
            old_items: items,
            old_index: index,
        }
    }

    /// Items replaced in place at `index`.
    pub fn replace(old_items: Vec<T>, new_items: Vec<T>, index: usize) -> Self {
        Self {
            action: ListAction::Replace,
            new_items,
            new_index: index,
            old_items,
            old_index: index,
        }
    }

    /// Items moved from `old_index` to `new_index`.
    pub fn moved(items: Vec<T>, old_index: usize, new_index: usize) -> Self
    where
        T: Clone,
    {
        Self {
            action: ListAction::Move,
            new_items: items.clone(),
            new_index,
            old_items: items,
            old_index,
        }
    }
}

/// A per-item change event.
#[derive(Debug, Clone)]
pub struct ItemChange<T> {
    /// The item's current value.
    pub item: T,
    /// The item's index in the source.
    pub index: usize,
    /// Names of the properties that changed. Empty means "unknown; assume
    /// anything may have changed".
    pub properties: Vec<String>,
}

/// An event-raising-mode toggle event.
#[derive(Debug, Clone, Copy)]
pub struct RaisingChange {
    /// Whether the source is raising events again.
    pub enabled: bool,
    /// Whether observers should analyse state while events flow.
    pub analyze: bool,
}

/// The event streams a source may expose.
pub struct SourceSignals<T> {
    /// Structural changes: reset / add / remove / replace / move / change.
    pub collection_changed: Signal<ListChange<T>>,
    /// Per-item changes, carrying the changed property names.
    pub item_changed: Signal<ItemChange<T>>,
    /// Event-raising-mode toggles.
    pub raising_changed: Signal<RaisingChange>,
}

impl<T> Default for SourceSignals<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SourceSignals<T> {
    /// Creates a new set of source signals.
    pub fn new() -> Self {
        Self {
            collection_changed: Signal::new(),
            item_changed: Signal::new(),
            raising_changed: Signal::new(),
        }
    }
}

/// The contract the projection consumes from a source collection.
///
/// Only forward enumeration is mandatory; indexed access defaults to
/// enumeration, and the event streams are optional (a source without
/// signals produces a static projection).
pub trait SourceList<T: Record>: Send + Sync {
    /// Enumerates the collection front to back.
    fn for_each(&self, f: &mut dyn FnMut(&T));

    /// Number of items. Defaults to counting via enumeration.
    fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(&mut |_| n += 1);
        n
    }

    /// Returns `true` when the source holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the item at `index`. Defaults to enumeration.
    fn get(&self, index: usize) -> Option<T> {
        let mut i = 0;
        let mut found = None;
        self.for_each(&mut |value| {
            if i == index && found.is_none() {
                found = Some(value.clone());
            }
            i += 1;
        });
        found
    }

    /// Returns the index of the first item equal to `value`. Defaults to
    /// enumeration.
    fn index_of(&self, value: &T) -> Option<usize> {
        let mut i = 0;
        let mut found = None;
        self.for_each(&mut |candidate| {
            if found.is_none() && candidate == value {
                found = Some(i);
            }
            i += 1;
        });
        found
    }

    /// The source's event streams, if it has any.
    fn signals(&self) -> Option<&SourceSignals<T>> {
        None
    }
}

/// A vector-backed source collection with the full mutation surface.
///
/// `VecSource` emits a structural event after every mutation and supports
/// the event-raising toggle: while raising is disabled the source mutates
/// silently, and observers are told to resynchronise when raising resumes.
///
/// # Example
///
/// ```
/// use vantage::{SourceList, VecSource};
///
/// let source = VecSource::new(vec!["b".to_string(), "a".to_string()]);
/// source.push("c".to_string());
/// assert_eq!(source.len(), 3);
/// assert_eq!(source.get(2).as_deref(), Some("c"));
/// ```
pub struct VecSource<T: Record> {
    items: RwLock<Vec<T>>,
    signals: SourceSignals<T>,
    raising: AtomicBool,
    analyze: AtomicBool,
}

impl<T: Record> VecSource<T> {
    /// Creates a source holding the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: RwLock::new(items),
            signals: SourceSignals::new(),
            raising: AtomicBool::new(true),
            analyze: AtomicBool::new(true),
        }
    }

    /// Creates an empty source.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// The source's event streams.
    pub fn source_signals(&self) -> &SourceSignals<T> {
        &self.signals
    }

    /// Returns `true` while the source is raising events.
    pub fn is_event_raising(&self) -> bool {
        self.raising.load(Ordering::SeqCst)
    }

    /// Toggles event raising.
    ///
    /// While disabled, mutations happen silently. The toggle itself is
    /// always announced through `raising_changed` so observers can enter
    /// and leave their deferred mode; `analyze` tells them whether to
    /// re-analyse state when events resume.
    pub fn set_event_raising(&self, enabled: bool, analyze: bool) {
        self.raising.store(enabled, Ordering::SeqCst);
        self.analyze.store(analyze, Ordering::SeqCst);
        self.signals
            .raising_changed
            .emit(RaisingChange { enabled, analyze });
    }

    /// Appends an item to the end of the collection.
    pub fn push(&self, item: T) {
        let index = {
            let mut items = self.items.write();
            items.push(item.clone());
            items.len() - 1
        };
        self.emit(ListChange::add(vec![item], index));
    }

    /// Inserts an item at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn insert(&self, index: usize, item: T) {
        self.items.write().insert(index, item.clone());
        self.emit(ListChange::add(vec![item], index));
    }

    /// Removes and returns the item at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn remove(&self, index: usize) -> T {
        let removed = self.items.write().remove(index);
        self.emit(ListChange::remove(vec![removed.clone()], index));
        removed
    }

    /// Replaces the item at `index`, returning the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn replace(&self, index: usize, item: T) -> T {
        let old = {
            let mut items = self.items.write();
            std::mem::replace(&mut items[index], item.clone())
        };
        self.emit(ListChange::replace(vec![old.clone()], vec![item], index));
        old
    }

    /// Moves the item at `from` so it ends up at `to` (an index into the
    /// collection after the removal).
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn move_item(&self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let item = {
            let mut items = self.items.write();
            let value = items.remove(from);
            items.insert(to, value.clone());
            value
        };
        self.emit(ListChange::moved(vec![item], from, to));
    }

    /// Removes all items.
    pub fn clear(&self) {
        self.items.write().clear();
        self.emit(ListChange::reset());
    }

    /// Replaces the whole collection.
    pub fn set_items(&self, items: Vec<T>) {
        *self.items.write() = items;
        self.emit(ListChange::reset());
    }

    /// Mutates the item at `index` in place via a closure, then announces
    /// the named properties as changed.
    ///
    /// Returns `None` when `index` is out of bounds.
    pub fn modify<R>(
        &self,
        index: usize,
        properties: &[&str],
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let (result, current) = {
            let mut items = self.items.write();
            let item = items.get_mut(index)?;
            let result = f(item);
            (result, item.clone())
        };
        if self.is_event_raising() {
            self.signals.item_changed.emit(ItemChange {
                item: current,
                index,
                properties: properties.iter().map(|p| p.to_string()).collect(),
            });
        }
        Some(result)
    }

    /// Announces that the item at `index` changed the named properties.
    ///
    /// Call after mutating an item's state out of band; the event carries a
    /// copy of the item's current value.
    pub fn notify_item(&self, index: usize, properties: &[&str]) {
        let item = match self.items.read().get(index) {
            Some(item) => item.clone(),
            None => return,
        };
        if self.is_event_raising() {
            self.signals.item_changed.emit(ItemChange {
                item,
                index,
                properties: properties.iter().map(|p| p.to_string()).collect(),
            });
        }
    }

    fn emit(&self, change: ListChange<T>) {
        if self.is_event_raising() {
            self.signals.collection_changed.emit(change);
        }
    }
}

impl<T: Record> SourceList<T> for VecSource<T> {
    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        for item in self.items.read().iter() {
            f(item);
        }
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }

    fn index_of(&self, value: &T) -> Option<usize> {
        self.items.read().iter().position(|item| item == value)
    }

    fn signals(&self) -> Option<&SourceSignals<T>> {
        Some(&self.signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_push_emits_add() {
        let source = VecSource::<String>::empty();
        let received = Arc::new(Mutex::new(Vec::new()));

        let recv = received.clone();
        source
            .source_signals()
            .collection_changed
            .connect(move |change| {
                recv.lock().push((change.action, change.new_index));
            });

        source.push("a".to_string());
        source.push("b".to_string());

        let events = received.lock();
        assert_eq!(*events, vec![(ListAction::Add, 0), (ListAction::Add, 1)]);
    }

    #[test]
    fn test_remove_emits_old_side() {
        let source = VecSource::new(vec!["a".to_string(), "b".to_string()]);
        let received = Arc::new(Mutex::new(Vec::new()));

        let recv = received.clone();
        source
            .source_signals()
            .collection_changed
            .connect(move |change| {
                recv.lock()
                    .push((change.action, change.old_items.clone(), change.old_index));
            });

        let removed = source.remove(1);
        assert_eq!(removed, "b");

        let events = received.lock();
        assert_eq!(events[0], (ListAction::Remove, vec!["b".to_string()], 1));
    }

    #[test]
    fn test_move_item() {
        let source = VecSource::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        source.move_item(2, 0);
        assert_eq!(source.get(0).as_deref(), Some("c"));
        assert_eq!(source.get(1).as_deref(), Some("a"));
    }

    #[test]
    fn test_silent_mode_suppresses_events() {
        let source = VecSource::new(vec!["a".to_string()]);
        let count = Arc::new(Mutex::new(0));
        let toggles = Arc::new(Mutex::new(Vec::new()));

        let count_clone = count.clone();
        source
            .source_signals()
            .collection_changed
            .connect(move |_| *count_clone.lock() += 1);

        let toggles_clone = toggles.clone();
        source
            .source_signals()
            .raising_changed
            .connect(move |r| toggles_clone.lock().push((r.enabled, r.analyze)));

        source.set_event_raising(false, true);
        source.push("b".to_string());
        source.set_event_raising(true, true);

        assert_eq!(*count.lock(), 0);
        assert_eq!(*toggles.lock(), vec![(false, true), (true, true)]);
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_default_trait_methods_via_enumeration() {
        struct Probe(Vec<String>);
        impl SourceList<String> for Probe {
            fn for_each(&self, f: &mut dyn FnMut(&String)) {
                for item in &self.0 {
                    f(item);
                }
            }
        }

        let probe = Probe(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(probe.len(), 2);
        assert_eq!(probe.get(1).as_deref(), Some("y"));
        assert_eq!(probe.index_of(&"x".to_string()), Some(0));
        assert!(probe.signals().is_none());
    }
}
