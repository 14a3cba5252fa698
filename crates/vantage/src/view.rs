//! The projection view façade.
//!
//! [`ProjectionView`] is the public surface of the engine: it subscribes to
//! a source collection's events, keeps the strategy pipeline, filter mask,
//! and sort map synchronized with source mutations, and exposes navigation,
//! coordinate queries, and the filter/sort/group/selection setters.
//!
//! The view is strictly read-only over the source: every mutating method
//! fails with [`ViewError::ReadOnly`]. Mutations go to the source; the view
//! follows through the source's event streams and notifies its own
//! listeners with minimal projection-level packets.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use vantage_core::{ConnectionId, Signal};

use crate::cursor::ViewCursor;
use crate::error::{ViewError, ViewResult};
use crate::filter::{FilterEngine, FilterSpec};
use crate::item::ItemRef;
use crate::pipeline::{Entry, GroupFn, Pipeline, SortSpec};
use crate::record::{FieldValue, Record};
use crate::session::{packets_from_positions, split_by_group, ChangePacket, UpdateSession};
use crate::source::{ItemChange, ListAction, ListChange, RaisingChange, SourceList};
use crate::state::{ItemState, ViewState};

/// A global counter for view id tags (item owner back-references).
static VIEW_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Construction options for a projection view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOptions {
    /// The record property used for unique-id extraction when records do
    /// not expose a domain identity.
    pub id_property: Option<String>,
    /// Whether the leaf strategy elides records with duplicate ids.
    pub unique: bool,
}

impl ViewOptions {
    /// Sets the id property.
    pub fn with_id_property(mut self, name: impl Into<String>) -> Self {
        self.id_property = Some(name.into());
        self
    }

    /// Enables or disables uniqueness enforcement.
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

/// Payload of the `current_changed` signal.
#[derive(Debug, Clone)]
pub struct CurrentChange<T> {
    /// The new current item, if any.
    pub new_item: Option<ItemRef<T>>,
    /// The previous current item, if any.
    pub old_item: Option<ItemRef<T>>,
    /// The new cursor position (`-1` = before the first item).
    pub new_position: isize,
    /// The previous cursor position.
    pub old_position: isize,
}

/// The signals a projection view exposes to its listeners.
///
/// Within one update session the order is strictly `before_change`, then
/// one or more `changed` packets in items order, then `after_change`.
/// Listeners must not mutate the source during delivery.
pub struct ViewSignals<T> {
    /// Emitted once before a batch of change packets.
    pub before_change: Signal<()>,
    /// Emitted once per change packet.
    pub changed: Signal<ChangePacket<T>>,
    /// Emitted once after a batch of change packets.
    pub after_change: Signal<()>,
    /// Emitted when the cursor's current item changes.
    pub current_changed: Signal<CurrentChange<T>>,
}

impl<T> ViewSignals<T> {
    fn new() -> Self {
        Self {
            before_change: Signal::new(),
            changed: Signal::new(),
            after_change: Signal::new(),
            current_changed: Signal::new(),
        }
    }
}

/// Which refilter policy a structural change calls for.
enum RefilterHint {
    /// Re-evaluate everything.
    Full,
    /// Re-evaluate only `[start, start + count)` (widened to group runs).
    /// Upgraded to a full pass when any filter consumes projection indices.
    Range(usize, usize),
}

#[derive(Default)]
struct SourceConnections {
    collection: Option<ConnectionId>,
    item: Option<ConnectionId>,
    raising: Option<ConnectionId>,
}

/// The mutable projection state, held behind the core's lock.
pub(crate) struct CoreState<T: Record> {
    pipeline: Pipeline<T>,
    /// The materialised sequence in pipeline order (pre-filter).
    entries: Vec<Entry<T>>,
    filter: FilterEngine<T>,
    /// Visible position -> index into `entries`.
    visible: Vec<usize>,
    /// Memoised uid per item instance id.
    uid_by_item: HashMap<u64, String>,
    /// Uids currently in use (collision disambiguation).
    uid_set: HashSet<String>,
    /// Property name -> number of active sort handlers declaring it.
    important: HashMap<String, usize>,
    /// False while the source is in silent mode.
    source_synchronized: bool,
    /// Per-item changes deferred while the source is silent.
    pending: Vec<ItemChange<T>>,
    /// Cursor position, `-1` = before the first item.
    cursor: isize,
    /// Whether sessions diff observable state.
    analyze: bool,
    /// Set when mutations were processed without analysis; the next
    /// analysed mutation rebuilds from scratch.
    needs_rebuild: bool,
    options: ViewOptions,
}

impl<T: Record> CoreState<T> {
    fn new(options: ViewOptions) -> Self {
        Self {
            pipeline: Pipeline::standard(options.unique, options.id_property.clone()),
            entries: Vec::new(),
            filter: FilterEngine::new(),
            visible: Vec::new(),
            uid_by_item: HashMap::new(),
            uid_set: HashSet::new(),
            important: HashMap::new(),
            source_synchronized: true,
            pending: Vec::new(),
            cursor: -1,
            analyze: true,
            needs_rebuild: false,
            options,
        }
    }

    /// Re-materialises `entries` from the pipeline, re-binding owners for
    /// new items and releasing bookkeeping for vanished ones.
    fn refresh(&mut self, view_id: u64) {
        let new_entries = self.pipeline.items().to_vec();
        let live: HashSet<u64> = new_entries.iter().map(|e| e.item.instance_id()).collect();
        for entry in &self.entries {
            let id = entry.item.instance_id();
            if !live.contains(&id) {
                entry.item.clear_owner();
                if let Some(uid) = self.uid_by_item.remove(&id) {
                    self.uid_set.remove(&uid);
                }
            }
        }
        for entry in &new_entries {
            if entry.item.owner_id() != view_id {
                entry.item.bind_owner(view_id);
            }
        }
        self.entries = new_entries;
        self.filter.prune(&self.entries);
    }

    /// Rebuilds the visible map (sort map) from the filter decisions.
    fn rebuild_visible(&mut self) {
        self.visible = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| self.filter.is_visible(e.item.instance_id()))
            .map(|(index, _)| index)
            .collect();
    }

    fn refilter(&mut self, hint: RefilterHint) {
        if !self.filter.is_active() {
            self.filter.clear_decisions();
            return;
        }
        match hint {
            RefilterHint::Full => {
                self.filter.run_full(&self.entries);
            }
            RefilterHint::Range(start, count) => {
                if self.filter.uses_index() {
                    self.filter.run_full(&self.entries);
                } else {
                    self.filter.run_range(&self.entries, start, count);
                }
            }
        }
    }

    /// Discards everything and re-materialises from the source.
    fn full_reload(&mut self, source: &dyn SourceList<T>, view_id: u64) {
        let _span = vantage_core::PerfSpan::new("projection_full_reload");
        let mut records = Vec::with_capacity(source.len());
        source.for_each(&mut |value| records.push(value.clone()));
        for entry in &self.entries {
            entry.item.clear_owner();
        }
        self.entries.clear();
        self.uid_by_item.clear();
        self.uid_set.clear();
        self.filter.clear_decisions();
        self.pipeline.reset();
        self.pipeline.assign(records);
        self.refresh(view_id);
        self.refilter(RefilterHint::Full);
        self.rebuild_visible();
        self.needs_rebuild = false;
    }

    fn visible_items(&self) -> Vec<ItemRef<T>> {
        self.visible
            .iter()
            .map(|&index| self.entries[index].item.clone())
            .collect()
    }

    fn visible_snapshot(&self) -> Vec<(u64, bool)> {
        self.visible
            .iter()
            .map(|&index| {
                let item = &self.entries[index].item;
                (item.instance_id(), item.is_selected())
            })
            .collect()
    }

    fn visible_item(&self, position: usize) -> Option<ItemRef<T>> {
        self.visible
            .get(position)
            .map(|&index| self.entries[index].item.clone())
    }

    /// Visible position of the entry at pre-filter display index `display`.
    fn visible_rank_of_display(&self, display: usize) -> Option<usize> {
        self.visible.binary_search(&display).ok()
    }

    fn visible_rank_of_id(&self, instance_id: u64) -> Option<usize> {
        self.visible.iter().position(|&index| {
            self.entries[index].item.instance_id() == instance_id
        })
    }

    /// Visible position and item for a source index, if the item survived
    /// dedup and the filter.
    fn visible_pos_of_source(&mut self, source_index: usize) -> Option<(usize, ItemRef<T>)> {
        let display = self.pipeline.display_index(source_index)?;
        let rank = self.visible_rank_of_display(display)?;
        Some((rank, self.entries[display].item.clone()))
    }

    fn current_tuple(&self) -> Option<(u64, ItemRef<T>, isize)> {
        if self.cursor < 0 {
            return None;
        }
        let item = self.visible_item(self.cursor as usize)?;
        Some((item.instance_id(), item, self.cursor))
    }

    /// Re-anchors the cursor after a structural change: it follows the
    /// current item when the item survived, otherwise it clamps and the
    /// caller announces the change.
    fn fix_cursor(&mut self, previous: Option<(u64, ItemRef<T>, isize)>) -> Option<CurrentChange<T>> {
        let max = self.visible.len() as isize - 1;
        let Some((id, old_item, old_position)) = previous else {
            self.cursor = self.cursor.clamp(-1, max.max(-1));
            return None;
        };
        if let Some(rank) = self.visible_rank_of_id(id) {
            self.cursor = rank as isize;
            return None;
        }
        self.cursor = old_position.clamp(-1, max.max(-1));
        let new_item = if self.cursor >= 0 {
            self.visible_item(self.cursor as usize)
        } else {
            None
        };
        Some(CurrentChange {
            new_item,
            old_item: Some(old_item),
            new_position: self.cursor,
            old_position,
        })
    }

    /// Adjusts the important-properties refcounts when the sort handler
    /// chain changes.
    fn swap_important(&mut self, removed: &[SortSpec<T>], added: &[SortSpec<T>]) {
        for spec in removed {
            for property in spec.properties() {
                if let Some(count) = self.important.get_mut(property) {
                    *count -= 1;
                    if *count == 0 {
                        self.important.remove(property);
                    }
                }
            }
        }
        for spec in added {
            for property in spec.properties() {
                *self.important.entry(property.clone()).or_insert(0) += 1;
            }
        }
    }
}

/// Shared innards of a projection view; handlers and cursors hold this.
pub(crate) struct ViewCore<T: Record> {
    pub(crate) id: u64,
    pub(crate) source: Arc<dyn SourceList<T>>,
    pub(crate) signals: ViewSignals<T>,
    pub(crate) state: RwLock<CoreState<T>>,
    pub(crate) destroyed: AtomicBool,
    conns: Mutex<SourceConnections>,
}

impl<T: Record> ViewCore<T> {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Read helpers shared with the cursor
    // -------------------------------------------------------------------------

    pub(crate) fn visible_count(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        self.state.read().visible.len()
    }

    pub(crate) fn visible_item(&self, position: usize) -> Option<ItemRef<T>> {
        if self.is_destroyed() {
            return None;
        }
        self.state.read().visible_item(position)
    }

    pub(crate) fn visible_rank_of_id(&self, instance_id: u64) -> Option<usize> {
        if self.is_destroyed() {
            return None;
        }
        self.state.read().visible_rank_of_id(instance_id)
    }

    pub(crate) fn index_by_value(&self, property: &str, value: &FieldValue) -> Option<usize> {
        if self.is_destroyed() {
            return None;
        }
        let st = self.state.read();
        st.visible.iter().enumerate().find_map(|(rank, &index)| {
            st.entries[index]
                .item
                .with_record(|record| record.field(property) == *value)
                .unwrap_or(false)
                .then_some(rank)
        })
    }

    pub(crate) fn visible_rank_of_source(&self, source_index: usize) -> Option<usize> {
        if self.is_destroyed() {
            return None;
        }
        let mut st = self.state.write();
        st.visible_pos_of_source(source_index).map(|(rank, _)| rank)
    }

    pub(crate) fn source_index_of_rank(&self, position: usize) -> Option<usize> {
        if self.is_destroyed() {
            return None;
        }
        let st = self.state.read();
        let &index = st.visible.get(position)?;
        st.entries[index].source_index
    }

    // -------------------------------------------------------------------------
    // Event emission
    // -------------------------------------------------------------------------

    /// Delivers one session's packets: `before`, each packet, `after`, then
    /// any cursor change. Never called with a state lock held.
    fn emit_packets(&self, packets: Vec<ChangePacket<T>>, current: Option<CurrentChange<T>>) {
        if !packets.is_empty() {
            self.signals.before_change.emit(());
            for packet in packets {
                self.signals.changed.emit(packet);
            }
            self.signals.after_change.emit(());
        }
        if let Some(change) = current {
            self.signals.current_changed.emit(change);
        }
    }

    /// Splits packets per group when grouping is active.
    fn group_split(
        packets: Vec<ChangePacket<T>>,
        group_fn: Option<GroupFn<T>>,
    ) -> Vec<ChangePacket<T>> {
        let Some(group_fn) = group_fn else {
            return packets;
        };
        let group_of = move |item: &ItemRef<T>| -> FieldValue {
            match item.group_id() {
                Some(id) => id,
                None => item
                    .with_record(|record| group_fn(record))
                    .unwrap_or(FieldValue::None),
            }
        };
        split_by_group(packets, &group_of)
    }

    // -------------------------------------------------------------------------
    // Source event adapter
    // -------------------------------------------------------------------------

    fn on_source_change(core: &Arc<Self>, change: &ListChange<T>) {
        if core.is_destroyed() {
            return;
        }
        let mut packets: Vec<ChangePacket<T>> = Vec::new();
        let mut current: Option<CurrentChange<T>> = None;
        {
            let mut st = core.state.write();
            if !st.source_synchronized {
                st.needs_rebuild = true;
                return;
            }
            if st.needs_rebuild && st.analyze {
                st.full_reload(core.source.as_ref(), core.id);
                packets.push(ChangePacket::reset(st.visible_items()));
                current = st.fix_cursor(None);
                drop(st);
                core.emit_packets(packets, current);
                return;
            }

            let session = UpdateSession::open(&st.visible_snapshot(), st.analyze);
            let previous_current = st.current_tuple();

            match change.action {
                ListAction::Reset => {
                    st.full_reload(core.source.as_ref(), core.id);
                    packets.push(ChangePacket::reset(st.visible_items()));
                }
                ListAction::Add => {
                    st.pipeline
                        .splice(change.new_index, 0, change.new_items.clone());
                    st.refresh(core.id);
                    Self::refilter_span(
                        &mut st,
                        change.new_index..change.new_index + change.new_items.len(),
                    );
                    st.rebuild_visible();
                    let added = Self::collect_source_range(
                        &mut st,
                        change.new_index..change.new_index + change.new_items.len(),
                    );
                    packets.extend(packets_from_positions(ListAction::Add, added));
                }
                ListAction::Remove => {
                    let removed = Self::collect_source_range(
                        &mut st,
                        change.old_index..change.old_index + change.old_items.len(),
                    );
                    st.pipeline
                        .splice(change.old_index, change.old_items.len(), Vec::new());
                    st.refresh(core.id);
                    st.refilter(RefilterHint::Full);
                    st.rebuild_visible();
                    packets.extend(packets_from_positions(ListAction::Remove, removed));
                }
                ListAction::Replace => {
                    let old = Self::collect_source_range(
                        &mut st,
                        change.old_index..change.old_index + change.old_items.len(),
                    );
                    st.pipeline.splice(
                        change.old_index,
                        change.old_items.len(),
                        change.new_items.clone(),
                    );
                    st.refresh(core.id);
                    Self::refilter_span(
                        &mut st,
                        change.old_index..change.old_index + change.new_items.len(),
                    );
                    st.rebuild_visible();
                    let new = Self::collect_source_range(
                        &mut st,
                        change.old_index..change.old_index + change.new_items.len(),
                    );
                    let aligned = old.len() == new.len()
                        && old.iter().zip(new.iter()).all(|(a, b)| a.0 == b.0);
                    if aligned {
                        for ((position, old_item), (_, new_item)) in
                            old.into_iter().zip(new.into_iter())
                        {
                            packets.push(ChangePacket::replace(
                                vec![old_item],
                                vec![new_item],
                                position,
                            ));
                        }
                    } else {
                        packets.extend(packets_from_positions(ListAction::Remove, old));
                        packets.extend(packets_from_positions(ListAction::Add, new));
                    }
                }
                ListAction::Move => {
                    let count = change.new_items.len().max(1);
                    let old = Self::collect_source_range(
                        &mut st,
                        change.old_index..change.old_index + count,
                    );
                    st.pipeline.move_range(change.old_index, count, change.new_index);
                    st.refresh(core.id);
                    st.refilter(RefilterHint::Full);
                    st.rebuild_visible();
                    let new = Self::collect_source_range(
                        &mut st,
                        change.new_index..change.new_index + count,
                    );
                    packets.extend(Self::move_packets(old, new));
                }
                ListAction::Change => {
                    for (offset, value) in change.new_items.iter().enumerate() {
                        Self::apply_item_change(
                            &mut st,
                            core.id,
                            change.new_index + offset,
                            value.clone(),
                            &[],
                            &mut packets,
                        );
                    }
                }
            }

            packets.extend(session.close(&st.visible_items()));
            packets = Self::group_split(packets, st.pipeline.group_fn());
            current = st.fix_cursor(previous_current);
        }
        core.emit_packets(packets, current);
    }

    /// Visible `(rank, item)` pairs for a source-index range, rank-sorted
    /// per the caller's needs.
    fn collect_source_range(
        st: &mut CoreState<T>,
        range: std::ops::Range<usize>,
    ) -> Vec<(usize, ItemRef<T>)> {
        let mut collected: Vec<(usize, ItemRef<T>)> = range
            .filter_map(|source_index| st.visible_pos_of_source(source_index))
            .collect();
        collected.sort_by_key(|&(rank, _)| rank);
        collected
    }

    /// Pairs each moved item's pre-move rank with its post-move rank and
    /// batches contiguous runs into one packet each, so every packet
    /// carries the correct `old_index` for the items it holds. Items that
    /// gained or lost visibility across the move surface as add/remove
    /// packets instead.
    fn move_packets(
        old: Vec<(usize, ItemRef<T>)>,
        new: Vec<(usize, ItemRef<T>)>,
    ) -> Vec<ChangePacket<T>> {
        let old_rank_by_id: HashMap<u64, usize> = old
            .iter()
            .map(|(rank, item)| (item.instance_id(), *rank))
            .collect();
        let new_ids: HashSet<u64> = new.iter().map(|(_, item)| item.instance_id()).collect();

        let mut packets: Vec<ChangePacket<T>> = Vec::new();
        let mut appeared: Vec<(usize, ItemRef<T>)> = Vec::new();
        for (new_rank, item) in new {
            let Some(&old_rank) = old_rank_by_id.get(&item.instance_id()) else {
                appeared.push((new_rank, item));
                continue;
            };
            if old_rank == new_rank {
                continue;
            }
            match packets.last_mut() {
                Some(last)
                    if last.action == ListAction::Move
                        && last.old_index.map(|i| i + last.old_items.len())
                            == Some(old_rank)
                        && last.new_index.map(|i| i + last.new_items.len())
                            == Some(new_rank) =>
                {
                    last.old_items.push(item.clone());
                    last.new_items.push(item);
                }
                _ => packets.push(ChangePacket::moved(vec![item], old_rank, new_rank)),
            }
        }
        let vanished: Vec<(usize, ItemRef<T>)> = old
            .into_iter()
            .filter(|(_, item)| !new_ids.contains(&item.instance_id()))
            .collect();
        packets.extend(packets_from_positions(ListAction::Add, appeared));
        packets.extend(packets_from_positions(ListAction::Remove, vanished));
        packets
    }

    /// Range refilter over the display span covered by a source range.
    fn refilter_span(st: &mut CoreState<T>, range: std::ops::Range<usize>) {
        let mut lo = usize::MAX;
        let mut hi = 0usize;
        for source_index in range {
            if let Some(display) = st.pipeline.display_index(source_index) {
                lo = lo.min(display);
                hi = hi.max(display + 1);
            }
        }
        if lo == usize::MAX {
            // Nothing surfaced (all elided); group headers cannot have
            // changed either.
            return;
        }
        st.refilter(RefilterHint::Range(lo, hi - lo));
    }

    /// The per-item change protocol: decides whether a source item change
    /// becomes a `change`, a `move`, or both.
    fn apply_item_change(
        st: &mut CoreState<T>,
        view_id: u64,
        source_index: usize,
        value: T,
        properties: &[String],
        packets: &mut Vec<ChangePacket<T>>,
    ) {
        let Some(item) = st.pipeline.item_at_source(source_index) else {
            return;
        };
        let old_position = st
            .pipeline
            .display_index(source_index)
            .and_then(|display| st.visible_rank_of_display(display));

        let important = properties.is_empty()
            || properties
                .iter()
                .any(|property| st.important.contains_key(property));

        st.pipeline.update_value(source_index, value, important);
        st.refresh(view_id);
        if important {
            st.refilter(RefilterHint::Full);
        } else {
            Self::refilter_span(st, source_index..source_index + 1);
        }
        st.rebuild_visible();

        let new_position = st
            .pipeline
            .display_index(source_index)
            .and_then(|display| st.visible_rank_of_display(display));

        match (old_position, new_position) {
            (Some(old), Some(new)) if new < old => {
                // Moved upward: the move packet covers the change too.
                packets.push(ChangePacket::moved(vec![item], old, new));
            }
            (Some(old), Some(new)) if new > old => {
                packets.push(ChangePacket::moved(vec![item.clone()], old, new));
                packets.push(ChangePacket::change(vec![item], new));
            }
            (Some(_), Some(new)) => {
                packets.push(ChangePacket::change(vec![item], new));
            }
            (Some(old), None) => {
                packets.push(ChangePacket::remove(vec![item], old));
            }
            (None, Some(new)) => {
                packets.push(ChangePacket::add(vec![item], new));
            }
            (None, None) => {}
        }
    }

    fn on_item_change(core: &Arc<Self>, change: &ItemChange<T>) {
        if core.is_destroyed() {
            return;
        }
        let mut packets: Vec<ChangePacket<T>> = Vec::new();
        let current;
        {
            let mut st = core.state.write();
            if !st.source_synchronized {
                st.pending.push(change.clone());
                return;
            }
            let session = UpdateSession::open(&st.visible_snapshot(), st.analyze);
            let previous_current = st.current_tuple();
            Self::apply_item_change(
                &mut st,
                core.id,
                change.index,
                change.item.clone(),
                &change.properties,
                &mut packets,
            );
            packets.extend(session.close(&st.visible_items()));
            packets = Self::group_split(packets, st.pipeline.group_fn());
            current = st.fix_cursor(previous_current);
        }
        core.emit_packets(packets, current);
    }

    fn on_raising_change(core: &Arc<Self>, raising: &RaisingChange) {
        if core.is_destroyed() {
            return;
        }
        let mut packets: Vec<ChangePacket<T>> = Vec::new();
        let mut current: Option<CurrentChange<T>> = None;
        let pending;
        {
            let mut st = core.state.write();
            st.analyze = raising.analyze;
            if !raising.enabled {
                st.source_synchronized = false;
                return;
            }
            st.source_synchronized = true;
            if raising.analyze {
                let previous_current = st.current_tuple();
                st.full_reload(core.source.as_ref(), core.id);
                packets.push(ChangePacket::reset(st.visible_items()));
                current = st.fix_cursor(previous_current);
            } else {
                st.needs_rebuild = true;
            }
            pending = std::mem::take(&mut st.pending);
        }
        core.emit_packets(packets, current);
        // Replay deferred per-item notifications in arrival order.
        for change in pending {
            Self::on_item_change(core, &change);
        }
    }

    fn destroy(core: &Arc<Self>) {
        if core.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(target: "vantage::view", view_id = core.id, "destroying view");
        if let Some(signals) = core.source.signals() {
            let conns = std::mem::take(&mut *core.conns.lock());
            if let Some(id) = conns.collection {
                signals.collection_changed.disconnect(id);
            }
            if let Some(id) = conns.item {
                signals.item_changed.disconnect(id);
            }
            if let Some(id) = conns.raising {
                signals.raising_changed.disconnect(id);
            }
        }
        {
            let mut st = core.state.write();
            for entry in &st.entries {
                entry.item.clear_owner();
            }
            st.pipeline.reset();
            st.entries.clear();
            st.visible.clear();
            st.uid_by_item.clear();
            st.uid_set.clear();
            st.pending.clear();
            st.cursor = -1;
        }
        core.signals.before_change.disconnect_all();
        core.signals.changed.disconnect_all();
        core.signals.after_change.disconnect_all();
        core.signals.current_changed.disconnect_all();
    }
}

/// Builder for [`ProjectionView`]; validates the source at build time.
pub struct ProjectionViewBuilder<T: Record> {
    source: Option<Arc<dyn SourceList<T>>>,
    options: ViewOptions,
}

impl<T: Record> Default for ProjectionViewBuilder<T> {
    fn default() -> Self {
        Self {
            source: None,
            options: ViewOptions::default(),
        }
    }
}

impl<T: Record> ProjectionViewBuilder<T> {
    /// Sets the source collection.
    pub fn source(mut self, source: Arc<dyn SourceList<T>>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the id property used for unique-id extraction.
    pub fn id_property(mut self, name: impl Into<String>) -> Self {
        self.options.id_property = Some(name.into());
        self
    }

    /// Enables uniqueness enforcement.
    pub fn unique(mut self, unique: bool) -> Self {
        self.options.unique = unique;
        self
    }

    /// Builds the view.
    ///
    /// Fails with [`ViewError::MissingSource`] when no source was supplied
    /// and with [`ViewError::BadSource`] when the source's reported length
    /// disagrees with its enumeration.
    pub fn build(self) -> ViewResult<ProjectionView<T>> {
        let source = self.source.ok_or(ViewError::MissingSource)?;
        ProjectionView::with_options(source, self.options)
    }
}

/// A live, read-only projection over a mutable source collection.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vantage::{FilterSpec, ProjectionView, SortSide, SortSpec, VecSource};
///
/// let source = Arc::new(VecSource::new(vec![
///     "cherry".to_string(),
///     "apple".to_string(),
///     "banana".to_string(),
/// ]));
///
/// let view = ProjectionView::new(source.clone()).unwrap();
/// view.set_sort(vec![SortSpec::new(|a: &SortSide<'_, String>, b| a.record.cmp(b.record))]).unwrap();
/// assert_eq!(view.at(0).unwrap().record().as_deref(), Some("apple"));
///
/// // The projection follows source mutations.
/// source.push("apricot".to_string());
/// assert_eq!(view.at(1).unwrap().record().as_deref(), Some("apricot"));
/// ```
pub struct ProjectionView<T: Record> {
    core: Arc<ViewCore<T>>,
}

impl<T: Record> ProjectionView<T> {
    /// Creates a projection over `source` with default options.
    pub fn new(source: Arc<dyn SourceList<T>>) -> ViewResult<Self> {
        Self::with_options(source, ViewOptions::default())
    }

    /// Creates a projection over `source` with the given options.
    pub fn with_options(
        source: Arc<dyn SourceList<T>>,
        options: ViewOptions,
    ) -> ViewResult<Self> {
        let mut enumerated = 0usize;
        source.for_each(&mut |_| enumerated += 1);
        let reported = source.len();
        if enumerated != reported {
            return Err(ViewError::BadSource(format!(
                "len() reports {reported} items but enumeration yields {enumerated}"
            )));
        }

        let core = Arc::new(ViewCore {
            id: VIEW_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            source,
            signals: ViewSignals::new(),
            state: RwLock::new(CoreState::new(options)),
            destroyed: AtomicBool::new(false),
            conns: Mutex::new(SourceConnections::default()),
        });

        core.state.write().full_reload(core.source.as_ref(), core.id);

        if let Some(signals) = core.source.signals() {
            let weak = Arc::downgrade(&core);
            let collection = signals.collection_changed.connect(move |change| {
                if let Some(core) = weak.upgrade() {
                    ViewCore::on_source_change(&core, change);
                }
            });
            let weak = Arc::downgrade(&core);
            let item = signals.item_changed.connect(move |change| {
                if let Some(core) = weak.upgrade() {
                    ViewCore::on_item_change(&core, change);
                }
            });
            let weak = Arc::downgrade(&core);
            let raising = signals.raising_changed.connect(move |raising| {
                if let Some(core) = weak.upgrade() {
                    ViewCore::on_raising_change(&core, raising);
                }
            });
            *core.conns.lock() = SourceConnections {
                collection: Some(collection),
                item: Some(item),
                raising: Some(raising),
            };
        }

        tracing::debug!(target: "vantage::view", view_id = core.id, "view created");
        Ok(Self { core })
    }

    /// Starts a builder.
    pub fn builder() -> ProjectionViewBuilder<T> {
        ProjectionViewBuilder::default()
    }

    fn guard(&self) -> ViewResult<()> {
        if self.core.is_destroyed() {
            Err(ViewError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// The view's signals.
    pub fn signals(&self) -> &ViewSignals<T> {
        &self.core.signals
    }

    /// The source collection this view projects.
    pub fn source(&self) -> &Arc<dyn SourceList<T>> {
        &self.core.source
    }

    /// Whether the view has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Unsubscribes from the source and drops all projection state.
    /// Idempotent; further fallible operations return `Destroyed`.
    pub fn destroy(&self) {
        ViewCore::destroy(&self.core);
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    /// Number of visible items (group headers included).
    pub fn visible_count(&self) -> usize {
        self.core.visible_count()
    }

    /// Number of materialised items before filtering.
    pub fn total_count(&self) -> usize {
        if self.core.is_destroyed() {
            return 0;
        }
        self.core.state.read().entries.len()
    }

    /// The visible item at `position`.
    pub fn at(&self, position: usize) -> Option<ItemRef<T>> {
        self.core.visible_item(position)
    }

    /// Calls `f` for every visible item in order.
    pub fn for_each(&self, mut f: impl FnMut(&ItemRef<T>)) {
        if self.core.is_destroyed() {
            return;
        }
        let items = self.core.state.read().visible_items();
        for item in &items {
            f(item);
        }
    }

    /// A fresh traversal cursor, independent of the view's own.
    pub fn enumerator(&self) -> ViewCursor<T> {
        ViewCursor::new(self.core.clone())
    }

    /// The first visible data item (group headers skipped).
    pub fn first(&self) -> Option<ItemRef<T>> {
        self.nth_data_from(0, 1)
    }

    /// The last visible data item (group headers skipped).
    pub fn last(&self) -> Option<ItemRef<T>> {
        self.nth_data_from(self.visible_count() as isize - 1, -1)
    }

    /// The next visible data item after `item`.
    pub fn next_item(&self, item: &ItemRef<T>) -> Option<ItemRef<T>> {
        let position = self.core.visible_rank_of_id(item.instance_id())?;
        self.nth_data_from(position as isize + 1, 1)
    }

    /// The previous visible data item before `item`.
    pub fn previous_item(&self, item: &ItemRef<T>) -> Option<ItemRef<T>> {
        let position = self.core.visible_rank_of_id(item.instance_id())?;
        self.nth_data_from(position as isize - 1, -1)
    }

    fn nth_data_from(&self, start: isize, step: isize) -> Option<ItemRef<T>> {
        let count = self.visible_count() as isize;
        let mut position = start;
        while position >= 0 && position < count {
            if let Some(item) = self.at(position as usize) {
                if !item.is_group() {
                    return Some(item);
                }
            }
            position += step;
        }
        None
    }

    // -------------------------------------------------------------------------
    // Cursor (observable current item)
    // -------------------------------------------------------------------------

    /// The current item, if the cursor points at one.
    pub fn current(&self) -> Option<ItemRef<T>> {
        if self.core.is_destroyed() {
            return None;
        }
        let st = self.core.state.read();
        if st.cursor < 0 {
            return None;
        }
        st.visible_item(st.cursor as usize)
    }

    /// The cursor position (`-1` = before the first item).
    pub fn current_position(&self) -> isize {
        if self.core.is_destroyed() {
            return -1;
        }
        self.core.state.read().cursor
    }

    /// Moves the cursor to `item`. Returns `false` when the item is not
    /// visible in this projection.
    pub fn set_current(&self, item: &ItemRef<T>) -> ViewResult<bool> {
        self.guard()?;
        match self.core.visible_rank_of_id(item.instance_id()) {
            Some(rank) => {
                self.move_cursor(rank as isize)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves the cursor to `position`, clamped to `[-1, visible_count)`.
    pub fn set_current_position(&self, position: isize) -> ViewResult<()> {
        self.guard()?;
        self.move_cursor(position)
    }

    /// Cursor to the first visible item. Returns `false` on an empty view.
    pub fn move_to_first(&self) -> ViewResult<bool> {
        self.guard()?;
        if self.visible_count() == 0 {
            return Ok(false);
        }
        self.move_cursor(0)?;
        Ok(true)
    }

    /// Cursor to the last visible item. Returns `false` on an empty view.
    pub fn move_to_last(&self) -> ViewResult<bool> {
        self.guard()?;
        let count = self.visible_count();
        if count == 0 {
            return Ok(false);
        }
        self.move_cursor(count as isize - 1)?;
        Ok(true)
    }

    /// Cursor one step forward. Returns `false` at the end.
    pub fn move_to_next(&self) -> ViewResult<bool> {
        self.guard()?;
        let position = self.current_position() + 1;
        if position >= self.visible_count() as isize {
            return Ok(false);
        }
        self.move_cursor(position)?;
        Ok(true)
    }

    /// Cursor one step back. Returns `false` at the front.
    pub fn move_to_previous(&self) -> ViewResult<bool> {
        self.guard()?;
        let position = self.current_position() - 1;
        if position < 0 {
            self.move_cursor(-1)?;
            return Ok(false);
        }
        self.move_cursor(position)?;
        Ok(true)
    }

    fn move_cursor(&self, position: isize) -> ViewResult<()> {
        let change = {
            let mut st = self.core.state.write();
            let max = st.visible.len() as isize - 1;
            let position = position.clamp(-1, max.max(-1));
            let old_position = st.cursor;
            if position == old_position {
                None
            } else {
                let old_item = if old_position >= 0 {
                    st.visible_item(old_position as usize)
                } else {
                    None
                };
                st.cursor = position;
                let new_item = if position >= 0 {
                    st.visible_item(position as usize)
                } else {
                    None
                };
                Some(CurrentChange {
                    new_item,
                    old_item,
                    new_position: position,
                    old_position,
                })
            }
        };
        if let Some(change) = change {
            self.core.signals.current_changed.emit(change);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Coordinate queries (unknown mappings return None, never errors)
    // -------------------------------------------------------------------------

    /// Visible position of `item`.
    pub fn index_of(&self, item: &ItemRef<T>) -> Option<usize> {
        self.core.visible_rank_of_id(item.instance_id())
    }

    /// Source index of the visible item at `position`.
    pub fn source_index_by_index(&self, position: usize) -> Option<usize> {
        self.core.source_index_of_rank(position)
    }

    /// Source index of `item`.
    pub fn source_index_by_item(&self, item: &ItemRef<T>) -> Option<usize> {
        if self.core.is_destroyed() {
            return None;
        }
        let st = self.core.state.read();
        st.entries
            .iter()
            .find(|entry| entry.item.instance_id() == item.instance_id())
            .and_then(|entry| entry.source_index)
    }

    /// Visible position of the item projected from source `index`.
    pub fn index_by_source_index(&self, index: usize) -> Option<usize> {
        self.core.visible_rank_of_source(index)
    }

    /// Visible position of the item projected from the first source item
    /// equal to `value`.
    pub fn index_by_source_item(&self, value: &T) -> Option<usize> {
        let source_index = self.source_index_of_value(value)?;
        self.core.visible_rank_of_source(source_index)
    }

    /// The projection item for source `index`, if one was materialised.
    pub fn item_by_source_index(&self, index: usize) -> Option<ItemRef<T>> {
        if self.core.is_destroyed() {
            return None;
        }
        let mut st = self.core.state.write();
        st.pipeline.display_index(index)?;
        st.pipeline.item_at_source(index)
    }

    /// The projection item for the first source item equal to `value`.
    pub fn item_by_source_item(&self, value: &T) -> Option<ItemRef<T>> {
        let source_index = self.source_index_of_value(value)?;
        self.item_by_source_index(source_index)
    }

    fn source_index_of_value(&self, value: &T) -> Option<usize> {
        if self.core.is_destroyed() {
            return None;
        }
        let st = self.core.state.read();
        (0..st.pipeline.source_len())
            .find(|&index| st.pipeline.source_value(index).as_ref() == Some(value))
    }

    // -------------------------------------------------------------------------
    // Filter
    // -------------------------------------------------------------------------

    /// Snapshot of the active filter chain.
    pub fn filter(&self) -> Vec<FilterSpec<T>> {
        if self.core.is_destroyed() {
            return Vec::new();
        }
        self.core.state.read().filter.filters()
    }

    /// Replaces the filter chain. A chain element-wise equal to the current
    /// one is a no-op and emits nothing.
    pub fn set_filter(&self, filters: Vec<FilterSpec<T>>) -> ViewResult<()> {
        self.guard()?;
        self.reproject(|st| st.filter.set_filters(filters))
    }

    /// Inserts a filter, at `position` or at the end.
    pub fn add_filter(&self, filter: FilterSpec<T>, position: Option<usize>) -> ViewResult<()> {
        self.guard()?;
        self.reproject(|st| {
            st.filter.add_filter(filter, position);
            true
        })
    }

    /// Removes a filter by reference identity. Returns `true` on removal.
    pub fn remove_filter(&self, filter: &FilterSpec<T>) -> ViewResult<bool> {
        self.guard()?;
        let mut removed = false;
        self.reproject(|st| {
            removed = st.filter.remove_filter(filter);
            removed
        })?;
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Sort
    // -------------------------------------------------------------------------

    /// Snapshot of the active sort handler chain.
    pub fn sort(&self) -> Vec<SortSpec<T>> {
        if self.core.is_destroyed() {
            return Vec::new();
        }
        self.core.state.read().pipeline.sort_specs()
    }

    /// Replaces the sort handler chain. A chain element-wise equal to the
    /// current one is a no-op and emits nothing.
    pub fn set_sort(&self, specs: Vec<SortSpec<T>>) -> ViewResult<()> {
        self.guard()?;
        self.reproject(|st| {
            let current = st.pipeline.sort_specs();
            let unchanged = current.len() == specs.len()
                && current.iter().zip(specs.iter()).all(|(a, b)| a.same_as(b));
            if unchanged {
                return false;
            }
            st.swap_important(&current, &specs);
            st.pipeline.set_sort_specs(specs);
            true
        })
    }

    /// Inserts a sort handler, at `position` or at the end.
    pub fn add_sort(&self, spec: SortSpec<T>, position: Option<usize>) -> ViewResult<()> {
        self.guard()?;
        let mut specs = self.sort();
        let at = position.unwrap_or(specs.len()).min(specs.len());
        specs.insert(at, spec);
        self.reproject(move |st| {
            let current = st.pipeline.sort_specs();
            st.swap_important(&current, &specs);
            st.pipeline.set_sort_specs(specs);
            true
        })
    }

    /// Removes a sort handler by reference identity. Returns `true` on
    /// removal.
    pub fn remove_sort(&self, spec: &SortSpec<T>) -> ViewResult<bool> {
        self.guard()?;
        let mut specs = self.sort();
        let before = specs.len();
        specs.retain(|candidate| !candidate.same_as(spec));
        if specs.len() == before {
            return Ok(false);
        }
        self.reproject(move |st| {
            let current = st.pipeline.sort_specs();
            st.swap_important(&current, &specs);
            st.pipeline.set_sort_specs(specs);
            true
        })?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Group
    // -------------------------------------------------------------------------

    /// The active group function, if any.
    pub fn group(&self) -> Option<GroupFn<T>> {
        if self.core.is_destroyed() {
            return None;
        }
        self.core.state.read().pipeline.group_fn()
    }

    /// Replaces the group function. Setting the same function again (by
    /// reference) is a no-op and emits nothing.
    pub fn set_group(&self, group_fn: Option<GroupFn<T>>) -> ViewResult<()> {
        self.guard()?;
        self.reproject(|st| {
            let current = st.pipeline.group_fn();
            let unchanged = match (&current, &group_fn) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if unchanged {
                return false;
            }
            st.pipeline.set_group_fn(group_fn);
            true
        })
    }

    /// The visible data items belonging to group `id`, in projection order.
    pub fn group_items(&self, id: &FieldValue) -> Vec<ItemRef<T>> {
        if self.core.is_destroyed() {
            return Vec::new();
        }
        let st = self.core.state.read();
        let Some(group_fn) = st.pipeline.group_fn() else {
            return Vec::new();
        };
        st.visible
            .iter()
            .filter_map(|&index| {
                let item = &st.entries[index].item;
                item.with_record(|record| group_fn(record) == *id)
                    .unwrap_or(false)
                    .then(|| item.clone())
            })
            .collect()
    }

    /// The group id of the visible item at `position`.
    pub fn group_by_index(&self, position: usize) -> Option<FieldValue> {
        if self.core.is_destroyed() {
            return None;
        }
        let st = self.core.state.read();
        let &index = st.visible.get(position)?;
        let item = &st.entries[index].item;
        match item.group_id() {
            Some(id) => Some(id),
            None => {
                let group_fn = st.pipeline.group_fn()?;
                item.with_record(|record| group_fn(record))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Uniqueness
    // -------------------------------------------------------------------------

    /// Whether duplicate-id elision is active.
    pub fn is_unique(&self) -> bool {
        if self.core.is_destroyed() {
            return false;
        }
        self.core.state.read().pipeline.is_unique()
    }

    /// Toggles duplicate-id elision.
    ///
    /// Enabling requires an id basis: either a configured `id_property` or
    /// records exposing a domain identity.
    pub fn set_unique(&self, unique: bool) -> ViewResult<()> {
        self.guard()?;
        if unique {
            let st = self.core.state.read();
            let has_basis = st.options.id_property.is_some()
                || st
                    .pipeline
                    .source_value(0)
                    .map(|value| !value.identity().is_none())
                    .unwrap_or(false);
            if !has_basis {
                return Err(ViewError::MissingIdProperty);
            }
        }
        self.reproject(|st| {
            if st.pipeline.is_unique() == unique {
                return false;
            }
            st.options.unique = unique;
            st.pipeline.set_unique(unique);
            true
        })
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// All selected data items, in projection order.
    pub fn selected_items(&self) -> Vec<ItemRef<T>> {
        if self.core.is_destroyed() {
            return Vec::new();
        }
        let st = self.core.state.read();
        st.entries
            .iter()
            .filter(|entry| !entry.item.is_group() && entry.item.is_selected())
            .map(|entry| entry.item.clone())
            .collect()
    }

    /// Sets the selection flag on the items projected from `values`.
    pub fn set_selected_items(&self, values: &[T], selected: bool) -> ViewResult<()> {
        self.guard()?;
        self.apply_selection(|entry| {
            entry
                .item
                .with_record(|record| values.contains(record))
                .unwrap_or(false)
                .then_some(selected)
        })
    }

    /// Sets the selection flag on every data item.
    pub fn set_selected_all(&self, selected: bool) -> ViewResult<()> {
        self.guard()?;
        self.apply_selection(|_| Some(selected))
    }

    /// Inverts the selection flag of every data item.
    pub fn invert_selected_all(&self) -> ViewResult<()> {
        self.guard()?;
        self.apply_selection(|entry| Some(!entry.item.is_selected()))
    }

    /// Applies a per-entry selection decision and emits replace packets
    /// over the affected visible slices.
    fn apply_selection(
        &self,
        decide: impl Fn(&Entry<T>) -> Option<bool>,
    ) -> ViewResult<()> {
        let (packets, group_fn) = {
            let st = self.core.state.read();
            let mut touched: Vec<(usize, ItemRef<T>)> = Vec::new();
            for (index, entry) in st.entries.iter().enumerate() {
                if entry.item.is_group() {
                    continue;
                }
                let Some(flag) = decide(entry) else {
                    continue;
                };
                // Hidden items change state too, but produce no packet.
                if entry.item.set_selected(flag) {
                    if let Ok(rank) = st.visible.binary_search(&index) {
                        touched.push((rank, entry.item.clone()));
                    }
                }
            }
            let mut packets: Vec<ChangePacket<T>> = Vec::new();
            for packet in packets_from_positions(ListAction::Change, touched) {
                packets.push(ChangePacket::replace(
                    packet.new_items.clone(),
                    packet.new_items,
                    packet.new_index.unwrap_or(0),
                ));
            }
            (packets, st.pipeline.group_fn())
        };
        let packets = ViewCore::group_split(packets, group_fn);
        self.core.emit_packets(packets, None);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mutation guard
    // -------------------------------------------------------------------------

    /// Always fails: the projection is read-only.
    pub fn assign(&self, _items: Vec<T>) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn append(&self, _item: T) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn prepend(&self, _item: T) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn clear(&self) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn add(&self, _item: T) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn remove(&self, _item: &T) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn remove_at(&self, _position: usize) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn replace(&self, _position: usize, _item: T) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    /// Always fails: the projection is read-only.
    pub fn move_item(&self, _from: usize, _to: usize) -> ViewResult<()> {
        self.guard()?;
        Err(ViewError::ReadOnly)
    }

    // -------------------------------------------------------------------------
    // External notification
    // -------------------------------------------------------------------------

    /// Announces that `item`'s source record changed the named properties
    /// out of band. Re-groups, re-sorts, and re-filters as required and
    /// emits the matching packets.
    pub fn notify_item_change(&self, item: &ItemRef<T>, properties: &[&str]) -> ViewResult<()> {
        self.guard()?;
        let source_index = {
            let st = self.core.state.read();
            (0..st.pipeline.source_len()).find(|&index| {
                st.pipeline
                    .item_at_source(index)
                    .map(|candidate| candidate.instance_id() == item.instance_id())
                    .unwrap_or(false)
            })
        };
        let Some(source_index) = source_index else {
            return Ok(());
        };
        let Some(value) = self.core.source.get(source_index) else {
            return Ok(());
        };
        let change = ItemChange {
            item: value,
            index: source_index,
            properties: properties.iter().map(|p| p.to_string()).collect(),
        };
        ViewCore::on_item_change(&self.core, &change);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Unique ids
    // -------------------------------------------------------------------------

    /// The projection-unique id string for `item`, memoised per item.
    ///
    /// The base id comes from the record's domain identity, else from the
    /// configured id property; collisions are resolved deterministically by
    /// appending `-1`, `-2`, ...
    pub fn item_uid(&self, item: &ItemRef<T>) -> ViewResult<String> {
        self.guard()?;
        let mut st = self.core.state.write();
        let id = item.instance_id();
        if let Some(uid) = st.uid_by_item.get(&id) {
            return Ok(uid.clone());
        }
        let base = match item.group_id() {
            Some(group) => format!("group:{group}"),
            None => {
                let record = item.record().ok_or(ViewError::MissingIdProperty)?;
                st.pipeline
                    .extract_uid(&record)
                    .ok_or(ViewError::MissingIdProperty)?
            }
        };
        let mut uid = base.clone();
        let mut suffix = 1;
        while st.uid_set.contains(&uid) {
            uid = format!("{base}-{suffix}");
            suffix += 1;
        }
        st.uid_set.insert(uid.clone());
        st.uid_by_item.insert(id, uid.clone());
        Ok(uid)
    }

    // -------------------------------------------------------------------------
    // Persisted state
    // -------------------------------------------------------------------------

    /// Snapshots construction options, cursor position, and per-item
    /// observable state.
    pub fn save_state(&self) -> ViewResult<ViewState> {
        self.guard()?;
        let st = self.core.state.read();
        Ok(ViewState {
            options: st.options.clone(),
            current_position: st.cursor as i64,
            items: st
                .entries
                .iter()
                .filter(|entry| !entry.item.is_group())
                .map(|entry| ItemState {
                    source_index: entry.source_index,
                    selected: entry.item.is_selected(),
                    version: entry.item.version(),
                })
                .collect(),
        })
    }

    /// Rehydrates a snapshot produced by [`save_state`](Self::save_state).
    ///
    /// The composer is restored first, items are re-resolved through the
    /// source by stored index, and owner back-references are re-bound.
    pub fn restore_state(&self, state: &ViewState) -> ViewResult<()> {
        self.guard()?;
        let (packets, current) = {
            let mut st = self.core.state.write();
            let source_len = self.core.source.len();
            for item_state in &state.items {
                if let Some(index) = item_state.source_index {
                    if index >= source_len {
                        return Err(ViewError::BadSource(format!(
                            "stored index {index} is outside the source (len {source_len})"
                        )));
                    }
                }
            }
            st.options = state.options.clone();
            st.pipeline.set_id_property(state.options.id_property.clone());
            st.pipeline.set_unique(state.options.unique);
            st.full_reload(self.core.source.as_ref(), self.core.id);
            for item_state in &state.items {
                let Some(index) = item_state.source_index else {
                    continue;
                };
                if let Some(item) = st.pipeline.item_at_source(index) {
                    item.restore_state(item_state.selected, item_state.version);
                }
            }
            let max = st.visible.len() as isize - 1;
            st.cursor = (state.current_position as isize).clamp(-1, max.max(-1));
            (vec![ChangePacket::reset(st.visible_items())], None)
        };
        self.core.emit_packets(packets, current);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Shared reprojection path for filter/sort/group/uniqueness changes
    // -------------------------------------------------------------------------

    /// Applies a projection-rule change and emits a reset packet when the
    /// rule actually changed. The closure returns `false` for no-ops.
    fn reproject(
        &self,
        apply: impl FnOnce(&mut CoreState<T>) -> bool,
    ) -> ViewResult<()> {
        let (packets, current) = {
            let mut st = self.core.state.write();
            if !apply(&mut st) {
                return Ok(());
            }
            let previous_current = st.current_tuple();
            st.pipeline.invalidate();
            st.refresh(self.core.id);
            st.refilter(RefilterHint::Full);
            st.rebuild_visible();
            let current = st.fix_cursor(previous_current);
            (vec![ChangePacket::reset(st.visible_items())], current)
        };
        self.core.emit_packets(packets, current);
        Ok(())
    }
}

impl<T: Record> Drop for ProjectionView<T> {
    fn drop(&mut self) {
        ViewCore::destroy(&self.core);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ViewItem;
    use crate::source::VecSource;

    #[derive(Clone, PartialEq, Debug)]
    struct Row {
        id: i64,
        name: String,
    }

    impl Record for Row {
        fn field(&self, name: &str) -> FieldValue {
            match name {
                "id" => FieldValue::Int(self.id),
                "name" => FieldValue::from(self.name.as_str()),
                _ => FieldValue::None,
            }
        }
    }

    fn row(id: i64, name: &str) -> Row {
        Row {
            id,
            name: name.to_string(),
        }
    }

    fn state_of(rows: Vec<Row>) -> CoreState<Row> {
        let mut st = CoreState::new(ViewOptions::default());
        st.pipeline.assign(rows);
        st.refresh(1);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();
        st
    }

    fn visible_ids(st: &CoreState<Row>) -> Vec<i64> {
        st.visible
            .iter()
            .filter_map(|&index| st.entries[index].item.with_record(|r| r.id))
            .collect()
    }

    #[test]
    fn test_refresh_binds_and_releases_owners() {
        let mut st = state_of(vec![row(1, "a"), row(2, "b")]);
        for entry in &st.entries {
            assert_eq!(entry.item.owner_id(), 1);
        }

        // Seed uid bookkeeping for the item about to vanish.
        let removed = st.entries[0].item.clone();
        st.uid_by_item.insert(removed.instance_id(), "u1".to_string());
        st.uid_set.insert("u1".to_string());

        st.pipeline.splice(0, 1, Vec::new());
        st.refresh(1);

        assert_eq!(removed.owner_id(), 0);
        assert!(st.uid_by_item.is_empty());
        assert!(!st.uid_set.contains("u1"));
        assert_eq!(st.entries.len(), 1);
        assert_eq!(st.entries[0].item.owner_id(), 1);
    }

    #[test]
    fn test_rebuild_visible_skips_hidden_decisions() {
        let mut st = state_of(vec![row(1, "a"), row(2, "b"), row(3, "c")]);
        st.filter.set_filters(vec![FilterSpec::new(|args| {
            args.record.map(|r: &Row| r.id != 2).unwrap_or(true)
        })]);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();
        assert_eq!(visible_ids(&st), vec![1, 3]);
    }

    #[test]
    fn test_fix_cursor_follows_surviving_item() {
        let mut st = state_of(vec![row(1, "b"), row(2, "a")]);
        st.cursor = 0; // id 1
        let previous = st.current_tuple();

        st.pipeline.set_sort_specs(vec![SortSpec::by_field("name")]);
        st.refresh(1);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();

        // The item survived; the cursor follows it silently.
        assert!(st.fix_cursor(previous).is_none());
        assert_eq!(st.cursor, 1);
        assert_eq!(visible_ids(&st), vec![2, 1]);
    }

    #[test]
    fn test_fix_cursor_clamps_when_current_vanishes() {
        let mut st = state_of(vec![row(1, "a"), row(2, "b")]);
        st.cursor = 1;
        let previous = st.current_tuple();

        st.pipeline.splice(1, 1, Vec::new());
        st.refresh(1);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();

        let Some(change) = st.fix_cursor(previous) else {
            panic!("expected a current-change for the vanished item");
        };
        assert_eq!(change.old_position, 1);
        assert_eq!(change.new_position, 0);
        assert_eq!(st.cursor, 0);
        assert_eq!(
            change.new_item.and_then(|i| i.with_record(|r| r.id)),
            Some(1)
        );
    }

    #[test]
    fn test_swap_important_refcounts() {
        let mut st = state_of(Vec::new());
        let a = SortSpec::<Row>::by_field("name");
        let b = SortSpec::<Row>::by_field("name");

        st.swap_important(&[], &[a.clone(), b.clone()]);
        assert!(st.important.contains_key("name"));

        // Two handlers declare the property; dropping one keeps it alive.
        st.swap_important(&[a], &[]);
        assert!(st.important.contains_key("name"));
        st.swap_important(&[b], &[]);
        assert!(!st.important.contains_key("name"));
    }

    #[test]
    fn test_apply_item_change_upward_move_only() {
        let mut st = state_of(vec![row(1, "b"), row(2, "c"), row(3, "a")]);
        let specs = vec![SortSpec::by_field("name")];
        st.swap_important(&[], &specs);
        st.pipeline.set_sort_specs(specs);
        st.refresh(1);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();
        assert_eq!(visible_ids(&st), vec![3, 1, 2]);

        let mut packets = Vec::new();
        ViewCore::apply_item_change(
            &mut st,
            1,
            1,
            row(2, "0"),
            &["name".to_string()],
            &mut packets,
        );

        assert_eq!(visible_ids(&st), vec![2, 3, 1]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].action, ListAction::Move);
        assert_eq!(packets[0].old_index, Some(2));
        assert_eq!(packets[0].new_index, Some(0));
    }

    #[test]
    fn test_apply_item_change_downward_move_keeps_change() {
        let mut st = state_of(vec![row(1, "a"), row(2, "b"), row(3, "c")]);
        let specs = vec![SortSpec::by_field("name")];
        st.swap_important(&[], &specs);
        st.pipeline.set_sort_specs(specs);
        st.refresh(1);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();

        let mut packets = Vec::new();
        ViewCore::apply_item_change(
            &mut st,
            1,
            0,
            row(1, "z"),
            &["name".to_string()],
            &mut packets,
        );

        assert_eq!(visible_ids(&st), vec![2, 3, 1]);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].action, ListAction::Move);
        assert_eq!(packets[0].old_index, Some(0));
        assert_eq!(packets[0].new_index, Some(2));
        assert_eq!(packets[1].action, ListAction::Change);
        assert_eq!(packets[1].new_index, Some(2));
    }

    #[test]
    fn test_apply_item_change_without_reorder_emits_change() {
        let mut st = state_of(vec![row(1, "a"), row(2, "b")]);

        let mut packets = Vec::new();
        // "name" is not declared important, so no re-analysis happens.
        ViewCore::apply_item_change(
            &mut st,
            1,
            0,
            row(1, "aa"),
            &["name".to_string()],
            &mut packets,
        );

        assert_eq!(visible_ids(&st), vec![1, 2]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].action, ListAction::Change);
        assert_eq!(packets[0].new_index, Some(0));
    }

    #[test]
    fn test_apply_item_change_filter_loss_emits_remove() {
        let mut st = state_of(vec![row(1, "a"), row(2, "b")]);
        st.filter.set_filters(vec![FilterSpec::new(|args| {
            args.record.map(|r: &Row| r.name != "x").unwrap_or(true)
        })]);
        st.refilter(RefilterHint::Full);
        st.rebuild_visible();
        assert_eq!(visible_ids(&st), vec![1, 2]);

        let mut packets = Vec::new();
        ViewCore::apply_item_change(
            &mut st,
            1,
            1,
            row(2, "x"),
            &["name".to_string()],
            &mut packets,
        );

        assert_eq!(visible_ids(&st), vec![1]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].action, ListAction::Remove);
        assert_eq!(packets[0].old_index, Some(1));
    }

    #[test]
    fn test_move_packets_pair_individual_old_ranks() {
        let a = ViewItem::new_record(row(1, "a"));
        let b = ViewItem::new_record(row(2, "b"));

        // Non-contiguous old ranks: each packet keeps its own old_index.
        let packets = ViewCore::move_packets(
            vec![(0, a.clone()), (5, b.clone())],
            vec![(2, a.clone()), (3, b.clone())],
        );
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].action, ListAction::Move);
        assert_eq!((packets[0].old_index, packets[0].new_index), (Some(0), Some(2)));
        assert_eq!((packets[1].old_index, packets[1].new_index), (Some(5), Some(3)));
    }

    #[test]
    fn test_move_packets_batch_contiguous_runs() {
        let a = ViewItem::new_record(row(1, "a"));
        let b = ViewItem::new_record(row(2, "b"));

        let packets = ViewCore::move_packets(
            vec![(1, a.clone()), (2, b.clone())],
            vec![(4, a.clone()), (5, b.clone())],
        );
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].old_index, Some(1));
        assert_eq!(packets[0].new_index, Some(4));
        assert_eq!(packets[0].new_items.len(), 2);
        assert_eq!(packets[0].old_items.len(), 2);
    }

    #[test]
    fn test_move_packets_visibility_changes() {
        let a = ViewItem::new_record(row(1, "a"));
        let b = ViewItem::new_record(row(2, "b"));

        // `a` lost visibility across the move, `b` gained it.
        let packets = ViewCore::move_packets(vec![(0, a)], vec![(1, b)]);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].action, ListAction::Add);
        assert_eq!(packets[0].new_index, Some(1));
        assert_eq!(packets[1].action, ListAction::Remove);
        assert_eq!(packets[1].old_index, Some(0));
    }

    #[test]
    fn test_multi_item_move_event_carries_own_old_ranks() {
        let source = Arc::new(VecSource::new(vec![
            row(1, "a"),
            row(2, "b"),
            row(3, "c"),
            row(4, "d"),
        ]));
        let view = match ProjectionView::new(source.clone()) {
            Ok(view) => view,
            Err(err) => panic!("view construction failed: {err}"),
        };

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        view.signals().changed.connect(move |packet| {
            sink.lock().push((
                packet.action,
                packet.old_index,
                packet.new_index,
                packet.new_items.len(),
            ));
        });

        // A two-item block move, as an external source may emit it.
        let block = vec![row(2, "b"), row(3, "c")];
        source
            .source_signals()
            .collection_changed
            .emit(ListChange::moved(block, 1, 2));

        let mut order = Vec::new();
        view.for_each(|item| order.extend(item.with_record(|r| r.id)));
        assert_eq!(order, vec![1, 4, 2, 3]);

        let packets = received.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(*packets, vec![(ListAction::Move, Some(1), Some(2), 2)]);
    }
}
