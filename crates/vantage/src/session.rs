//! Update sessions and the event differ.
//!
//! A session brackets one source mutation: it snapshots observable per-item
//! state (currently the selection flag) and each visible item's position at
//! open time, and at close time diffs against the post-mutation state. The
//! diff yields `change` packets for items whose observable state moved,
//! with the move/change interplay applied:
//!
//! - an item that moved **upward** is omitted from the change packet (the
//!   move packet already covers it);
//! - an item that moved **downward** is included;
//! - an item that did not move but changed state is included.
//!
//! The module also hosts [`ChangePacket`] (the projection-level event
//! payload) and the group-aware splitter that cuts packets along group
//! boundaries.

use std::collections::HashMap;

use crate::item::ItemRef;
use crate::record::{FieldValue, Record};
use crate::source::ListAction;

/// One projection-level change event.
///
/// Actions and sides mirror the source contract: `new_items`/`new_index`
/// describe the post-change side, `old_items`/`old_index` the pre-change
/// side, both in *projection* (visible-position) space. `None` indices mean
/// the side carries no positional information for this action.
#[derive(Debug, Clone)]
pub struct ChangePacket<T> {
    /// What happened.
    pub action: ListAction,
    /// Projection items on the post-change side.
    pub new_items: Vec<ItemRef<T>>,
    /// Visible position of the first entry of `new_items`.
    pub new_index: Option<usize>,
    /// Projection items on the pre-change side.
    pub old_items: Vec<ItemRef<T>>,
    /// Visible position of the first entry of `old_items`.
    pub old_index: Option<usize>,
}

impl<T> ChangePacket<T> {
    /// A wholesale rebuild carrying the new visible sequence.
    pub fn reset(items: Vec<ItemRef<T>>) -> Self {
        Self {
            action: ListAction::Reset,
            new_items: items,
            new_index: Some(0),
            old_items: Vec::new(),
            old_index: None,
        }
    }

    /// Items that appeared at `index`.
    pub fn add(items: Vec<ItemRef<T>>, index: usize) -> Self {
        Self {
            action: ListAction::Add,
            new_items: items,
            new_index: Some(index),
            old_items: Vec::new(),
            old_index: None,
        }
    }

    /// Items that disappeared from `index`.
    pub fn remove(items: Vec<ItemRef<T>>, index: usize) -> Self {
        Self {
            action: ListAction::Remove,
            new_items: Vec::new(),
            new_index: None,
            old_items: items,
            old_index: Some(index),
        }
    }

    /// Items replaced in place at `index`.
    pub fn replace(old_items: Vec<ItemRef<T>>, new_items: Vec<ItemRef<T>>, index: usize) -> Self {
        Self {
            action: ListAction::Replace,
            new_items,
            new_index: Some(index),
            old_items,
            old_index: Some(index),
        }
    }

    /// Items that changed position.
    pub fn moved(items: Vec<ItemRef<T>>, old_index: usize, new_index: usize) -> Self
    where
        T: Clone,
    {
        Self {
            action: ListAction::Move,
            new_items: items.clone(),
            new_index: Some(new_index),
            old_items: items,
            old_index: Some(old_index),
        }
    }

    /// Items whose observable state changed in place.
    pub fn change(items: Vec<ItemRef<T>>, index: usize) -> Self {
        Self {
            action: ListAction::Change,
            new_items: items,
            new_index: Some(index),
            old_items: Vec::new(),
            old_index: None,
        }
    }
}

/// A snapshot bracket around one mutation.
pub(crate) struct UpdateSession {
    analyze: bool,
    /// Selection flag per visible item at open time.
    selected: HashMap<u64, bool>,
    /// Visible position per item at open time.
    positions: HashMap<u64, usize>,
}

impl UpdateSession {
    /// Opens a session over the pre-mutation visible sequence, given as
    /// `(instance id, selected)` pairs in visible order.
    pub fn open(visible: &[(u64, bool)], analyze: bool) -> Self {
        let mut selected = HashMap::with_capacity(visible.len());
        let mut positions = HashMap::with_capacity(visible.len());
        for (position, &(id, flag)) in visible.iter().enumerate() {
            selected.insert(id, flag);
            positions.insert(id, position);
        }
        Self {
            analyze,
            selected,
            positions,
        }
    }

    /// Closes the session against the post-mutation visible sequence and
    /// returns the `change` packets the diff produced.
    ///
    /// With analysis off the diff is skipped entirely.
    pub fn close<T: Record>(&self, now_visible: &[ItemRef<T>]) -> Vec<ChangePacket<T>> {
        if !self.analyze {
            return Vec::new();
        }

        let mut changed: Vec<(usize, ItemRef<T>)> = Vec::new();
        for (new_position, item) in now_visible.iter().enumerate() {
            let id = item.instance_id();
            // Items with no prior snapshot are covered by add packets.
            let Some(&was_selected) = self.selected.get(&id) else {
                continue;
            };
            if was_selected == item.is_selected() {
                continue;
            }
            if let Some(&old_position) = self.positions.get(&id) {
                if new_position < old_position {
                    // Moved upward: the move packet already covers it.
                    continue;
                }
            }
            changed.push((new_position, item.clone()));
        }

        if !changed.is_empty() {
            tracing::trace!(
                target: "vantage::session",
                count = changed.len(),
                "session diff produced change packets"
            );
        }
        packets_from_positions(ListAction::Change, changed)
    }
}

/// Folds `(visible position, item)` pairs into one packet per maximal run
/// of consecutive positions. The pairs must be position-sorted.
pub(crate) fn packets_from_positions<T>(
    action: ListAction,
    items: Vec<(usize, ItemRef<T>)>,
) -> Vec<ChangePacket<T>> {
    let mut packets: Vec<ChangePacket<T>> = Vec::new();
    for (position, item) in items {
        match packets.last_mut() {
            Some(last)
                if last.run_start() + last.run_len() == position && last.action == action =>
            {
                last.push_run_item(item);
            }
            _ => packets.push(ChangePacket::run(action, item, position)),
        }
    }
    packets
}

impl<T> ChangePacket<T> {
    fn run(action: ListAction, item: ItemRef<T>, position: usize) -> Self {
        let mut packet = match action {
            ListAction::Remove => ChangePacket::remove(vec![item], position),
            ListAction::Add => ChangePacket::add(vec![item], position),
            _ => ChangePacket::change(vec![item], position),
        };
        packet.action = action;
        packet
    }

    fn run_start(&self) -> usize {
        match self.action {
            ListAction::Remove => self.old_index.unwrap_or(0),
            _ => self.new_index.unwrap_or(0),
        }
    }

    fn run_len(&self) -> usize {
        match self.action {
            ListAction::Remove => self.old_items.len(),
            _ => self.new_items.len(),
        }
    }

    fn push_run_item(&mut self, item: ItemRef<T>) {
        match self.action {
            ListAction::Remove => self.old_items.push(item),
            _ => self.new_items.push(item),
        }
    }
}

/// Splits packets along group boundaries.
///
/// When grouping is active and the action is not `reset`, each maximal
/// contiguous run of items sharing a group becomes its own packet, so
/// downstream consumers receive coherent per-group updates.
pub(crate) fn split_by_group<T: Record>(
    packets: Vec<ChangePacket<T>>,
    group_of: &dyn Fn(&ItemRef<T>) -> FieldValue,
) -> Vec<ChangePacket<T>> {
    let mut output = Vec::with_capacity(packets.len());
    for packet in packets {
        if packet.action == ListAction::Reset {
            output.push(packet);
            continue;
        }
        let items = match packet.action {
            ListAction::Remove => &packet.old_items,
            _ => &packet.new_items,
        };
        if items.len() < 2 {
            output.push(packet);
            continue;
        }

        // Find the maximal same-group runs.
        let mut cuts: Vec<usize> = vec![0];
        for i in 1..items.len() {
            if group_of(&items[i - 1]) != group_of(&items[i]) {
                cuts.push(i);
            }
        }
        if cuts.len() == 1 {
            output.push(packet);
            continue;
        }
        cuts.push(items.len());

        for window in cuts.windows(2) {
            let (start, end) = (window[0], window[1]);
            let slice = |v: &Vec<ItemRef<T>>| -> Vec<ItemRef<T>> {
                if v.is_empty() {
                    Vec::new()
                } else {
                    v[start.min(v.len())..end.min(v.len())].to_vec()
                }
            };
            output.push(ChangePacket {
                action: packet.action,
                new_items: slice(&packet.new_items),
                new_index: packet.new_index.map(|i| i + start),
                old_items: slice(&packet.old_items),
                old_index: packet.old_index.map(|i| i + start),
            });
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ViewItem;
    use crate::record::FieldValue;

    fn item(tag: &str) -> ItemRef<String> {
        ViewItem::new_record(tag.to_string())
    }

    fn snapshot(items: &[ItemRef<String>]) -> Vec<(u64, bool)> {
        items
            .iter()
            .map(|i| (i.instance_id(), i.is_selected()))
            .collect()
    }

    #[test]
    fn test_no_diff_without_state_change() {
        let items = vec![item("a"), item("b")];
        let session = UpdateSession::open(&snapshot(&items), true);
        let packets = session.close(&items);
        assert!(packets.is_empty());
    }

    #[test]
    fn test_selection_diff_emits_change() {
        let items = vec![item("a"), item("b")];
        let session = UpdateSession::open(&snapshot(&items), true);
        items[1].set_selected(true);
        let packets = session.close(&items);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].action, ListAction::Change);
        assert_eq!(packets[0].new_index, Some(1));
        assert_eq!(packets[0].new_items.len(), 1);
    }

    #[test]
    fn test_analyze_off_skips_diff() {
        let items = vec![item("a")];
        let session = UpdateSession::open(&snapshot(&items), false);
        items[0].set_selected(true);
        assert!(session.close(&items).is_empty());
    }

    #[test]
    fn test_upward_move_suppresses_change_entry() {
        let a = item("a");
        let b = item("b");
        let before = vec![a.clone(), b.clone()];
        let session = UpdateSession::open(&snapshot(&before), true);
        // `b` both changes state and moves upward: 1 -> 0.
        b.set_selected(true);
        let after = vec![b.clone(), a.clone()];
        let packets = session.close(&after);
        assert!(packets.is_empty());
    }

    #[test]
    fn test_downward_move_keeps_change_entry() {
        let a = item("a");
        let b = item("b");
        let before = vec![a.clone(), b.clone()];
        let session = UpdateSession::open(&snapshot(&before), true);
        // `a` changes state and moves downward: 0 -> 1.
        a.set_selected(true);
        let after = vec![b.clone(), a.clone()];
        let packets = session.close(&after);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].new_items[0].instance_id(), a.instance_id());
    }

    #[test]
    fn test_contiguous_changes_coalesce() {
        let items = vec![item("a"), item("b"), item("c"), item("d")];
        let session = UpdateSession::open(&snapshot(&items), true);
        items[1].set_selected(true);
        items[2].set_selected(true);
        let packets = session.close(&items);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].new_index, Some(1));
        assert_eq!(packets[0].new_items.len(), 2);
    }

    #[test]
    fn test_split_by_group_cuts_runs() {
        let a1 = item("a1");
        let a2 = item("a2");
        let b1 = item("b1");
        let packet = ChangePacket::add(vec![a1, a2, b1], 3);
        let split = split_by_group(vec![packet], &|item: &ItemRef<String>| {
            item.with_record(|r| FieldValue::from(&r[..1]))
                .unwrap_or(FieldValue::None)
        });
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].new_index, Some(3));
        assert_eq!(split[0].new_items.len(), 2);
        assert_eq!(split[1].new_index, Some(5));
        assert_eq!(split[1].new_items.len(), 1);
    }

    #[test]
    fn test_reset_packets_are_never_split() {
        let packet = ChangePacket::reset(vec![item("a1"), item("b1")]);
        let split = split_by_group(vec![packet], &|item: &ItemRef<String>| {
            item.with_record(|r| FieldValue::from(&r[..1]))
                .unwrap_or(FieldValue::None)
        });
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].action, ListAction::Reset);
    }
}
