//! The leaf strategy: one projection item per source item.

use std::collections::HashSet;

use crate::item::{ItemRef, ViewItem};
use crate::pipeline::Entry;
use crate::record::Record;

/// One mirrored source position. The item is materialised exactly once per
/// position; `visible` is false when uniqueness enforcement elides the
/// position as a duplicate (it still consumes a source index but produces
/// no projection item).
struct DirectSlot<T> {
    value: T,
    item: ItemRef<T>,
    visible: bool,
}

/// Materialises one projection item per source item, in source order.
///
/// With `unique` enabled, the first occurrence of each extracted id wins;
/// later occurrences are elided until the earlier one disappears or
/// uniqueness is disabled again.
pub(crate) struct DirectStage<T: Record> {
    slots: Vec<DirectSlot<T>>,
    unique: bool,
    id_property: Option<String>,
}

impl<T: Record> DirectStage<T> {
    pub fn new(unique: bool, id_property: Option<String>) -> Self {
        Self {
            slots: Vec::new(),
            unique,
            id_property,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn set_unique(&mut self, unique: bool) {
        if self.unique != unique {
            self.unique = unique;
            self.recompute_visibility();
        }
    }

    /// Extracts the base unique id for a record: the domain identity when
    /// the record exposes one, else the configured id property.
    pub fn extract_uid(&self, value: &T) -> Option<String> {
        let identity = value.identity();
        if !identity.is_none() {
            return Some(identity.to_string());
        }
        let property = self.id_property.as_deref()?;
        let field = value.field(property);
        if field.is_none() {
            None
        } else {
            Some(field.to_string())
        }
    }

    /// Replaces the mirrored content wholesale.
    pub fn assign(&mut self, records: Vec<T>) {
        self.slots = records
            .into_iter()
            .map(|value| DirectSlot {
                item: ViewItem::new_record(value.clone()),
                value,
                visible: true,
            })
            .collect();
        self.recompute_visibility();
    }

    /// Inserts/removes mirrored positions. `start` and `delete_count` are
    /// source indices; returns the items materialised for the removed range.
    pub fn splice(&mut self, start: usize, delete_count: usize, added: Vec<T>) -> Vec<ItemRef<T>> {
        let start = start.min(self.slots.len());
        let end = (start + delete_count).min(self.slots.len());
        let added_slots: Vec<DirectSlot<T>> = added
            .into_iter()
            .map(|value| DirectSlot {
                item: ViewItem::new_record(value.clone()),
                value,
                visible: true,
            })
            .collect();
        let removed: Vec<ItemRef<T>> = self
            .slots
            .splice(start..end, added_slots)
            .map(|slot| slot.item)
            .collect();
        self.recompute_visibility();
        removed
    }

    /// Refreshes the mirrored value at `source_index` in place, keeping the
    /// item's identity. Returns `true` when the change altered an elision
    /// mark (the value joined or left a duplicate pair).
    pub fn update_value(&mut self, source_index: usize, value: T) -> bool {
        if let Some(slot) = self.slots.get_mut(source_index) {
            slot.value = value.clone();
            slot.item.set_record(value);
        }
        let before: Vec<bool> = self.slots.iter().map(|slot| slot.visible).collect();
        self.recompute_visibility();
        self.slots
            .iter()
            .zip(before)
            .any(|(slot, was)| slot.visible != was)
    }

    /// Relocates `count` mirrored positions from `from` so they start at
    /// `to` (an index into the collection after the removal). Item
    /// identities are preserved.
    pub fn move_range(&mut self, from: usize, count: usize, to: usize) {
        let from = from.min(self.slots.len());
        let end = (from + count).min(self.slots.len());
        let moved: Vec<DirectSlot<T>> = self.slots.drain(from..end).collect();
        let to = to.min(self.slots.len());
        for (offset, slot) in moved.into_iter().enumerate() {
            self.slots.insert(to + offset, slot);
        }
        self.recompute_visibility();
    }

    /// Rebinds the configured id property (used by state rehydration).
    pub fn set_id_property(&mut self, id_property: Option<String>) {
        self.id_property = id_property;
        self.recompute_visibility();
    }

    /// Re-derives the elision marks. First occurrence of each id wins;
    /// records without an extractable id are never elided.
    fn recompute_visibility(&mut self) {
        if !self.unique {
            for slot in self.slots.iter_mut() {
                slot.visible = true;
            }
            return;
        }
        let mut seen: HashSet<String> = HashSet::new();
        for index in 0..self.slots.len() {
            let id = self.extract_uid(&self.slots[index].value);
            let slot = &mut self.slots[index];
            slot.visible = match id {
                Some(id) => seen.insert(id),
                None => true,
            };
        }
    }

    /// The surviving items in source order.
    pub fn output(&self) -> Vec<Entry<T>> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.visible)
            .map(|(source_index, slot)| Entry {
                item: slot.item.clone(),
                source_index: Some(source_index),
            })
            .collect()
    }

    /// Number of mirrored source positions (elided ones included).
    pub fn source_len(&self) -> usize {
        self.slots.len()
    }

    /// A copy of the mirrored value at `source_index`.
    pub fn value_at(&self, source_index: usize) -> Option<T> {
        self.slots.get(source_index).map(|slot| slot.value.clone())
    }

    /// The materialised item at `source_index`, elided or not.
    pub fn item_at(&self, source_index: usize) -> Option<ItemRef<T>> {
        self.slots.get(source_index).map(|slot| slot.item.clone())
    }

    /// Source index -> index into this stage's output.
    pub fn display_index(&self, source_index: usize) -> Option<usize> {
        let slot = self.slots.get(source_index)?;
        if !slot.visible {
            return None;
        }
        Some(
            self.slots[..source_index]
                .iter()
                .filter(|slot| slot.visible)
                .count(),
        )
    }

    /// Index into this stage's output -> source index.
    pub fn collection_index(&self, index: usize) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.visible)
            .nth(index)
            .map(|(source_index, _)| source_index)
    }

    /// Drops all mirrored state and created items.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    #[derive(Clone, PartialEq, Debug)]
    struct Row {
        id: i64,
    }

    impl Record for Row {
        fn field(&self, name: &str) -> FieldValue {
            match name {
                "id" => FieldValue::Int(self.id),
                _ => FieldValue::None,
            }
        }
    }

    fn stage_with(ids: &[i64], unique: bool) -> DirectStage<Row> {
        let mut stage = DirectStage::new(unique, Some("id".to_string()));
        stage.assign(ids.iter().map(|&id| Row { id }).collect());
        stage
    }

    #[test]
    fn test_one_item_per_source_item() {
        let stage = stage_with(&[1, 2, 3], false);
        assert_eq!(stage.output().len(), 3);
        assert_eq!(stage.display_index(2), Some(2));
        assert_eq!(stage.collection_index(1), Some(1));
    }

    #[test]
    fn test_duplicates_elided_when_unique() {
        let stage = stage_with(&[1, 2, 1], true);
        let output = stage.output();
        assert_eq!(output.len(), 2);
        // The duplicate consumes a source index but produces no item.
        assert_eq!(stage.display_index(2), None);
        assert_eq!(stage.collection_index(1), Some(1));
    }

    #[test]
    fn test_disabling_unique_re_exposes_duplicates() {
        let mut stage = stage_with(&[1, 2, 1], true);
        assert_eq!(stage.output().len(), 2);
        stage.set_unique(false);
        assert_eq!(stage.output().len(), 3);
        stage.set_unique(true);
        assert_eq!(stage.output().len(), 2);
    }

    #[test]
    fn test_removing_first_occurrence_re_exposes_duplicate() {
        let mut stage = stage_with(&[1, 2, 1], true);
        let removed = stage.splice(0, 1, Vec::new());
        assert_eq!(removed.len(), 1);
        // The former duplicate at the tail is now the first occurrence.
        assert_eq!(stage.output().len(), 2);
        assert_eq!(stage.display_index(1), Some(1));
    }

    #[test]
    fn test_splice_inserts_in_source_order() {
        let mut stage = stage_with(&[1, 3], false);
        stage.splice(1, 0, vec![Row { id: 2 }]);
        let ids: Vec<i64> = stage
            .output()
            .iter()
            .filter_map(|e| e.item.with_record(|r| r.id))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_items_are_stable_across_splice() {
        let mut stage = stage_with(&[1, 2, 3], false);
        let before = stage.output()[2].item.instance_id();
        stage.splice(0, 1, Vec::new());
        let after = stage.output()[1].item.instance_id();
        assert_eq!(before, after);
    }
}
