//! The grouping strategy.

use std::sync::Arc;

use crate::item::{ItemRef, ViewItem};
use crate::pipeline::Entry;
use crate::record::{FieldValue, Record};

/// A group function: maps a record to its group id. `FieldValue::None`
/// leaves the record ungrouped (no header, position preserved).
pub type GroupFn<T> = Arc<dyn Fn(&T) -> FieldValue + Send + Sync>;

/// Clusters its source layer by group id and inserts a synthetic group
/// header in front of each group's first member.
///
/// The clustering is stable: groups appear in order of their first
/// occurrence in the sorted layer, and members keep their relative order
/// within the group. Records whose group id is `FieldValue::None` are not
/// clustered; they keep their position between group blocks and get no
/// header.
///
/// Headers are stable objects keyed by group id: regeneration reuses the
/// existing header instance for an id whenever possible, so listeners
/// comparing by reference see minimal churn.
pub(crate) struct GroupStage<T: Record> {
    group_fn: Option<GroupFn<T>>,
    /// Header instances from the last pass, keyed by group id.
    headers: Vec<(FieldValue, ItemRef<T>)>,
    /// Input index -> display index.
    input_to_display: Vec<usize>,
    /// Display index -> input index (`None` at header positions).
    display_to_input: Vec<Option<usize>>,
}

impl<T: Record> GroupStage<T> {
    pub fn new() -> Self {
        Self {
            group_fn: None,
            headers: Vec::new(),
            input_to_display: Vec::new(),
            display_to_input: Vec::new(),
        }
    }

    pub fn group_fn(&self) -> Option<&GroupFn<T>> {
        self.group_fn.as_ref()
    }

    /// Replaces the group function. The header set is re-created on the
    /// next read.
    pub fn set_group_fn(&mut self, group_fn: Option<GroupFn<T>>) {
        self.group_fn = group_fn;
        self.headers.clear();
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.input_to_display.clear();
        self.display_to_input.clear();
    }

    /// Drops all memoised state and the created header items.
    pub fn reset(&mut self) {
        self.headers.clear();
        self.invalidate();
    }

    /// Clusters the sorted layer into group blocks and interleaves headers.
    pub fn apply(&mut self, input: Vec<Entry<T>>) -> Vec<Entry<T>> {
        self.input_to_display.clear();
        self.display_to_input.clear();

        let Some(group_fn) = self.group_fn.clone() else {
            self.input_to_display.extend(0..input.len());
            self.display_to_input.extend((0..input.len()).map(Some));
            return input;
        };

        // Stable clustering: one block per group id in first-occurrence
        // order; ungrouped records form singleton blocks in place.
        let mut blocks: Vec<(FieldValue, Vec<usize>)> = Vec::new();
        for (input_index, entry) in input.iter().enumerate() {
            let id = entry
                .item
                .with_record(|record| group_fn(record))
                .unwrap_or(FieldValue::None);
            if id.is_none() {
                blocks.push((FieldValue::None, vec![input_index]));
                continue;
            }
            match blocks
                .iter_mut()
                .find(|(existing, _)| !existing.is_none() && *existing == id)
            {
                Some((_, members)) => members.push(input_index),
                None => blocks.push((id, vec![input_index])),
            }
        }

        let mut output: Vec<Entry<T>> = Vec::with_capacity(input.len());
        let mut next_headers: Vec<(FieldValue, ItemRef<T>)> = Vec::new();
        self.input_to_display.resize(input.len(), 0);

        for (id, members) in blocks {
            if !id.is_none() {
                let header = self.take_header(&id);
                next_headers.push((id.clone(), header.clone()));
                self.display_to_input.push(None);
                output.push(Entry {
                    item: header,
                    source_index: None,
                });
            }
            for input_index in members {
                self.input_to_display[input_index] = output.len();
                self.display_to_input.push(Some(input_index));
                output.push(input[input_index].clone());
            }
        }

        self.headers = next_headers;
        output
    }

    /// Reuses the prior header instance for `id` when one exists.
    fn take_header(&self, id: &FieldValue) -> ItemRef<T> {
        self.headers
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, header)| header.clone())
            .unwrap_or_else(|| ViewItem::new_group(id.clone()))
    }

    /// Input index -> display index.
    pub fn display_index(&self, index: usize) -> Option<usize> {
        if self.group_fn.is_none() && self.input_to_display.is_empty() {
            return Some(index);
        }
        self.input_to_display.get(index).copied()
    }

    /// Display index -> input index; `None` at header positions.
    pub fn collection_index(&self, index: usize) -> Option<usize> {
        if self.group_fn.is_none() && self.display_to_input.is_empty() {
            return Some(index);
        }
        self.display_to_input.get(index).copied().flatten()
    }
}
