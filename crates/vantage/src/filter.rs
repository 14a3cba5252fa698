//! The filter engine.
//!
//! Maintains a visibility decision per materialised item from a chain of
//! predicates. An item passes iff every predicate returns `true`. Decisions
//! are keyed by item instance id, so they survive re-ordering; a position
//! with no recorded decision is *unknown* and treated as visible.
//!
//! Group headers are evaluated after their run's data members, with the
//! extra `group_has_visible_members` argument, so a filter can hide the
//! header of a group none of whose members survived.

use std::collections::HashMap;
use std::sync::Arc;

use crate::item::ItemRef;
use crate::pipeline::Entry;
use crate::record::{FieldValue, Record};

/// The arguments handed to a filter predicate for one item.
pub struct FilterArgs<'a, T> {
    /// The source record; `None` when the item is a group header.
    pub record: Option<&'a T>,
    /// The record's source index; `None` for group headers.
    pub source_index: Option<usize>,
    /// The projection item under evaluation.
    pub item: &'a ItemRef<T>,
    /// The item's pre-filter projection index.
    pub index: usize,
    /// For group headers only: whether at least one data member of the
    /// group passed the filters. `None` for data items.
    pub group_has_visible_members: Option<bool>,
}

type PredicateFn<T> = Arc<dyn Fn(&FilterArgs<'_, T>) -> bool + Send + Sync>;

/// One predicate in the filter chain.
///
/// A predicate that consumes the projection index must be built with
/// [`with_index`](FilterSpec::with_index); declaring that dependency forces
/// a full re-filter whenever anything moves, because a range re-filter
/// would hand it stale indices.
pub struct FilterSpec<T> {
    predicate: PredicateFn<T>,
    uses_index: bool,
}

impl<T> Clone for FilterSpec<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            uses_index: self.uses_index,
        }
    }
}

impl<T: Record> FilterSpec<T> {
    /// Creates a predicate that does not depend on projection indices.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&FilterArgs<'_, T>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            uses_index: false,
        }
    }

    /// Creates a predicate that consumes the projection index.
    pub fn with_index<F>(predicate: F) -> Self
    where
        F: Fn(&FilterArgs<'_, T>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            uses_index: true,
        }
    }

    /// A predicate that keeps records whose named field equals `value`.
    ///
    /// Group headers stay visible as long as their group has at least one
    /// visible member.
    pub fn by_field(name: &str, value: FieldValue) -> Self {
        let field = name.to_string();
        Self::new(move |args| match args.record {
            Some(record) => record.field(&field) == value,
            None => args.group_has_visible_members.unwrap_or(true),
        })
    }

    /// Runs the predicate.
    pub fn test(&self, args: &FilterArgs<'_, T>) -> bool {
        (self.predicate)(args)
    }

    /// Whether the predicate declared a projection-index dependency.
    pub fn uses_index(&self) -> bool {
        self.uses_index
    }

    /// Two specs are the same filter iff they share the predicate
    /// allocation.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.predicate, &other.predicate) && self.uses_index == other.uses_index
    }
}

/// Maintains per-item visibility decisions for the view.
pub(crate) struct FilterEngine<T: Record> {
    filters: Vec<FilterSpec<T>>,
    /// Visibility decision per item instance id. Absent = unknown, which
    /// counts as visible but not as a prior decision.
    decisions: HashMap<u64, bool>,
}

impl<T: Record> FilterEngine<T> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            decisions: HashMap::new(),
        }
    }

    /// Snapshot of the active filter chain.
    pub fn filters(&self) -> Vec<FilterSpec<T>> {
        self.filters.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.filters.is_empty()
    }

    /// Whether any active filter consumes the projection index.
    pub fn uses_index(&self) -> bool {
        self.filters.iter().any(|f| f.uses_index())
    }

    /// Replaces the filter chain. Returns `false` when the new chain is
    /// element-wise the same as the current one (in which case nothing
    /// changes).
    pub fn set_filters(&mut self, filters: Vec<FilterSpec<T>>) -> bool {
        if filters.len() == self.filters.len()
            && filters
                .iter()
                .zip(self.filters.iter())
                .all(|(a, b)| a.same_as(b))
        {
            return false;
        }
        self.filters = filters;
        true
    }

    /// Inserts a filter, at `position` or at the end.
    pub fn add_filter(&mut self, filter: FilterSpec<T>, position: Option<usize>) {
        let at = position.unwrap_or(self.filters.len()).min(self.filters.len());
        self.filters.insert(at, filter);
    }

    /// Removes a filter by reference identity. Returns `true` on removal.
    pub fn remove_filter(&mut self, filter: &FilterSpec<T>) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| !f.same_as(filter));
        self.filters.len() != before
    }

    /// `true` unless the item has an explicit "hidden" decision.
    pub fn is_visible(&self, instance_id: u64) -> bool {
        self.decisions.get(&instance_id) != Some(&false)
    }

    /// Drops decisions for items no longer materialised.
    pub fn prune(&mut self, entries: &[Entry<T>]) {
        if self.decisions.is_empty() {
            return;
        }
        let live: std::collections::HashSet<u64> =
            entries.iter().map(|e| e.item.instance_id()).collect();
        self.decisions.retain(|id, _| live.contains(id));
    }

    pub fn clear_decisions(&mut self) {
        self.decisions.clear();
    }

    /// Re-evaluates every position. Returns `true` if any decision flipped.
    pub fn run_full(&mut self, entries: &[Entry<T>]) -> bool {
        self.run(entries, 0, entries.len())
    }

    /// Re-evaluates `[start, start + count)` only, first widening the range
    /// to whole group runs so header decisions stay coherent.
    pub fn run_range(&mut self, entries: &[Entry<T>], start: usize, count: usize) -> bool {
        let (start, end) = Self::expand_to_runs(entries, start, count);
        self.run(entries, start, end - start)
    }

    fn expand_to_runs(entries: &[Entry<T>], start: usize, count: usize) -> (usize, usize) {
        let mut s = start.min(entries.len());
        let mut e = (start + count).min(entries.len());
        // Back up to the header of the run containing `start`.
        while s > 0 && !entries[s].item.is_group() {
            s -= 1;
        }
        // Extend to the end of the run containing the last touched item.
        while e < entries.len() && !entries[e].item.is_group() {
            e += 1;
        }
        (s, e)
    }

    fn run(&mut self, entries: &[Entry<T>], start: usize, count: usize) -> bool {
        let end = (start + count).min(entries.len());
        let start = start.min(end);

        if self.filters.is_empty() {
            // No filters: every decision reverts to unknown (= visible).
            let flips = self.decisions.values().any(|&visible| !visible);
            self.decisions.clear();
            return flips;
        }

        let mut flips = false;

        // Data members first, in projection order.
        for (index, entry) in entries.iter().enumerate().take(end).skip(start) {
            if entry.item.is_group() {
                continue;
            }
            let pass = self.eval_data(entry, index);
            flips |= self.store(entry.item.instance_id(), pass);
        }

        // Headers are finalised once their members are decided.
        for (index, entry) in entries.iter().enumerate().take(end).skip(start) {
            if !entry.item.is_group() {
                continue;
            }
            let members_visible = entries[index + 1..]
                .iter()
                .take_while(|member| !member.item.is_group())
                .any(|member| self.is_visible(member.item.instance_id()));
            let pass = self.eval_header(entry, index, members_visible);
            flips |= self.store(entry.item.instance_id(), pass);
        }

        if flips {
            tracing::trace!(target: "vantage::filter", start, count, "filter mask changed");
        }
        flips
    }

    fn eval_data(&self, entry: &Entry<T>, index: usize) -> bool {
        entry
            .item
            .with_record(|record| {
                let args = FilterArgs {
                    record: Some(record),
                    source_index: entry.source_index,
                    item: &entry.item,
                    index,
                    group_has_visible_members: None,
                };
                self.filters.iter().all(|filter| filter.test(&args))
            })
            .unwrap_or(true)
    }

    fn eval_header(&self, entry: &Entry<T>, index: usize, members_visible: bool) -> bool {
        let args = FilterArgs {
            record: None,
            source_index: None,
            item: &entry.item,
            index,
            group_has_visible_members: Some(members_visible),
        };
        self.filters.iter().all(|filter| filter.test(&args))
    }

    /// Records a decision; returns `true` if it differs from the prior one.
    fn store(&mut self, instance_id: u64, visible: bool) -> bool {
        self.decisions.insert(instance_id, visible) != Some(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ViewItem;

    #[derive(Clone, PartialEq, Debug)]
    struct Row {
        id: i64,
        flag: bool,
    }

    impl Record for Row {
        fn field(&self, name: &str) -> FieldValue {
            match name {
                "id" => FieldValue::Int(self.id),
                "flag" => FieldValue::Bool(self.flag),
                _ => FieldValue::None,
            }
        }
    }

    fn data(id: i64, flag: bool) -> Entry<Row> {
        Entry {
            item: ViewItem::new_record(Row { id, flag }),
            source_index: Some(id as usize),
        }
    }

    fn header(id: &str) -> Entry<Row> {
        Entry {
            item: ViewItem::new_group(FieldValue::from(id)),
            source_index: None,
        }
    }

    fn visible_ids(engine: &FilterEngine<Row>, entries: &[Entry<Row>]) -> Vec<u64> {
        entries
            .iter()
            .filter(|e| engine.is_visible(e.item.instance_id()))
            .map(|e| e.item.instance_id())
            .collect()
    }

    #[test]
    fn test_no_filters_everything_visible() {
        let mut engine = FilterEngine::new();
        let entries = vec![data(1, true), data(2, false)];
        engine.run_full(&entries);
        assert_eq!(visible_ids(&engine, &entries).len(), 2);
    }

    #[test]
    fn test_predicate_chain_is_conjunction() {
        let mut engine = FilterEngine::new();
        engine.set_filters(vec![
            FilterSpec::new(|args: &FilterArgs<'_, Row>| {
                args.record.map(|r| r.flag).unwrap_or(true)
            }),
            FilterSpec::new(|args: &FilterArgs<'_, Row>| {
                args.record.map(|r| r.id > 1).unwrap_or(true)
            }),
        ]);
        let entries = vec![data(1, true), data(2, true), data(3, false)];
        engine.run_full(&entries);
        // Only id 2 passes both predicates.
        let visible = visible_ids(&engine, &entries);
        assert_eq!(visible, vec![entries[1].item.instance_id()]);
    }

    #[test]
    fn test_header_sees_group_visibility() {
        let mut engine = FilterEngine::new();
        engine.set_filters(vec![FilterSpec::by_field("flag", FieldValue::Bool(true))]);
        // Group A: no visible member. Group B: one visible member.
        let entries = vec![
            header("A"),
            data(1, false),
            header("B"),
            data(2, true),
            data(3, false),
        ];
        engine.run_full(&entries);
        assert!(!engine.is_visible(entries[0].item.instance_id()));
        assert!(engine.is_visible(entries[2].item.instance_id()));
    }

    #[test]
    fn test_flip_detection() {
        let mut engine = FilterEngine::new();
        let spec = FilterSpec::by_field("flag", FieldValue::Bool(true));
        engine.set_filters(vec![spec.clone()]);
        let entries = vec![data(1, true), data(2, false)];
        assert!(engine.run_full(&entries));
        // Re-running with no changes flips nothing.
        assert!(!engine.run_full(&entries));
        // Removing the filter restores visibility, which is a flip.
        assert!(engine.remove_filter(&spec));
        assert!(engine.run_full(&entries));
    }

    #[test]
    fn test_range_refilter_expands_to_group_runs() {
        let mut engine = FilterEngine::new();
        engine.set_filters(vec![FilterSpec::by_field("flag", FieldValue::Bool(true))]);
        let entries = vec![header("A"), data(1, true), data(2, false)];
        // Touch only position 2; the run expansion must still finalise A's
        // header using member 1's decision.
        engine.run_range(&entries, 2, 1);
        assert!(engine.is_visible(entries[0].item.instance_id()));
    }

    #[test]
    fn test_set_filters_equality_short_circuit() {
        let mut engine = FilterEngine::<Row>::new();
        let spec = FilterSpec::by_field("flag", FieldValue::Bool(true));
        assert!(engine.set_filters(vec![spec.clone()]));
        assert!(!engine.set_filters(vec![spec.clone()]));
        assert!(engine.set_filters(vec![]));
    }

    #[test]
    fn test_uses_index_declaration() {
        let plain = FilterSpec::<Row>::new(|_| true);
        let positional = FilterSpec::<Row>::with_index(|args| args.index % 2 == 0);
        assert!(!plain.uses_index());
        assert!(positional.uses_index());

        let mut engine = FilterEngine::new();
        engine.set_filters(vec![positional]);
        assert!(engine.uses_index());
    }
}
