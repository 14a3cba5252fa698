//! The strategy pipeline.
//!
//! The pipeline materialises the ordered sequence of projection items by
//! composing pluggable strategies. Each stage wraps its predecessor and
//! observes the predecessor's output:
//!
//! ```text
//! source records ──> Direct ──> Sort ──> Group ──> items[] (pre-filter)
//! ```
//!
//! The composition order is mandatory: group headers are inserted after the
//! sort, so a header always precedes the items of its group in the sorted
//! order.
//!
//! Stages are modelled as a tagged variant behind a uniform capability
//! surface (output, coordinate translation, invalidate, reset); the
//! composer is an ordered sequence of these variants.

mod direct;
mod group;
mod sort;

pub use group::GroupFn;
pub use sort::{SortSide, SortSpec};

pub(crate) use direct::DirectStage;
pub(crate) use group::GroupStage;
pub(crate) use sort::SortStage;

use crate::item::ItemRef;
use crate::record::Record;

/// One materialised position of the pipeline: the projection item plus the
/// source index it maps back to (`None` for synthetic group headers).
#[derive(Clone)]
pub(crate) struct Entry<T> {
    pub item: ItemRef<T>,
    pub source_index: Option<usize>,
}

/// The kind tag used to append and look up stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageKind {
    Direct,
    Sort,
    Group,
}

/// A pipeline stage.
pub(crate) enum Stage<T: Record> {
    Direct(DirectStage<T>),
    Sort(SortStage<T>),
    Group(GroupStage<T>),
}

impl<T: Record> Stage<T> {
    fn kind(&self) -> StageKind {
        match self {
            Stage::Direct(_) => StageKind::Direct,
            Stage::Sort(_) => StageKind::Sort,
            Stage::Group(_) => StageKind::Group,
        }
    }

    fn invalidate(&mut self) {
        match self {
            Stage::Direct(_) => {}
            Stage::Sort(s) => s.invalidate(),
            Stage::Group(s) => s.invalidate(),
        }
    }

    fn reset(&mut self) {
        match self {
            Stage::Direct(s) => s.reset(),
            Stage::Sort(s) => s.invalidate(),
            Stage::Group(s) => s.reset(),
        }
    }
}

/// The strategy composer.
///
/// Owns the ordered stage chain and a cache of the outermost stage's
/// result. Structural edits go in at the leaf in source-index space;
/// coordinate queries translate through every stage.
pub(crate) struct Pipeline<T: Record> {
    stages: Vec<Stage<T>>,
    result: Option<Vec<Entry<T>>>,
}

impl<T: Record> Pipeline<T> {
    /// Creates the standard composition: `Direct -> Sort -> Group`.
    pub fn standard(unique: bool, id_property: Option<String>) -> Self {
        let mut pipeline = Self {
            stages: vec![Stage::Direct(DirectStage::new(unique, id_property))],
            result: None,
        };
        pipeline.append(StageKind::Sort);
        pipeline.append(StageKind::Group);
        pipeline
    }

    /// Appends a stage of the given kind to the end of the chain.
    ///
    /// Appending `Direct` is ignored; the leaf exists from construction.
    pub fn append(&mut self, kind: StageKind) {
        if self.stage_index(kind).is_some() {
            return;
        }
        match kind {
            StageKind::Direct => {}
            StageKind::Sort => self.stages.push(Stage::Sort(SortStage::new())),
            StageKind::Group => self.stages.push(Stage::Group(GroupStage::new())),
        }
        self.result = None;
    }

    fn stage_index(&self, kind: StageKind) -> Option<usize> {
        self.stages.iter().position(|s| s.kind() == kind)
    }

    fn direct(&self) -> Option<&DirectStage<T>> {
        self.stages.iter().find_map(|s| match s {
            Stage::Direct(d) => Some(d),
            _ => None,
        })
    }

    fn direct_mut(&mut self) -> Option<&mut DirectStage<T>> {
        self.stages.iter_mut().find_map(|s| match s {
            Stage::Direct(d) => Some(d),
            _ => None,
        })
    }

    fn sort_mut(&mut self) -> Option<&mut SortStage<T>> {
        self.stages.iter_mut().find_map(|s| match s {
            Stage::Sort(s) => Some(s),
            _ => None,
        })
    }

    fn group(&self) -> Option<&GroupStage<T>> {
        self.stages.iter().find_map(|s| match s {
            Stage::Group(g) => Some(g),
            _ => None,
        })
    }

    fn group_mut(&mut self) -> Option<&mut GroupStage<T>> {
        self.stages.iter_mut().find_map(|s| match s {
            Stage::Group(g) => Some(g),
            _ => None,
        })
    }

    /// Drops every memoised result downstream of the leaf.
    fn invalidate_downstream(&mut self) {
        for stage in self.stages.iter_mut() {
            if !matches!(stage, Stage::Direct(_)) {
                stage.invalidate();
            }
        }
        self.result = None;
    }

    /// Drops all memoised state; the next read recomputes everything but
    /// existing projection items are kept.
    pub fn invalidate(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.invalidate();
        }
        self.result = None;
    }

    /// Drops memoised state and all created projection items.
    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
        self.result = None;
    }

    /// Replaces the leaf's content wholesale.
    pub fn assign(&mut self, records: Vec<T>) {
        if let Some(direct) = self.direct_mut() {
            direct.assign(records);
        }
        self.invalidate_downstream();
    }

    /// Structural edit in source-index space. Returns the projection items
    /// that were materialised for the removed range.
    pub fn splice(&mut self, start: usize, delete_count: usize, added: Vec<T>) -> Vec<ItemRef<T>> {
        let removed = match self.direct_mut() {
            Some(direct) => direct.splice(start, delete_count, added),
            None => Vec::new(),
        };
        self.invalidate_downstream();
        removed
    }

    /// Refreshes the leaf's copy of the value at `source_index` after a
    /// per-item change.
    ///
    /// With `reanalyze` set, downstream stages are invalidated so the next
    /// read re-sorts and re-groups. Without it only the result cache is
    /// dropped (the change cannot affect ordering), unless the update
    /// flipped an elision mark.
    pub fn update_value(&mut self, source_index: usize, value: T, reanalyze: bool) {
        let elision_changed = match self.direct_mut() {
            Some(direct) => direct.update_value(source_index, value),
            None => false,
        };
        if reanalyze || elision_changed {
            self.invalidate_downstream();
        } else {
            self.result = None;
        }
    }

    /// Relocates `count` source positions from `from` to `to`, preserving
    /// item identities.
    pub fn move_range(&mut self, from: usize, count: usize, to: usize) {
        if let Some(direct) = self.direct_mut() {
            direct.move_range(from, count, to);
        }
        self.invalidate_downstream();
    }

    /// Rebinds the configured id property (used by state rehydration).
    pub fn set_id_property(&mut self, id_property: Option<String>) {
        if let Some(direct) = self.direct_mut() {
            direct.set_id_property(id_property);
        }
        self.invalidate_downstream();
    }

    /// Whether the leaf enforces uniqueness.
    pub fn is_unique(&self) -> bool {
        self.direct().map(|d| d.is_unique()).unwrap_or(false)
    }

    /// Toggles the leaf's uniqueness enforcement.
    pub fn set_unique(&mut self, unique: bool) {
        if let Some(direct) = self.direct_mut() {
            direct.set_unique(unique);
        }
        self.invalidate_downstream();
    }

    /// Extracts the base unique id for a record, if one is available.
    pub fn extract_uid(&self, value: &T) -> Option<String> {
        self.direct().and_then(|d| d.extract_uid(value))
    }

    /// Snapshot of the current sort handler chain.
    pub fn sort_specs(&self) -> Vec<SortSpec<T>> {
        self.stages
            .iter()
            .find_map(|s| match s {
                Stage::Sort(s) => Some(s.specs().to_vec()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Replaces the sort handler chain.
    pub fn set_sort_specs(&mut self, specs: Vec<SortSpec<T>>) {
        if let Some(sort) = self.sort_mut() {
            sort.set_specs(specs);
        }
        self.result = None;
        if let Some(group) = self.group_mut() {
            group.invalidate();
        }
    }

    /// The current group function, if grouping is active.
    pub fn group_fn(&self) -> Option<GroupFn<T>> {
        self.group().and_then(|g| g.group_fn().cloned())
    }

    /// Replaces the group function. Headers are regenerated on the next
    /// read; instances are reused per group id where possible.
    pub fn set_group_fn(&mut self, group_fn: Option<GroupFn<T>>) {
        if let Some(group) = self.group_mut() {
            group.set_group_fn(group_fn);
        }
        self.result = None;
    }

    /// The materialised sequence of the outermost stage (post-sort,
    /// post-group, pre-filter).
    pub fn items(&mut self) -> &[Entry<T>] {
        self.materialize();
        self.result.as_deref().unwrap_or(&[])
    }

    fn materialize(&mut self) {
        if self.result.is_some() {
            return;
        }
        let mut acc: Vec<Entry<T>> = Vec::new();
        for stage in self.stages.iter_mut() {
            acc = match stage {
                Stage::Direct(s) => s.output(),
                Stage::Sort(s) => s.apply(acc),
                Stage::Group(s) => s.apply(acc),
            };
        }
        tracing::trace!(
            target: "vantage::pipeline",
            len = acc.len(),
            "pipeline materialised"
        );
        self.result = Some(acc);
    }

    /// Translates a source index to the outermost display index.
    pub fn display_index(&mut self, source_index: usize) -> Option<usize> {
        self.materialize();
        let mut idx: Option<usize> = None;
        for stage in &self.stages {
            idx = match stage {
                Stage::Direct(s) => s.display_index(source_index),
                Stage::Sort(s) => s.display_index(idx?),
                Stage::Group(s) => s.display_index(idx?),
            };
        }
        idx
    }

    /// Translates an outermost display index back to a source index.
    ///
    /// Returns `None` for synthetic positions (group headers).
    pub fn collection_index(&mut self, display_index: usize) -> Option<usize> {
        self.materialize();
        let mut idx = Some(display_index);
        for stage in self.stages.iter().rev() {
            idx = match stage {
                Stage::Group(s) => s.collection_index(idx?),
                Stage::Sort(s) => s.collection_index(idx?),
                Stage::Direct(s) => s.collection_index(idx?),
            };
        }
        idx
    }

    /// Number of entries the leaf mirrors from the source.
    pub fn source_len(&self) -> usize {
        self.direct().map(|d| d.source_len()).unwrap_or(0)
    }

    /// A copy of the leaf's value at `source_index`.
    pub fn source_value(&self, source_index: usize) -> Option<T> {
        self.direct().and_then(|d| d.value_at(source_index))
    }

    /// The materialised item for `source_index`, visible or not.
    pub fn item_at_source(&self, source_index: usize) -> Option<ItemRef<T>> {
        self.direct().and_then(|d| d.item_at(source_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use std::sync::Arc;

    fn contents(pipeline: &mut Pipeline<String>) -> Vec<String> {
        pipeline
            .items()
            .iter()
            .map(|e| match e.item.record() {
                Some(r) => r,
                None => format!("#{}", e.item.group_id().unwrap_or_default()),
            })
            .collect()
    }

    #[test]
    fn test_standard_composition_passthrough() {
        let mut pipeline = Pipeline::standard(false, None);
        pipeline.assign(vec!["b".to_string(), "a".to_string()]);
        assert_eq!(contents(&mut pipeline), vec!["b", "a"]);
    }

    #[test]
    fn test_sort_then_group_order() {
        let mut pipeline = Pipeline::standard(false, None);
        pipeline.assign(vec!["b1".to_string(), "a1".to_string(), "b2".to_string()]);
        pipeline.set_sort_specs(vec![SortSpec::new(|a: &SortSide<'_, String>, b| a.record.cmp(b.record))]);
        pipeline.set_group_fn(Some(Arc::new(|r: &String| {
            FieldValue::from(&r[..1])
        })));
        // Headers precede the sorted runs of their group.
        assert_eq!(contents(&mut pipeline), vec!["#a", "a1", "#b", "b1", "b2"]);
    }

    #[test]
    fn test_display_and_collection_index_roundtrip() {
        let mut pipeline = Pipeline::standard(false, None);
        pipeline.assign(vec!["b".to_string(), "a".to_string()]);
        pipeline.set_sort_specs(vec![SortSpec::new(|a: &SortSide<'_, String>, b| a.record.cmp(b.record))]);
        // "b" is source 0, sorted to display 1.
        assert_eq!(pipeline.display_index(0), Some(1));
        assert_eq!(pipeline.collection_index(1), Some(0));
        assert_eq!(pipeline.display_index(1), Some(0));
    }

    #[test]
    fn test_header_positions_have_no_collection_index() {
        let mut pipeline = Pipeline::standard(false, None);
        pipeline.assign(vec!["a".to_string()]);
        pipeline.set_group_fn(Some(Arc::new(|r: &String| FieldValue::from(r.as_str()))));
        assert_eq!(pipeline.items().len(), 2);
        assert_eq!(pipeline.collection_index(0), None);
        assert_eq!(pipeline.collection_index(1), Some(0));
        assert_eq!(pipeline.display_index(0), Some(1));
    }

    #[test]
    fn test_splice_returns_removed_items() {
        let mut pipeline = Pipeline::standard(false, None);
        pipeline.assign(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let removed = pipeline.splice(1, 1, Vec::new());
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].record().as_deref(), Some("b"));
        assert_eq!(contents(&mut pipeline), vec!["a", "c"]);
    }
}
