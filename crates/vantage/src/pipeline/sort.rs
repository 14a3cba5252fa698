//! The user-sort strategy.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::item::ItemRef;
use crate::pipeline::Entry;
use crate::record::Record;

/// One side of a comparison pair handed to a sort handler.
pub struct SortSide<'a, T> {
    /// The source record.
    pub record: &'a T,
    /// The projection item wrapping the record.
    pub item: &'a ItemRef<T>,
    /// The record's index in the layer being sorted.
    pub index: usize,
    /// The record's index in the source collection.
    pub source_index: usize,
}

type CompareFn<T> = Arc<dyn Fn(&SortSide<'_, T>, &SortSide<'_, T>) -> Ordering + Send + Sync>;

/// A user-supplied sort handler.
///
/// Handlers form a cascade: the first handler decides, ties fall through to
/// the next. A handler may declare the record properties its ordering
/// depends on; while the handler is active those properties count as
/// important, so per-item changes to unrelated properties skip the re-sort.
///
/// # Example
///
/// ```
/// use vantage::SortSpec;
///
/// // Sort by a declared field, ascending.
/// let by_name = SortSpec::<String>::by_field("name");
///
/// // Or with a custom comparison.
/// let by_len = SortSpec::<String>::new(|a, b| a.record.len().cmp(&b.record.len()));
/// ```
pub struct SortSpec<T> {
    compare: CompareFn<T>,
    properties: Vec<String>,
}

impl<T> Clone for SortSpec<T> {
    fn clone(&self) -> Self {
        Self {
            compare: self.compare.clone(),
            properties: self.properties.clone(),
        }
    }
}

impl<T: Record> SortSpec<T> {
    /// Creates a handler from a comparison function.
    pub fn new<F>(compare: F) -> Self
    where
        F: Fn(&SortSide<'_, T>, &SortSide<'_, T>) -> Ordering + Send + Sync + 'static,
    {
        Self {
            compare: Arc::new(compare),
            properties: Vec::new(),
        }
    }

    /// Creates a handler with a declared-properties annotation.
    pub fn with_properties<F>(compare: F, properties: Vec<String>) -> Self
    where
        F: Fn(&SortSide<'_, T>, &SortSide<'_, T>) -> Ordering + Send + Sync + 'static,
    {
        Self {
            compare: Arc::new(compare),
            properties,
        }
    }

    /// A handler that orders ascending by the named field and declares it.
    pub fn by_field(name: &str) -> Self {
        let field = name.to_string();
        let key = field.clone();
        Self {
            compare: Arc::new(move |a, b| a.record.field(&key).compare(&b.record.field(&key))),
            properties: vec![field],
        }
    }

    /// A handler that orders descending by the named field and declares it.
    pub fn by_field_desc(name: &str) -> Self {
        let field = name.to_string();
        let key = field.clone();
        Self {
            compare: Arc::new(move |a, b| {
                b.record.field(&key).compare(&a.record.field(&key))
            }),
            properties: vec![field],
        }
    }

    /// The declared properties, if any.
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Runs the comparison.
    pub fn compare(&self, a: &SortSide<'_, T>, b: &SortSide<'_, T>) -> Ordering {
        (self.compare)(a, b)
    }

    /// Two specs are the same handler iff they share the comparison
    /// function allocation.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.compare, &other.compare)
    }
}

/// Reorders its source layer according to the handler cascade.
///
/// The sort is stable: records comparing equal keep their relative order
/// from the previous layer. The permutation is recomputed only when the
/// handler list changes or the stage is invalidated (which the composer
/// does on every structural edit and on important-property changes).
pub(crate) struct SortStage<T: Record> {
    specs: Vec<SortSpec<T>>,
    /// `order[display] = previous-layer index`.
    order: Option<Vec<usize>>,
    /// `inverse[previous-layer index] = display`.
    inverse: Option<Vec<usize>>,
}

impl<T: Record> SortStage<T> {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            order: None,
            inverse: None,
        }
    }

    pub fn specs(&self) -> &[SortSpec<T>] {
        &self.specs
    }

    pub fn set_specs(&mut self, specs: Vec<SortSpec<T>>) {
        self.specs = specs;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.order = None;
        self.inverse = None;
    }

    /// Applies (and, when invalidated, recomputes) the permutation.
    pub fn apply(&mut self, input: Vec<Entry<T>>) -> Vec<Entry<T>> {
        if self.specs.is_empty() {
            self.order = None;
            self.inverse = None;
            return input;
        }

        let order = match &self.order {
            Some(order) if order.len() == input.len() => order.clone(),
            _ => {
                let order = self.compute_order(&input);
                let mut inverse = vec![0usize; order.len()];
                for (display, &previous) in order.iter().enumerate() {
                    inverse[previous] = display;
                }
                self.order = Some(order.clone());
                self.inverse = Some(inverse);
                order
            }
        };

        order.iter().map(|&i| input[i].clone()).collect()
    }

    fn compute_order(&self, input: &[Entry<T>]) -> Vec<usize> {
        // Extract the records once; comparing through the item lock on every
        // probe would make the sort quadratic in lock traffic.
        let records: Vec<Option<T>> = input.iter().map(|e| e.item.record()).collect();
        let mut order: Vec<usize> = (0..input.len()).collect();
        order.sort_by(|&a, &b| {
            let (Some(ra), Some(rb)) = (&records[a], &records[b]) else {
                return Ordering::Equal;
            };
            let side_a = SortSide {
                record: ra,
                item: &input[a].item,
                index: a,
                source_index: input[a].source_index.unwrap_or(a),
            };
            let side_b = SortSide {
                record: rb,
                item: &input[b].item,
                index: b,
                source_index: input[b].source_index.unwrap_or(b),
            };
            for spec in &self.specs {
                let ordering = spec.compare(&side_a, &side_b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        order
    }

    /// Previous-layer index -> display index.
    pub fn display_index(&self, index: usize) -> Option<usize> {
        match &self.inverse {
            None => Some(index),
            Some(inverse) => inverse.get(index).copied(),
        }
    }

    /// Display index -> previous-layer index.
    pub fn collection_index(&self, index: usize) -> Option<usize> {
        match &self.order {
            None => Some(index),
            Some(order) => order.get(index).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ViewItem;
    use crate::record::FieldValue;

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

    fn entries(rows: Vec<Row>) -> Vec<Entry<Row>> {
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| Entry {
                item: ViewItem::new_record(row),
                source_index: Some(i),
            })
            .collect()
    }

    fn ids(output: &[Entry<Row>]) -> Vec<i64> {
        output
            .iter()
            .filter_map(|e| e.item.with_record(|r| r.id))
            .collect()
    }

    #[test]
    fn test_empty_cascade_is_passthrough() {
        let mut stage = SortStage::new();
        let input = entries(vec![
            Row { id: 2, name: "b".into() },
            Row { id: 1, name: "a".into() },
        ]);
        let output = stage.apply(input);
        assert_eq!(ids(&output), vec![2, 1]);
        assert_eq!(stage.display_index(0), Some(0));
    }

    #[test]
    fn test_sort_by_field() {
        let mut stage = SortStage::new();
        stage.set_specs(vec![SortSpec::by_field("id")]);
        let output = stage.apply(entries(vec![
            Row { id: 3, name: "c".into() },
            Row { id: 1, name: "a".into() },
            Row { id: 2, name: "b".into() },
        ]));
        assert_eq!(ids(&output), vec![1, 2, 3]);
        // Source-layer index 0 (id 3) lands at display 2.
        assert_eq!(stage.display_index(0), Some(2));
        assert_eq!(stage.collection_index(0), Some(1));
    }

    #[test]
    fn test_cascade_breaks_ties() {
        let mut stage = SortStage::new();
        stage.set_specs(vec![SortSpec::by_field("name"), SortSpec::by_field_desc("id")]);
        let output = stage.apply(entries(vec![
            Row { id: 1, name: "x".into() },
            Row { id: 2, name: "x".into() },
            Row { id: 3, name: "a".into() },
        ]));
        assert_eq!(ids(&output), vec![3, 2, 1]);
    }

    #[test]
    fn test_stability_on_equal_keys() {
        let mut stage = SortStage::new();
        stage.set_specs(vec![SortSpec::by_field("name")]);
        let output = stage.apply(entries(vec![
            Row { id: 10, name: "same".into() },
            Row { id: 20, name: "same".into() },
            Row { id: 30, name: "same".into() },
        ]));
        // Equal elements retain the previous layer's relative order.
        assert_eq!(ids(&output), vec![10, 20, 30]);
    }

    #[test]
    fn test_same_as_is_reference_identity() {
        let a = SortSpec::<Row>::by_field("id");
        let b = a.clone();
        let c = SortSpec::<Row>::by_field("id");
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
