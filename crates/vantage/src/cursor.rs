//! Traversal cursors over a projection.
//!
//! A [`ViewCursor`] is a stateful position over the visible sequence,
//! obeying the filter mask and the sort permutation. Cursors obtained via
//! `ProjectionView::enumerator` are independent of the view's own current
//! item: moving one never disturbs the other.

use std::sync::Arc;

use crate::item::ItemRef;
use crate::record::{FieldValue, Record};
use crate::view::ViewCore;

/// A stateful traversal cursor with position in `[-1, visible_count)`.
///
/// Position `-1` means "before the first item"; `move_next` from there
/// lands on position 0.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vantage::{ProjectionView, VecSource};
///
/// let source = Arc::new(VecSource::new(vec!["a".to_string(), "b".to_string()]));
/// let view = ProjectionView::new(source).unwrap();
///
/// let mut cursor = view.enumerator();
/// let mut seen = Vec::new();
/// while cursor.move_next() {
///     seen.push(cursor.current().unwrap().record().unwrap());
/// }
/// assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
/// ```
pub struct ViewCursor<T: Record> {
    core: Arc<ViewCore<T>>,
    position: isize,
}

impl<T: Record> ViewCursor<T> {
    pub(crate) fn new(core: Arc<ViewCore<T>>) -> Self {
        Self { core, position: -1 }
    }

    /// Moves the cursor back before the first item.
    pub fn reset(&mut self) {
        self.position = -1;
    }

    /// Number of visible items.
    pub fn count(&self) -> usize {
        self.core.visible_count()
    }

    /// Advances one step. Returns `false` (and stays past the end) when
    /// there is no next item.
    pub fn move_next(&mut self) -> bool {
        let count = self.count() as isize;
        if self.position + 1 >= count {
            self.position = count;
            return false;
        }
        self.position += 1;
        true
    }

    /// Steps back. Returns `false` (at position `-1`) when there is no
    /// previous item.
    pub fn move_previous(&mut self) -> bool {
        if self.position <= 0 {
            self.position = -1;
            return false;
        }
        self.position -= 1;
        true
    }

    /// The item under the cursor, if the position is on one.
    pub fn current(&self) -> Option<ItemRef<T>> {
        if self.position < 0 {
            return None;
        }
        self.core.visible_item(self.position as usize)
    }

    /// The cursor's position (`-1` = before the first item).
    pub fn current_index(&self) -> isize {
        self.position
    }

    /// Places the cursor at `position`, clamped to `[-1, visible_count)`.
    pub fn set_position(&mut self, position: isize) -> &mut Self {
        let max = self.count() as isize - 1;
        self.position = position.clamp(-1, max.max(-1));
        self
    }

    /// Places the cursor on `item`. Returns `false` (cursor unchanged)
    /// when the item is not visible.
    pub fn set_current(&mut self, item: &ItemRef<T>) -> bool {
        match self.core.visible_rank_of_id(item.instance_id()) {
            Some(rank) => {
                self.position = rank as isize;
                true
            }
            None => false,
        }
    }

    /// The visible item at `position`, without moving the cursor.
    pub fn at(&self, position: usize) -> Option<ItemRef<T>> {
        self.core.visible_item(position)
    }

    /// Position of the first visible data item whose `property` field
    /// equals `value` (linear scan).
    pub fn index_by_value(&self, property: &str, value: &FieldValue) -> Option<usize> {
        self.core.index_by_value(property, value)
    }

    /// Visible position of the item projected from `source_index`.
    pub fn internal_by_source(&self, source_index: usize) -> Option<usize> {
        self.core.visible_rank_of_source(source_index)
    }

    /// Source index of the visible item at `position`.
    pub fn source_by_internal(&self, position: usize) -> Option<usize> {
        self.core.source_index_of_rank(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;
    use crate::view::ProjectionView;

    fn view_of(items: &[&str]) -> ProjectionView<String> {
        let source = Arc::new(VecSource::new(
            items.iter().map(|s| s.to_string()).collect(),
        ));
        match ProjectionView::new(source) {
            Ok(view) => view,
            Err(err) => panic!("view construction failed: {err}"),
        }
    }

    #[test]
    fn test_forward_traversal() {
        let view = view_of(&["a", "b", "c"]);
        let mut cursor = view.enumerator();
        let mut seen = Vec::new();
        while cursor.move_next() {
            if let Some(item) = cursor.current() {
                seen.extend(item.record());
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(!cursor.move_next());
    }

    #[test]
    fn test_backward_traversal() {
        let view = view_of(&["a", "b"]);
        let mut cursor = view.enumerator();
        cursor.set_position(1);
        assert!(cursor.move_previous());
        assert_eq!(cursor.current_index(), 0);
        assert!(!cursor.move_previous());
        assert_eq!(cursor.current_index(), -1);
        assert!(cursor.current().is_none());
    }

    #[test]
    fn test_set_position_clamps() {
        let view = view_of(&["a", "b"]);
        let mut cursor = view.enumerator();
        cursor.set_position(99);
        assert_eq!(cursor.current_index(), 1);
        cursor.set_position(-7);
        assert_eq!(cursor.current_index(), -1);
    }

    #[test]
    fn test_set_current_by_item() {
        let view = view_of(&["a", "b"]);
        let mut cursor = view.enumerator();
        let Some(item) = view.at(1) else {
            panic!("expected an item at position 1");
        };
        assert!(cursor.set_current(&item));
        assert_eq!(cursor.current_index(), 1);
    }

    #[test]
    fn test_cursor_is_independent_of_view_cursor() {
        let view = view_of(&["a", "b"]);
        let mut cursor = view.enumerator();
        cursor.set_position(1);
        assert_eq!(view.current_position(), -1);
    }

    #[test]
    fn test_coordinate_translation() {
        let view = view_of(&["a", "b"]);
        let cursor = view.enumerator();
        assert_eq!(cursor.internal_by_source(1), Some(1));
        assert_eq!(cursor.source_by_internal(0), Some(0));
        assert_eq!(cursor.internal_by_source(9), None);
    }
}
