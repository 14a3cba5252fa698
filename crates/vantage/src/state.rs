//! Persisted projection state.
//!
//! A view can be serialised and rehydrated: the snapshot carries the
//! construction options, the cursor position, and each materialised data
//! item's observable state, with items referenced by their source index.
//! Group headers are not persisted; grouping re-creates them on reload.

use serde::{Deserialize, Serialize};

use crate::view::ViewOptions;

/// Observable state of one materialised data item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    /// The item's index in the source at snapshot time; rehydration
    /// re-resolves the item through the source by this index.
    pub source_index: Option<usize>,
    /// The selection flag.
    pub selected: bool,
    /// The version counter.
    pub version: u64,
}

/// A serialisable snapshot of a projection view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    /// Construction options (id property, uniqueness).
    pub options: ViewOptions,
    /// The cursor position (`-1` = before the first item).
    pub current_position: i64,
    /// Per-item observable state, in materialised order.
    pub items: Vec<ItemState>,
}
