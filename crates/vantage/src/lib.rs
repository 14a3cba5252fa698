//! Live, read-only projection views over mutable collections.
//!
//! Vantage takes a mutable source collection and derives a *projection*: a
//! read-only view with user-supplied sort, filter, and group rules that
//! stays synchronized with the source and notifies listeners with minimal,
//! semantically precise change packets (add / remove / replace / move /
//! reset / change). The source remains the single source of truth; the
//! projection never mutates it.
//!
//! # Core Types
//!
//! - [`ProjectionView`]: the public façade over one source collection
//! - [`VecSource`]: a vector-backed source with the full mutation surface
//! - [`ViewItem`] / [`ItemRef`]: the projection's wrapper around a source
//!   value, plus synthetic group-header rows
//! - [`SortSpec`], [`FilterSpec`], [`GroupFn`]: the projection rules
//! - [`ChangePacket`]: the projection-level event payload
//! - [`ViewCursor`]: a traversal cursor over the visible sequence
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vantage::{FieldValue, FilterArgs, FilterSpec, ProjectionView, SortSide, SortSpec, VecSource};
//!
//! let source = Arc::new(VecSource::new(vec![
//!     "banana".to_string(),
//!     "apple".to_string(),
//!     "cherry".to_string(),
//! ]));
//!
//! let view = ProjectionView::new(source.clone()).unwrap();
//!
//! // Sort ascending, then hide everything before "b".
//! view.set_sort(vec![SortSpec::new(|a: &SortSide<'_, String>, b| a.record.cmp(b.record))]).unwrap();
//! view.set_filter(vec![FilterSpec::new(|args: &FilterArgs<'_, String>| {
//!     args.record.map(|r| r.as_str() >= "b").unwrap_or(true)
//! })]).unwrap();
//!
//! assert_eq!(view.visible_count(), 2);
//! assert_eq!(view.at(0).unwrap().record().as_deref(), Some("banana"));
//!
//! // Mutations go to the source; the view follows and emits events.
//! view.signals().changed.connect(|packet| {
//!     println!("projection changed: {:?} at {:?}", packet.action, packet.new_index);
//! });
//! source.push("blueberry".to_string());
//! assert_eq!(view.visible_count(), 3);
//! ```
//!
//! # Architecture
//!
//! ```text
//! source ──events──> ProjectionView
//!                        │
//!                        ├─ Pipeline: Direct -> Sort -> Group  (items[])
//!                        ├─ FilterEngine                       (mask)
//!                        ├─ UpdateSession / differ             (packets)
//!                        └─ ViewSignals                        (listeners)
//! ```
//!
//! Every source mutation opens an update session, runs through the strategy
//! pipeline, re-filters the affected ranges, and closes the session, which
//! emits `before_change`, the change packets (split per group when grouping
//! is active), and `after_change`, in that order, synchronously.

#![warn(missing_docs)]

mod cursor;
mod error;
mod filter;
mod item;
mod pipeline;
mod record;
mod session;
mod source;
mod state;
mod view;

pub use cursor::ViewCursor;
pub use error::{ViewError, ViewResult};
pub use filter::{FilterArgs, FilterSpec};
pub use item::{ItemContents, ItemRef, ViewItem};
pub use pipeline::{GroupFn, SortSide, SortSpec};
pub use record::{FieldValue, Record};
pub use session::ChangePacket;
pub use source::{
    ItemChange, ListAction, ListChange, RaisingChange, SourceList, SourceSignals, VecSource,
};
pub use state::{ItemState, ViewState};
pub use view::{
    CurrentChange, ProjectionView, ProjectionViewBuilder, ViewOptions, ViewSignals,
};
