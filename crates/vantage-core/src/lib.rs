//! Core systems for Vantage.
//!
//! This crate provides the foundational components shared by the Vantage
//! projection engine:
//!
//! - **Signal/Slot System**: Type-safe change notification between the
//!   engine and its consumers
//! - **Logging**: Integration with the `tracing` crate for structured logs
//!
//! # Signal/Slot Example
//!
//! ```
//! use vantage_core::Signal;
//!
//! // Create a signal that notifies when a value changes
//! let value_changed = Signal::<i32>::new();
//!
//! // Connect a slot to handle the signal
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! // Emit the signal
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! value_changed.disconnect(conn_id);
//! ```

#![warn(missing_docs)]

pub mod logging;
pub mod signal;

pub use logging::PerfSpan;
pub use signal::{ConnectionGuard, ConnectionId, Signal};
