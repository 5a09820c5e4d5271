//! Broadcasting of queue changes for real-time views.
//!
//! Any front end (terminal, desktop shell, web bridge) subscribes here instead
//! of polling the status store.

pub mod item_progress;

pub use item_progress::{ItemEvent, ItemProgressBroadcaster, ItemView};
