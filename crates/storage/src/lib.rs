//! Local task store abstraction and implementations for todo-sync.
//!
//! This crate provides a trait-based store interface with a Taskwarrior
//! implementation and an in-memory implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod taskwarrior;
pub mod memory;

pub use trait_::{FieldChange, NewTask, Result, StoreError, TaskStore};
pub use taskwarrior::{TaskwarriorStore, Uda, REQUIRED_UDAS};
pub use memory::{MemoryStore, StoreCall, StoreOp};
