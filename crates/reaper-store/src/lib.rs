//! Reaper Store - Object store and typed clients for the teardown controllers
//!
//! This crate provides:
//! - ResourceClient trait: typed get/list/delete/update access per kind
//! - MemoryStore: in-memory backend with finalizer, resourceVersion and
//!   ownerReference garbage-collection semantics
//! - Secondary indices maintained on every write
//! - Event and requeue broadcast channels for controllers

pub mod client;
mod index;
pub mod memory;
pub mod selector;
mod stats;

// Re-export commonly used types
pub use client::{DeleteOptions, IndexFn, Preconditions, PropagationPolicy, ResourceClient};
pub use memory::{MemoryClient, MemoryStore, RequeueRequest, StoreConfig};
pub use selector::LabelSelector;
pub use stats::CallCounts;
