//! # Storage Module
//!
//! Local, in-memory side of the sync layer. The remote store is the system of
//! record; everything here is a cache that is replaced on re-fetch, extended on
//! confirmed inserts and evicted when the session ends.

pub mod entity_store;

pub use entity_store::{ChildCollections, EntityStore, StoreSnapshot};
