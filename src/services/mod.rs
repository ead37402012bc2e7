//! Pipeline services, leaves first: storage and metadata adapters, the resize
//! transform, then classifier, planner, fan-out engine and coordinator.

pub mod classifier;
pub mod coordinator;
pub mod fanout;
pub mod metadata_store;
pub mod object_store;
pub mod planner;
pub mod run_guard;
pub mod transform;
