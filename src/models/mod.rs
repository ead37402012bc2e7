//! Core data models for the rendition pipeline.
//!
//! Events come in from the storage trigger, renditions describe what to
//! derive, and runs track the fan-out from dispatch to cleanup.

pub mod event;
pub mod metadata;
pub mod object;
pub mod rendition;
pub mod run;
