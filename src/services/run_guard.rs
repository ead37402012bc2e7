//! In-process de-duplication of concurrent runs for the same object generation.

use crate::models::event::SourceAsset;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

#[derive(Clone, Default, Debug)]
pub struct RunGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Held for the lifetime of a run; releases the key on drop.
#[derive(Debug)]
pub struct RunTicket {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a run for this object generation is already in flight.
    pub fn try_acquire(&self, asset: &SourceAsset) -> Option<RunTicket> {
        let key = format!(
            "{}#{}",
            asset.location,
            asset.generation.as_deref().unwrap_or("")
        );
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(RunTicket {
            key,
            in_flight: self.in_flight.clone(),
        })
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
