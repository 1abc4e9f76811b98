// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// A request that has been submitted, and whose caller is still waiting for the reply.
#[derive(Clone, Debug)]
pub struct Pending {
    /// Sequence tag sent on the wire (empty when sequence tagging is off).
    pub tag: String,
    pub submitted: Instant,
}

impl Pending {
    pub fn new(tag: String) -> Self {
        Self {
            tag,
            submitted: Instant::now(),
        }
    }
}

/// In-flight request registry, keyed by request id.
///
/// Callers insert their entry before handing a command to the dispatcher, and remove it once
/// they stop waiting: either after the reply arrived, or after their deadline expired. The
/// dispatcher only transmits commands that are still registered, which is how an abandoned
/// request gets cancelled.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<u64, Pending>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry. Returns `false`, leaving the registry untouched, if `id` is
    /// already registered.
    pub fn register(&self, id: u64, pending: Pending) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, pending);
        true
    }

    pub fn take(&self, id: u64) -> Option<Pending> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the in-flight set, as (id, pending) pairs ordered by id.
    pub fn in_flight(&self) -> Vec<(u64, Pending)> {
        let mut list: Vec<(u64, Pending)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_take() {
        let reg = Registry::new();
        assert!(reg.is_empty());
        assert!(reg.register(1, Pending::new("0000000000000001".to_string())));
        assert!(reg.contains(1));
        assert_eq!(reg.len(), 1);
        let p = reg.take(1).unwrap();
        assert_eq!(p.tag, "0000000000000001");
        assert!(!reg.contains(1));
        assert!(reg.take(1).is_none());
    }

    #[test]
    fn test_duplicate_register_is_refused() {
        let reg = Registry::new();
        assert!(reg.register(7, Pending::new("A".to_string())));
        assert!(!reg.register(7, Pending::new("B".to_string())));
        assert_eq!(reg.take(7).unwrap().tag, "A");
    }

    #[test]
    fn test_in_flight_is_sorted() {
        let reg = Registry::new();
        for id in &[5u64, 2, 9] {
            reg.register(*id, Pending::new(format!("{:016X}", id)));
        }
        let ids: Vec<u64> = reg.in_flight().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_concurrent_register() {
        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        assert!(reg.register(t * 1000 + i, Pending::new(String::new())));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 800);
    }
}
