//! Round-robin selector over a fixed set of items.
//!
//! Used to spread pooled clients over the provisioned proxy endpoints. The
//! cursor is guarded by a single mutex; `next` never blocks on anything else.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Ring<T> {
    items: Vec<T>,
    cursor: usize,
}

/// Cycles indefinitely through a configured set of items in stable order.
#[derive(Debug)]
pub struct Balancer<T> {
    ring: Mutex<Ring<T>>,
}

impl<T> Default for Balancer<T> {
    fn default() -> Self {
        Self {
            ring: Mutex::new(Ring {
                items: Vec::new(),
                cursor: 0,
            }),
        }
    }
}

impl<T: Clone> Balancer<T> {
    /// Empty balancer; `next` returns `None` until configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balancer already configured with `items`.
    pub fn with_items(items: Vec<T>) -> Self {
        let b = Self::new();
        b.configure(items);
        b
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        // A panic while holding the lock cannot leave the ring inconsistent.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the cycle; the cursor restarts at the first item.
    pub fn configure(&self, items: Vec<T>) {
        let mut ring = self.lock();
        ring.items = items;
        ring.cursor = 0;
    }

    /// Next item in the cycle, or `None` if nothing is configured.
    pub fn next(&self) -> Option<T> {
        let mut ring = self.lock();
        if ring.items.is_empty() {
            return None;
        }
        let item = ring.items[ring.cursor].clone();
        ring.cursor = (ring.cursor + 1) % ring.items.len();
        Some(item)
    }

    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn unconfigured_returns_none() {
        let b: Balancer<u32> = Balancer::new();
        assert_eq!(b.size(), 0);
        assert!(b.next().is_none());
    }

    #[test]
    fn cycles_in_configured_order() {
        let b = Balancer::with_items(vec!["a", "b", "c"]);
        let first: Vec<_> = (0..3).map(|_| b.next().unwrap()).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(b.next(), Some("a"));
        assert_eq!(b.size(), 3);
    }

    #[test]
    fn configure_resets_cycle() {
        let b = Balancer::with_items(vec![1, 2, 3]);
        b.next();
        b.next();
        b.configure(vec![7, 8]);
        assert_eq!(b.next(), Some(7));
        assert_eq!(b.next(), Some(8));
        assert_eq!(b.next(), Some(7));
        b.configure(Vec::new());
        assert!(b.next().is_none());
    }

    #[test]
    fn concurrent_callers_share_one_cycle() {
        let b = Arc::new(Balancer::with_items(vec![0usize, 1, 2, 3]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || (0..100).map(|_| b.next().unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for h in handles {
            for item in h.join().unwrap() {
                *counts.entry(item).or_default() += 1;
            }
        }
        // 400 calls over 4 items: every item exactly 100 times.
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&n| n == 100));
    }
}
