//! Running totals behind [`Tell::count`](crate::Tell::count).
//!
//! Totals are keyed by (span id, attribute name) and live in a process-wide
//! map with a capped number of entries that retains the most recently
//! touched ones, so abandoned spans cannot grow the map without bound.

use std::borrow::Cow;
use std::collections::{HashMap, LinkedList};
use std::sync::{Mutex, OnceLock, PoisonError};

use opentelemetry::trace::{SpanId, TraceContextExt};
use opentelemetry::KeyValue;

use crate::scope;

const CAPACITY: usize = 1024;

pub(crate) fn record(name: &Cow<'static, str>, delta: i64) -> i64 {
    let cx = scope::current_context();
    let span = cx.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return delta;
    }
    let key = CountKey {
        span: span_context.span_id(),
        name: name.clone(),
    };
    let total = counts()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .add(key, delta);
    span.set_attribute(KeyValue::new(name.clone(), total));
    total
}

fn counts() -> &'static Mutex<RecentCounts> {
    static COUNTS: OnceLock<Mutex<RecentCounts>> = OnceLock::new();
    COUNTS.get_or_init(|| Mutex::new(RecentCounts::with_capacity(CAPACITY)))
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CountKey {
    span: SpanId,
    name: Cow<'static, str>,
}

/// A hash map with a capped number of totals that retains the most recently
/// touched entries.
#[derive(Debug)]
struct RecentCounts {
    map: HashMap<CountKey, i64>,
    evict_list: LinkedList<CountKey>,
    capacity: usize,
}

impl RecentCounts {
    fn with_capacity(capacity: usize) -> Self {
        RecentCounts {
            map: HashMap::new(),
            evict_list: LinkedList::new(),
            capacity,
        }
    }

    /// Adds `delta` to the total for `key` and returns the new total,
    /// refreshing the key's position in the eviction line.
    fn add(&mut self, key: CountKey, delta: i64) -> i64 {
        if let Some(total) = self.map.get_mut(&key) {
            *total += delta;
            let total = *total;
            self.move_key_to_front(&key);
            return total;
        }

        self.evict_list.push_front(key.clone());
        self.map.insert(key, delta);

        if self.evict_list.len() > self.capacity {
            self.remove_oldest();
        }
        delta
    }

    fn move_key_to_front(&mut self, key: &CountKey) {
        if self.evict_list.front() == Some(key) {
            return;
        }
        let key_idx = self
            .evict_list
            .iter()
            .position(|entry| entry == key)
            .expect("key must exist in the eviction line, this is a bug");
        let mut tail = self.evict_list.split_off(key_idx);
        if let Some(entry) = tail.pop_front() {
            self.evict_list.push_front(entry);
        }
        self.evict_list.append(&mut tail);
    }

    fn remove_oldest(&mut self) {
        if let Some(oldest) = self.evict_list.pop_back() {
            self.map.remove(&oldest);
        }
    }
}
