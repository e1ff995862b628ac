//! In-process counters backing the Risk Manager's per-strategy caps
//! (`spec.md` §4.2 check 6). Scoped to a single replica: the spec's
//! concurrency model requires no cross-worker shared mutable state
//! beyond the State Store, so these counts are an approximation that
//! resets on restart rather than a durable, cross-replica quota.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

pub struct StrategyActivityTracker {
    orders_this_minute: RwLock<HashMap<String, VecDeque<DateTime<Utc>>>>,
    open_orders: RwLock<HashMap<String, u32>>,
}

impl StrategyActivityTracker {
    pub fn new() -> Self {
        Self {
            orders_this_minute: RwLock::new(HashMap::new()),
            open_orders: RwLock::new(HashMap::new()),
        }
    }

    /// Records a dispatch attempt and returns how many this strategy has
    /// made in the trailing 60 seconds, including this one.
    pub fn record_order_attempt(&self, strategy_id: &str, now: DateTime<Utc>) -> u32 {
        let mut tracker = self.orders_this_minute.write().unwrap();
        let window = tracker.entry(strategy_id.to_string()).or_default();
        window.push_back(now);
        let cutoff = now - chrono::Duration::seconds(60);
        while matches!(window.front(), Some(ts) if *ts < cutoff) {
            window.pop_front();
        }
        window.len() as u32
    }

    pub fn open_order_count(&self, strategy_id: &str) -> u32 {
        *self.open_orders.read().unwrap().get(strategy_id).unwrap_or(&0)
    }

    pub fn increment_open_orders(&self, strategy_id: &str) {
        *self
            .open_orders
            .write()
            .unwrap()
            .entry(strategy_id.to_string())
            .or_insert(0) += 1;
    }

    pub fn decrement_open_orders(&self, strategy_id: &str) {
        if let Some(count) = self.open_orders.write().unwrap().get_mut(strategy_id) {
            *count = count.saturating_sub(1);
        }
    }
}

impl Default for StrategyActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_window_evicts_entries_older_than_a_minute() {
        let tracker = StrategyActivityTracker::new();
        let t0 = Utc::now();
        assert_eq!(tracker.record_order_attempt("ema", t0), 1);
        assert_eq!(
            tracker.record_order_attempt("ema", t0 + chrono::Duration::seconds(10)),
            2
        );
        let later = t0 + chrono::Duration::seconds(70);
        assert_eq!(tracker.record_order_attempt("ema", later), 1);
    }

    #[test]
    fn open_orders_increment_and_decrement() {
        let tracker = StrategyActivityTracker::new();
        tracker.increment_open_orders("ema");
        tracker.increment_open_orders("ema");
        assert_eq!(tracker.open_order_count("ema"), 2);
        tracker.decrement_open_orders("ema");
        assert_eq!(tracker.open_order_count("ema"), 1);
    }
}
