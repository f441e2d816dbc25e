//! Local input activity counters, bucketed per capture.
//!
//! Input hooks call the `record_*` methods at whatever rate the OS delivers
//! events; each call is a counter bump under a short lock. The capture cycle
//! closes the current bucket with [`ActivityAggregator::snapshot_and_reset`]
//! right before building its upload, so buckets and captures pair 1:1.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::models::ActivityBucket;

#[derive(Debug)]
struct BucketState {
    window_start: DateTime<Utc>,
    keystrokes: u64,
    clicks: u64,
    distance: f64,
}

impl BucketState {
    fn fresh(at: DateTime<Utc>) -> Self {
        Self {
            window_start: at,
            keystrokes: 0,
            clicks: 0,
            distance: 0.0,
        }
    }

    fn to_bucket(&self, window_end: DateTime<Utc>) -> ActivityBucket {
        ActivityBucket {
            window_start: self.window_start,
            window_end,
            keystroke_count: self.keystrokes,
            mouse_click_count: self.clicks,
            mouse_distance: self.distance,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ActivityAggregator {
    inner: Arc<Mutex<BucketState>>,
}

impl Default for ActivityAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityAggregator {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BucketState::fresh(at))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record_keystroke(&self) {
        self.record_keystrokes(1);
    }

    /// Batched form for hosts that coalesce events before forwarding them.
    pub fn record_keystrokes(&self, count: u64) {
        let mut state = self.lock();
        state.keystrokes = state.keystrokes.saturating_add(count);
    }

    pub fn record_click(&self) {
        self.record_clicks(1);
    }

    pub fn record_clicks(&self, count: u64) {
        let mut state = self.lock();
        state.clicks = state.clicks.saturating_add(count);
    }

    /// Negative or non-finite distances are ignored.
    pub fn record_mouse_move(&self, distance: f64) {
        if !distance.is_finite() || distance <= 0.0 {
            return;
        }
        self.lock().distance += distance;
    }

    pub fn snapshot_and_reset(&self) -> ActivityBucket {
        self.snapshot_and_reset_at(Utc::now())
    }

    /// Closes the current bucket at `now` and opens the next one there, so
    /// consecutive buckets are contiguous.
    pub fn snapshot_and_reset_at(&self, now: DateTime<Utc>) -> ActivityBucket {
        let mut state = self.lock();
        let window_end = now.max(state.window_start);
        let bucket = state.to_bucket(window_end);
        *state = BucketState::fresh(window_end);
        bucket
    }

    /// Read-only view of the open bucket, for status reporting.
    pub fn peek(&self) -> ActivityBucket {
        self.lock().to_bucket(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn snapshot_resets_counters_and_chains_windows() {
        let start = Utc::now();
        let aggregator = ActivityAggregator::starting_at(start);
        aggregator.record_keystroke();
        aggregator.record_keystroke();
        aggregator.record_click();
        aggregator.record_mouse_move(12.5);
        aggregator.record_mouse_move(-4.0);
        aggregator.record_mouse_move(f64::NAN);

        let first_end = start + Duration::seconds(60);
        let first = aggregator.snapshot_and_reset_at(first_end);
        assert_eq!(first.window_start, start);
        assert_eq!(first.window_end, first_end);
        assert_eq!(first.keystroke_count, 2);
        assert_eq!(first.mouse_click_count, 1);
        assert_eq!(first.mouse_distance, 12.5);

        let second = aggregator.snapshot_and_reset_at(first_end + Duration::seconds(60));
        assert_eq!(second.window_start, first_end);
        assert!(second.is_idle());
    }

    #[test]
    fn clock_going_backwards_never_inverts_a_window() {
        let start = Utc::now();
        let aggregator = ActivityAggregator::starting_at(start);
        let bucket = aggregator.snapshot_and_reset_at(start - Duration::seconds(5));
        assert!(bucket.window_end >= bucket.window_start);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let aggregator = ActivityAggregator::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        aggregator.record_keystroke();
                        aggregator.record_click();
                    }
                })
            })
            .collect();

        let mut keystrokes = 0;
        for _ in 0..10 {
            keystrokes += aggregator.snapshot_and_reset().keystroke_count;
        }
        for handle in handles {
            handle.join().unwrap();
        }
        keystrokes += aggregator.snapshot_and_reset().keystroke_count;

        assert_eq!(keystrokes, 8_000);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Key,
        Click,
        Move(u16),
        Snapshot,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Key),
            3 => Just(Op::Click),
            3 => (1u16..500).prop_map(Op::Move),
            1 => Just(Op::Snapshot),
        ]
    }

    proptest! {
        #[test]
        fn buckets_partition_all_events(ops in proptest::collection::vec(op(), 0..400)) {
            let start = Utc::now();
            let aggregator = ActivityAggregator::starting_at(start);
            let mut clock = start;
            let mut buckets = Vec::new();
            let (mut keys, mut clicks, mut distance) = (0u64, 0u64, 0f64);

            for op in ops {
                match op {
                    Op::Key => { aggregator.record_keystroke(); keys += 1; }
                    Op::Click => { aggregator.record_click(); clicks += 1; }
                    Op::Move(d) => { aggregator.record_mouse_move(f64::from(d)); distance += f64::from(d); }
                    Op::Snapshot => {
                        clock += Duration::seconds(1);
                        buckets.push(aggregator.snapshot_and_reset_at(clock));
                    }
                }
            }
            clock += Duration::seconds(1);
            buckets.push(aggregator.snapshot_and_reset_at(clock));

            prop_assert_eq!(buckets.iter().map(|b| b.keystroke_count).sum::<u64>(), keys);
            prop_assert_eq!(buckets.iter().map(|b| b.mouse_click_count).sum::<u64>(), clicks);
            prop_assert_eq!(buckets.iter().map(|b| b.mouse_distance).sum::<f64>(), distance);
            for pair in buckets.windows(2) {
                prop_assert_eq!(pair[0].window_end, pair[1].window_start);
            }
        }
    }
}
