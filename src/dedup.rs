//! Time-windowed, key-grouped event deduplication (spec.md §4.10): a pure
//! batch operation plus a lock-protected stream buffer that force-flushes
//! rather than drops when it fills.
//!
//! The buffer's "lock, snapshot, release, then do the slow work" shape is
//! the same discipline the teacher applies everywhere it touches its
//! `Arc<RwLock<KnowledgeBase>>` (`persistence::save_kb`,
//! `nlu/mod.rs::apply_entities_to_kb`'s read/write phase split).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::types::CanonicalEvent;

struct Group {
    first: CanonicalEvent,
    first_ts: DateTime<Utc>,
    latest_ts: DateTime<Utc>,
    count: u32,
}

/// Groups `events` by `"{root}.{category}"`, collapsing runs where a
/// subsequent event's timestamp falls within `window` of its group's first
/// timestamp. Multiple groups per key are permitted across windows.
/// Output order is first-occurrence order of groups.
pub fn dedup(events: Vec<CanonicalEvent>, window: Duration) -> Vec<CanonicalEvent> {
    let mut order: Vec<String> = Vec::new();
    // Each key maps to a stack of groups opened over time; only the most
    // recent is a candidate for extension, earlier ones are already closed
    // by a subsequent out-of-window event for the same key.
    let mut open: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Group)> = Vec::new();

    for event in events {
        let key = format!("{}.{}", event.root, event.category);
        let extend = open.get(&key).and_then(|&idx| {
            let (_, group) = &groups[idx];
            if event.timestamp - group.first_ts <= window {
                Some(idx)
            } else {
                None
            }
        });

        match extend {
            Some(idx) => {
                let (_, group) = &mut groups[idx];
                group.count += 1;
                if event.timestamp > group.latest_ts {
                    group.latest_ts = event.timestamp;
                }
            }
            None => {
                let idx = groups.len();
                let first_ts = event.timestamp;
                groups.push((
                    key.clone(),
                    Group {
                        first: event,
                        first_ts,
                        latest_ts: first_ts,
                        count: 1,
                    },
                ));
                open.insert(key.clone(), idx);
                order.push(key);
            }
        }
    }

    let mut by_first_order: Vec<(String, Group)> = groups;
    // `order` already reflects first-occurrence order of *distinct groups*
    // (a new group per reopened window), one entry per push above, so the
    // vector is already in the right order — no extra sort needed.
    let _ = &order;

    by_first_order
        .drain(..)
        .map(|(_, group)| emit(group))
        .collect()
}

fn emit(group: Group) -> CanonicalEvent {
    let mut event = group.first;
    event.timestamp = group.first_ts;
    if group.count >= 2 {
        let duration = group.latest_ts - group.first_ts;
        event.summary = format!(
            "{} (x{} in {})",
            event.summary,
            group.count,
            format_duration(duration)
        );
        event.count = group.count;
    }
    event
}

fn format_duration(d: Duration) -> String {
    let millis = d.num_milliseconds();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let total_secs = millis / 1000;
    if total_secs < 60 {
        return format!("{total_secs}s");
    }
    let minutes = total_secs / 60;
    let secs = total_secs % 60;
    if secs == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m{secs}s")
    }
}

/// A lock-protected list of pending events plus a lazy flush timer,
/// started only on the first event into an empty buffer and
/// stopped-and-cleared on flush — an idle pipeline holds no timer.
pub struct StreamBuffer {
    window: Duration,
    max_size: usize,
    pending: Mutex<Vec<CanonicalEvent>>,
    timer: Mutex<Option<oneshot::Sender<()>>>,
    timer_fired: Arc<tokio::sync::Notify>,
}

impl StreamBuffer {
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            window,
            max_size,
            pending: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
            timer_fired: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Appends `event`. Returns `true` when `max_size > 0` and the pending
    /// list has just reached `max_size` — the caller's signal to flush
    /// immediately rather than wait for the timer (spec.md P9: no `add`
    /// sequence may leave the pending list longer than `max_size` before a
    /// flush occurs).
    pub fn add(&self, event: CanonicalEvent) -> bool {
        let mut pending = self.pending.lock();
        let was_empty = pending.is_empty();
        pending.push(event);
        let hit_cap = self.max_size > 0 && pending.len() >= self.max_size;
        drop(pending);

        if was_empty {
            self.arm_timer();
        }
        hit_cap
    }

    fn arm_timer(&self) {
        let (tx, rx) = oneshot::channel();
        *self.timer.lock() = Some(tx);
        let window = self.window;
        let notify = self.timer_fired.clone();
        tokio::spawn(async move {
            let wait = StdDuration::from_millis(window.num_milliseconds().max(0) as u64);
            tokio::select! {
                _ = tokio::time::sleep_until(Instant::now() + wait) => {
                    notify.notify_one();
                }
                _ = rx => {}
            }
        });
    }

    /// A future that resolves when the flush timer fires. A caller should
    /// `select!` on this alongside other events; when no timer is armed
    /// this simply never resolves until one is (mirrors a nil channel in a
    /// Go `select`, per spec.md §4.10's `flushCh`).
    pub async fn flush_due(&self) {
        self.timer_fired.notified().await;
    }

    /// Snapshots and clears the pending list under the lock, stops the
    /// timer, then — outside the lock — dedups the snapshot and returns
    /// it for the caller to write out.
    pub fn flush(&self) -> Vec<CanonicalEvent> {
        let snapshot = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        if let Some(tx) = self.timer.lock().take() {
            let _ = tx.send(());
        }
        if snapshot.is_empty() {
            return snapshot;
        }
        dedup(snapshot, self.window)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn event(root: &str, category: &str, ts: DateTime<Utc>, summary: &str) -> CanonicalEvent {
        CanonicalEvent {
            root: root.to_string(),
            category: category.to_string(),
            severity: Severity::Error,
            timestamp: ts,
            summary: summary.to_string(),
            confidence: 0.9,
            raw: summary.to_string(),
            count: 0,
        }
    }

    #[test]
    fn collapses_events_within_window_and_formats_count_suffix() {
        let base = Utc::now();
        let events: Vec<_> = (0..10)
            .map(|i| {
                event(
                    "ERROR",
                    "connection_failure",
                    base + Duration::milliseconds(i * 100),
                    "connection refused to db-primary",
                )
            })
            .collect();
        let out = dedup(events, Duration::seconds(5));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 10);
        assert_eq!(out[0].timestamp, base);
        assert_eq!(out[0].summary, "connection refused to db-primary (x10 in 900ms)");
    }

    #[test]
    fn no_event_is_lost_or_double_counted() {
        // Property P4: sum(count over emitted groups) == len(input), where
        // an uncollapsed event's "count" contributes 1 even though the
        // wire-level Count field stays 0 (spec.md: Count 0 means
        // unduplicated, 1 event).
        let base = Utc::now();
        let mut events = Vec::new();
        for i in 0..5 {
            events.push(event("ERROR", "a", base + Duration::milliseconds(i * 10), "a"));
        }
        for i in 0..3 {
            events.push(event("REQUEST", "success", base + Duration::seconds(i * 100), "b"));
        }
        let total_in = events.len();
        let out = dedup(events, Duration::seconds(1));
        let total_out: u32 = out.iter().map(|e| if e.count >= 2 { e.count } else { 1 }).sum();
        assert_eq!(total_out as usize, total_in);
    }

    #[test]
    fn distinct_categories_never_merge() {
        let base = Utc::now();
        let events = vec![
            event("ERROR", "a", base, "a"),
            event("ERROR", "b", base, "b"),
            event("REQUEST", "a", base, "c"),
        ];
        let out = dedup(events, Duration::seconds(60));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn events_outside_window_start_a_new_group() {
        let base = Utc::now();
        let events = vec![
            event("ERROR", "a", base, "first"),
            event("ERROR", "a", base + Duration::seconds(10), "second"),
        ];
        let out = dedup(events, Duration::seconds(5));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].count, 0);
        assert_eq!(out[1].count, 0);
    }

    #[test]
    fn duration_formatting_boundaries() {
        assert_eq!(format_duration(Duration::milliseconds(900)), "900ms");
        assert_eq!(format_duration(Duration::seconds(5)), "5s");
        assert_eq!(format_duration(Duration::seconds(65)), "1m5s");
        assert_eq!(format_duration(Duration::seconds(120)), "2m");
    }

    #[tokio::test]
    async fn add_signals_flush_at_max_size() {
        let buffer = StreamBuffer::new(Duration::seconds(60), 5);
        let base = Utc::now();
        for i in 0..4 {
            assert!(!buffer.add(event("ERROR", &format!("k{i}"), base, "x")));
        }
        assert!(buffer.add(event("ERROR", "k4", base, "x")));
        let flushed = buffer.flush();
        assert_eq!(flushed.len(), 5);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn flush_of_empty_buffer_is_a_no_op() {
        let buffer = StreamBuffer::new(Duration::seconds(60), 0);
        assert!(buffer.flush().is_empty());
    }
}
