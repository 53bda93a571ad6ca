//! Deadline awareness.
//!
//! Server handlers usually run under a deadline. When a handler logs halfway through, it is very
//! useful to know how much of its budget is left - and to get a louder signal the first time an
//! operation crosses into its final stretch. This enricher observes the ambient
//! [`DeadlineHandle`](crate::context::DeadlineHandle) and annotates events:
//!
//! * `deadline.remaining_ms` whenever a deadline exists,
//! * `deadline.exceeded` and `deadline.exceeded_by_ms` once it has passed,
//! * `deadline.approaching` when the warning threshold is crossed, and
//! * `deadline.first_warning` exactly once per operation, upgrading that event to `Warning`.
//!
//! Per-operation state lives in a bounded LRU+TTL cache. The "already warned" bit deliberately
//! does *not* live there: it must survive LRU eviction for as long as the operation does, or a
//! busy process would emit duplicate first warnings. It sits in a second map that is only
//! trimmed by TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context;
use crate::event::{Level, LogEvent};

use super::Enrich;

/// Default bound on the per-operation state cache.
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Default TTL for per-operation state.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// When to start warning.
#[derive(Copy, Clone, Debug)]
pub enum Threshold {
    /// Warn when `remaining / total <= fraction` (0..1).
    Percent(f64),
    /// Warn when `remaining <= duration`.
    Absolute(Duration),
}

struct OperationState {
    // Captured the first time the operation is seen; `Percent` needs the full budget.
    first_seen: Instant,
    deadline: Instant,
    last_access: Instant,
}

struct State {
    operations: HashMap<u64, OperationState>,
    // key -> when the first warning was flagged. TTL-trimmed only; never LRU-evicted.
    flagged: HashMap<u64, Instant>,
    last_sweep: Instant,
}

/// The deadline-awareness enricher. See the module docs.
pub struct DeadlineEnricher {
    threshold: Threshold,
    max_size: usize,
    ttl: Duration,
    state: Mutex<State>,
}

impl DeadlineEnricher {
    /// Warns when the remaining share of the budget drops to `fraction` (e.g. `0.1` = last 10%).
    pub fn percent(fraction: f64) -> Self {
        Self::new(Threshold::Percent(fraction))
    }

    /// Warns when the remaining time drops to `duration`.
    pub fn absolute(duration: Duration) -> Self {
        Self::new(Threshold::Absolute(duration))
    }

    /// Builds with an explicit threshold.
    pub fn new(threshold: Threshold) -> Self {
        DeadlineEnricher {
            threshold,
            max_size: DEFAULT_CACHE_SIZE,
            ttl: DEFAULT_TTL,
            state: Mutex::new(State {
                operations: HashMap::new(),
                flagged: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Adjusts the state cache bound and TTL.
    pub fn with_cache(mut self, max_size: usize, ttl: Duration) -> Self {
        self.max_size = max_size.max(1);
        self.ttl = ttl;
        self
    }

    fn warning_due(&self, remaining: Duration, total: Duration) -> bool {
        match self.threshold {
            Threshold::Percent(f) => {
                let total = total.as_secs_f64();
                total > 0.0 && remaining.as_secs_f64() / total <= f
            }
            Threshold::Absolute(t) => remaining <= t,
        }
    }
}

impl Enrich for DeadlineEnricher {
    fn enrich(&self, event: &mut LogEvent) {
        let handle = match context::current_deadline() {
            Some(h) => h,
            None => return,
        };
        let deadline = match handle.deadline() {
            Some(d) => d,
            None => return,
        };
        let key = handle.key();
        let now = Instant::now();

        let mut state = self.state.lock();
        if now.duration_since(state.last_sweep) > self.ttl {
            let ttl = self.ttl;
            state.operations.retain(|_, op| now.duration_since(op.last_access) <= ttl);
            state.flagged.retain(|_, at| now.duration_since(*at) <= ttl);
            state.last_sweep = now;
        }

        let first_seen = {
            let entry = state.operations.entry(key).or_insert(OperationState {
                first_seen: now,
                deadline,
                last_access: now,
            });
            entry.last_access = now;
            // Re-inserted after an eviction mid-operation: the budget restarts from re-insert,
            // the warned bit does not (it lives in `flagged`).
            entry.first_seen
        };
        if state.operations.len() > self.max_size {
            let victim = state
                .operations
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by_key(|(_, op)| op.last_access)
                .map(|(k, _)| *k);
            if let Some(victim) = victim {
                state.operations.remove(&victim);
            }
        }

        if deadline <= now {
            let over = now.duration_since(deadline);
            event.set_property("deadline.remaining_ms", 0u64);
            event.set_property("deadline.exceeded", true);
            event.set_property("deadline.exceeded_by_ms", over.as_millis() as u64);
            return;
        }

        let remaining = deadline.duration_since(now);
        event.set_property("deadline.remaining_ms", remaining.as_millis() as u64);

        // Cancellation alone is not expiry; a cancelled-but-unexpired operation only gets the
        // remaining time like everyone else.
        let total = deadline.duration_since(first_seen);
        if self.warning_due(remaining, total) {
            event.set_property("deadline.approaching", true);
            if !state.flagged.contains_key(&key) {
                state.flagged.insert(key, now);
                event.set_property("deadline.first_warning", true);
                if event.level < Level::Warning {
                    event.level = Level::Warning;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread::sleep;

    use crate::context::{push_deadline, OperationDeadline};
    use crate::event::Value;

    use super::*;

    fn event() -> LogEvent {
        LogEvent::new(Level::Information, "working")
    }

    #[test]
    fn no_deadline_no_properties() {
        let enricher = DeadlineEnricher::absolute(Duration::from_millis(50));
        let mut e = event();
        enricher.enrich(&mut e);
        assert!(!e.has_property("deadline.remaining_ms"));
    }

    #[test]
    fn remaining_is_always_set() {
        let enricher = DeadlineEnricher::absolute(Duration::from_millis(10));
        let _g = push_deadline(OperationDeadline::starting_now(1, Duration::from_secs(60)));
        let mut e = event();
        enricher.enrich(&mut e);
        assert!(e.has_property("deadline.remaining_ms"));
        assert!(!e.has_property("deadline.approaching"));
        assert!(!e.has_property("deadline.exceeded"));
    }

    #[test]
    fn first_warning_upgrades_level_once() {
        let enricher = DeadlineEnricher::absolute(Duration::from_secs(120));
        let _g = push_deadline(OperationDeadline::starting_now(2, Duration::from_secs(60)));

        let mut first = event();
        enricher.enrich(&mut first);
        assert_eq!(first.property("deadline.approaching"), Some(&Value::Bool(true)));
        assert_eq!(first.property("deadline.first_warning"), Some(&Value::Bool(true)));
        assert_eq!(first.level, Level::Warning);

        let mut second = event();
        enricher.enrich(&mut second);
        assert_eq!(second.property("deadline.approaching"), Some(&Value::Bool(true)));
        assert!(!second.has_property("deadline.first_warning"));
        assert_eq!(second.level, Level::Information);
    }

    #[test]
    fn exceeded_deadline() {
        let enricher = DeadlineEnricher::absolute(Duration::from_millis(1));
        let _g = push_deadline(OperationDeadline::starting_now(3, Duration::from_millis(5)));
        sleep(Duration::from_millis(20));
        let mut e = event();
        enricher.enrich(&mut e);
        assert_eq!(e.property("deadline.exceeded"), Some(&Value::Bool(true)));
        assert!(e.has_property("deadline.exceeded_by_ms"));
        assert_eq!(e.property("deadline.remaining_ms"), Some(&Value::Uint(0)));
    }

    #[test]
    fn cancelled_but_not_expired_is_not_exceeded() {
        let enricher = DeadlineEnricher::absolute(Duration::from_millis(1));
        let handle = OperationDeadline::starting_now(4, Duration::from_secs(60));
        handle.cancel();
        let _g = push_deadline(handle);
        let mut e = event();
        enricher.enrich(&mut e);
        assert!(!e.has_property("deadline.exceeded"));
        assert!(e.has_property("deadline.remaining_ms"));
    }

    #[test]
    fn first_warning_survives_lru_eviction() {
        // Cache bound of 2, six concurrent operations: state slots get evicted, the
        // warned bit must not.
        let enricher =
            DeadlineEnricher::absolute(Duration::from_secs(120)).with_cache(2, Duration::from_secs(60));
        let handles: Vec<Arc<OperationDeadline>> = (0..6)
            .map(|i| OperationDeadline::starting_now(100 + i, Duration::from_secs(60)))
            .collect();

        let mut first_warnings = 0;
        for handle in &handles {
            let _g = push_deadline(handle.clone());
            let mut e = event();
            enricher.enrich(&mut e);
            if e.has_property("deadline.first_warning") {
                first_warnings += 1;
            }
        }
        assert_eq!(first_warnings, 6);

        // Second pass over the (by now mostly evicted) handles: no new first warnings.
        for handle in &handles {
            let _g = push_deadline(handle.clone());
            let mut e = event();
            enricher.enrich(&mut e);
            assert!(!e.has_property("deadline.first_warning"));
            assert_eq!(e.property("deadline.approaching"), Some(&Value::Bool(true)));
        }
    }
}
