//! Ambient, task-scoped log context.
//!
//! Some properties belong to everything a task does for a while - a request id, a tenant, the
//! deadline of the operation in flight. Instead of threading them through every call, a scope is
//! pushed onto the current thread and the `FromLogContext` enricher (and the deadline enricher)
//! pick it up. Scopes are RAII guards; dropping the guard pops the scope.
//!
//! ```rust
//! let _scope = mtlog::context::push_property("RequestId", "r-42");
//! // every event logged on this thread now carries RequestId
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::event::Value;

thread_local! {
    static PROPERTIES: RefCell<Vec<(String, Value)>> = RefCell::new(Vec::new());
    static DEADLINES: RefCell<Vec<Arc<dyn DeadlineHandle>>> = RefCell::new(Vec::new());
}

/// Pops its pushed properties when dropped. Not sendable; scopes are per-thread.
pub struct ScopeGuard {
    count: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        PROPERTIES.with(|props| {
            let mut props = props.borrow_mut();
            let keep = props.len().saturating_sub(self.count);
            props.truncate(keep);
        });
    }
}

/// Pushes one ambient property onto the current thread.
pub fn push_property<N: Into<String>, V: Into<Value>>(name: N, value: V) -> ScopeGuard {
    push_properties(vec![(name.into(), value.into())])
}

/// Pushes several ambient properties at once.
pub fn push_properties(pairs: Vec<(String, Value)>) -> ScopeGuard {
    let count = pairs.len();
    PROPERTIES.with(|props| props.borrow_mut().extend(pairs));
    ScopeGuard {
        count,
        _not_send: PhantomData,
    }
}

/// A copy of the current thread's ambient properties, innermost last.
pub fn snapshot() -> Vec<(String, Value)> {
    PROPERTIES.with(|props| props.borrow().clone())
}

/// An opaque cancellation/deadline handle supplied by the host.
///
/// The pipeline never cancels anything through it; the deadline enricher only *observes* it. The
/// `key` must be stable and unique for the lifetime of the operation the handle describes - it is
/// what the enricher's caches are keyed by.
pub trait DeadlineHandle: Send + Sync {
    /// Stable identity of the operation.
    fn key(&self) -> u64;
    /// The absolute deadline, if the operation has one.
    fn deadline(&self) -> Option<Instant>;
    /// Has the operation been cancelled, independently of its deadline?
    fn is_cancelled(&self) -> bool;
}

/// Pops its deadline handle when dropped.
pub struct DeadlineGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        DEADLINES.with(|d| {
            d.borrow_mut().pop();
        });
    }
}

/// Installs a deadline handle for the current thread; the innermost handle wins.
pub fn push_deadline(handle: Arc<dyn DeadlineHandle>) -> DeadlineGuard {
    DEADLINES.with(|d| d.borrow_mut().push(handle));
    DeadlineGuard {
        _not_send: PhantomData,
    }
}

/// The innermost deadline handle on the current thread, if any.
pub fn current_deadline() -> Option<Arc<dyn DeadlineHandle>> {
    DEADLINES.with(|d| d.borrow().last().map(Arc::clone))
}

/// A ready-made [`DeadlineHandle`] for hosts that track deadlines as "now plus timeout".
pub struct OperationDeadline {
    key: u64,
    deadline: Instant,
    cancelled: std::sync::atomic::AtomicBool,
}

impl OperationDeadline {
    /// A handle whose deadline is `timeout` from now.
    pub fn starting_now(key: u64, timeout: Duration) -> Arc<Self> {
        Arc::new(OperationDeadline {
            key,
            deadline: Instant::now() + timeout,
            cancelled: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Marks the operation cancelled.
    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl DeadlineHandle for OperationDeadline {
    fn key(&self) -> u64 {
        self.key
    }
    fn deadline(&self) -> Option<Instant> {
        Some(self.deadline)
    }
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_nest_and_pop() {
        assert!(snapshot().is_empty());
        let outer = push_property("A", 1);
        {
            let _inner = push_properties(vec![
                ("B".to_owned(), Value::Int(2)),
                ("C".to_owned(), Value::Int(3)),
            ]);
            let props = snapshot();
            assert_eq!(props.len(), 3);
            assert_eq!(props[2].0, "C");
        }
        assert_eq!(snapshot().len(), 1);
        drop(outer);
        assert!(snapshot().is_empty());
    }

    #[test]
    fn innermost_deadline_wins() {
        assert!(current_deadline().is_none());
        let outer = OperationDeadline::starting_now(1, Duration::from_secs(10));
        let _g1 = push_deadline(outer);
        let inner = OperationDeadline::starting_now(2, Duration::from_secs(5));
        let _g2 = push_deadline(inner);
        assert_eq!(current_deadline().unwrap().key(), 2);
        drop(_g2);
        assert_eq!(current_deadline().unwrap().key(), 1);
    }

    #[test]
    fn cancel_does_not_clear_deadline() {
        let handle = OperationDeadline::starting_now(7, Duration::from_secs(1));
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.deadline().is_some());
    }
}
