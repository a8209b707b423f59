#![forbid(unsafe_code)]

//! Tri-state value wrapper and single-threaded deferred settlement.
//!
//! A [`Loadable`] is a value container in exactly one of three states:
//!
//! - [`Loadable::Value`]: a settled, concrete value.
//! - [`Loadable::Error`]: a settled failure, carrying a shared [`LoadError`].
//! - [`Loadable::Pending`]: a still-resolving computation, carrying the
//!   [`Deferred`] that will eventually produce a raw [`Json`] payload.
//!
//! The pending arm is deliberately non-generic: a deferred computation
//! always resolves to the raw payload type, and typed views of a cell
//! (`Loadable<T>`) share the same underlying computation.
//!
//! # Invariants
//!
//! 1. A [`Deferred`] resolves at most once; later `resolve` calls are
//!    ignored and report `false`.
//! 2. Waiters registered before resolution run exactly once, in
//!    registration order, during the `resolve` call.
//! 3. Waiters registered after resolution run immediately.
//! 4. `Loadable` equality: values compare by value; error and pending
//!    states compare by shared identity, never by content.
//!
//! # Failure Modes
//!
//! - A waiter that panics propagates to the caller of `resolve`; remaining
//!   waiters do not run. Waiters in this crate only schedule store tasks
//!   and do not panic.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// The untyped external payload type used throughout the sync engine.
pub type Json = serde_json::Value;

/// A settled failure carried by [`Loadable::Error`].
///
/// Stored behind `Rc` so the same failure can flow through validation and
/// into multiple registrations without cloning the message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    /// Create a new error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            message: message.into(),
        })
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

type Waiter = Box<dyn FnOnce(&Json)>;

struct DeferredInner {
    value: Option<Json>,
    waiters: Vec<Waiter>,
}

/// A single-threaded promise resolving to a raw [`Json`] payload.
///
/// Cloning a `Deferred` creates a new handle to the **same** computation.
pub struct Deferred {
    inner: Rc<RefCell<DeferredInner>>,
}

impl Deferred {
    /// Create an unresolved deferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                value: None,
                waiters: Vec::new(),
            })),
        }
    }

    /// Create a deferred that is already resolved to `value`.
    #[must_use]
    pub fn resolved(value: Json) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                value: Some(value),
                waiters: Vec::new(),
            })),
        }
    }

    /// Resolve the computation. Returns `false` if it was already resolved
    /// (the new value is discarded).
    pub fn resolve(&self, value: Json) -> bool {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            if inner.value.is_some() {
                return false;
            }
            inner.value = Some(value);
            std::mem::take(&mut inner.waiters)
        };
        // Borrow released: waiters may re-enter (peek, register, clone).
        let inner = self.inner.borrow();
        let value = inner.value.as_ref().expect("just resolved");
        let value = value.clone();
        drop(inner);
        for waiter in waiters {
            waiter(&value);
        }
        true
    }

    /// Whether the computation has settled.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    /// The resolved value, if settled.
    #[must_use]
    pub fn peek(&self) -> Option<Json> {
        self.inner.borrow().value.clone()
    }

    /// Run `waiter` when the computation settles (immediately if it
    /// already has).
    pub fn on_resolve(&self, waiter: impl FnOnce(&Json) + 'static) {
        let resolved = { self.inner.borrow().value.clone() };
        match resolved {
            Some(value) => waiter(&value),
            None => self.inner.borrow_mut().waiters.push(Box::new(waiter)),
        }
    }

    /// Shared-identity comparison: two handles to the same computation.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Clone for Deferred {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("resolved", &inner.value.is_some())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// A value container in one of three states: settled value, settled
/// error, or pending asynchronous computation.
///
/// Generic only in the value arm; see the module docs.
pub enum Loadable<T = Json> {
    /// A settled, concrete value.
    Value(T),
    /// A settled failure.
    Error(Rc<LoadError>),
    /// A still-resolving computation.
    Pending(Deferred),
}

impl<T> Loadable<T> {
    /// Shorthand for an error state with a fresh message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(LoadError::new(message))
    }

    #[must_use]
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Borrow the settled value, if this is the value state.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Consume into the settled value, if this is the value state.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The state name, for logs and the wire envelope.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Error(_) => "error",
            Self::Pending(_) => "pending",
        }
    }

    /// Map the value arm, passing error and pending states through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loadable<U> {
        match self {
            Self::Value(v) => Loadable::Value(f(v)),
            Self::Error(e) => Loadable::Error(e),
            Self::Pending(d) => Loadable::Pending(d),
        }
    }
}

impl<T: Clone> Clone for Loadable<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(v) => Self::Value(v.clone()),
            Self::Error(e) => Self::Error(Rc::clone(e)),
            Self::Pending(d) => Self::Pending(d.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Loadable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(&e.message()).finish(),
            Self::Pending(d) => f.debug_tuple("Pending").field(d).finish(),
        }
    }
}

impl<T: PartialEq> PartialEq for Loadable<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => Rc::ptr_eq(a, b),
            (Self::Pending(a), Self::Pending(b)) => a.same(b),
            _ => false,
        }
    }
}

impl<T> From<T> for Loadable<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;

    #[test]
    fn deferred_resolves_once() {
        let d = Deferred::new();
        assert!(!d.is_resolved());
        assert!(d.resolve(json!(1)));
        assert!(d.is_resolved());
        assert_eq!(d.peek(), Some(json!(1)));

        // Second resolve is ignored.
        assert!(!d.resolve(json!(2)));
        assert_eq!(d.peek(), Some(json!(1)));
    }

    #[test]
    fn waiters_run_on_resolve_in_order() {
        let d = Deferred::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = Rc::clone(&order);
            d.on_resolve(move |v| order.borrow_mut().push((tag, v.clone())));
        }
        assert!(order.borrow().is_empty());

        d.resolve(json!("x"));
        let seen = order.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], ("a", json!("x")));
        assert_eq!(seen[2], ("c", json!("x")));
    }

    #[test]
    fn late_waiter_runs_immediately() {
        let d = Deferred::resolved(json!(42));
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        d.on_resolve(move |v| {
            assert_eq!(*v, json!(42));
            f.set(true);
        });
        assert!(fired.get());
    }

    #[test]
    fn clone_shares_computation() {
        let d = Deferred::new();
        let d2 = d.clone();
        assert!(d.same(&d2));

        d2.resolve(json!(true));
        assert_eq!(d.peek(), Some(json!(true)));
    }

    #[test]
    fn loadable_states() {
        let v: Loadable<Json> = Loadable::Value(json!(1));
        let e: Loadable<Json> = Loadable::error("boom");
        let p: Loadable<Json> = Loadable::Pending(Deferred::new());

        assert!(v.is_value() && !v.is_error() && !v.is_pending());
        assert!(e.is_error());
        assert!(p.is_pending());
        assert_eq!(v.state(), "value");
        assert_eq!(e.state(), "error");
        assert_eq!(p.state(), "pending");
    }

    #[test]
    fn loadable_equality_by_state() {
        let a: Loadable<Json> = Loadable::Value(json!("dark"));
        let b: Loadable<Json> = Loadable::Value(json!("dark"));
        let c: Loadable<Json> = Loadable::Value(json!("light"));
        assert_eq!(a, b);
        assert_ne!(a, c);

        // Errors compare by identity, not message.
        let e1: Loadable<Json> = Loadable::error("x");
        let e2: Loadable<Json> = Loadable::error("x");
        assert_ne!(e1, e2);
        assert_eq!(e1, e1.clone());

        // Pending compares by shared computation.
        let d = Deferred::new();
        let p1: Loadable<Json> = Loadable::Pending(d.clone());
        let p2: Loadable<Json> = Loadable::Pending(d);
        assert_eq!(p1, p2);
        let p3: Loadable<Json> = Loadable::Pending(Deferred::new());
        assert_ne!(p1, p3);
    }

    #[test]
    fn loadable_map_passes_states_through() {
        let v: Loadable<i64> = Loadable::Value(2);
        assert_eq!(v.map(|n| n * 10), Loadable::Value(20));

        let e: Loadable<i64> = Loadable::error("nope");
        assert!(e.map(|n| n * 10).is_error());

        let p: Loadable<i64> = Loadable::Pending(Deferred::new());
        assert!(p.map(|n| n * 10).is_pending());
    }

    #[test]
    fn from_value() {
        let l: Loadable<i32> = 7.into();
        assert_eq!(l.value(), Some(&7));
        assert_eq!(l.into_value(), Some(7));
    }
}
