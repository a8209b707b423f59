#![forbid(unsafe_code)]

//! The value-validation pipeline: untyped external payloads in, typed
//! outcomes (or the default sentinel) out.
//!
//! # Design
//!
//! Validation never drops error or pending provenance — only the value
//! case is subject to domain-specific interpretation:
//!
//! - raw error state → error state, same payload, restore not invoked;
//! - raw pending state → pending state, same computation;
//! - raw value → `restore(value)`, with a miss mapping to the
//!   [`Restored::Default`] sentinel ("use the cell's declared default",
//!   distinct from any domain value).
//!
//! All outcomes are explicit enum variants, matched exhaustively at every
//! consumption site (inbound apply, initial read).

use std::rc::Rc;

use serde::de::DeserializeOwned;

use swire_core::{Deferred, Json, LoadError, Loadable};

/// A restore function interprets a raw payload as a typed domain value,
/// or reports "no match" with `None`.
pub type RestoreFn = dyn Fn(&Json) -> Option<Json>;

/// Settled outcome of a restore pass. Also used as the pending-update
/// marker recorded on a registration by the inbound path.
#[derive(Clone, Debug, PartialEq)]
pub enum Restored {
    /// A concrete, accepted value.
    Value(Json),
    /// The default sentinel: reset the cell to its declared default.
    Default,
}

impl Restored {
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    #[must_use]
    pub fn value(&self) -> Option<&Json> {
        match self {
            Self::Value(v) => Some(v),
            Self::Default => None,
        }
    }
}

/// Full validation outcome, mirroring the tri-state wrapper of the input.
#[derive(Clone, Debug)]
pub enum Validated {
    /// The input was settled; the restore pass produced this.
    Settled(Restored),
    /// The input was a settled failure; passed through untouched.
    Error(Rc<LoadError>),
    /// The input was still resolving; passed through untouched.
    Pending(Deferred),
}

/// Run `restore` over a raw loadable. Pure; no registry or store access.
#[must_use]
pub fn validate(raw: &Loadable<Json>, restore: &RestoreFn) -> Validated {
    match raw {
        Loadable::Value(v) => {
            Validated::Settled(restore(v).map_or(Restored::Default, Restored::Value))
        }
        Loadable::Error(e) => Validated::Error(Rc::clone(e)),
        Loadable::Pending(d) => Validated::Pending(d.clone()),
    }
}

/// Ready-made restore functions.
///
/// `typed::<T>()` is the workhorse: it accepts exactly the payloads that
/// deserialize as `T`, turning serde into the domain type check.
pub mod restore {
    use super::*;

    /// Accept any payload unchanged.
    #[must_use]
    pub fn identity() -> Rc<RestoreFn> {
        Rc::new(|raw| Some(raw.clone()))
    }

    /// Accept payloads that deserialize as `T`; anything else is a miss.
    #[must_use]
    pub fn typed<T: DeserializeOwned + 'static>() -> Rc<RestoreFn> {
        Rc::new(|raw| {
            serde_json::from_value::<T>(raw.clone())
                .ok()
                .map(|_| raw.clone())
        })
    }

    /// Accept JSON strings.
    #[must_use]
    pub fn string() -> Rc<RestoreFn> {
        Rc::new(|raw| raw.is_string().then(|| raw.clone()))
    }

    /// Accept JSON booleans.
    #[must_use]
    pub fn boolean() -> Rc<RestoreFn> {
        Rc::new(|raw| raw.is_boolean().then(|| raw.clone()))
    }

    /// Accept JSON numbers.
    #[must_use]
    pub fn number() -> Rc<RestoreFn> {
        Rc::new(|raw| raw.is_number().then(|| raw.clone()))
    }

    /// Accept only payloads equal to one of `allowed`.
    #[must_use]
    pub fn one_of(allowed: Vec<Json>) -> Rc<RestoreFn> {
        Rc::new(move |raw| allowed.contains(raw).then(|| raw.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
