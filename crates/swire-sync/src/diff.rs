#![forbid(unsafe_code)]

//! The diff: a batch of (item key, value-or-absent) changes exchanged
//! between the sync engine and a storage backend, plus its wire codec.
//!
//! An absent value (`None`) means "item absent / reset to default" — this
//! is distinct from an item bound to a default *value*, which travels as a
//! present value-state entry like any other.
//!
//! # Wire shape
//!
//! ```json
//! [
//!   {"key": "theme", "value": {"state": "value", "value": "dark"}},
//!   {"key": "draft", "value": {"state": "error", "message": "corrupt"}},
//!   {"key": "feed",  "value": {"state": "pending"}},
//!   {"key": "stale", "value": null}
//! ]
//! ```
//!
//! A decoded `pending` envelope carries a fresh, unresolved computation:
//! nothing on the receiving side will ever resolve it, and the inbound
//! path rejects it as unsupported, which is exactly the contract for
//! in-flight values crossing a storage boundary.
//!
//! # Failure Modes
//!
//! - Decoding a malformed entry or envelope is a configuration error
//!   ([`SyncError::MalformedPayload`]), keyed by the offending item when
//!   one could be extracted.

use serde_json::json;

use swire_core::{Deferred, Json, Loadable};

use crate::error::{Result, SyncError};
use crate::key::ItemKey;

/// Ordered batch of per-item changes. Order is preserved; later entries
/// for the same key win on apply (last-write-wins per item key).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diff {
    entries: Vec<(ItemKey, Option<Loadable<Json>>)>,
}

impl Diff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A one-entry diff.
    #[must_use]
    pub fn single(key: impl Into<ItemKey>, value: Option<Loadable<Json>>) -> Self {
        let mut diff = Self::new();
        diff.push(key, value);
        diff
    }

    pub fn push(&mut self, key: impl Into<ItemKey>, value: Option<Loadable<Json>>) {
        self.entries.push((key.into(), value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Loadable<Json>>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_ref()))
    }

    /// The last entry for `key`, if any (`Some(None)` = present reset).
    #[must_use]
    pub fn find(&self, key: &str) -> Option<Option<&Loadable<Json>>> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_ref())
    }

    // ── Wire codec ──────────────────────────────────────────────────

    /// Encode to the wire shape.
    #[must_use]
    pub fn to_wire(&self) -> Json {
        Json::Array(
            self.entries
                .iter()
                .map(|(key, value)| {
                    json!({
                        "key": key,
                        "value": value.as_ref().map(encode_loadable),
                    })
                })
                .collect(),
        )
    }

    /// Decode from the wire shape.
    pub fn from_wire(wire: &Json) -> Result<Self> {
        let Json::Array(items) = wire else {
            return Err(SyncError::malformed("(diff)", "expected a JSON array"));
        };
        let mut diff = Self::new();
        for item in items {
            let Json::Object(entry) = item else {
                return Err(SyncError::malformed("(diff)", "entry is not an object"));
            };
            let key = entry
                .get("key")
                .and_then(Json::as_str)
                .ok_or_else(|| SyncError::malformed("(diff)", "entry has no string \"key\""))?;
            let value = match entry.get("value") {
                None | Some(Json::Null) => None,
                Some(envelope) => Some(decode_loadable(envelope, key)?),
            };
            diff.push(key, value);
        }
        Ok(diff)
    }
}

/// Encode a loadable as a tri-state envelope.
#[must_use]
pub fn encode_loadable(loadable: &Loadable<Json>) -> Json {
    match loadable {
        Loadable::Value(v) => json!({"state": "value", "value": v}),
        Loadable::Error(e) => json!({"state": "error", "message": e.message()}),
        Loadable::Pending(_) => json!({"state": "pending"}),
    }
}

/// Decode a tri-state envelope. `key` is used only for error reporting.
pub fn decode_loadable(envelope: &Json, key: &str) -> Result<Loadable<Json>> {
    let Json::Object(fields) = envelope else {
        return Err(SyncError::malformed(key, "envelope is not an object"));
    };
    let state = fields
        .get("state")
        .and_then(Json::as_str)
        .ok_or_else(|| SyncError::malformed(key, "envelope has no string \"state\""))?;
    match state {
        "value" => {
            let value = fields
                .get("value")
                .ok_or_else(|| SyncError::malformed(key, "value envelope has no \"value\""))?;
            Ok(Loadable::Value(value.clone()))
        }
        "error" => {
            let message = fields
                .get("message")
                .and_then(Json::as_str)
                .unwrap_or("unknown storage error");
            Ok(Loadable::error(message))
        }
        "pending" => Ok(Loadable::Pending(Deferred::new())),
        other => Err(SyncError::malformed(
            key,
            format!("unknown envelope state {other:?}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_find() {
        let mut diff = Diff::new();
        diff.push("a", Some(Loadable::Value(json!(1))));
        diff.push("b", None);
        diff.push("a", Some(Loadable::Value(json!(2))));

        assert_eq!(diff.len(), 3);
        // Last write wins on lookup.
        assert_eq!(diff.find("a"), Some(Some(&Loadable::Value(json!(2)))));
        assert_eq!(diff.find("b"), Some(None));
        assert_eq!(diff.find("c"), None);
    }

    #[test]
    fn wire_round_trip_settled_states() {
        let mut diff = Diff::new();
        diff.push("theme", Some(Loadable::Value(json!("dark"))));
        diff.push("count", Some(Loadable::Value(json!({"n": 3}))));
        diff.push("stale", None);

        let decoded = Diff::from_wire(&diff.to_wire()).unwrap();
        assert_eq!(decoded, diff);
    }

    #[test]
    fn wire_preserves_entry_order() {
        let mut diff = Diff::new();
        for key in ["z", "a", "m"] {
            diff.push(key, Some(Loadable::Value(json!(key))));
        }
        let decoded = Diff::from_wire(&diff.to_wire()).unwrap();
        let keys: Vec<_> = decoded.iter().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn error_envelope_round_trips_message() {
        let diff = Diff::single("draft", Some(Loadable::error("corrupt record")));
        let decoded = Diff::from_wire(&diff.to_wire()).unwrap();
        match decoded.find("draft") {
            Some(Some(Loadable::Error(e))) => assert_eq!(e.message(), "corrupt record"),
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    #[test]
    fn pending_envelope_decodes_to_unresolved_computation() {
        let wire = json!([{"key": "feed", "value": {"state": "pending"}}]);
        let decoded = Diff::from_wire(&wire).unwrap();
        match decoded.find("feed") {
            Some(Some(Loadable::Pending(d))) => assert!(!d.is_resolved()),
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[test]
    fn null_and_missing_value_both_mean_absent() {
        let wire = json!([
            {"key": "a", "value": null},
            {"key": "b"},
        ]);
        let decoded = Diff::from_wire(&wire).unwrap();
        assert_eq!(decoded.find("a"), Some(None));
        assert_eq!(decoded.find("b"), Some(None));
    }

    #[test]
    fn malformed_wire_is_a_config_error() {
        for bad in [
            json!("not an array"),
            json!([42]),
            json!([{"value": null}]),
            json!([{"key": "x", "value": {"state": "warp"}}]),
            json!([{"key": "x", "value": {"no_state": true}}]),
            json!([{"key": "x", "value": {"state": "value"}}]),
            json!([{"key": "x", "value": "bare"}]),
        ] {
            assert!(
                matches!(
                    Diff::from_wire(&bad),
                    Err(SyncError::MalformedPayload { .. })
                ),
                "should reject {bad}"
            );
        }
    }
}
