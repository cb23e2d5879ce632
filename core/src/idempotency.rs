//! Idempotency records and the store port.
//!
//! A client-chosen key maps to the canonical hash of the logical request and
//! the cached result. Replays with the same key and hash return the cached
//! result verbatim; the same key with another hash is a client error.
//!
//! # Canonical hashing
//!
//! Requests are serialized to JSON and rewritten with object keys sorted at
//! every depth before hashing with SHA-256. Array order is kept.

use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 over the canonical JSON of a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHash(String);

impl RequestHash {
    /// Wrap an already computed hash (e.g. read back from storage).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render `value` as JSON with object keys sorted recursively.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash an already-built JSON value.
#[must_use]
pub fn hash_value(value: &Value) -> RequestHash {
    RequestHash(format!("{:x}", Sha256::digest(canonical_json(value).as_bytes())))
}

/// Canonical hash of any serializable request.
///
/// # Errors
///
/// Returns [`BookingError::InvalidInput`] if the request cannot be represented as JSON.
pub fn request_hash<T: Serialize>(request: &T) -> Result<RequestHash> {
    let value = serde_json::to_value(request)
        .map_err(|e| BookingError::invalid_input("request", e.to_string()))?;
    Ok(hash_value(&value))
}

/// Stored idempotent result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-supplied key (already scoped by the caller)
    pub key: String,
    /// Hash of the request that produced the result
    pub request_hash: RequestHash,
    /// Opaque cached response
    pub result_data: Value,
    /// When the record was written
    pub created_at: DateTime<Utc>,
    /// After this instant the record is treated as absent
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the record is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Compare a live record against an incoming request.
    #[must_use]
    pub fn check(&self, request_hash: &RequestHash, now: DateTime<Utc>) -> IdempotencyCheck {
        if self.is_expired(now) {
            IdempotencyCheck::NotFound
        } else if &self.request_hash == request_hash {
            IdempotencyCheck::Replay(self.result_data.clone())
        } else {
            IdempotencyCheck::HashMismatch
        }
    }
}

/// Result of [`IdempotencyStore::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// No live record for the key
    NotFound,
    /// Key exists for a different request
    HashMismatch,
    /// Key exists for this request; here is the original result
    Replay(Value),
}

/// Result of [`IdempotencyStore::store`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// This caller's record was written
    Stored,
    /// Another writer got there first
    AlreadyStored {
        /// Hash of the winning request
        request_hash: RequestHash,
        /// The winner's cached result
        result_data: Value,
    },
}

/// Keyed store of idempotent results.
///
/// # Race safety
///
/// `store` must be first-writer-wins: when two callers store the same live key
/// concurrently, exactly one insert succeeds and the other observes the
/// winner's `request_hash` and `result_data`. An expired record may be replaced.
pub trait IdempotencyStore: Send + Sync {
    /// Look up `key` and compare hashes. Expired records are reported as absent.
    fn check<'a>(
        &'a self,
        key: &'a str,
        request_hash: &'a RequestHash,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<IdempotencyCheck>>;

    /// Insert `record` unless a live record already holds its key.
    fn store(&self, record: IdempotencyRecord) -> BoxFuture<'_, Result<StoreOutcome>>;

    /// Delete records expired at `now`. Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, 2]}, "b": 1});
        assert_eq!(hash_value(&a), hash_value(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(hash_value(&json!([1, 2])), hash_value(&json!([2, 1])));
    }

    #[test]
    fn record_check_covers_all_outcomes() {
        let now = Utc::now();
        let hash = hash_value(&json!({"party": 2}));
        let record = IdempotencyRecord {
            key: "k".into(),
            request_hash: hash.clone(),
            result_data: json!({"id": "r1"}),
            created_at: now,
            expires_at: now + chrono::Duration::hours(24),
        };

        assert_eq!(record.check(&hash, now), IdempotencyCheck::Replay(json!({"id": "r1"})));
        assert_eq!(
            record.check(&hash_value(&json!({"party": 3})), now),
            IdempotencyCheck::HashMismatch
        );
        assert_eq!(
            record.check(&hash, now + chrono::Duration::hours(25)),
            IdempotencyCheck::NotFound
        );
    }

    proptest! {
        #[test]
        fn shuffled_objects_hash_identically(entries in prop::collection::btree_map("[a-z]{1,6}", 0_i64..1000, 0..12)) {
            let forward: serde_json::Map<String, Value> =
                entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let reversed: serde_json::Map<String, Value> =
                entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
            prop_assert_eq!(
                hash_value(&Value::Object(forward)),
                hash_value(&Value::Object(reversed))
            );
        }
    }
}
