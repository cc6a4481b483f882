//! Control Bus client (C4)
//!
//! A thin abstraction over a pub/sub broker, injected everywhere else in
//! the system so tests can substitute an in-memory implementation and
//! drive every state-machine transition deterministically (design note:
//! "Bus as a dependency").

mod redis_bus;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use redis_bus::RedisBus;

use crate::error::BusError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// A single message delivered to a subscription: either the subscribe
/// acknowledgement (consumed internally by `subscribe`) or a payload.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Value,
}

/// A live subscription to one channel. `next` yields payload messages only
/// (the initial subscribe ack is consumed by `Bus::subscribe` before this
/// handle is returned, per §4.4).
#[async_trait]
pub trait Subscription: Send {
    async fn next(&mut self) -> Result<BusMessage, BusError>;
}

/// Thin wrapper over a pub/sub broker used by every other component.
///
/// Kept object-safe (every caller holds an `Arc<dyn Bus>`) by taking
/// already-serialized [`Value`]s rather than a generic `impl Serialize`
/// parameter, which would make the trait un-object-safe. The ergonomic,
/// generically-typed `publish`/`set` callers actually use are inherent
/// methods on `dyn Bus` below, matching the call-site shape of a typed
/// pub/sub client without sacrificing dynamic dispatch.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Subscribe to a channel. The first message delivered after subscribe
    /// is an acknowledgement, consumed synchronously here before this
    /// returns.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError>;

    /// Publish an already-serialized JSON payload. Returns the number of
    /// subscribers that received it.
    async fn publish_value(&self, channel: &str, payload: Value) -> Result<usize, BusError>;

    /// Stage an already-serialized value at `key` for later retrieval via
    /// `get`.
    async fn set_value(&self, key: &str, value: Value) -> Result<(), BusError>;

    /// Retrieve a previously staged JSON value.
    async fn get(&self, key: &str) -> Result<Option<Value>, BusError>;
}

impl dyn Bus {
    /// Publish a JSON payload with keys sorted for deterministic hashing of
    /// test outputs, matching the original's `json.dumps(...,
    /// sort_keys=True)` convention.
    pub async fn publish(&self, channel: &str, payload: &(impl Serialize + Sync)) -> Result<usize, BusError> {
        self.publish_value(channel, to_canonical_value(payload)?).await
    }

    /// Stage a value at `key`, keys sorted the same way `publish` sorts
    /// them.
    pub async fn set(&self, key: &str, value: &(impl Serialize + Sync)) -> Result<(), BusError> {
        self.set_value(key, to_canonical_value(value)?).await
    }
}

fn to_canonical_value(value: &impl Serialize) -> Result<Value, BusError> {
    let v = serde_json::to_value(value).map_err(|e| BusError::Protocol(e.to_string()))?;
    Ok(sort_keys(v))
}

/// Publish a JSON payload with object keys in sorted order, regardless of
/// struct field declaration order, matching the original's
/// `json.dumps(..., sort_keys=True)` for deterministic test hashing.
pub fn canonical_json(value: &impl Serialize) -> Result<String, BusError> {
    serde_json::to_string(&to_canonical_value(value)?).map_err(|e| BusError::Protocol(e.to_string()))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(map[&key].clone()));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({"z": 1, "a": 2, "m": {"y": 1, "b": 2}});
        let rendered = canonical_json(&value).unwrap();
        assert_eq!(rendered, r#"{"a":2,"m":{"b":2,"y":1},"z":1}"#);
    }
}
