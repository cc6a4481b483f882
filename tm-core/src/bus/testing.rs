//! In-memory `Bus` double, mirroring the teacher's pattern of swapping a
//! production adapter for a deterministic in-process one under test.

use super::{Bus, BusMessage, Subscription};
use crate::error::BusError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

pub struct InMemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    store: Mutex<HashMap<String, Value>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            store: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Value> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    channel: String,
    receiver: broadcast::Receiver<Value>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<BusMessage, BusError> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => {
                    return Ok(BusMessage {
                        channel: self.channel.clone(),
                        payload,
                    })
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Disconnected),
            }
        }
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError> {
        let sender = self.sender(channel);
        let receiver = sender.subscribe();
        // No separate subscribe-ack in the in-memory double; the receiver
        // being live at this point is itself the guarantee subsequent
        // publishes will be observed.
        Ok(Box::new(InMemorySubscription {
            channel: channel.to_string(),
            receiver,
        }))
    }

    async fn publish_value(&self, channel: &str, payload: Value) -> Result<usize, BusError> {
        let sender = self.sender(channel);
        Ok(sender.send(payload).unwrap_or(0))
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<(), BusError> {
        self.store.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BusError> {
        Ok(self.store.lock().unwrap().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_is_observed_by_subscriber() {
        let bus: &dyn Bus = &InMemoryBus::new();
        let mut sub = bus.subscribe("tool-group-default").await.unwrap();
        bus.publish("tool-group-default", &json!({"action": "start"}))
            .await
            .unwrap();
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.payload["action"], "start");
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let bus: &dyn Bus = &InMemoryBus::new();
        bus.set("tds:params:default", &json!({"port": 8080})).await.unwrap();
        let value = bus.get("tds:params:default").await.unwrap().unwrap();
        assert_eq!(value["port"], 8080);
    }

    #[tokio::test]
    async fn get_on_missing_key_is_none() {
        let bus = InMemoryBus::new();
        assert!(bus.get("missing").await.unwrap().is_none());
    }
}
