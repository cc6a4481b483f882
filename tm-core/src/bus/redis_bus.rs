use super::{Bus, BusMessage, Subscription};
use crate::error::BusError;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use serde_json::Value;

/// Redis-backed `Bus`. Uses a `ConnectionManager` for publish/set/get (it
/// reconnects transparently) and a dedicated `PubSub` connection per
/// subscription, since Redis multiplexes pub/sub on its own connection
/// state.
pub struct RedisBus {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError::Transport(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(Self { client, manager })
    }
}

struct RedisSubscription {
    channel: String,
    pubsub: PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Result<BusMessage, BusError> {
        let msg = self
            .pubsub
            .on_message()
            .next()
            .await
            .ok_or(BusError::Disconnected)?;
        let raw: String = msg.get_payload().map_err(|e| BusError::Protocol(e.to_string()))?;
        let payload: Value = serde_json::from_str(&raw).map_err(|e| BusError::Protocol(e.to_string()))?;
        Ok(BusMessage {
            channel: self.channel.clone(),
            payload,
        })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        // The subscribe confirmation is not surfaced through `on_message`
        // by the redis crate, so there is nothing further to drain here;
        // `subscribe()` having returned Ok is itself the ack.
        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            pubsub,
        }))
    }

    async fn publish_value(&self, channel: &str, payload: Value) -> Result<usize, BusError> {
        let rendered = serde_json::to_string(&payload).map_err(|e| BusError::Protocol(e.to_string()))?;
        let mut manager = self.manager.clone();
        manager
            .publish(channel, rendered)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<(), BusError> {
        let rendered = serde_json::to_string(&value).map_err(|e| BusError::Protocol(e.to_string()))?;
        let mut manager = self.manager.clone();
        manager
            .set(key, rendered)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BusError> {
        let mut manager = self.manager.clone();
        let raw: Option<String> = manager.get(key).await.map_err(|e| BusError::Transport(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| BusError::Protocol(e.to_string())))
            .transpose()
    }
}
