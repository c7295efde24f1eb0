use super::{HttpSignalStore, LiveChannel, LiveReceiver, SignalPayload, SignalingClient};
use crate::config::SignalingConfig;
use crate::session::CallId;
use crate::Result;
use async_trait::async_trait;

/// HTTP persisted lookup plus WebSocket live channel
pub struct NetworkSignaling {
    store: HttpSignalStore,
    live: LiveChannel,
}

impl NetworkSignaling {
    pub async fn connect(config: &SignalingConfig, call_id: &CallId) -> Result<Self> {
        let store = HttpSignalStore::new(config);
        let live = LiveChannel::connect(&config.live_url, call_id).await?;
        Ok(Self { store, live })
    }
}

#[async_trait]
impl SignalingClient for NetworkSignaling {
    async fn publish(&self, call_id: &CallId, payload: &SignalPayload) -> Result<()> {
        self.store.publish(call_id, payload).await
    }

    async fn fetch_published(&self, call_id: &CallId) -> Option<SignalPayload> {
        self.store.fetch(call_id).await
    }

    async fn send_live(&self, payload: &SignalPayload) -> Result<()> {
        self.live.send(payload)
    }

    fn subscribe_live(&self) -> Result<LiveReceiver> {
        self.live.subscribe()
    }
}
