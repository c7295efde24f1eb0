//! In-process signaling: a shared persisted map plus per-call rooms.

use super::{LiveReceiver, SignalPayload, SignalingClient};
use crate::session::CallId;
use crate::utils::random_id;
use crate::{CallError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Default)]
struct HubState {
    published: HashMap<CallId, SignalPayload>,
    rooms: HashMap<CallId, Vec<RoomMember>>,
}

struct RoomMember {
    member_id: String,
    tx: mpsc::UnboundedSender<SignalPayload>,
}

/// Shared backend for any number of [`MemorySignaling`] clients.
#[derive(Clone, Default)]
pub struct MemorySignalingHub {
    state: Arc<Mutex<HubState>>,
    unreachable: Arc<AtomicBool>,
}

impl MemorySignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the room of `call_id` as a new participant
    pub fn client(&self, call_id: &CallId) -> MemorySignaling {
        let (tx, rx) = mpsc::unbounded_channel();
        let member_id = random_id();
        self.lock()
            .rooms
            .entry(call_id.clone())
            .or_default()
            .push(RoomMember {
                member_id: member_id.clone(),
                tx,
            });
        debug!(call_id = %call_id, member_id, "joined memory signaling room");

        MemorySignaling {
            hub: self.clone(),
            call_id: call_id.clone(),
            member_id,
            live_rx: Mutex::new(Some(rx)),
        }
    }

    /// Simulates losing the network: publishes fail and lookups come back empty
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn published(&self, call_id: &CallId) -> Option<SignalPayload> {
        self.lock().published.get(call_id).cloned()
    }

    fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MemorySignaling {
    hub: MemorySignalingHub,
    call_id: CallId,
    member_id: String,
    live_rx: Mutex<Option<LiveReceiver>>,
}

#[async_trait]
impl SignalingClient for MemorySignaling {
    async fn publish(&self, call_id: &CallId, payload: &SignalPayload) -> Result<()> {
        if !self.hub.is_reachable() {
            return Err(CallError::Signaling("signaling hub unreachable".into()));
        }
        self.hub
            .lock()
            .published
            .insert(call_id.clone(), payload.clone());
        debug!(call_id = %call_id, "published {:?}", payload);
        Ok(())
    }

    async fn fetch_published(&self, call_id: &CallId) -> Option<SignalPayload> {
        if !self.hub.is_reachable() {
            warn!(call_id = %call_id, "signal lookup failed: hub unreachable");
            return None;
        }
        self.hub.lock().published.get(call_id).cloned()
    }

    async fn send_live(&self, payload: &SignalPayload) -> Result<()> {
        if !self.hub.is_reachable() {
            return Err(CallError::Signaling("signaling hub unreachable".into()));
        }
        let mut state = self.hub.lock();
        let Some(room) = state.rooms.get_mut(&self.call_id) else {
            return Ok(());
        };
        room.retain(|member| !member.tx.is_closed());
        let mut delivered = 0;
        for member in room.iter().filter(|m| m.member_id != self.member_id) {
            if member.tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(call_id = %self.call_id, delivered, "live payload sent");
        Ok(())
    }

    fn subscribe_live(&self) -> Result<LiveReceiver> {
        self.live_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| CallError::Signaling("live channel already has a subscriber".into()))
    }
}
