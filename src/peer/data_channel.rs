use crate::peer::{PeerEvent, PeerEventSender};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use webrtc::data_channel::RTCDataChannel;

/// Slot for the chat channel; filled at creation (initiator) or when the
/// counterpart's channel arrives (joiner).
pub type DataChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// Common data channel wiring: open, inbound messages and close become peer events.
pub async fn attach_dc(dc: &Arc<RTCDataChannel>, slot: &DataChannelSlot, events: &PeerEventSender) {
    info!(label = dc.label(), "data channel attached");
    *slot.lock().await = Some(Arc::clone(dc));

    dc.on_open(Box::new({
        let events = events.clone();
        move || {
            info!("data channel open");
            let _ = events.send(PeerEvent::Connected);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg| {
            debug!(len = msg.data.len(), "data channel message");
            let _ = events.send(PeerEvent::Data(msg.data));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let events = events.clone();
        move || {
            info!("data channel closed");
            let _ = events.send(PeerEvent::Closed);
            Box::pin(async {})
        }
    }));
}
