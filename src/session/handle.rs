use super::{CallId, CallSnapshot, Role};
use crate::{CallError, Result};
use tokio::sync::{mpsc, oneshot, watch};

pub(crate) enum Command {
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleAudio {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    StartScreenShare {
        reply: oneshot::Sender<Result<()>>,
    },
    StopScreenShare {
        reply: oneshot::Sender<Result<()>>,
    },
    SetChatOpen {
        open: bool,
    },
    DismissAlert,
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// UI-side handle to a running call. Cheap to clone; the call hangs up once
/// every clone is dropped.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        snapshots: watch::Receiver<CallSnapshot>,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.snapshots.borrow().call_id.clone()
    }

    pub fn role(&self) -> Role {
        self.snapshots.borrow().role
    }

    /// Latest published view of the call
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until a published snapshot satisfies `pred`.
    ///
    /// Fails with [`CallError::SessionClosed`] if the controller is gone
    /// before that happens.
    pub async fn wait_for<F>(&self, mut pred: F) -> Result<CallSnapshot>
    where
        F: FnMut(&CallSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return Ok(current.clone());
                }
            }
            rx.changed().await.map_err(|_| CallError::SessionClosed)?;
        }
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, reply })
            .await?
    }

    pub async fn toggle_audio(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::ToggleAudio { enabled, reply })
            .await?
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::StartScreenShare { reply })
            .await?
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::StopScreenShare { reply })
            .await?
    }

    pub async fn set_chat_open(&self, open: bool) -> Result<()> {
        self.post(Command::SetChatOpen { open }).await
    }

    pub async fn dismiss_alert(&self) -> Result<()> {
        self.post(Command::DismissAlert).await
    }

    /// Hangs up. Succeeds as well when the call already ended.
    pub async fn disconnect(&self) -> Result<()> {
        match self.request(|reply| Command::Disconnect { reply }).await {
            Ok(()) | Err(CallError::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn post(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| CallError::SessionClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.post(build(tx)).await?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }
}
