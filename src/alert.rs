//! Transient banner for incoming chat messages while the chat view is closed.

use crate::messages::Message;
use serde::Serialize;
use std::future::pending;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertState {
    pub active: bool,
    /// Last message announced; kept after the banner is dismissed
    pub preview: Option<Message>,
}

/// Debounced dismissal of the banner.
///
/// There is a single deadline, so at most one dismissal is ever pending: each
/// `notify` replaces it with a fresh countdown.
#[derive(Debug)]
pub struct AlertTimer {
    state: AlertState,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl AlertTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: AlertState::default(),
            timeout,
            deadline: None,
        }
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn notify(&mut self, message: Message) {
        if self.deadline.is_some() {
            debug!("alert re-armed before dismissal");
        }
        self.state = AlertState {
            active: true,
            preview: Some(message),
        };
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Resolves when the pending dismissal is due; never resolves if none is.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }

    /// Clears the banner and cancels any pending dismissal.
    pub fn dismiss(&mut self) {
        self.deadline = None;
        self.state.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    const TEN_SECONDS: Duration = Duration::from_secs(10);

    async fn fires_within(timer: &AlertTimer, window: Duration) -> bool {
        timeout(window, timer.expired()).await.is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn dismissal_follows_the_last_notify() {
        let mut timer = AlertTimer::new(TEN_SECONDS);
        let first = Message::remote("first");
        let second = Message::remote("second");

        timer.notify(first);
        advance(Duration::from_secs(6)).await;
        timer.notify(second.clone());
        assert_eq!(timer.state().preview.as_ref(), Some(&second));

        // 10s after the first notify: nothing fires
        assert!(!fires_within(&timer, Duration::from_secs(5)).await);
        assert!(timer.state().active);
        assert_eq!(timer.state().preview.as_ref(), Some(&second));

        // 10s after the second notify: exactly one dismissal
        assert!(fires_within(&timer, Duration::from_secs(6)).await);
        timer.dismiss();
        assert!(!timer.state().active);
        assert!(!timer.is_pending());
        assert!(!fires_within(&timer, Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_never_fires() {
        let timer = AlertTimer::new(TEN_SECONDS);
        assert!(!fires_within(&timer, Duration::from_secs(3600)).await);
        assert_eq!(timer.state(), &AlertState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn early_dismiss_cancels_countdown() {
        let mut timer = AlertTimer::new(TEN_SECONDS);
        timer.notify(Message::remote("ping"));
        timer.dismiss();
        assert!(!fires_within(&timer, Duration::from_secs(20)).await);
        assert_eq!(timer.state().preview.as_ref().unwrap().body, "ping");
    }
}
