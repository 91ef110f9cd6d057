//! The seam between the bridge and the platform VPN engine.
//!
//! Engines implement [`BackendAdapter`] to receive lifecycle requests and use
//! a [`NotificationSender`] to report native state changes from whatever
//! thread they run on.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BackendError;
use crate::status::{DesiredState, RawState};

/// Platform VPN engine consumed by the session controller.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Ask the engine to bring the named session to `desired`.
    ///
    /// `config` is the opaque tunnel configuration for `Up` and `None` for `Down`.
    /// Returning `Ok` means the request was accepted, not that the tunnel
    /// reached the state.
    async fn apply_state(
        &self,
        session: &str,
        desired: DesiredState,
        config: Option<&str>,
    ) -> Result<(), BackendError>;
}

/// A native status change for a named session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub session: String,
    pub state: RawState,
}

/// Cloneable handle the engine posts notifications through.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    session: String,
    tx: mpsc::UnboundedSender<Notification>,
}

/// Receiving half, drained by the session controller's pump.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Create a notification channel bound to a session name.
pub fn notification_channel(session: impl Into<String>) -> (NotificationSender, NotificationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NotificationSender {
            session: session.into(),
            tx,
        },
        rx,
    )
}

impl NotificationSender {
    /// Session this sender reports for.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Post a state for the bound session. Never blocks.
    pub fn notify(&self, state: impl Into<RawState>) {
        self.notify_session(self.session.clone(), state);
    }

    /// Post a state for an explicitly named session.
    pub fn notify_session(&self, session: impl Into<String>, state: impl Into<RawState>) {
        let notification = Notification {
            session: session.into(),
            state: state.into(),
        };
        if let Err(err) = self.tx.send(notification) {
            debug!(session = %err.0.session, state = %err.0.state, "bridge closed, dropping notification");
        }
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
