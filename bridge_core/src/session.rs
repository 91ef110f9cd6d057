//! Session management for the tunnel bridge.
//!
//! Owns the single tunnel session, serializes start/stop requests against the
//! backend and derives the canonical [`TunnelStatus`] from backend
//! notifications. All reads and writes of the session record go through one
//! mutex that is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::backend::{BackendAdapter, Notification, NotificationReceiver};
use crate::error::{BridgeError, BridgeResult};
use crate::sink::{StatusSink, StatusSubscriber};
use crate::status::{DesiredState, PendingOperation, RawState, TunnelStatus};

/// The process-wide tunnel session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    name: String,
    current_status: TunnelStatus,
    config: Option<String>,
    pending: PendingOperation,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Session {
            name: name.into(),
            current_status: TunnelStatus::Disconnected,
            config: None,
            pending: PendingOperation::None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_status(&self) -> TunnelStatus {
        self.current_status
    }

    /// Configuration of the in-flight or last accepted start; cleared once a
    /// stop is issued.
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn pending(&self) -> PendingOperation {
        self.pending
    }
}

/// Serializes lifecycle operations for one session.
pub struct SessionController {
    name: String,
    session: Mutex<Session>,
    backend: Arc<dyn BackendAdapter>,
    sink: StatusSink,
    status_tx: watch::Sender<TunnelStatus>,
}

impl SessionController {
    pub fn new(name: impl Into<String>, backend: Arc<dyn BackendAdapter>) -> Self {
        let session = Session::new(name);
        let (status_tx, _) = watch::channel(session.current_status);
        info!(session = %session.name, "creating tunnel session");

        SessionController {
            name: session.name.clone(),
            sink: StatusSink::new(session.current_status),
            session: Mutex::new(session),
            backend,
            status_tx,
        }
    }

    /// Session name, constant for the controller's lifetime.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bring the tunnel up with `config`.
    ///
    /// Returns once the backend has accepted the request; establishment is
    /// observed through status updates.
    #[instrument(level = "info", skip(self, config), fields(session = %self.name))]
    pub async fn start(&self, config: &str) -> BridgeResult<()> {
        if config.trim().is_empty() {
            return Err(BridgeError::MissingArgument("config".to_string()));
        }

        let previous_config = {
            let mut session = self.lock();
            if !session.pending.is_none() {
                debug!(pending = %session.pending, "start rejected");
                return Err(BridgeError::OperationInProgress(session.pending));
            }
            if session.current_status == TunnelStatus::Connected
                && session.config.as_deref() == Some(config)
            {
                info!("tunnel already up with this configuration");
                return Ok(());
            }
            session.pending = PendingOperation::Starting;
            // Recorded before the backend call; engines may confirm from inside it
            session.config.replace(config.to_string())
        };

        let result = self
            .backend
            .apply_state(&self.name, DesiredState::Up, Some(config))
            .await;

        let mut session = self.lock();
        let still_pending = session.pending == PendingOperation::Starting;
        match result {
            Ok(()) => {
                if still_pending {
                    let current = session.current_status;
                    match current {
                        TunnelStatus::Connected => session.pending = PendingOperation::None,
                        TunnelStatus::Disconnected => {
                            self.transition(&mut session, TunnelStatus::Connecting)
                        }
                        _ => {}
                    }
                }
                info!("backend accepted tunnel up");
                Ok(())
            }
            Err(err) => {
                if still_pending {
                    session.pending = PendingOperation::None;
                    session.config = previous_config;
                }
                warn!(error = %err, "backend rejected tunnel up");
                Err(err.into())
            }
        }
    }

    /// Take the tunnel down. A no-op when already disconnected.
    #[instrument(level = "info", skip(self), fields(session = %self.name))]
    pub async fn stop(&self) -> BridgeResult<()> {
        let previous_config = {
            let mut session = self.lock();
            if !session.pending.is_none() {
                debug!(pending = %session.pending, "stop rejected");
                return Err(BridgeError::OperationInProgress(session.pending));
            }
            if session.current_status == TunnelStatus::Disconnected {
                debug!("tunnel already down");
                return Ok(());
            }
            session.pending = PendingOperation::Stopping;
            session.config.take()
        };

        let result = self
            .backend
            .apply_state(&self.name, DesiredState::Down, None)
            .await;

        let mut session = self.lock();
        let still_pending = session.pending == PendingOperation::Stopping;
        match result {
            Ok(()) => {
                if still_pending {
                    if session.current_status == TunnelStatus::Disconnected {
                        session.pending = PendingOperation::None;
                    } else {
                        self.transition(&mut session, TunnelStatus::Disconnecting);
                    }
                }
                info!("backend accepted tunnel down");
                Ok(())
            }
            Err(err) => {
                if still_pending {
                    session.pending = PendingOperation::None;
                    session.config = previous_config;
                }
                warn!(error = %err, "backend rejected tunnel down");
                Err(err.into())
            }
        }
    }

    /// Current status. Never blocks on lifecycle operations.
    pub fn status(&self) -> TunnelStatus {
        *self.status_tx.borrow()
    }

    /// Copy of the session record.
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// Apply one backend notification.
    pub fn handle_notification(&self, notification: &Notification) {
        if notification.session != self.name {
            warn!(
                session = %self.name,
                from = %notification.session,
                "ignoring notification for another session"
            );
            return;
        }
        self.apply_native(&notification.state);
    }

    fn apply_native(&self, raw: &RawState) {
        let mut session = self.lock();
        let mapped = TunnelStatus::from_native(raw, session.current_status);
        debug!(session = %self.name, native = %raw, status = %mapped, "backend state change");

        if mapped != session.current_status {
            self.transition(&mut session, mapped);
        } else {
            trace!(status = %mapped, "status unchanged");
        }

        if mapped.is_terminal() && !session.pending.is_none() {
            debug!(pending = %session.pending, "lifecycle operation resolved");
            session.pending = PendingOperation::None;
        }
    }

    /// Attach the status subscriber; it receives the current status first.
    pub fn attach(&self, subscriber: Weak<dyn StatusSubscriber>) {
        // Holding the session lock keeps the replay ordered with transitions
        let _session = self.lock();
        self.sink.attach(subscriber);
    }

    /// Detach the status subscriber.
    pub fn detach(&self) {
        let _session = self.lock();
        self.sink.detach();
    }

    /// Watch channel mirroring the current status.
    pub fn subscribe_status(&self) -> watch::Receiver<TunnelStatus> {
        self.status_tx.subscribe()
    }

    /// Resolve once the status equals `status`.
    ///
    /// Only the latest status is observed: a value that is replaced before
    /// the waiter runs (a short-lived `Connected` followed by a drop) is
    /// missed. Use [`wait_for_terminal`](Self::wait_for_terminal) to learn
    /// how an operation settled.
    pub async fn wait_for(&self, status: TunnelStatus) {
        let mut rx = self.status_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|current| *current == status).await;
    }

    /// Resolve with the first terminal status observed, `Connected` or
    /// `Disconnected`; immediately if the current status is terminal.
    pub async fn wait_for_terminal(&self) -> TunnelStatus {
        let mut rx = self.status_tx.subscribe();
        match rx.wait_for(|current| current.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    /// Resolve once the tunnel is down; immediately if it already is.
    pub async fn wait_for_stopped(&self) {
        self.wait_for(TunnelStatus::Disconnected).await;
    }

    /// Drain backend notifications in arrival order on a dedicated task.
    ///
    /// The task ends when every sender is dropped or the controller is gone.
    pub fn spawn_notification_pump(self: &Arc<Self>, mut rx: NotificationReceiver) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        let name = self.name.clone();
        tokio::spawn(async move {
            debug!(session = %name, "notification pump started");
            while let Some(notification) = rx.recv().await {
                match controller.upgrade() {
                    Some(controller) => controller.handle_notification(&notification),
                    None => break,
                }
            }
            debug!(session = %name, "notification pump stopped");
        })
    }

    fn transition(&self, session: &mut Session, status: TunnelStatus) {
        info!(session = %self.name, from = %session.current_status, to = %status, "tunnel status changed");
        session.current_status = status;
        self.status_tx.send_replace(status);
        self.sink.publish(status);
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NotificationSender, notification_channel};
    use crate::error::BackendError;
    use crate::sim::SimulatedBackend;
    use crate::sink::ChannelSubscriber;
    use crate::status::NativeState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Engine that reports the requested state from inside `apply_state`
    /// and, for one chosen call, then blocks until released.
    struct ConfirmingBackend {
        notifier: NotificationSender,
        calls: AtomicUsize,
        hold_call: usize,
        release: Notify,
    }

    impl ConfirmingBackend {
        fn new(notifier: NotificationSender, hold_call: usize) -> Arc<Self> {
            Arc::new(ConfirmingBackend {
                notifier,
                calls: AtomicUsize::new(0),
                hold_call,
                release: Notify::new(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackendAdapter for ConfirmingBackend {
        async fn apply_state(
            &self,
            _session: &str,
            desired: DesiredState,
            _config: Option<&str>,
        ) -> Result<(), BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.notifier.notify(desired.native());
            if call == self.hold_call {
                self.release.notified().await;
            }
            Ok(())
        }
    }

    fn confirming_controller(hold_call: usize) -> (Arc<SessionController>, Arc<ConfirmingBackend>) {
        let (tx, rx) = notification_channel("wg0");
        let backend = ConfirmingBackend::new(tx, hold_call);
        let controller = Arc::new(SessionController::new("wg0", backend.clone()));
        // Detached; ends with the controller
        let _ = controller.spawn_notification_pump(rx);
        (controller, backend)
    }

    fn notify(controller: &SessionController, state: NativeState) {
        controller.handle_notification(&Notification {
            session: controller.name().to_string(),
            state: state.into(),
        });
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let controller = SessionController::new("wg0", Arc::new(SimulatedBackend::manual()));
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.name(), "wg0");
        assert_eq!(snapshot.current_status(), TunnelStatus::Disconnected);
        assert_eq!(snapshot.pending(), PendingOperation::None);
        assert_eq!(snapshot.config(), None);
        assert_eq!(controller.status(), TunnelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_empty_config_is_rejected_without_backend_call() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());

        assert_eq!(
            controller.start("").await,
            Err(BridgeError::MissingArgument("config".into()))
        );
        assert!(backend.calls().is_empty());
        assert_eq!(controller.status(), TunnelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_marks_connecting_until_backend_confirms() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());

        controller.start("[Interface]").await.unwrap();
        assert_eq!(controller.status(), TunnelStatus::Connecting);
        assert_eq!(controller.snapshot().pending(), PendingOperation::Starting);
        assert_eq!(controller.snapshot().config(), Some("[Interface]"));

        notify(&controller, NativeState::Toggle);
        assert_eq!(controller.snapshot().pending(), PendingOperation::Starting);

        notify(&controller, NativeState::Up);
        assert_eq!(controller.status(), TunnelStatus::Connected);
        assert_eq!(controller.snapshot().pending(), PendingOperation::None);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].desired, DesiredState::Up);
        assert_eq!(calls[0].config.as_deref(), Some("[Interface]"));
    }

    #[tokio::test]
    async fn test_second_start_while_pending_is_rejected() {
        let controller = SessionController::new("wg0", Arc::new(SimulatedBackend::manual()));
        controller.start("[Interface]").await.unwrap();

        assert_eq!(
            controller.start("[Interface]").await,
            Err(BridgeError::OperationInProgress(PendingOperation::Starting))
        );
        assert_eq!(
            controller.stop().await,
            Err(BridgeError::OperationInProgress(PendingOperation::Starting))
        );
    }

    #[tokio::test]
    async fn test_backend_failure_rolls_back_pending() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());

        backend.fail_next("tun device busy");
        let err = controller.start("[Interface]").await.unwrap_err();
        assert_eq!(err.code(), "backend_failure");
        assert_eq!(controller.status(), TunnelStatus::Disconnected);
        assert_eq!(controller.snapshot().pending(), PendingOperation::None);
        assert_eq!(controller.snapshot().config(), None);

        // A retry is permitted once the failure has been reported
        controller.start("[Interface]").await.unwrap();
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_identical_start_while_connected_is_noop() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());
        controller.start("[Interface]").await.unwrap();
        notify(&controller, NativeState::Up);

        controller.start("[Interface]").await.unwrap();
        assert_eq!(backend.calls().len(), 1);

        // A different configuration goes to the backend again
        controller.start("[Interface]\nMTU = 1280").await.unwrap();
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(controller.status(), TunnelStatus::Connected);
        assert_eq!(controller.snapshot().pending(), PendingOperation::None);
    }

    #[tokio::test]
    async fn test_confirmation_during_start_keeps_config_consistent() {
        let (controller, backend) = confirming_controller(0);

        let first = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.start("CFG").await }
        });
        controller.wait_for(TunnelStatus::Connected).await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.pending(), PendingOperation::None);
        assert_eq!(snapshot.config(), Some("CFG"));

        // Identical configuration while up does not reach the engine
        controller.start("CFG").await.unwrap();
        assert_eq!(backend.calls(), 1);

        controller.stop().await.unwrap();
        controller.wait_for_stopped().await;
        assert_eq!(controller.snapshot().pending(), PendingOperation::None);

        backend.release.notify_one();
        first.await.unwrap().unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.current_status(), TunnelStatus::Disconnected);
        assert_eq!(snapshot.config(), None);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_confirmation_during_stop_keeps_new_config() {
        let (controller, backend) = confirming_controller(1);
        controller.start("CFG").await.unwrap();
        controller.wait_for(TunnelStatus::Connected).await;

        let stopping = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.stop().await }
        });
        controller.wait_for_stopped().await;
        assert_eq!(controller.snapshot().config(), None);

        controller.start("CFG-2").await.unwrap();
        controller.wait_for(TunnelStatus::Connected).await;

        backend.release.notify_one();
        stopping.await.unwrap().unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.current_status(), TunnelStatus::Connected);
        assert_eq!(snapshot.config(), Some("CFG-2"));
        assert_eq!(snapshot.pending(), PendingOperation::None);
    }

    #[tokio::test]
    async fn test_wait_for_terminal_sees_drop_after_brief_connect() {
        let controller = Arc::new(SessionController::new(
            "wg0",
            Arc::new(SimulatedBackend::manual()),
        ));
        let (tx, rx) = notification_channel("wg0");
        let _pump = controller.spawn_notification_pump(rx);

        controller.start("[Interface]").await.unwrap();
        tx.notify(NativeState::Up);
        tx.notify(NativeState::Down);
        controller.wait_for_stopped().await;

        assert_eq!(controller.wait_for_terminal().await, TunnelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_when_disconnected_is_noop() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());

        controller.stop().await.unwrap();
        assert!(backend.calls().is_empty());
        assert_eq!(controller.status(), TunnelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_drives_disconnecting_and_clears_config() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());
        controller.start("[Interface]").await.unwrap();
        notify(&controller, NativeState::Up);

        controller.stop().await.unwrap();
        assert_eq!(controller.status(), TunnelStatus::Disconnecting);
        assert_eq!(controller.snapshot().pending(), PendingOperation::Stopping);
        assert_eq!(controller.snapshot().config(), None);

        notify(&controller, NativeState::Down);
        assert_eq!(controller.status(), TunnelStatus::Disconnected);
        assert_eq!(controller.snapshot().pending(), PendingOperation::None);

        let calls = backend.calls();
        assert_eq!(calls[1].desired, DesiredState::Down);
        assert_eq!(calls[1].config, None);
    }

    #[tokio::test]
    async fn test_stop_failure_keeps_status() {
        let backend = Arc::new(SimulatedBackend::manual());
        let controller = SessionController::new("wg0", backend.clone());
        controller.start("[Interface]").await.unwrap();
        notify(&controller, NativeState::Up);

        backend.fail_next("permission revoked");
        assert!(controller.stop().await.is_err());
        assert_eq!(controller.status(), TunnelStatus::Connected);
        assert_eq!(controller.snapshot().pending(), PendingOperation::None);
        assert_eq!(controller.snapshot().config(), Some("[Interface]"));
    }

    #[tokio::test]
    async fn test_status_tracks_last_notification() {
        let controller = SessionController::new("wg0", Arc::new(SimulatedBackend::manual()));
        let script: [RawState; 6] = [
            "UP".into(),
            "TOGGLE".into(),
            "SOMETHING_NEW".into(),
            0i64.into(),
            17i64.into(),
            2i64.into(),
        ];
        let expected = [
            TunnelStatus::Connected,
            TunnelStatus::Connected,
            TunnelStatus::Connected,
            TunnelStatus::Disconnected,
            TunnelStatus::Disconnected,
            TunnelStatus::Connected,
        ];

        for (raw, want) in script.iter().zip(expected) {
            controller.handle_notification(&Notification {
                session: "wg0".into(),
                state: raw.clone(),
            });
            assert_eq!(controller.status(), want, "after {raw}");
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_deduplicated_sequence() {
        let controller = SessionController::new("wg0", Arc::new(SimulatedBackend::manual()));
        let (subscriber, mut rx) = ChannelSubscriber::new();
        controller.attach(ChannelSubscriber::downgrade(&subscriber));

        controller.start("[Interface]").await.unwrap();
        notify(&controller, NativeState::Toggle);
        notify(&controller, NativeState::Toggle);
        notify(&controller, NativeState::Up);
        notify(&controller, NativeState::Up);

        let mut seen = Vec::new();
        while let Ok(status) = rx.try_recv() {
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![
                TunnelStatus::Disconnected,
                TunnelStatus::Connecting,
                TunnelStatus::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn test_foreign_session_notifications_are_ignored() {
        let controller = SessionController::new("wg0", Arc::new(SimulatedBackend::manual()));
        controller.handle_notification(&Notification {
            session: "other".into(),
            state: NativeState::Up.into(),
        });
        assert_eq!(controller.status(), TunnelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_pump_applies_notifications_and_wait_for_stopped() {
        let controller = Arc::new(SessionController::new(
            "wg0",
            Arc::new(SimulatedBackend::manual()),
        ));
        let (tx, rx) = notification_channel("wg0");
        let pump = controller.spawn_notification_pump(rx);

        // Already stopped resolves immediately
        controller.wait_for_stopped().await;

        tx.notify(NativeState::Up);
        controller.wait_for(TunnelStatus::Connected).await;

        let waiter = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.wait_for_stopped().await }
        });
        tx.notify(NativeState::Down);
        waiter.await.unwrap();
        assert_eq!(controller.status(), TunnelStatus::Disconnected);

        drop(tx);
        pump.await.unwrap();
    }
}
