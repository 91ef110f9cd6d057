//! The tunnel bridge context.
//!
//! A [`TunnelBridge`] is constructed once at process start and passed to
//! whatever hosts the method and event surfaces. It lives for the process
//! lifetime; tests construct as many independent bridges as they need.

use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::{BackendAdapter, NotificationSender, notification_channel};
use crate::error::BridgeResult;
use crate::permission::{ConsentProvider, PermissionGate};
use crate::session::SessionController;
use crate::sink::StatusSubscriber;
use crate::status::TunnelStatus;

/// Permission gate, session controller and notification pump for one tunnel.
pub struct TunnelBridge {
    gate: PermissionGate,
    controller: Arc<SessionController>,
    pump: JoinHandle<()>,
}

impl TunnelBridge {
    /// Build the bridge and the sender the backend reports through.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn BackendAdapter>,
        consent: Arc<dyn ConsentProvider>,
    ) -> (Self, NotificationSender) {
        let name = name.into();
        let controller = Arc::new(SessionController::new(name.clone(), backend));
        let (notifier, rx) = notification_channel(name.clone());
        let pump = controller.spawn_notification_pump(rx);
        info!(session = %name, "tunnel bridge ready");

        (
            TunnelBridge {
                gate: PermissionGate::new(consent),
                controller,
                pump,
            },
            notifier,
        )
    }

    pub fn session_name(&self) -> &str {
        self.controller.name()
    }

    /// Ask for tunnel-creation consent.
    pub async fn request_permission(&self) -> BridgeResult<()> {
        self.gate.request().await
    }

    pub async fn start(&self, config: &str) -> BridgeResult<()> {
        self.controller.start(config).await
    }

    pub async fn stop(&self) -> BridgeResult<()> {
        self.controller.stop().await
    }

    pub fn get_status(&self) -> TunnelStatus {
        self.controller.status()
    }

    /// Attach the single status subscriber, replacing any previous one.
    pub fn attach(&self, subscriber: Weak<dyn StatusSubscriber>) {
        self.controller.attach(subscriber);
    }

    pub fn detach(&self) {
        self.controller.detach();
    }

    pub async fn wait_for(&self, status: TunnelStatus) {
        self.controller.wait_for(status).await;
    }

    pub async fn wait_for_terminal(&self) -> TunnelStatus {
        self.controller.wait_for_terminal().await
    }

    pub async fn wait_for_stopped(&self) {
        self.controller.wait_for_stopped().await;
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn permission_gate(&self) -> &PermissionGate {
        &self.gate
    }
}

impl Drop for TunnelBridge {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
