//! Bridge construction and event output for the CLI host.

use bridge_core::sim::{SimulatedBackend, SimulatedConsent};
use bridge_core::{StatusEvent, StatusSubscriber, TunnelBridge, TunnelStatus};
use shared_utils::Config;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Build a bridge over the simulated engine described by `config`.
///
/// Must be called from within a tokio runtime.
pub fn build_bridge(config: &Config) -> TunnelBridge {
    let mut backend = SimulatedBackend::new(
        config.backend.connect_delay(),
        config.backend.disconnect_delay(),
    );
    if let Some(detail) = &config.backend.fail_with {
        backend = backend.failing(detail.clone());
    }
    let backend = Arc::new(backend);

    let consent = Arc::new(SimulatedConsent::new(
        config.permission.pre_granted,
        config.permission.grant,
        config.permission.prompt_delay(),
    ));

    let (bridge, notifier) =
        TunnelBridge::new(config.session.name.clone(), backend.clone(), consent);
    backend.attach_notifier(notifier);
    bridge
}

/// Subscriber rendering status events as JSON lines onto a channel.
pub struct EventLines {
    tx: mpsc::UnboundedSender<String>,
}

impl EventLines {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(EventLines { tx }), rx)
    }

    pub fn downgrade(this: &Arc<Self>) -> Weak<dyn StatusSubscriber> {
        let weak: Weak<EventLines> = Arc::downgrade(this);
        weak
    }

    fn emit(&self, event: StatusEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => {
                if self.tx.send(line).is_err() {
                    debug!("event output closed, dropping event");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode status event"),
        }
    }
}

impl StatusSubscriber for EventLines {
    fn on_status(&self, status: TunnelStatus) {
        self.emit(status.into());
    }

    fn on_end_of_stream(&self) {
        self.emit(StatusEvent::End);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.backend.connect_delay_ms = 1;
        config.backend.disconnect_delay_ms = 1;
        config.permission.pre_granted = true;
        config
    }

    #[tokio::test]
    async fn test_built_bridge_connects_through_simulated_engine() {
        let config = fast_config();
        let bridge = build_bridge(&config);
        assert_eq!(bridge.session_name(), "vpnbridge");

        bridge.start("[Interface]").await.unwrap();
        timeout(Duration::from_secs(5), bridge.wait_for(TunnelStatus::Connected))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_configured_failure_is_reported() {
        let mut config = fast_config();
        config.backend.fail_with = Some("engine offline".into());
        let bridge = build_bridge(&config);

        let err = bridge.start("[Interface]").await.unwrap_err();
        assert!(err.to_string().contains("engine offline"));
        assert_eq!(bridge.get_status(), TunnelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_event_lines_render_status_and_end() {
        let bridge = build_bridge(&fast_config());
        let (events, mut rx) = EventLines::new();

        bridge.attach(EventLines::downgrade(&events));
        bridge.detach();

        assert_eq!(
            rx.recv().await.unwrap(),
            r#"{"event":"status","status":"disconnected"}"#
        );
        assert_eq!(rx.recv().await.unwrap(), r#"{"event":"end"}"#);
    }
}
