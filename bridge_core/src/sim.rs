//! Simulated backend engine and consent provider.
//!
//! Used by the `bridgectl` host and by tests in place of a platform VPN
//! engine. The backend mimics an engine that flips through a transitional
//! native state before settling.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{BackendAdapter, NotificationSender};
use crate::error::BackendError;
use crate::permission::{ConsentProvider, ConsentResponse};
use crate::status::{DesiredState, NativeState};

/// One `apply_state` request as the backend received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedState {
    pub session: String,
    pub desired: DesiredState,
    pub config: Option<String>,
}

/// In-process stand-in for a platform VPN engine.
pub struct SimulatedBackend {
    calls: Mutex<Vec<AppliedState>>,
    fail_next: Mutex<Option<BackendError>>,
    fail_always: Option<String>,
    notifier: Mutex<Option<NotificationSender>>,
    connect_delay: Duration,
    disconnect_delay: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedBackend {
    /// Backend that reports state changes after the given delays once a
    /// notifier is attached.
    pub fn new(connect_delay: Duration, disconnect_delay: Duration) -> Self {
        SimulatedBackend {
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            fail_always: None,
            notifier: Mutex::new(None),
            connect_delay,
            disconnect_delay,
        }
    }

    /// Backend that records requests and never reports on its own.
    pub fn manual() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Reject every request with `detail`.
    pub fn failing(mut self, detail: impl Into<String>) -> Self {
        self.fail_always = Some(detail.into());
        self
    }

    /// Route state reports through `notifier`.
    pub fn attach_notifier(&self, notifier: NotificationSender) {
        *lock(&self.notifier) = Some(notifier);
    }

    /// Reject only the next request with `detail`.
    pub fn fail_next(&self, detail: impl Into<String>) {
        *lock(&self.fail_next) = Some(BackendError::Rejected(detail.into()));
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<AppliedState> {
        lock(&self.calls).clone()
    }

    fn report(&self, desired: DesiredState) {
        let Some(notifier) = lock(&self.notifier).clone() else {
            return;
        };
        let delay = match desired {
            DesiredState::Up => self.connect_delay,
            DesiredState::Down => self.disconnect_delay,
        };

        tokio::spawn(async move {
            notifier.notify(NativeState::Toggle);
            sleep(delay).await;
            debug!(session = %notifier.session(), state = %desired, "simulated engine settled");
            notifier.notify(desired.native());
        });
    }
}

#[async_trait]
impl BackendAdapter for SimulatedBackend {
    async fn apply_state(
        &self,
        session: &str,
        desired: DesiredState,
        config: Option<&str>,
    ) -> Result<(), BackendError> {
        lock(&self.calls).push(AppliedState {
            session: session.to_string(),
            desired,
            config: config.map(str::to_string),
        });

        if let Some(err) = lock(&self.fail_next).take() {
            return Err(err);
        }
        if let Some(detail) = &self.fail_always {
            return Err(BackendError::Rejected(detail.clone()));
        }

        info!(session, state = %desired, "simulated engine accepted state");
        self.report(desired);
        Ok(())
    }
}

/// Consent provider answering prompts with a fixed response.
pub struct SimulatedConsent {
    recorded: AtomicBool,
    grant: bool,
    delay: Duration,
    prompts: AtomicUsize,
}

impl SimulatedConsent {
    pub fn new(pre_granted: bool, grant: bool, delay: Duration) -> Self {
        SimulatedConsent {
            recorded: AtomicBool::new(pre_granted),
            grant,
            delay,
            prompts: AtomicUsize::new(0),
        }
    }

    /// Consent already on record.
    pub fn granted() -> Self {
        Self::new(true, true, Duration::ZERO)
    }

    /// Number of prompts shown.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsentProvider for SimulatedConsent {
    fn has_consent(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }

    async fn prompt(&self, request_id: Uuid) -> Result<ConsentResponse, String> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        debug!(%request_id, "showing simulated consent prompt");
        sleep(self.delay).await;

        if self.grant {
            self.recorded.store(true, Ordering::SeqCst);
            Ok(ConsentResponse::Affirmative)
        } else {
            Ok(ConsentResponse::Negative)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::notification_channel;
    use crate::status::RawState;

    #[tokio::test]
    async fn test_backend_reports_toggle_then_settles() {
        let backend = SimulatedBackend::new(Duration::from_millis(1), Duration::ZERO);
        let (tx, mut rx) = notification_channel("wg0");
        backend.attach_notifier(tx);

        backend
            .apply_state("wg0", DesiredState::Up, Some("[Interface]"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().state, RawState::from("TOGGLE"));
        assert_eq!(rx.recv().await.unwrap().state, RawState::from("UP"));
    }

    #[tokio::test]
    async fn test_failing_backend_rejects_every_call() {
        let backend = SimulatedBackend::manual().failing("no tun support");
        let err = backend
            .apply_state("wg0", DesiredState::Down, None)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Rejected("no tun support".into()));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_consent_is_recorded_after_grant() {
        let consent = SimulatedConsent::new(false, true, Duration::ZERO);
        assert!(!consent.has_consent());
        let answer = consent.prompt(Uuid::new_v4()).await.unwrap();
        assert_eq!(answer, ConsentResponse::Affirmative);
        assert!(consent.has_consent());
        assert_eq!(consent.prompts(), 1);
    }
}
