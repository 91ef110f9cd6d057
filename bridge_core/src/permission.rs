//! Permission gate for tunnel-creation consent.
//!
//! If consent is already on record the gate answers immediately. Otherwise it
//! runs one consent prompt and lets every concurrent caller await that same
//! prompt.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};

/// User's answer to a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentResponse {
    Affirmative,
    Negative,
}

/// Outcome of a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    Error(String),
}

/// Platform consent facility.
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    /// Whether the OS already records consent for this process.
    fn has_consent(&self) -> bool;

    /// Show the consent UI and wait for the user's answer.
    async fn prompt(&self, request_id: Uuid) -> Result<ConsentResponse, String>;
}

type PendingPrompt = Shared<BoxFuture<'static, PermissionOutcome>>;

struct InFlight {
    request_id: Uuid,
    prompt: PendingPrompt,
}

/// Serializes consent prompts; at most one is open at a time.
pub struct PermissionGate {
    provider: Arc<dyn ConsentProvider>,
    pending: Mutex<Option<InFlight>>,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn ConsentProvider>) -> Self {
        PermissionGate {
            provider,
            pending: Mutex::new(None),
        }
    }

    /// Resolve whether tunnel creation is permitted, prompting if needed.
    #[instrument(level = "debug", skip(self))]
    pub async fn request_permission(&self) -> PermissionOutcome {
        if self.provider.has_consent() {
            info!("VPN permission granted");
            return PermissionOutcome::Granted;
        }

        let (request_id, prompt) = self.join_or_open_prompt();
        let outcome = prompt.clone().await;

        {
            let mut pending = self.lock_pending();
            if pending
                .as_ref()
                .is_some_and(|in_flight| in_flight.prompt.ptr_eq(&prompt))
            {
                *pending = None;
            }
        }

        match &outcome {
            PermissionOutcome::Granted => info!(%request_id, "VPN permission granted"),
            PermissionOutcome::Denied => info!(%request_id, "VPN permission denied"),
            PermissionOutcome::Error(detail) => {
                warn!(%request_id, error = %detail, "VPN permission prompt failed")
            }
        }
        outcome
    }

    /// Same as [`request_permission`](Self::request_permission), as a `Result`.
    pub async fn request(&self) -> BridgeResult<()> {
        match self.request_permission().await {
            PermissionOutcome::Granted => Ok(()),
            PermissionOutcome::Denied => Err(BridgeError::PermissionDenied),
            PermissionOutcome::Error(detail) => Err(BridgeError::BackendFailure(detail)),
        }
    }

    /// Whether a consent prompt is currently open.
    pub fn is_prompt_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    fn join_or_open_prompt(&self) -> (Uuid, PendingPrompt) {
        let mut pending = self.lock_pending();
        if let Some(in_flight) = pending.as_ref() {
            debug!(request_id = %in_flight.request_id, "joining pending consent prompt");
            return (in_flight.request_id, in_flight.prompt.clone());
        }

        let request_id = Uuid::new_v4();
        let provider = Arc::clone(&self.provider);
        let prompt = async move {
            match provider.prompt(request_id).await {
                Ok(ConsentResponse::Affirmative) => PermissionOutcome::Granted,
                Ok(ConsentResponse::Negative) => PermissionOutcome::Denied,
                Err(detail) => PermissionOutcome::Error(detail),
            }
        }
        .boxed()
        .shared();

        info!(%request_id, "requesting VPN permission");
        *pending = Some(InFlight {
            request_id,
            prompt: prompt.clone(),
        });
        (request_id, prompt)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
