//! Method and event surface of the bridge.
//!
//! Callers send [`MethodCall`] requests and receive one [`MethodResponse`]
//! each; status changes travel separately as [`StatusEvent`]s.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::TunnelBridge;
use crate::error::{BridgeError, BridgeResult};
use crate::status::TunnelStatus;

/// A request on the method surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawCall", into = "RawCall")]
pub enum MethodCall {
    RequestPermission,
    Start { config: Option<String> },
    Stop,
    GetStatus,
    /// Any method name the bridge does not know.
    Unknown(String),
}

#[derive(Serialize, Deserialize)]
struct RawCall {
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<String>,
}

impl From<RawCall> for MethodCall {
    fn from(raw: RawCall) -> Self {
        match raw.method.as_str() {
            "requestPermission" => MethodCall::RequestPermission,
            "start" => MethodCall::Start { config: raw.config },
            "stop" => MethodCall::Stop,
            "getStatus" => MethodCall::GetStatus,
            _ => MethodCall::Unknown(raw.method),
        }
    }
}

impl From<MethodCall> for RawCall {
    fn from(call: MethodCall) -> Self {
        let method = call.name().to_string();
        let config = match call {
            MethodCall::Start { config } => config,
            _ => None,
        };
        RawCall { method, config }
    }
}

impl MethodCall {
    pub fn name(&self) -> &str {
        match self {
            MethodCall::RequestPermission => "requestPermission",
            MethodCall::Start { .. } => "start",
            MethodCall::Stop => "stop",
            MethodCall::GetStatus => "getStatus",
            MethodCall::Unknown(name) => name,
        }
    }
}

/// The reply to one [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum MethodResponse {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<TunnelStatus>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl From<BridgeResult<Option<TunnelStatus>>> for MethodResponse {
    fn from(result: BridgeResult<Option<TunnelStatus>>) -> Self {
        match result {
            Ok(value) => MethodResponse::Success { value },
            Err(err) => MethodResponse::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl MethodResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, MethodResponse::Success { .. })
    }
}

/// Payload on the status event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StatusEvent {
    Status { status: TunnelStatus },
    /// The stream to this listener has ended.
    End,
}

impl From<TunnelStatus> for StatusEvent {
    fn from(status: TunnelStatus) -> Self {
        StatusEvent::Status { status }
    }
}

impl TunnelBridge {
    /// Run one method call to completion.
    pub async fn dispatch(&self, call: MethodCall) -> MethodResponse {
        debug!(session = %self.session_name(), method = call.name(), "dispatching method call");

        let result = match call {
            MethodCall::RequestPermission => self.request_permission().await.map(|()| None),
            MethodCall::Start {
                config: Some(config),
            } => self.start(&config).await.map(|()| None),
            MethodCall::Start { config: None } => {
                Err(BridgeError::MissingArgument("config".to_string()))
            }
            MethodCall::Stop => self.stop().await.map(|()| None),
            MethodCall::GetStatus => Ok(Some(self.get_status())),
            MethodCall::Unknown(name) => Err(BridgeError::NotImplemented(name)),
        };

        result.into()
    }
}
