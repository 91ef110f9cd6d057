//! Tunnel session and status bridge.
//!
//! Controls a single VPN tunnel backed by a platform engine: serializes
//! start/stop requests, tracks the canonical tunnel status derived from the
//! engine's asynchronous notifications, and delivers that status to one
//! observer at a time with catch-up on attach.

pub mod backend;
pub mod bridge;
pub mod channel;
pub mod error;
pub mod permission;
pub mod session;
pub mod sim;
pub mod sink;
pub mod status;

// Re-export commonly used types for convenience
pub use backend::{BackendAdapter, Notification, NotificationSender};
pub use bridge::TunnelBridge;
pub use channel::{MethodCall, MethodResponse, StatusEvent};
pub use error::{BackendError, BridgeError, BridgeResult};
pub use permission::{ConsentProvider, ConsentResponse, PermissionGate, PermissionOutcome};
pub use session::{Session, SessionController};
pub use sink::{ChannelSubscriber, StatusSink, StatusSubscriber};
pub use status::{DesiredState, NativeState, PendingOperation, RawState, TunnelStatus};
