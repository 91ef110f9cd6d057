//! Tunnel status model and the mapping to and from native backend states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical lifecycle status of the tunnel.
///
/// Legal transitions form a cycle:
/// `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl TunnelStatus {
    /// Wire name used on the event stream and in method responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Disconnected => "disconnected",
            TunnelStatus::Connecting => "connecting",
            TunnelStatus::Connected => "connected",
            TunnelStatus::Disconnecting => "disconnecting",
        }
    }

    /// Next status in the lifecycle cycle.
    pub fn next(&self) -> TunnelStatus {
        match self {
            TunnelStatus::Disconnected => TunnelStatus::Connecting,
            TunnelStatus::Connecting => TunnelStatus::Connected,
            TunnelStatus::Connected => TunnelStatus::Disconnecting,
            TunnelStatus::Disconnecting => TunnelStatus::Disconnected,
        }
    }

    /// Whether this status ends a lifecycle operation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelStatus::Connected | TunnelStatus::Disconnected)
    }

    /// Map a raw backend state onto a status.
    ///
    /// Transient and unrecognized states keep `previous` ("last known good").
    pub fn from_native(raw: &RawState, previous: TunnelStatus) -> TunnelStatus {
        match NativeState::try_from(raw) {
            Ok(native) => native.status().unwrap_or(previous),
            Err(_) => previous,
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status or state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for TunnelStatus {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disconnected" => Ok(TunnelStatus::Disconnected),
            "connecting" => Ok(TunnelStatus::Connecting),
            "connected" => Ok(TunnelStatus::Connected),
            "disconnecting" => Ok(TunnelStatus::Disconnecting),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// Native state reported by the backend engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeState {
    Down,
    /// Transitional; the engine is flipping the tunnel.
    Toggle,
    Up,
}

/// Mapping table between native codes, integer codes and statuses.
/// `None` marks a native state with no status of its own.
static NATIVE_TABLE: [(NativeState, &str, i64, Option<TunnelStatus>); 3] = [
    (NativeState::Down, "DOWN", 0, Some(TunnelStatus::Disconnected)),
    (NativeState::Toggle, "TOGGLE", 1, None),
    (NativeState::Up, "UP", 2, Some(TunnelStatus::Connected)),
];

impl NativeState {
    fn row(&self) -> &'static (NativeState, &'static str, i64, Option<TunnelStatus>) {
        match self {
            NativeState::Down => &NATIVE_TABLE[0],
            NativeState::Toggle => &NATIVE_TABLE[1],
            NativeState::Up => &NATIVE_TABLE[2],
        }
    }

    /// Native string code.
    pub fn code(&self) -> &'static str {
        self.row().1
    }

    /// Native integer code.
    pub fn value(&self) -> i64 {
        self.row().2
    }

    /// Status this native state maps to, if any.
    pub fn status(&self) -> Option<TunnelStatus> {
        self.row().3
    }

    /// Native state the backend settles in for a status, if any.
    pub fn for_status(status: TunnelStatus) -> Option<NativeState> {
        NATIVE_TABLE
            .iter()
            .find(|row| row.3 == Some(status))
            .map(|row| row.0)
    }

    pub fn from_code(code: &str) -> Option<NativeState> {
        NATIVE_TABLE
            .iter()
            .find(|row| row.1.eq_ignore_ascii_case(code))
            .map(|row| row.0)
    }

    pub fn from_value(value: i64) -> Option<NativeState> {
        NATIVE_TABLE
            .iter()
            .find(|row| row.2 == value)
            .map(|row| row.0)
    }
}

/// A state value exactly as the backend delivered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawState {
    Code(String),
    Value(i64),
}

impl From<NativeState> for RawState {
    fn from(state: NativeState) -> Self {
        RawState::Code(state.code().to_string())
    }
}

impl From<&str> for RawState {
    fn from(code: &str) -> Self {
        RawState::Code(code.to_string())
    }
}

impl From<i64> for RawState {
    fn from(value: i64) -> Self {
        RawState::Value(value)
    }
}

impl fmt::Display for RawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawState::Code(code) => f.write_str(code),
            RawState::Value(value) => write!(f, "{value}"),
        }
    }
}

impl TryFrom<&RawState> for NativeState {
    type Error = UnknownState;

    fn try_from(raw: &RawState) -> Result<Self, Self::Error> {
        let native = match raw {
            RawState::Code(code) => NativeState::from_code(code),
            RawState::Value(value) => NativeState::from_value(*value),
        };
        native.ok_or_else(|| UnknownState(raw.to_string()))
    }
}

/// State requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesiredState {
    Up,
    Down,
}

impl DesiredState {
    /// Native state the backend is asked to reach.
    pub fn native(&self) -> NativeState {
        match self {
            DesiredState::Up => NativeState::Up,
            DesiredState::Down => NativeState::Down,
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.native().code())
    }
}

/// Lifecycle operation currently in flight for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PendingOperation {
    #[default]
    None,
    Starting,
    Stopping,
}

impl PendingOperation {
    pub fn is_none(&self) -> bool {
        matches!(self, PendingOperation::None)
    }

    /// Terminal status that resolves this operation.
    pub fn target(&self) -> Option<TunnelStatus> {
        match self {
            PendingOperation::None => None,
            PendingOperation::Starting => Some(TunnelStatus::Connected),
            PendingOperation::Stopping => Some(TunnelStatus::Disconnected),
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingOperation::None => f.write_str("none"),
            PendingOperation::Starting => f.write_str("starting"),
            PendingOperation::Stopping => f.write_str("stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_cycle() {
        let mut status = TunnelStatus::default();
        assert_eq!(status, TunnelStatus::Disconnected);
        let mut seen = Vec::new();
        for _ in 0..4 {
            status = status.next();
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![
                TunnelStatus::Connecting,
                TunnelStatus::Connected,
                TunnelStatus::Disconnecting,
                TunnelStatus::Disconnected,
            ]
        );
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(TunnelStatus::Connected.to_string(), "connected");
        assert_eq!(
            "DISCONNECTING".parse::<TunnelStatus>(),
            Ok(TunnelStatus::Disconnecting)
        );
        assert!("no_connection".parse::<TunnelStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&TunnelStatus::Connecting).unwrap(),
            "\"connecting\""
        );
    }

    #[test]
    fn test_native_mapping_is_bidirectional() {
        for status in [TunnelStatus::Connected, TunnelStatus::Disconnected] {
            let native = NativeState::for_status(status).unwrap();
            assert_eq!(native.status(), Some(status));
            assert_eq!(NativeState::from_code(native.code()), Some(native));
            assert_eq!(NativeState::from_value(native.value()), Some(native));
        }
        assert_eq!(NativeState::for_status(TunnelStatus::Connecting), None);
    }

    #[test]
    fn test_unknown_and_transient_states_keep_previous() {
        let previous = TunnelStatus::Connecting;
        assert_eq!(
            TunnelStatus::from_native(&RawState::from("TOGGLE"), previous),
            previous
        );
        assert_eq!(
            TunnelStatus::from_native(&RawState::from("HALF_OPEN"), previous),
            previous
        );
        assert_eq!(TunnelStatus::from_native(&RawState::from(42i64), previous), previous);
        assert_eq!(
            TunnelStatus::from_native(&RawState::from("up"), previous),
            TunnelStatus::Connected
        );
        assert_eq!(
            TunnelStatus::from_native(&RawState::from(0i64), previous),
            TunnelStatus::Disconnected
        );
    }

    #[test]
    fn test_pending_targets() {
        assert!(PendingOperation::default().is_none());
        assert_eq!(
            PendingOperation::Starting.target(),
            Some(TunnelStatus::Connected)
        );
        assert_eq!(
            PendingOperation::Stopping.target(),
            Some(TunnelStatus::Disconnected)
        );
    }
}
