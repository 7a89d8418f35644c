use {serde::Serialize, wagate_channels::ClientInfo};

/// Where the connection currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    AwaitingPairing,
    Authenticated,
    Ready,
    Disconnected,
    ReconnectExhausted,
    Terminated,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::ReconnectExhausted => "reconnect_exhausted",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the single process-wide session.
///
/// Only the lifecycle machine mutates it; everyone else reads copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: Phase,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub client_info: Option<ClientInfo>,
}

impl SessionState {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            phase: Phase::Uninitialized,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            client_info: None,
        }
    }

    /// True exactly when the phase is [`Phase::Ready`].
    pub fn ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}
