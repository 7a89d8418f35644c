//! WhatsApp session core: lifecycle state machine and its async controller,
//! reconnect policy, pairing QR artifacts, outbound dispatch and the stdio
//! bridge transport.

pub mod bridge;
pub mod cleanup;
pub mod controller;
pub mod dispatch;
pub mod lifecycle;
pub mod pairing;
pub mod policy;
pub mod qr;
pub mod state;

pub use {
    bridge::BridgeTransport,
    cleanup::{CleanupOutcome, FsSessionCleaner, SessionCleaner},
    controller::{LifecycleController, LifecycleHandle},
    dispatch::{DispatchOutcome, Dispatcher, OutboundMessage, Rejection},
    lifecycle::{AdminOp, LifecycleError, LifecycleSettings},
    pairing::{PairingArtifact, PairingArtifacts},
    policy::{ReconnectDecision, ReconnectPolicy},
    state::{Phase, SessionState},
};
