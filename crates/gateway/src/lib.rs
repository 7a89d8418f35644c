//! Gateway: HTTP control plane in front of the WhatsApp session.
//!
//! Lifecycle:
//! 1. Build the transport, pairing artifacts and optional Telegram notifier
//! 2. Spawn the lifecycle controller (first `initialize()` happens here)
//! 3. Serve the HTTP routes until Ctrl+C / SIGTERM
//! 4. Drain HTTP, then shut the lifecycle down
//!
//! Session logic lives in `wagate-whatsapp`; handlers here only translate
//! requests into controller/dispatcher calls and outcomes into responses.

pub mod auth;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
