//! Contracts between the connection core and its external collaborators.
//!
//! The messaging transport (pairing handshake, session persistence, message
//! delivery) implements [`Transport`]; out-of-band QR delivery implements
//! [`PairingNotifier`].

pub mod notify;
pub mod transport;

pub use {
    notify::{NotifyError, PairingNotice, PairingNotifier},
    transport::{ClientInfo, EventSink, StampedEvent, Transport, TransportError, TransportEvent},
};
