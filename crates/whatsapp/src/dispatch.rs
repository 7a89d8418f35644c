//! Outbound message pipeline: validate, gate on readiness, send, retry once on
//! the transient "client not settled" failure class.

use std::{sync::Arc, time::Duration};

use {
    once_cell::sync::Lazy,
    regex::Regex,
    tokio::sync::watch,
    tracing::{debug, info, warn},
    wagate_channels::{Transport, TransportError},
};

use crate::state::SessionState;

/// Country-code-prefixed digit string, 11 to 17 digits in total.
#[allow(clippy::expect_used)]
static RECIPIENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^62\d{9,15}$").expect("recipient pattern should compile"));

/// One send request as received from the control plane.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub recipient: String,
    pub body: String,
    pub claimed_sender: String,
}

/// Client-caused refusal. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingFields,
    SenderMismatch,
    NotReady,
    InvalidRecipient,
}

impl Rejection {
    /// Stable, externally visible reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingFields => "phone, message and sender are required",
            Self::SenderMismatch => "sender does not match",
            Self::NotReady => "WhatsApp client is not ready yet, please try again shortly",
            Self::InvalidRecipient => "phone must start with 62 and contain only digits",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingFields => "missing_fields",
            Self::SenderMismatch => "sender_mismatch",
            Self::NotReady => "not_ready",
            Self::InvalidRecipient => "invalid_recipient",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Rejected(Rejection),
    /// The transport refused the message; `error` is the last attempt's error.
    Failed { error: String, attempts: u32 },
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Rejected(r) => r.as_str(),
            Self::Failed { .. } => "failed",
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    session: watch::Receiver<SessionState>,
    expected_sender: Option<String>,
    chat_suffix: String,
    retry_delay: Duration,
    transient_signatures: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: watch::Receiver<SessionState>,
        cfg: &wagate_config::DispatchConfig,
    ) -> Self {
        Self {
            transport,
            session,
            expected_sender: cfg
                .expected_sender
                .clone()
                .filter(|s| !s.trim().is_empty()),
            chat_suffix: cfg.chat_suffix.clone(),
            retry_delay: cfg.retry_delay(),
            transient_signatures: cfg.transient_signatures.clone(),
        }
    }

    /// Validate and send. Every path returns an outcome; nothing propagates.
    pub async fn dispatch(&self, msg: &OutboundMessage) -> DispatchOutcome {
        let outcome = match self.validate(msg) {
            Err(rejection) => {
                debug!(reason = rejection.as_str(), "send request rejected");
                DispatchOutcome::Rejected(rejection)
            },
            Ok(()) => self.send(msg).await,
        };
        metrics::counter!("wagate_dispatch_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Checks in order; the first failure wins.
    fn validate(&self, msg: &OutboundMessage) -> Result<(), Rejection> {
        if [&msg.recipient, &msg.body, &msg.claimed_sender]
            .iter()
            .any(|field| field.is_empty())
        {
            return Err(Rejection::MissingFields);
        }
        if let Some(expected) = &self.expected_sender
            && msg.claimed_sender != *expected
        {
            return Err(Rejection::SenderMismatch);
        }
        if !self.session.borrow().ready() {
            return Err(Rejection::NotReady);
        }
        if !RECIPIENT_RE.is_match(&msg.recipient) {
            return Err(Rejection::InvalidRecipient);
        }
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> DispatchOutcome {
        let chat_id = format!("{}{}", msg.recipient, self.chat_suffix);

        let first = match self.transport.send_message(&chat_id, &msg.body).await {
            Ok(()) => {
                info!(recipient = %msg.recipient, "message sent");
                return DispatchOutcome::Sent;
            },
            Err(e) => e,
        };

        if !self.is_transient(&first) {
            warn!(recipient = %msg.recipient, error = %first, "message send failed");
            return DispatchOutcome::Failed {
                error: first.to_string(),
                attempts: 1,
            };
        }

        warn!(
            recipient = %msg.recipient,
            error = %first,
            retry_ms = self.retry_delay.as_millis() as u64,
            "client not settled, retrying send once"
        );
        tokio::time::sleep(self.retry_delay).await;

        match self.transport.send_message(&chat_id, &msg.body).await {
            Ok(()) => {
                info!(recipient = %msg.recipient, "message sent on retry");
                DispatchOutcome::Sent
            },
            Err(e) => {
                warn!(recipient = %msg.recipient, error = %e, "message send failed after retry");
                DispatchOutcome::Failed {
                    error: e.to_string(),
                    attempts: 2,
                }
            },
        }
    }

    fn is_transient(&self, err: &TransportError) -> bool {
        match err {
            TransportError::NotSettled(_) => true,
            TransportError::Remote(message) => self
                .transient_signatures
                .iter()
                .any(|sig| message.contains(sig.as_str())),
            _ => false,
        }
    }
}
