use {async_trait::async_trait, bytes::Bytes};

/// A pairing opportunity pushed to an operator channel.
#[derive(Debug, Clone)]
pub struct PairingNotice {
    /// Raw pairing payload, used as the textual fallback.
    pub payload: String,
    /// Rendered PNG, absent when image encoding failed.
    pub png: Option<Bytes>,
}

impl PairingNotice {
    /// Text sent when no image is available.
    pub fn fallback_text(&self) -> String {
        format!("Scan the WhatsApp QR code:\n\n{}", self.payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier delivery failed: {0}")]
    Delivery(String),
}

/// Optional out-of-band delivery of pairing artifacts.
#[async_trait]
pub trait PairingNotifier: Send + Sync {
    /// Notifier identifier used in logs (e.g. "telegram").
    fn name(&self) -> &str;

    async fn notify(&self, notice: &PairingNotice) -> Result<(), NotifyError>;
}
