//! Pairing artifact manager.
//!
//! Holds at most one live QR artifact: the one for the current pairing
//! opportunity. Publishing a new payload overwrites the previous artifact in
//! memory and on disk; clearing removes both. Notifier delivery runs in the
//! background and its failures are only logged.

use std::{path::PathBuf, sync::Arc};

use {
    bytes::Bytes,
    chrono::{DateTime, Utc},
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
    wagate_channels::{PairingNotice, PairingNotifier},
};

use crate::qr::{render_png, render_terminal};

/// Rendered representation of one pairing payload.
#[derive(Debug, Clone)]
pub struct PairingArtifact {
    pub payload: String,
    /// `None` when PNG rendering failed; the payload is then served as text.
    pub png: Option<Bytes>,
    pub created_at: DateTime<Utc>,
}

pub struct PairingArtifacts {
    path: Option<PathBuf>,
    terminal_qr: bool,
    notifier: Option<Arc<dyn PairingNotifier>>,
    current: RwLock<Option<Arc<PairingArtifact>>>,
}

impl PairingArtifacts {
    pub fn new(path: Option<PathBuf>, terminal_qr: bool) -> Self {
        Self {
            path,
            terminal_qr,
            notifier: None,
            current: RwLock::new(None),
        }
    }

    pub fn from_config(cfg: &wagate_config::PairingConfig) -> Self {
        Self::new(cfg.artifact_path.clone(), cfg.terminal_qr)
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn PairingNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The live artifact, if a pairing opportunity is open.
    pub async fn current(&self) -> Option<Arc<PairingArtifact>> {
        self.current.read().await.clone()
    }

    /// Render `payload`, replace the live artifact and notify operators.
    pub async fn publish(&self, payload: String) -> Arc<PairingArtifact> {
        let png = match render_png(&payload) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                warn!(error = %e, "failed to render QR image, falling back to text");
                None
            },
        };

        if self.terminal_qr {
            match render_terminal(&payload) {
                Ok(block) => info!("scan this QR code with WhatsApp to pair:\n{block}"),
                Err(e) => warn!(error = %e, "failed to render terminal QR"),
            }
        }

        let artifact = Arc::new(PairingArtifact {
            payload,
            png,
            created_at: Utc::now(),
        });
        *self.current.write().await = Some(Arc::clone(&artifact));
        self.persist(&artifact).await;
        metrics::counter!("wagate_pairing_artifacts_total").increment(1);

        if let Some(notifier) = &self.notifier {
            let notifier = Arc::clone(notifier);
            let notice = PairingNotice {
                payload: artifact.payload.clone(),
                png: artifact.png.clone(),
            };
            tokio::spawn(async move {
                match notifier.notify(&notice).await {
                    Ok(()) => info!(notifier = notifier.name(), "pairing QR delivered"),
                    Err(e) => {
                        warn!(notifier = notifier.name(), error = %e, "pairing QR delivery failed")
                    },
                }
            });
        }

        artifact
    }

    /// Drop the live artifact and its file. A missing file is not an error.
    pub async fn clear(&self) {
        let had = self.current.write().await.take().is_some();
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed QR artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove QR artifact"),
            }
        }
        if had {
            info!("pairing artifact cleared");
        }
    }

    async fn persist(&self, artifact: &PairingArtifact) {
        let Some(path) = &self.path else {
            return;
        };
        let result = match &artifact.png {
            Some(png) => tokio::fs::write(path, png).await,
            // A text-only artifact must not leave the previous image behind.
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => debug!(path = %path.display(), "QR artifact written"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to persist QR artifact"),
        }
    }
}
