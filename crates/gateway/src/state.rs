use std::{sync::Arc, time::Instant};

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusHandle;
use {
    secrecy::Secret,
    wagate_whatsapp::{Dispatcher, LifecycleHandle, PairingArtifacts},
};

/// Everything the HTTP handlers need, shared behind one `Arc`.
pub struct GatewayState {
    pub lifecycle: LifecycleHandle,
    pub dispatcher: Dispatcher,
    pub artifacts: Arc<PairingArtifacts>,
    pub admin_token: Option<Secret<String>>,
    pub started_at: Instant,
    pub version: String,
    #[cfg(feature = "prometheus")]
    pub metrics: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(
        lifecycle: LifecycleHandle,
        dispatcher: Dispatcher,
        artifacts: Arc<PairingArtifacts>,
        admin_token: Option<Secret<String>>,
    ) -> Self {
        Self {
            lifecycle,
            dispatcher,
            artifacts,
            admin_token,
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            #[cfg(feature = "prometheus")]
            metrics: None,
        }
    }

    /// Attach the Prometheus handle rendered by `/metrics`.
    #[cfg(feature = "prometheus")]
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
