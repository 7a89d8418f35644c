//! Config schema types (server, lifecycle, dispatch, pairing, telegram, bridge, cleanup).

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub dispatch: DispatchConfig,
    pub pairing: PairingConfig,
    pub telegram: TelegramConfig,
    pub bridge: BridgeConfig,
    pub cleanup: CleanupConfig,
}

/// Serialize a secret as a fixed placeholder so dumps never leak it.
pub fn serialize_redacted<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}

// ── Server ───────────────────────────────────────────────────────────────────

/// HTTP control plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token guarding `/admin/*`. Admin routes are open when unset.
    #[serde(serialize_with = "serialize_redacted")]
    pub admin_token: Option<Secret<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            admin_token: None,
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

/// Connection lifecycle timings and reconnect ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Wait after `authenticated` before the session is declared ready.
    pub ready_settle_ms: u64,
    /// Wait after a forced reconnect or logout before re-initialising.
    pub reinit_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    /// Reject `/admin/reconnect` while the session is ready.
    pub refuse_reconnect_when_ready: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_settle_ms: 5_000,
            reinit_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 5_000,
            refuse_reconnect_when_ready: false,
        }
    }
}

impl LifecycleConfig {
    pub fn ready_settle(&self) -> Duration {
        Duration::from_millis(self.ready_settle_ms)
    }

    pub fn reinit_delay(&self) -> Duration {
        Duration::from_millis(self.reinit_delay_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Outbound message validation and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// When set, requests must claim exactly this sender.
    pub expected_sender: Option<String>,
    pub retry_delay_ms: u64,
    /// Appended to the recipient number to form the chat id.
    pub chat_suffix: String,
    /// Error message fragments that mark a send failure as transient.
    pub transient_signatures: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            expected_sender: None,
            retry_delay_ms: 2_000,
            chat_suffix: "@c.us".into(),
            transient_signatures: vec![
                "Evaluation failed".into(),
                "Execution context was destroyed".into(),
                "Cannot read properties of undefined".into(),
            ],
        }
    }
}

impl DispatchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ── Pairing ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Where the current QR image is written. `None` keeps it in memory only.
    pub artifact_path: Option<PathBuf>,
    /// Log a Unicode rendering of each QR code.
    pub terminal_qr: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            artifact_path: Some(PathBuf::from("wa-qr.png")),
            terminal_qr: true,
        }
    }
}

// ── Telegram ─────────────────────────────────────────────────────────────────

/// Out-of-band QR delivery. Enabled only when both token and chat id are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    #[serde(serialize_with = "serialize_redacted")]
    pub bot_token: Option<Secret<String>>,
    pub chat_id: Option<String>,
    pub caption: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            caption: "Scan this WhatsApp QR code to log the gateway in.".into(),
        }
    }
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }
}

// ── Bridge ───────────────────────────────────────────────────────────────────

/// Child process that speaks the messaging protocol on our behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub request_timeout_secs: u64,
    /// Extra flags for the headless browser, exported as `WAGATE_BROWSER_ARGS`.
    pub browser_args: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let browser_args = if cfg!(target_os = "linux") {
            vec!["--no-sandbox".into(), "--disable-setuid-sandbox".into()]
        } else {
            Vec::new()
        };
        Self {
            command: "node".into(),
            args: vec!["bridge.js".into()],
            env: HashMap::new(),
            request_timeout_secs: 60,
            browser_args,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Cleanup ──────────────────────────────────────────────────────────────────

/// Session files removed on a forced reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub auth_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Browser lock file names, searched for recursively under `auth_dir`.
    pub lock_files: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from(".wwebjs_auth"),
            cache_dir: PathBuf::from(".wwebjs_cache"),
            lock_files: vec![
                "SingletonLock".into(),
                "SingletonCookie".into(),
                "SingletonSocket".into(),
            ],
        }
    }
}
