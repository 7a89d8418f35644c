use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::WagateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wagate.toml", "wagate.yaml", "wagate.yml", "wagate.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<WagateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wagate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/wagate/wagate.{toml,yaml,yml,json}` (user-global)
///
/// Returns `WagateConfig::default()` only when no config file exists. A file
/// that exists but cannot be read or parsed is an error.
pub fn discover_and_load() -> anyhow::Result<WagateConfig> {
    load_found(find_config_file())
}

fn load_found(found: Option<PathBuf>) -> anyhow::Result<WagateConfig> {
    let Some(path) = found else {
        debug!("no config file found, using defaults");
        return Ok(WagateConfig::default());
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path)
}

/// Load the effective configuration (explicit file or discovery), followed
/// by environment overrides.
pub fn load_effective(explicit: Option<&Path>) -> anyhow::Result<WagateConfig> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => discover_and_load()?,
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_config_in(Path::new("")).or_else(|| find_config_in(&config_dir()?))
}

fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory, `~/.config/wagate/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("wagate"))
}

/// Apply the process environment on top of file values.
pub fn apply_env_overrides(config: &mut WagateConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

/// Apply overrides resolved through `lookup`. Empty values are ignored.
///
/// | variable | field |
/// |---|---|
/// | `PORT` | `server.port` |
/// | `WA_SENDER` | `dispatch.expected_sender` |
/// | `TELEGRAM_BOT_TOKEN` | `telegram.bot_token` |
/// | `TELEGRAM_CHAT_ID` | `telegram.chat_id` |
/// | `WAGATE_ADMIN_TOKEN` | `server.admin_token` |
pub fn apply_overrides_from(config: &mut WagateConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(sender) = get("WA_SENDER") {
        config.dispatch.expected_sender = Some(sender);
    }
    if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = Some(Secret::new(token));
    }
    if let Some(chat_id) = get("TELEGRAM_CHAT_ID") {
        config.telegram.chat_id = Some(chat_id);
    }
    if let Some(token) = get("WAGATE_ADMIN_TOKEN") {
        config.server.admin_token = Some(Secret::new(token));
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<WagateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
