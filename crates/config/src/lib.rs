//! Gateway configuration: schema, file discovery, `${VAR}` substitution and
//! environment overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, apply_overrides_from, discover_and_load, find_config_file,
        load_config, load_effective,
    },
    schema::{
        BridgeConfig, CleanupConfig, DispatchConfig, LifecycleConfig, PairingConfig, ServerConfig,
        TelegramConfig, WagateConfig,
    },
};
