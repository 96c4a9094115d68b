//! Configuration management for the launcher and the two DS INI files.
//!
//! # Module Structure
//!
//! - [`launcher`]: `launcher.toml` (`[launcher]` table), immutable after load
//! - [`dedicated`]: `AstroServerSettings.ini` schema with forced fields
//! - [`engine`]: `Engine.ini` subset (port, encryption, content paths, rates)

pub mod dedicated;
pub mod engine;
pub mod launcher;

pub use dedicated::{DedicatedServerConfig, DsConfigError, PlayerProperties};

pub use engine::EngineConfig;

pub use launcher::{
    ConfigError, DiscordConfig, LauncherConfig, NotificationConfig, NotificationMethod, NtfyConfig,
};
