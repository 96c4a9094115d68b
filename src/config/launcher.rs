//! Launcher configuration (`launcher.toml`).
//!
//! The file carries a single `[launcher]` table. `ensure_config` is
//! idempotent: load-or-default, validate, write the normalised file back so
//! missing keys are filled in and stale ones dropped.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("config path {0} does not point to a file")]
    NotAFile(String),
    #[error("malformed launcher config: {0}")]
    Malformed(#[from] toml::de::Error),
    #[error("could not serialize launcher config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("{field} must be at least {min}")]
    OutOfRange { field: &'static str, min: u64 },
    #[error("could not resolve absolute path for {field}: {source}")]
    Absolutize {
        field: &'static str,
        source: std::io::Error,
    },
}

/// Which delivery channel receives notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationMethod {
    #[default]
    None,
    Discord,
    Ntfy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtfyConfig {
    pub topic: String,
    #[serde(default = "default_ntfy_server")]
    pub server: String,
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub method: NotificationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntfy: Option<NtfyConfig>,
}

/// Immutable-after-load launcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LauncherConfig {
    /// Install/update the DS automatically at start when an update exists.
    pub auto_update_server: bool,
    /// Run the reachability matrix before starting the DS.
    pub check_network: bool,
    /// Always replace the PublicIP field with the externally probed one.
    #[serde(rename = "OverwritePublicIP")]
    pub overwrite_public_ip: bool,

    /// Include debug-level messages in console and log file output.
    pub log_debug_messages: bool,

    pub astro_server_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_wine_path: Option<PathBuf>,
    pub wine_prefix_path: PathBuf,
    pub log_path: PathBuf,

    /// Seconds between matchmaking API polls during registration wait.
    #[serde(rename = "PlayfabAPIInterval")]
    pub playfab_api_interval: u64,
    /// Seconds between DS status snapshots in the server loop.
    pub server_status_interval: u64,

    /// Must stay true while the DS runs under the compatibility runtime;
    /// encrypted clients cannot complete a handshake through WINE.
    pub disable_encryption: bool,

    /// Delivery channel settings; a table, so it serialises last.
    #[serde(rename = "notifications")]
    pub notifications: NotificationConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            auto_update_server: true,
            check_network: true,
            overwrite_public_ip: false,
            notifications: NotificationConfig::default(),
            log_debug_messages: false,
            astro_server_path: PathBuf::from("AstroneerServer"),
            override_wine_path: None,
            wine_prefix_path: PathBuf::from("winepfx"),
            log_path: PathBuf::from("logs"),
            playfab_api_interval: 2,
            server_status_interval: 3,
            disable_encryption: true,
        }
    }
}

/// On-disk shape: everything nested under `[launcher]`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LauncherFile {
    #[serde(default)]
    launcher: LauncherConfig,
}

impl LauncherConfig {
    /// Loads `path` (or defaults when absent), validates, and writes the
    /// normalised config back. Repeated calls produce identical files.
    pub fn ensure_config(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            if !path.is_file() {
                return Err(ConfigError::NotAFile(path.display().to_string()));
            }
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<LauncherFile>(&raw)?.launcher
        } else {
            Self::default()
        };

        config.validate()?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }
        let rendered = toml::to_string_pretty(&LauncherFile {
            launcher: config.clone(),
        })?;
        fs::write(path, rendered).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.playfab_api_interval < 1 {
            return Err(ConfigError::OutOfRange {
                field: "PlayfabAPIInterval",
                min: 1,
            });
        }
        if self.server_status_interval < 1 {
            return Err(ConfigError::OutOfRange {
                field: "ServerStatusInterval",
                min: 1,
            });
        }
        Ok(())
    }

    /// Rewrites the three directory settings as absolute paths so child
    /// processes can be spawned from any working directory.
    pub fn absolutize(&mut self) -> Result<(), ConfigError> {
        self.astro_server_path = absolute(&self.astro_server_path, "AstroServerPath")?;
        self.wine_prefix_path = absolute(&self.wine_prefix_path, "WinePrefixPath")?;
        self.log_path = absolute(&self.log_path, "LogPath")?;
        if let Some(wine) = &self.override_wine_path {
            self.override_wine_path = Some(absolute(wine, "OverrideWinePath")?);
        }
        Ok(())
    }
}

fn absolute(path: &Path, field: &'static str) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::Absolutize { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = LauncherConfig::default();
        assert!(config.auto_update_server);
        assert!(config.check_network);
        assert!(!config.overwrite_public_ip);
        assert_eq!(config.playfab_api_interval, 2);
        assert_eq!(config.server_status_interval, 3);
        assert!(config.disable_encryption);
        assert_eq!(config.notifications.method, NotificationMethod::None);
    }

    #[test]
    fn toml_roundtrip_preserves_key_names() {
        let rendered = toml::to_string_pretty(&LauncherFile {
            launcher: LauncherConfig::default(),
        })
        .unwrap();
        assert!(rendered.contains("[launcher]"));
        assert!(rendered.contains("AutoUpdateServer"));
        assert!(rendered.contains("OverwritePublicIP"));
        assert!(rendered.contains("PlayfabAPIInterval"));
        assert!(rendered.contains("ServerStatusInterval"));

        let reparsed: LauncherFile = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.launcher, LauncherConfig::default());
    }

    #[test]
    fn partial_file_is_filled_with_defaults() {
        let raw = "[launcher]\nAutoUpdateServer = false\n";
        let file: LauncherFile = toml::from_str(raw).unwrap();
        assert!(!file.launcher.auto_update_server);
        assert_eq!(file.launcher.server_status_interval, 3);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = LauncherConfig {
            playfab_api_interval: 0,
            ..LauncherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "PlayfabAPIInterval",
                ..
            })
        ));
    }

    #[test]
    fn notification_method_parses_lowercase() {
        let raw = "[launcher.notifications]\nmethod = \"discord\"\n\n[launcher.notifications.discord]\nwebhook_url = \"https://example.invalid/hook\"\n";
        let file: LauncherFile = toml::from_str(raw).unwrap();
        assert_eq!(
            file.launcher.notifications.method,
            NotificationMethod::Discord
        );
        assert_eq!(
            file.launcher.notifications.discord.unwrap().webhook_url,
            "https://example.invalid/hook"
        );
    }
}
