//! Dedicated server configuration (`AstroServerSettings.ini`).
//!
//! One explicit schema struct with hand-written INI encode/decode. Forced
//! fields are applied in a single normalisation step inside
//! [`DedicatedServerConfig::ensure_config`]:
//!
//! - `VerbosePlayerProperties` is always written as `True` (the supervisor
//!   needs full `PlayerProperties` tuples to resolve names to GUIDs),
//! - `HeartbeatInterval` is always written as `55`,
//! - `ServerGuid`/`ConsolePassword` are synthesized when absent,
//! - `PublicIP` must be a globally routable IPv4 literal, otherwise it is
//!   replaced via the external IP echo service.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::ini::{IniDocument, IniError, IniSection};
use crate::net;
use crate::rcon::PlayerCategory;

pub const DS_SETTINGS_SECTION: &str = "/Script/Astro.AstroServerSettings";

#[derive(Debug, Error)]
pub enum DsConfigError {
    #[error(transparent)]
    Ini(#[from] IniError),
    #[error("invalid PlayerProperties entry: {0}")]
    InvalidPlayerProperties(String),
}

/// One `PlayerProperties=(...)` tuple from the DS config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProperties {
    pub player_first_join_name: String,
    pub player_category: PlayerCategory,
    pub player_guid: String,
    pub player_recent_join_name: String,
}

impl Default for PlayerProperties {
    fn default() -> Self {
        Self {
            player_first_join_name: String::new(),
            player_category: PlayerCategory::Unlisted,
            player_guid: String::new(),
            player_recent_join_name: String::new(),
        }
    }
}

impl fmt::Display for PlayerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(PlayerFirstJoinName=\"{}\",PlayerCategory={},PlayerGuid=\"{}\",PlayerRecentJoinName=\"{}\")",
            self.player_first_join_name,
            self.player_category,
            self.player_guid,
            self.player_recent_join_name
        )
    }
}

impl FromStr for PlayerProperties {
    type Err = DsConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let open = s.find('(');
        let close = s.rfind(')');
        let inner = match (open, close) {
            (Some(open), Some(close)) if open < close => &s[open + 1..close],
            _ => return Err(DsConfigError::InvalidPlayerProperties(s.to_string())),
        };

        let mut props = Self::default();
        for pair in inner.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(DsConfigError::InvalidPlayerProperties(s.to_string()));
            };
            let value = strip_quotes(value.trim());
            match key.trim() {
                "PlayerFirstJoinName" => props.player_first_join_name = value.to_string(),
                "PlayerCategory" => {
                    props.player_category = value
                        .parse()
                        .map_err(|_| DsConfigError::InvalidPlayerProperties(s.to_string()))?;
                }
                "PlayerGuid" => props.player_guid = value.to_string(),
                "PlayerRecentJoinName" => props.player_recent_join_name = value.to_string(),
                // Unknown keys are ignored, matching the DS's own tolerance.
                _ => {}
            }
        }
        Ok(props)
    }
}

fn strip_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// The DS insists on float-looking values for some integer fields.
fn encode_fakefloat(value: u32) -> String {
    format!("{value}.000000")
}

fn decode_fakefloat(raw: &str) -> Option<u32> {
    raw.parse::<f64>().ok().map(|f| f.round() as u32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedicatedServerConfig {
    pub b_load_auto_save: bool,
    pub max_server_framerate: u32,
    pub max_server_idle_framerate: u32,
    pub b_wait_for_players_before_shutdown: bool,
    pub public_ip: String,
    pub server_name: String,
    pub maximum_player_count: u32,
    pub owner_name: String,
    pub owner_guid: String,
    pub player_activity_timeout: u32,
    pub server_password: String,
    pub b_disable_server_travel: bool,
    pub deny_unlisted_players: bool,
    pub verbose_player_properties: bool,
    pub auto_save_game_interval: u32,
    pub backup_save_games_interval: u32,
    pub server_guid: String,
    pub active_save_file_descriptive_name: String,
    pub server_advertised_name: String,
    pub console_port: u16,
    pub console_password: String,
    pub heartbeat_interval: u32,
    pub exit_semaphore: Option<String>,
    pub player_properties: Vec<PlayerProperties>,
}

impl Default for DedicatedServerConfig {
    fn default() -> Self {
        Self {
            b_load_auto_save: true,
            max_server_framerate: 30,
            max_server_idle_framerate: 3,
            b_wait_for_players_before_shutdown: false,
            public_ip: String::new(),
            server_name: "Astroneer Dedicated Server".to_string(),
            maximum_player_count: 8,
            owner_name: String::new(),
            owner_guid: String::new(),
            player_activity_timeout: 0,
            server_password: String::new(),
            b_disable_server_travel: false,
            deny_unlisted_players: false,
            verbose_player_properties: true,
            auto_save_game_interval: 900,
            backup_save_games_interval: 7200,
            server_guid: uuid::Uuid::new_v4().simple().to_string(),
            active_save_file_descriptive_name: "SAVE_1".to_string(),
            server_advertised_name: String::new(),
            console_port: 1234,
            console_password: uuid::Uuid::new_v4().simple().to_string(),
            heartbeat_interval: 55,
            exit_semaphore: None,
            player_properties: Vec::new(),
        }
    }
}

impl DedicatedServerConfig {
    /// Loads the DS settings file (or defaults when absent), applies the
    /// forced fields, fixes `PublicIP`, and writes the normalised file
    /// back. Calling it twice on the same path produces identical files.
    pub async fn ensure_config(path: &Path, overwrite_ip: bool) -> Result<Self, DsConfigError> {
        let mut config = if path.exists() {
            let doc = IniDocument::load(path)?;
            match doc.section(DS_SETTINGS_SECTION) {
                Some(section) => Self::from_ini(section),
                None => Self::default(),
            }
        } else {
            Self::default()
        };

        // Forced on every write.
        config.verbose_player_properties = true;
        config.heartbeat_interval = 55;
        if config.server_guid.is_empty() {
            config.server_guid = uuid::Uuid::new_v4().simple().to_string();
        }

        let mut ip_valid = net::is_ipv4_literal(&config.public_ip);
        if ip_valid && !net::is_global_ipv4(&config.public_ip) {
            ip_valid = false;
            warn!("PublicIP field in AstroServerSettings.ini contained a non-routable address");
        }

        if overwrite_ip || !ip_valid {
            info!("Overwriting PublicIP field in Dedicated Server config...");
            match net::public_ip().await {
                Ok(ip) => config.public_ip = ip,
                Err(e) if ip_valid => warn!("Could not update PublicIP field: {e}"),
                Err(e) => error!("Could not update PublicIP field: {e}"),
            }
        }

        config.write(path)?;
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> Result<(), DsConfigError> {
        let mut doc = IniDocument::new();
        doc.push_section(self.to_ini());
        doc.save(path)?;
        Ok(())
    }

    pub fn from_ini(section: &IniSection) -> Self {
        let defaults = Self::default();
        let str_or = |key: &str, default: String| -> String {
            section
                .get_str(key)
                .map(str::to_string)
                .unwrap_or(default)
        };
        let bool_or = |key: &str, default: bool| section.get_bool(key).unwrap_or(default);
        let u32_or = |key: &str, default: u32| {
            section
                .get_str(key)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(default)
        };

        let player_properties = section
            .get("PlayerProperties")
            .map(|value| {
                value
                    .as_list()
                    .iter()
                    .filter_map(|raw| raw.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            b_load_auto_save: bool_or("bLoadAutoSave", defaults.b_load_auto_save),
            max_server_framerate: section
                .get_str("MaxServerFramerate")
                .and_then(decode_fakefloat)
                .unwrap_or(defaults.max_server_framerate),
            max_server_idle_framerate: section
                .get_str("MaxServerIdleFramerate")
                .and_then(decode_fakefloat)
                .unwrap_or(defaults.max_server_idle_framerate),
            b_wait_for_players_before_shutdown: bool_or(
                "bWaitForPlayersBeforeShutdown",
                defaults.b_wait_for_players_before_shutdown,
            ),
            public_ip: str_or("PublicIP", defaults.public_ip),
            server_name: str_or("ServerName", defaults.server_name),
            maximum_player_count: u32_or("MaximumPlayerCount", defaults.maximum_player_count),
            owner_name: str_or("OwnerName", defaults.owner_name),
            owner_guid: str_or("OwnerGuid", defaults.owner_guid),
            player_activity_timeout: u32_or(
                "PlayerActivityTimeout",
                defaults.player_activity_timeout,
            ),
            server_password: str_or("ServerPassword", defaults.server_password),
            b_disable_server_travel: bool_or(
                "bDisableServerTravel",
                defaults.b_disable_server_travel,
            ),
            deny_unlisted_players: bool_or("DenyUnlistedPlayers", defaults.deny_unlisted_players),
            verbose_player_properties: bool_or(
                "VerbosePlayerProperties",
                defaults.verbose_player_properties,
            ),
            auto_save_game_interval: u32_or(
                "AutoSaveGameInterval",
                defaults.auto_save_game_interval,
            ),
            backup_save_games_interval: u32_or(
                "BackupSaveGamesInterval",
                defaults.backup_save_games_interval,
            ),
            server_guid: str_or("ServerGuid", defaults.server_guid),
            active_save_file_descriptive_name: str_or(
                "ActiveSaveFileDescriptiveName",
                defaults.active_save_file_descriptive_name,
            ),
            server_advertised_name: str_or(
                "ServerAdvertisedName",
                defaults.server_advertised_name,
            ),
            console_port: section
                .get_str("ConsolePort")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.console_port),
            console_password: str_or("ConsolePassword", defaults.console_password),
            heartbeat_interval: u32_or("HeartbeatInterval", defaults.heartbeat_interval),
            exit_semaphore: section.get_str("ExitSemaphore").map(str::to_string),
            player_properties,
        }
    }

    pub fn to_ini(&self) -> IniSection {
        let mut section = IniSection::new(DS_SETTINGS_SECTION);
        section.set("bLoadAutoSave", self.b_load_auto_save);
        section.set("MaxServerFramerate", encode_fakefloat(self.max_server_framerate));
        section.set(
            "MaxServerIdleFramerate",
            encode_fakefloat(self.max_server_idle_framerate),
        );
        section.set(
            "bWaitForPlayersBeforeShutdown",
            self.b_wait_for_players_before_shutdown,
        );
        section.set("PublicIP", self.public_ip.clone());
        section.set("ServerName", self.server_name.clone());
        section.set("MaximumPlayerCount", self.maximum_player_count.to_string());
        section.set("OwnerName", self.owner_name.clone());
        section.set("OwnerGuid", self.owner_guid.clone());
        section.set(
            "PlayerActivityTimeout",
            self.player_activity_timeout.to_string(),
        );
        section.set("ServerPassword", self.server_password.clone());
        section.set("bDisableServerTravel", self.b_disable_server_travel);
        section.set("DenyUnlistedPlayers", self.deny_unlisted_players);
        section.set("VerbosePlayerProperties", self.verbose_player_properties);
        section.set(
            "AutoSaveGameInterval",
            self.auto_save_game_interval.to_string(),
        );
        section.set(
            "BackupSaveGamesInterval",
            self.backup_save_games_interval.to_string(),
        );
        section.set("ServerGuid", self.server_guid.clone());
        section.set(
            "ActiveSaveFileDescriptiveName",
            self.active_save_file_descriptive_name.clone(),
        );
        section.set("ServerAdvertisedName", self.server_advertised_name.clone());
        section.set("ConsolePort", self.console_port.to_string());
        section.set("ConsolePassword", self.console_password.clone());
        section.set("HeartbeatInterval", self.heartbeat_interval.to_string());
        if let Some(semaphore) = &self.exit_semaphore {
            section.set("ExitSemaphore", semaphore.clone());
        }
        match self.player_properties.as_slice() {
            [] => {}
            // A single entry is written as a scalar, not a one-element list.
            [only] => section.set("PlayerProperties", only.to_string()),
            many => {
                for pp in many {
                    section.append("PlayerProperties", pp.to_string());
                }
            }
        }
        section
    }

    /// Looks a player up in the persisted properties list by exact name
    /// (first-join or recent-join) or GUID.
    pub fn find_player(&self, who: &str) -> Option<&PlayerProperties> {
        self.player_properties.iter().find(|pp| {
            pp.player_guid == who
                || pp.player_first_join_name == who
                || pp.player_recent_join_name == who
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ini::IniValue;

    const TUPLE: &str = "(PlayerFirstJoinName=\"Alice\",PlayerCategory=Admin,PlayerGuid=\"123abc\",PlayerRecentJoinName=\"Alice\")";

    #[test]
    fn player_properties_roundtrip_is_exact() {
        let parsed: PlayerProperties = TUPLE.parse().unwrap();
        assert_eq!(parsed.player_first_join_name, "Alice");
        assert_eq!(parsed.player_category, PlayerCategory::Admin);
        assert_eq!(parsed.player_guid, "123abc");
        assert_eq!(parsed.to_string(), TUPLE);
    }

    #[test]
    fn player_properties_rejects_garbage() {
        assert!("no parens here".parse::<PlayerProperties>().is_err());
        assert!("(key-without-equals)".parse::<PlayerProperties>().is_err());
    }

    #[test]
    fn player_properties_ignores_unknown_keys() {
        let parsed: PlayerProperties =
            "(PlayerGuid=\"g\",FutureField=\"x\",PlayerCategory=Owner)"
                .parse()
                .unwrap();
        assert_eq!(parsed.player_guid, "g");
        assert_eq!(parsed.player_category, PlayerCategory::Owner);
    }

    #[test]
    fn single_player_property_serialises_as_scalar() {
        let config = DedicatedServerConfig {
            player_properties: vec![TUPLE.parse().unwrap()],
            ..DedicatedServerConfig::default()
        };
        let section = config.to_ini();
        assert_eq!(section.get(
            "PlayerProperties"),
            Some(&crate::ini::IniValue::Str(TUPLE.to_string()))
        );
    }

    #[test]
    fn multiple_player_properties_serialise_as_list() {
        let second = "(PlayerFirstJoinName=\"Bob\",PlayerCategory=Unlisted,PlayerGuid=\"456\",PlayerRecentJoinName=\"Bob\")";
        let config = DedicatedServerConfig {
            player_properties: vec![TUPLE.parse().unwrap(), second.parse().unwrap()],
            ..DedicatedServerConfig::default()
        };
        match config.to_ini().get("PlayerProperties") {
            Some(IniValue::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn forced_fields_survive_encode_decode() {
        let config = DedicatedServerConfig::default();
        let section = config.to_ini();
        assert_eq!(section.get("VerbosePlayerProperties"), Some(&IniValue::Bool(true)));
        assert_eq!(section.get_str("HeartbeatInterval"), Some("55"));
        assert_eq!(section.get_str("MaxServerFramerate"), Some("30.000000"));

        let decoded = DedicatedServerConfig::from_ini(&section);
        assert_eq!(decoded, config);
    }

    #[test]
    fn fakefloat_codec() {
        assert_eq!(encode_fakefloat(30), "30.000000");
        assert_eq!(decode_fakefloat("30.000000"), Some(30));
        assert_eq!(decode_fakefloat("3"), Some(3));
        assert_eq!(decode_fakefloat("not-a-number"), None);
    }

    #[test]
    fn find_player_matches_name_and_guid() {
        let config = DedicatedServerConfig {
            player_properties: vec![TUPLE.parse().unwrap()],
            ..DedicatedServerConfig::default()
        };
        assert!(config.find_player("Alice").is_some());
        assert!(config.find_player("123abc").is_some());
        assert!(config.find_player("Mallory").is_none());
    }
}
