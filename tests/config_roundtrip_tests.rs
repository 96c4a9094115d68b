//! Round-trip and idempotence laws for the configuration files.

use std::fs;

use astrotux::config::{DedicatedServerConfig, EngineConfig, LauncherConfig};
use astrotux::ini::IniDocument;

#[test]
fn launcher_config_ensure_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("launcher.toml");

    let first = LauncherConfig::ensure_config(&path).unwrap();
    let first_bytes = fs::read(&path).unwrap();

    let second = LauncherConfig::ensure_config(&path).unwrap();
    let second_bytes = fs::read(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn launcher_config_preserves_operator_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("launcher.toml");

    fs::write(
        &path,
        "[launcher]\nAutoUpdateServer = false\nServerStatusInterval = 10\n",
    )
    .unwrap();

    let config = LauncherConfig::ensure_config(&path).unwrap();
    assert!(!config.auto_update_server);
    assert_eq!(config.server_status_interval, 10);

    // The rewritten file parses back to the same config.
    let again = LauncherConfig::ensure_config(&path).unwrap();
    assert_eq!(config, again);
}

#[test]
fn launcher_config_rejects_out_of_range_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("launcher.toml");
    fs::write(&path, "[launcher]\nPlayfabAPIInterval = 0\n").unwrap();
    assert!(LauncherConfig::ensure_config(&path).is_err());
}

#[test]
fn ini_write_read_write_is_stable() {
    // write(read(f)) == write(read(write(read(f)))) modulo blank lines.
    let input = "[/Script/Astro.AstroServerSettings]\r\n\
        ServerName=My Server\r\n\
        DenyUnlistedPlayers=false\r\n\
        PlayerProperties=(PlayerFirstJoinName=\"A\",PlayerCategory=Admin,PlayerGuid=\"g1\",PlayerRecentJoinName=\"A\")\r\n\
        PlayerProperties=(PlayerFirstJoinName=\"B\",PlayerCategory=Unlisted,PlayerGuid=\"g2\",PlayerRecentJoinName=\"B\")\r\n\
        \r\n";

    let once = IniDocument::parse(input).render();
    let twice = IniDocument::parse(&once).render();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn ds_config_ensure_is_idempotent_with_valid_public_ip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("AstroServerSettings.ini");

    // A routable PublicIP means no external lookup is attempted.
    fs::write(
        &path,
        "[/Script/Astro.AstroServerSettings]\n\
         PublicIP=8.8.8.8\n\
         ServerName=Roundtrip\n\
         ConsolePort=1234\n\
         HeartbeatInterval=20\n\
         VerbosePlayerProperties=False\n",
    )
    .unwrap();

    let first = DedicatedServerConfig::ensure_config(&path, false).await.unwrap();
    let first_bytes = fs::read(&path).unwrap();

    // Forced fields applied on write.
    assert!(first.verbose_player_properties);
    assert_eq!(first.heartbeat_interval, 55);
    assert!(!first.server_guid.is_empty());
    assert_eq!(first.public_ip, "8.8.8.8");
    assert_eq!(first.server_name, "Roundtrip");

    let second = DedicatedServerConfig::ensure_config(&path, false).await.unwrap();
    let second_bytes = fs::read(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);

    let rendered = String::from_utf8(first_bytes).unwrap();
    assert!(rendered.contains("HeartbeatInterval=55"));
    assert!(rendered.contains("VerbosePlayerProperties=True"));
}

#[tokio::test]
async fn ds_config_player_properties_survive_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("AstroServerSettings.ini");

    fs::write(
        &path,
        "[/Script/Astro.AstroServerSettings]\n\
         PublicIP=8.8.8.8\n\
         PlayerProperties=(PlayerFirstJoinName=\"Alice\",PlayerCategory=Admin,PlayerGuid=\"g1\",PlayerRecentJoinName=\"Alice\")\n\
         PlayerProperties=(PlayerFirstJoinName=\"Bob\",PlayerCategory=Whitelisted,PlayerGuid=\"g2\",PlayerRecentJoinName=\"Bobby\")\n",
    )
    .unwrap();

    let config = DedicatedServerConfig::ensure_config(&path, false).await.unwrap();
    assert_eq!(config.player_properties.len(), 2);
    assert_eq!(config.find_player("Bobby").unwrap().player_guid, "g2");

    let rendered = fs::read_to_string(&path).unwrap();
    assert_eq!(rendered.matches("PlayerProperties=(").count(), 2);
    assert!(rendered.contains("PlayerGuid=\"g1\""));
}

#[test]
fn engine_config_ensure_is_idempotent_and_forces_encryption_off() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Engine.ini");

    fs::write(
        &path,
        "[URL]\nPort=7780\n\n[SystemSettings]\nnet.AllowEncryption=True\n",
    )
    .unwrap();

    let first = EngineConfig::ensure_config(&path, true).unwrap();
    assert_eq!(first.port, 7780);
    assert!(!first.allow_encryption);

    let first_bytes = fs::read(&path).unwrap();
    let second = EngineConfig::ensure_config(&path, true).unwrap();
    let second_bytes = fs::read(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);

    let rendered = String::from_utf8(first_bytes).unwrap();
    assert!(rendered.contains("net.AllowEncryption=False"));
}

#[test]
fn engine_config_creates_default_file_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Config").join("Engine.ini");

    let config = EngineConfig::ensure_config(&path, true).unwrap();
    assert_eq!(config.port, 7777);

    let rendered = fs::read_to_string(&path).unwrap();
    assert!(rendered.contains("[URL]\nPort=7777"));
    assert!(rendered.contains("MaxClientRate=1000000"));
}
