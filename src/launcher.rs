//! Launcher orchestration: runtime resolution, install/update flows, the
//! preflight sequence, and wiring the supervisor to its channels.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::LauncherConfig;
use crate::input::InputReader;
use crate::net;
use crate::notifications::NotificationManager;
use crate::server::process::WineRuntime;
use crate::server::{DedicatedServer, DS_EXECUTABLE};
use crate::steam::{self, BuildVersion};

/// Steam app id of the Astroneer Dedicated Server.
pub const ASTRO_APP_ID: &str = "728470";
/// Default location of the downloader binary, relative to the working dir.
pub const DEPOTDL_DEFAULT_PATH: &str = "libs/depotdownloader";

const WINEBOOT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Launcher {
    config: Arc<LauncherConfig>,
    depotdl_path: PathBuf,
    wine: WineRuntime,
}

impl Launcher {
    /// Builds the launcher from a loaded config plus CLI overrides.
    /// Resolves the wine pair and the downloader path; missing wine is
    /// fatal.
    pub fn new(config: LauncherConfig, depotdl_exec: Option<&str>) -> anyhow::Result<Self> {
        let wine = resolve_wine(&config)?;
        let depotdl_path = resolve_depotdl(depotdl_exec)?;

        debug!(
            "Using wine at '{}', wineserver at '{}'",
            wine.wine.display(),
            wine.wineserver.display()
        );

        Ok(Self {
            config: Arc::new(config),
            depotdl_path,
            wine,
        })
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    fn check_ds_executable(&self) -> bool {
        self.config.astro_server_path.join(DS_EXECUTABLE).is_file()
    }

    /// Installs/updates the DS, bootstrapping the downloader first when it
    /// is missing.
    pub async fn update_server(&self) -> anyhow::Result<()> {
        if !self.depotdl_path.exists() {
            info!("Downloading DepotDownloader...");
            steam::dl_depotdownloader(&self.depotdl_path)
                .await
                .context("could not bootstrap DepotDownloader")?;
        }

        info!("Downloading Astroneer Dedicated Server...");
        let success = steam::update_app(
            &self.depotdl_path,
            ASTRO_APP_ID,
            "windows",
            &self.config.astro_server_path,
        )
        .await?;

        let build_version = steam::read_build_version(&self.config.astro_server_path);

        match build_version {
            Some(version) if success => {
                info!("Sucessfully downloaded Astroneer Dedicated Server version {version}");
                Ok(())
            }
            _ => bail!("error while downloading the Astroneer Dedicated Server"),
        }
    }

    /// Checks whether an install/update is needed and performs it when
    /// configured (`AutoUpdateServer`) or forced.
    pub async fn check_server_update(&self, force_update: bool) -> anyhow::Result<()> {
        let old_version = steam::read_build_version(&self.config.astro_server_path);

        let mut do_update = false;
        let mut installed = true;

        match &old_version {
            Some(old) if self.check_ds_executable() => {
                match steam::latest_ds_version().await {
                    Ok(new) => {
                        let newer = match (old.parse::<BuildVersion>(), new.parse::<BuildVersion>())
                        {
                            (Ok(old), Ok(new)) => new > old,
                            _ => false,
                        };
                        if newer {
                            warn!("Astroneer Dedicated Server update available ({old} -> {new})");
                            do_update = true;
                        }
                    }
                    Err(e) => error!("Error occured while checking for newest version: {e}"),
                }
            }
            _ => {
                warn!("Astroneer Dedicated Server is not installed yet");
                do_update = true;
                installed = false;
            }
        }

        if do_update {
            if self.config.auto_update_server {
                if installed {
                    info!("Automatically updating server");
                } else {
                    info!("Automatically installing server");
                }
            }
            if self.config.auto_update_server || force_update {
                self.update_server().await?;
            } else {
                info!("Not installing/updating automatically");
            }
        } else if force_update {
            info!("Nothing to do");
        }

        Ok(())
    }

    /// Creates/updates the WINE prefix by running `wineboot` headless.
    async fn update_wine_prefix(&self) -> bool {
        debug!("Creating/updating WINE prefix...");

        let mut cmd = self.wine.command(&self.wine.wine);
        cmd.arg("wineboot")
            // Stop wine from opening a window on an inherited display.
            .env_remove("DISPLAY")
            .current_dir(&self.config.astro_server_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Error occured during updating of wine prefix: {e}");
                return false;
            }
        };

        match tokio::time::timeout(WINEBOOT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                error!("Error occured during updating of wine prefix: {e}");
                false
            }
            Err(_) => {
                debug!("Wine process took longer than 30 seconds, aborting");
                let _ = child.kill().await;
                false
            }
        }
    }

    /// Reachability matrix: local and non-local UDP reachability of the
    /// game port, plus the RCON-must-not-be-exposed check. Warns only,
    /// never fatal.
    async fn check_network_config(&self, server: &DedicatedServer) {
        let public_ip = server.ds_config.public_ip.clone();
        let game_port = server.engine_config.port;
        let console_port = server.ds_config.console_port;

        let local = net::net_test_local(&public_ip, game_port, false).await;
        let nonlocal = net::net_test_nonlocal(&public_ip, game_port).await;

        debug!("Test Matrix: ({local}, {nonlocal})");

        match (local, nonlocal) {
            (true, true) => info!("Network configuration looks good"),
            (false, true) => {
                warn!("The Server is not accessible from the local network");
                warn!("This usually indicates an issue with NAT Loopback");
            }
            (true, false) => {
                warn!("The server can be reached locally, but not from outside of the local network");
                warn!("Make sure the Server Port ({game_port}) is forwarded for UDP traffic");
            }
            (false, false) => {
                warn!("The Server is completely unreachable");
                warn!("Make sure the Server Port ({game_port}) is forwarded for UDP traffic and check firewall settings");
            }
        }

        let rcon_blocked = !net::net_test_local(&public_ip, console_port, true).await;
        if rcon_blocked {
            info!("RCON network configuration looks good");
        } else {
            warn!("SECURITY ALERT: The RCON Port ({console_port}) is accessible from outside");
            warn!("SECURITY ALERT: This potentially allows access to the Remote Console from outside your network");
            warn!("SECURITY ALERT: Disable this ASAP to prevent issues");
        }
    }

    /// The full start sequence: update check, matchmaking health, prefix
    /// bootstrap, port check, reachability matrix, then DS launch,
    /// registration wait, and the server loop. Returns whether the server
    /// went down gracefully.
    pub async fn start_server(&self) -> anyhow::Result<bool> {
        self.check_server_update(false).await?;
        if !self.check_ds_executable() {
            bail!("the Astroneer Dedicated Server is not installed");
        }

        let notifications = Arc::new(NotificationManager::from_config(
            &self.config.notifications,
        ));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();

        // Terminal signals feed the supervisor; a first interrupt shuts
        // down gracefully, a second one falls through to the kill path.
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if sig_tx.send(()).is_err() {
                    return;
                }
            }
        });

        let input = InputReader::spawn(cmd_tx);

        let mut server = DedicatedServer::new(
            Arc::clone(&self.config),
            self.wine.clone(),
            Arc::clone(&notifications),
            cmd_rx,
            sig_rx,
        )
        .await?;

        if !server.check_api_health().await {
            bail!("matchmaking API is unavailable. Are you connected to the internet?");
        }

        if !self.update_wine_prefix().await {
            bail!("error while updating the WINE prefix");
        }

        if !server.check_ports_free() {
            bail!("port not available");
        }

        if self.config.check_network {
            self.check_network_config(&server).await;
        }

        server
            .start()
            .await
            .context("error while starting the Dedicated Server")?;

        debug!("Activating input reader...");
        input.set_active(true);

        debug!("Starting server loop...");
        let graceful = server.server_loop().await;
        debug!("Server loop finished");

        input.abort();
        Ok(graceful)
    }
}

/// Locates `wine`/`wineserver` on PATH, honouring the config override.
fn resolve_wine(config: &LauncherConfig) -> anyhow::Result<WineRuntime> {
    let mut wine = which::which("wine").ok();
    let mut wineserver = which::which("wineserver").ok();

    if let Some(override_path) = &config.override_wine_path {
        if override_path.is_file() {
            wineserver = override_path.parent().map(|dir| dir.join("wineserver"));
            wine = Some(override_path.clone());
        } else {
            warn!(
                "OverrideWinePath '{}' does not point to a file, falling back to PATH lookup",
                override_path.display()
            );
        }
    }

    match (wine, wineserver) {
        (Some(wine), Some(wineserver)) => Ok(WineRuntime {
            wine,
            wineserver,
            prefix: config.wine_prefix_path.clone(),
        }),
        _ => {
            error!("Wine (or Wineserver) executable not found!");
            error!("Make sure that you have wine installed and accessible");
            error!("or set the 'OverrideWinePath' config option to the path of the wine executable");
            bail!("compatibility runtime not found")
        }
    }
}

/// Resolves the downloader path: an explicit override (path or PATH-lookup
/// name) when it exists, the default location otherwise.
fn resolve_depotdl(depotdl_exec: Option<&str>) -> anyhow::Result<PathBuf> {
    if let Some(given) = depotdl_exec {
        let candidate = which::which(given).unwrap_or_else(|_| PathBuf::from(given));
        if candidate.is_file() {
            let path = std::path::absolute(&candidate)
                .context("could not resolve downloader override path")?;
            info!("DepotDownloader path overridden: {}", path.display());
            return Ok(path);
        }
        warn!("DepotDownloader override '{given}' not found, using default path");
    }

    let path = std::path::absolute(Path::new(DEPOTDL_DEFAULT_PATH))
        .context("could not resolve downloader path")?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("could not create downloader directory")?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depotdl_falls_back_to_default_for_missing_override() {
        let path = resolve_depotdl(Some("surely-not-a-real-binary-name")).unwrap();
        assert!(path.ends_with(DEPOTDL_DEFAULT_PATH));
        assert!(path.is_absolute());
    }

    #[test]
    fn depotdl_default_is_absolute() {
        let path = resolve_depotdl(None).unwrap();
        assert!(path.is_absolute());
    }
}
