//! Dedicated Server supervisor: process ownership, lifecycle state machine,
//! RCON-backed command dispatch, periodic status polling, and the
//! registration wait against the matchmaking service.
//!
//! The supervisor task is the sole owner of the DS child handle, the RCON
//! client, the snapshot triple, and the state. Everything else (stdin,
//! child stderr, terminal signals) reaches it through channels, and the
//! server loop is a single ticker-driven `select!`.

pub mod process;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{DedicatedServerConfig, EngineConfig, LauncherConfig};
use crate::console::{
    CommandRecord, ListCategory, OperatorCommand, PlayerAction, SaveGameAction, WhitelistAction,
};
use crate::net;
use crate::notifications::{EventType, NotificationManager};
use crate::playfab::PlayfabClient;
use crate::rcon::{PlayerCategory, RconClient, RconReply};
use crate::steam::read_build_version;

use process::{kill_wine_processes, DsProcess, WineRuntime};
use status::{diff_events, GameList, PlayerList, ServerStatistics, Snapshot, SnapshotEvent};

pub use process::DS_EXECUTABLE;

/// Config files live here, relative to the install dir.
pub const DS_CONFIG_DIR: &str = "Astro/Saved/Config/WindowsServer";

/// Opaque ack prefixes the DS answers mutating commands with. Matched as
/// raw byte constants; whitespace is significant.
const ACK_DENY_UNLISTED: &[u8] =
    b"UAstroServerCommExecutor::DSSetDenyUnlisted: SetDenyUnlistedPlayers";
const ACK_KICK: &[u8] = b"UAstroServerCommExecutor::DSKickPlayerGuid";

/// The DS advertises itself before it can accept players; registrations
/// observed earlier than this after launch are not trusted.
const REGISTRATION_MIN_ELAPSED: Duration = Duration::from_secs(15);
/// Rate-adaptation ceiling for the registration-wait poll interval.
const REGISTRATION_MAX_WAIT: Duration = Duration::from_secs(30);

/// Session tickets are refreshed once older than this.
const TICKET_LIFETIME: Duration = Duration::from_secs(3600);
const TICKET_RETRY_DELAY: Duration = Duration::from_secs(10);
const TICKET_START_TRIES: u32 = 5;

/// Settle pause after deregistering stale servers.
const DEREGISTER_SETTLE: Duration = Duration::from_secs(1);

/// Settle-wait for `savegame load`: poll until the loaded save is active.
const LOAD_SETTLE_TRIES: u32 = 15;
const LOAD_SETTLE_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Off,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    /// Legal lifecycle edges: Off→Starting→Running→Stopping, with every
    /// state allowed to fall back to Off when the process exit is observed.
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Off, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Running, Self::Stopping)
                | (_, Self::Off)
        )
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct SessionTicket {
    value: String,
    issued_at: Instant,
}

/// The supervisor. Construction loads and normalises both DS config files.
pub struct DedicatedServer {
    config: Arc<LauncherConfig>,
    pub ds_config: DedicatedServerConfig,
    pub engine_config: EngineConfig,

    astro_path: PathBuf,
    wine: WineRuntime,

    rcon: RconClient,
    playfab: PlayfabClient,
    notifications: Arc<NotificationManager>,

    cmd_rx: Option<mpsc::UnboundedReceiver<OperatorCommand>>,
    sig_rx: Option<mpsc::UnboundedReceiver<()>>,

    state: ServerState,
    build_version: Option<String>,
    snapshot: Option<Snapshot>,
    ticket: Option<SessionTicket>,
    lobby_id: Option<String>,
    process: Option<DsProcess>,
}

impl DedicatedServer {
    pub async fn new(
        config: Arc<LauncherConfig>,
        wine: WineRuntime,
        notifications: Arc<NotificationManager>,
        cmd_rx: mpsc::UnboundedReceiver<OperatorCommand>,
        sig_rx: mpsc::UnboundedReceiver<()>,
    ) -> anyhow::Result<Self> {
        let astro_path = config.astro_server_path.clone();
        let config_dir = astro_path.join(DS_CONFIG_DIR);

        let ds_config = DedicatedServerConfig::ensure_config(
            &config_dir.join("AstroServerSettings.ini"),
            config.overwrite_public_ip,
        )
        .await
        .context("could not prepare AstroServerSettings.ini")?;
        let engine_config = EngineConfig::ensure_config(
            &config_dir.join("Engine.ini"),
            config.disable_encryption,
        )
        .context("could not prepare Engine.ini")?;

        if engine_config.allow_encryption {
            warn!("Encryption is enabled. This does not work when running the Dedicated Server under WINE");
            warn!("Players with encryption disabled will not be able to join either");
        } else {
            info!("NOTICE: Encryption is disabled. Joining players have to disable encryption on their clients too");
        }

        let rcon = RconClient::new(
            ds_config.console_port,
            Some(ds_config.console_password.clone()),
        );
        let playfab = PlayfabClient::new().context("could not build matchmaking client")?;

        Ok(Self {
            config,
            ds_config,
            engine_config,
            astro_path,
            wine,
            rcon,
            playfab,
            notifications,
            cmd_rx: Some(cmd_rx),
            sig_rx: Some(sig_rx),
            state: ServerState::Off,
            build_version: None,
            snapshot: None,
            ticket: None,
            lobby_id: None,
            process: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Whether the matchmaking API is reachable and healthy.
    pub async fn check_api_health(&self) -> bool {
        self.playfab.check_health().await
    }

    /// The lobby id assigned by the matchmaking service, once registered.
    pub fn lobby_id(&self) -> Option<&str> {
        self.lobby_id.as_deref()
    }

    /// `PublicIP:Port`, the tag value the DS registers under.
    pub fn ip_port_combo(&self) -> String {
        format!("{}:{}", self.ds_config.public_ip, self.engine_config.port)
    }

    fn set_state(&mut self, next: ServerState) {
        if !self.state.can_transition(next) {
            warn!("Unexpected state transition {} -> {next}", self.state);
        }
        debug!("Server state: {} -> {next}", self.state);
        self.state = next;
    }

    fn version_attr(&self) -> (&'static str, String) {
        (
            "server_version",
            self.build_version.clone().unwrap_or_else(|| "unknown".to_string()),
        )
    }

    /// Re-reads the DS settings file, picking up `PlayerProperties` entries
    /// the DS persisted in the meantime.
    async fn reload_ds_config(&mut self) {
        let path = self
            .astro_path
            .join(DS_CONFIG_DIR)
            .join("AstroServerSettings.ini");
        match DedicatedServerConfig::ensure_config(&path, self.config.overwrite_public_ip).await {
            Ok(ds_config) => self.ds_config = ds_config,
            Err(e) => warn!("Could not reload Dedicated Server config: {e}"),
        }
    }

    /// Checks that the game port (UDP) and the console port (TCP) are not
    /// held by another process.
    pub fn check_ports_free(&self) -> bool {
        if net::is_port_in_use(self.engine_config.port, false) {
            error!(
                "Server Port ({}) already in use by a different process",
                self.engine_config.port
            );
            return false;
        }
        if net::is_port_in_use(self.ds_config.console_port, true) {
            error!(
                "Console Port ({}) already in use by a different process",
                self.ds_config.console_port
            );
            return false;
        }
        true
    }

    /// Ensures a fresh session ticket, retrying `tries` times at 10 s
    /// spacing before giving up.
    async fn refresh_ticket(&mut self, tries: u32) -> anyhow::Result<()> {
        let fresh = self
            .ticket
            .as_ref()
            .is_some_and(|t| t.issued_at.elapsed() <= TICKET_LIFETIME);
        if fresh {
            return Ok(());
        }

        let mut remaining = tries.max(1);
        loop {
            debug!("Generating new session ticket...");
            match self
                .playfab
                .login_with_custom_id(&self.ds_config.server_guid)
                .await
            {
                Ok(value) => {
                    self.ticket = Some(SessionTicket {
                        value,
                        issued_at: Instant::now(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    remaining -= 1;
                    if remaining == 0 {
                        bail!("unable to obtain a session ticket: {e}");
                    }
                    debug!("Error while generating session ticket: {e}");
                    tokio::time::sleep(TICKET_RETRY_DELAY).await;
                }
            }
        }
    }

    fn ticket_value(&self) -> anyhow::Result<String> {
        self.ticket
            .as_ref()
            .map(|t| t.value.clone())
            .context("no session ticket present")
    }

    /// Deregisters every matchmaking entry with our `ip:port`, bounding the
    /// stale set future registration detection compares against.
    async fn deregister_all_servers(&mut self) -> anyhow::Result<Vec<String>> {
        let ticket = self.ticket_value()?;
        let ip_port = self.ip_port_combo();

        let servers = self
            .playfab
            .get_current_games(&ip_port, &ticket)
            .await
            .context("could not query registered servers")?;

        if servers.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Trying to deregister {} servers with matching IP-Port combination...",
            servers.len()
        );
        for (i, server) in servers.iter().enumerate() {
            debug!("Deregistering server {i} with lobby id {}...", server.lobby_id);
            if let Err(e) = self.playfab.deregister(&server.lobby_id, &ticket).await {
                warn!("Problems while deregistering server {i}: {e}. It may still be registered!");
            }
        }
        debug!("Finished deregistration");
        tokio::time::sleep(DEREGISTER_SETTLE).await;

        Ok(servers.into_iter().map(|s| s.lobby_id).collect())
    }

    /// Starts the DS and blocks until it is registered with the
    /// matchmaking service. On success the state is `Running` and the
    /// `Start` event has been emitted.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        info!("Preparing to start the Dedicated Server...");

        self.refresh_ticket(TICKET_START_TRIES).await?;
        let stale = self.deregister_all_servers().await?;

        let launch_time = Instant::now();
        let process =
            DsProcess::spawn(&self.wine, &self.astro_path).context("could not start Dedicated Server process")?;
        self.process = Some(process);
        self.build_version = read_build_version(&self.astro_path);

        self.set_state(ServerState::Starting);
        info!(
            "Started Dedicated Server process (v{}). Waiting for registration...",
            self.build_version.as_deref().unwrap_or("unknown")
        );

        self.wait_for_registration(&stale, launch_time).await?;

        let elapsed = launch_time.elapsed().as_secs_f64();
        info!("Dedicated Server ready! Took {elapsed:.2} seconds to register");

        self.set_state(ServerState::Running);
        let version = self.version_attr();
        self.notifications.send_event(EventType::Start, vec![version]);

        Ok(())
    }

    /// Polls the matchmaking lookup until a lobby id outside the stale set
    /// appears at least 15 s after launch. The poll interval rate-adapts
    /// locally: +1 s per failed poll, capped at 30 s, restored on success.
    async fn wait_for_registration(
        &mut self,
        stale: &[String],
        launch_time: Instant,
    ) -> anyhow::Result<()> {
        let configured_wait = Duration::from_secs(self.config.playfab_api_interval);
        let mut wait = configured_wait;
        let ip_port = self.ip_port_combo();

        loop {
            // Keep the child's stderr flowing into the debug log.
            while let Some(line) = self.try_recv_stderr() {
                debug!("[AstroDS] {line}");
            }

            // A terminal signal during startup cannot shut down gracefully;
            // tear the prefix down and report the abort.
            if self.try_recv_signal() {
                self.kill().await;
                bail!("startup aborted by operator");
            }

            // Child death during the wait is fatal.
            if let Some(status) = self.process.as_mut().and_then(DsProcess::try_exit) {
                self.set_state(ServerState::Off);
                match status {
                    Ok(status) => bail!(
                        "server was closed before registration (exit code {:?})",
                        status.code()
                    ),
                    Err(e) => bail!("server process failed before registration: {e}"),
                }
            }

            // Connect RCON early so a shutdown command works during startup.
            if !self.rcon.connected().await && self.rcon.ensure_connection().await {
                debug!("Connected to RCON");
                self.quick_toggle_whitelist().await;
            }

            let ticket = self.ticket_value()?;
            match self.playfab.get_current_games(&ip_port, &ticket).await {
                Ok(servers) => {
                    let fresh = servers
                        .iter()
                        .find(|s| !stale.contains(&s.lobby_id));
                    if let Some(ours) = fresh {
                        if launch_time.elapsed() > REGISTRATION_MIN_ELAPSED {
                            let lobby_id = ours.lobby_id.clone();
                            debug!("Registered with lobby id {lobby_id}");
                            self.lobby_id = Some(lobby_id.clone());
                            let version = self.version_attr();
                            self.notifications.send_event(
                                EventType::Registered,
                                vec![("lobby_id", lobby_id), version],
                            );
                            return Ok(());
                        }
                        // Advertised too early; keep polling.
                    }
                    wait = configured_wait;
                }
                Err(e) => {
                    debug!("Checking for registration failed ({e}). Probably rate limit, backing off and trying again...");
                    if wait < REGISTRATION_MAX_WAIT {
                        wait += Duration::from_secs(1);
                    }
                }
            }

            tokio::time::sleep(wait).await;
        }
    }

    fn try_recv_stderr(&mut self) -> Option<String> {
        self.process
            .as_mut()
            .and_then(|p| p.stderr_rx.try_recv().ok())
    }

    fn try_recv_signal(&mut self) -> bool {
        self.sig_rx
            .as_mut()
            .is_some_and(|rx| rx.try_recv().is_ok())
    }

    /// Runs until the DS process exit is observed. Returns whether the
    /// server went down gracefully.
    pub async fn server_loop(&mut self) -> bool {
        let Some(mut process) = self.process.take() else {
            warn!("Server loop started without a running process");
            return false;
        };
        let Some(mut cmd_rx) = self.cmd_rx.take() else {
            return false;
        };
        let Some(mut sig_rx) = self.sig_rx.take() else {
            return false;
        };

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.server_status_interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut graceful = false;

        while self.state != ServerState::Off {
            tokio::select! {
                Some(result) = process.exit_rx.recv() => {
                    graceful = self.handle_child_exit(result);
                    self.set_state(ServerState::Off);
                }
                Some(line) = process.stderr_rx.recv() => {
                    debug!("[AstroDS] {line}");
                }
                Some(cmd) = cmd_rx.recv() => {
                    self.dispatch_command(cmd).await;
                }
                Some(()) = sig_rx.recv() => {
                    self.handle_interrupt().await;
                }
                _ = ticker.tick() => {
                    self.status_tick().await;
                }
            }
        }

        // Teardown: stop the reader, drop the console socket, and make sure
        // nothing is left inside the prefix.
        process.stop_reader();
        self.rcon.disconnect().await;
        kill_wine_processes(&self.wine).await;

        graceful
    }

    fn handle_child_exit(&mut self, result: std::io::Result<std::process::ExitStatus>) -> bool {
        match result {
            Ok(status) if status.success() && self.state == ServerState::Stopping => {
                info!("Dedicated Server shut down gracefully");
                true
            }
            Ok(status) => {
                debug!("Server process closed with exit code {:?}", status.code());
                let version = self.version_attr();
                self.notifications.send_event(EventType::Crash, vec![version]);
                false
            }
            Err(e) => {
                warn!("Could not observe server process exit: {e}");
                let version = self.version_attr();
                self.notifications.send_event(EventType::Crash, vec![version]);
                false
            }
        }
    }

    /// First interrupt: graceful shutdown. Second interrupt while already
    /// stopping: give up waiting and kill.
    async fn handle_interrupt(&mut self) {
        match self.state {
            ServerState::Running => {
                info!("Shutdown requested by operator");
                if !self.shutdown().await {
                    warn!("Graceful shutdown failed, killing the server");
                    self.kill().await;
                }
            }
            ServerState::Stopping => {
                warn!("Second interrupt received, killing the server");
                self.kill().await;
            }
            _ => {
                self.kill().await;
            }
        }
    }

    /// One status-interval tick: RCON reconnect, ticket refresh, snapshot
    /// capture, diff events.
    async fn status_tick(&mut self) {
        if !self.rcon.connected().await {
            if self.rcon.ensure_connection().await {
                self.quick_toggle_whitelist().await;
            } else {
                debug!("Failed to connect RCON");
                return;
            }
        }

        if self.state == ServerState::Stopping {
            return;
        }

        if let Err(e) = self.refresh_ticket(1).await {
            warn!("Session ticket refresh failed: {e}");
        }

        let previous = self.snapshot.take();
        match self.capture_snapshot().await {
            Some(snapshot) => {
                if let Some(previous) = &previous {
                    self.emit_diff_events(previous, &snapshot);
                }
                self.snapshot = Some(snapshot);
            }
            None => {
                warn!("Getting information from Dedicated Server failed!");
                self.snapshot = previous;
            }
        }
    }

    /// Captures the three status snapshots back to back so the triple is
    /// consistent within one poll cycle.
    async fn capture_snapshot(&mut self) -> Option<Snapshot> {
        let stats: ServerStatistics =
            parse_json_reply("DSServerStatistics", self.rcon.server_statistics().await)?;
        let players: PlayerList =
            parse_json_reply("DSListPlayers", self.rcon.list_players().await)?;
        let games: GameList = parse_json_reply("DSListGames", self.rcon.list_games().await)?;
        Some(Snapshot {
            stats,
            players,
            games,
        })
    }

    fn emit_diff_events(&self, previous: &Snapshot, current: &Snapshot) {
        let version = self.version_attr();
        for event in diff_events(previous, current) {
            match event {
                SnapshotEvent::PlayerJoined { name, guid } => self.notifications.send_event(
                    EventType::PlayerJoin,
                    vec![
                        ("player_name", name),
                        ("player_guid", guid),
                        version.clone(),
                    ],
                ),
                SnapshotEvent::PlayerLeft { name, guid } => self.notifications.send_event(
                    EventType::PlayerLeave,
                    vec![
                        ("player_name", name),
                        ("player_guid", guid),
                        version.clone(),
                    ],
                ),
                SnapshotEvent::SavegameChanged { name } => self.notifications.send_event(
                    EventType::SavegameChange,
                    vec![("savegame_name", name), version.clone()],
                ),
                SnapshotEvent::Saved { name } => self.notifications.send_event(
                    EventType::Save,
                    vec![("savegame_name", name), version.clone()],
                ),
            }
        }
    }

    async fn dispatch_command(&mut self, cmd: OperatorCommand) {
        let OperatorCommand { record, line } = cmd;

        match record {
            CommandRecord::Shutdown => {
                if !self.shutdown().await {
                    warn!("There was a problem while shutting down the dedicated server");
                }
            }
            CommandRecord::Restart => {
                warn!("The restart command is not implemented yet");
            }
            CommandRecord::Info => self.print_info(),
            CommandRecord::Kick { player } => {
                self.kick_player(&player).await;
            }
            CommandRecord::Whitelist(action) => self.handle_whitelist(action).await,
            CommandRecord::List(category) => self.print_player_list(category),
            CommandRecord::SaveGame(action) => self.handle_savegame(action).await,
            CommandRecord::Player(action) => self.handle_player(action).await,
        }

        let version = self.version_attr();
        self.notifications
            .send_event(EventType::Command, vec![("command", line), version]);
    }

    fn print_info(&self) {
        let Some(snapshot) = &self.snapshot else {
            info!("Server information not available right now");
            return;
        };
        let stats = &snapshot.stats;
        let yes_no = |flag: Option<bool>| if flag.unwrap_or(false) { "yes" } else { "no" };

        info!("Information about the Dedicated Server:");
        info!("    - Build: {}", stats.build.as_deref().unwrap_or("unknown"));
        info!("    - Server URL: {}", stats.server_url.as_deref().unwrap_or("unknown"));
        info!("    - Owner: {}", stats.owner_name.as_deref().unwrap_or(""));
        info!("    - Has Password: {}", yes_no(stats.has_server_password));
        info!(
            "    - Whitelist: {}",
            if stats.is_enforcing_whitelist.unwrap_or(false) {
                "enabled"
            } else {
                "disabled"
            }
        );
        info!("    - Creative Mode: {}", yes_no(stats.creative_mode));
        info!(
            "    - Save Game: {}",
            stats.save_game_name.as_deref().unwrap_or("unknown")
        );
        info!(
            "    - Players: {}/{}",
            snapshot.players.online().count(),
            stats.max_in_game_players.unwrap_or(0)
        );
        info!("    - Average FPS: {}", stats.average_fps.unwrap_or(0.0));
    }

    fn print_player_list(&self, category: ListCategory) {
        let Some(snapshot) = &self.snapshot else {
            info!("Player information not available right now");
            return;
        };
        let filter = category.as_player_category();

        info!("Online Players:");
        for pi in snapshot.players.online() {
            if filter.is_none() || filter == Some(pi.player_category) {
                info!("    - {}({})", pi.player_name, pi.player_guid);
            }
        }
    }

    async fn handle_whitelist(&mut self, action: WhitelistAction) {
        match action {
            WhitelistAction::Enable => {
                if self.set_whitelist_enabled(true).await {
                    info!("Successfully enabled whitelist");
                } else {
                    warn!("There was a problem while setting the whitelist status");
                }
            }
            WhitelistAction::Disable => {
                if self.set_whitelist_enabled(false).await {
                    info!("Successfully disabled whitelist");
                } else {
                    warn!("There was a problem while setting the whitelist status");
                }
            }
            WhitelistAction::Status => {
                let enabled = self
                    .snapshot
                    .as_ref()
                    .and_then(|s| s.stats.is_enforcing_whitelist);
                match enabled {
                    Some(true) => info!("The whitelist is currently enabled"),
                    Some(false) => info!("The whitelist is currently disabled"),
                    None => info!("Whitelist status not available right now"),
                }
            }
        }
    }

    async fn handle_savegame(&mut self, action: SaveGameAction) {
        match action {
            SaveGameAction::Load { name } => {
                if self.load_game(&name).await {
                    info!("Successfully loaded {name}");
                } else {
                    warn!("There was a problem while executing the command");
                }
            }
            SaveGameAction::Save { name } => {
                if self.save_game(name.as_deref()).await {
                    info!("Successfully saved the game");
                } else {
                    warn!("There was a problem while executing the command");
                }
            }
            SaveGameAction::New { name } => {
                self.new_game(name.as_deref());
            }
            SaveGameAction::List => self.print_savegame_list(),
        }
    }

    fn print_savegame_list(&self) {
        let Some(snapshot) = &self.snapshot else {
            info!("Savegame information not available right now");
            return;
        };
        let active = snapshot.games.active_save_name.as_deref().unwrap_or("");

        info!("Savegames:");
        for gi in &snapshot.games.game_list {
            let date = gi
                .date
                .map(|d| d.format(status::GAME_DATE_FORMAT).to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let marker = if gi.name == active { " (active)" } else { "" };
            info!(
                "    - {} [{}]  Creative: {}{}",
                gi.name, date, gi.creative, marker
            );
        }
    }

    async fn handle_player(&mut self, action: PlayerAction) {
        match action {
            PlayerAction::Set { player, category } => {
                if self.set_player_category(&player, category).await {
                    info!("Set category of '{player}' to {category}");
                } else {
                    warn!("Could not set the category of '{player}'");
                }
            }
            PlayerAction::Get { player } => {
                let category = self
                    .snapshot
                    .as_ref()
                    .and_then(|s| s.players.find(&player))
                    .map(|pi| pi.player_category)
                    .or_else(|| {
                        self.ds_config
                            .find_player(&player)
                            .map(|pp| pp.player_category)
                    });
                match category {
                    Some(category) => info!("Player '{player}' has category {category}"),
                    None => info!("Unknown player '{player}'"),
                }
            }
        }
    }

    /// Issues the graceful RCON shutdown: emits the `Shutdown` event,
    /// clears the snapshot triple, and moves to `Stopping`. `Off` is only
    /// set once the child exit is observed.
    pub async fn shutdown(&mut self) -> bool {
        if !self.rcon.connected().await {
            return false;
        }

        let version = self.version_attr();
        self.notifications
            .send_event(EventType::Shutdown, vec![version]);

        match self.rcon.server_shutdown().await {
            Ok(()) => {
                self.snapshot = None;
                self.set_state(ServerState::Stopping);
                true
            }
            Err(e) => {
                warn!("Could not send shutdown command: {e}");
                false
            }
        }
    }

    /// Envelope kill via `wineserver -k`; state goes to `Off`
    /// unconditionally.
    pub async fn kill(&mut self) {
        if let Some(process) = &self.process {
            process.stop_reader();
        }
        self.rcon.disconnect().await;
        kill_wine_processes(&self.wine).await;
        self.set_state(ServerState::Off);
    }

    /// Resolves `who` (name or GUID) against the current snapshot and
    /// kicks by GUID. Success is recognised by the opaque kick ack.
    pub async fn kick_player(&mut self, who: &str) -> bool {
        if !self.rcon.connected().await || self.state != ServerState::Running {
            return false;
        }

        let Some((guid, name)) = self
            .snapshot
            .as_ref()
            .and_then(|s| s.players.find(who))
            .map(|pi| (pi.player_guid.clone(), pi.player_name.clone()))
        else {
            warn!("Unknown Player");
            return false;
        };

        match self.rcon.kick_player_guid(&guid).await {
            Ok(RconReply::Raw(bytes)) => {
                let success =
                    bytes.starts_with(ACK_KICK) && bytes.last() == Some(&b'd');
                if success {
                    info!("Kicked Player '{name}'");
                } else {
                    warn!("Error while executing command");
                }
                success
            }
            Ok(_) => {
                warn!("Error while executing command");
                false
            }
            Err(e) => {
                warn!("Error while executing command: {e}");
                false
            }
        }
    }

    /// Enables/disables the whitelist. A no-op when the snapshot already
    /// shows the requested state.
    pub async fn set_whitelist_enabled(&mut self, enabled: bool) -> bool {
        if !self.rcon.connected().await || self.state != ServerState::Running {
            return false;
        }

        let current = self
            .snapshot
            .as_ref()
            .and_then(|s| s.stats.is_enforcing_whitelist);
        if current == Some(enabled) {
            return true;
        }

        match self.rcon.set_deny_unlisted(enabled).await {
            Ok(RconReply::Raw(bytes)) => {
                let success =
                    bytes.starts_with(ACK_DENY_UNLISTED) && bytes.last() == Some(&b'1');
                if success {
                    if let Some(snapshot) = &mut self.snapshot {
                        snapshot.stats.is_enforcing_whitelist = Some(enabled);
                    }
                }
                success
            }
            Ok(_) => false,
            Err(e) => {
                debug!("DSSetDenyUnlisted failed: {e}");
                false
            }
        }
    }

    /// Flips the whitelist twice, which forces the DS to persist every
    /// known player into the INI file, then reloads that file.
    pub async fn quick_toggle_whitelist(&mut self) -> bool {
        if !self.rcon.connected().await || self.state != ServerState::Running {
            return false;
        }
        let Some(current) = self
            .snapshot
            .as_ref()
            .and_then(|s| s.stats.is_enforcing_whitelist)
        else {
            return false;
        };

        self.set_whitelist_enabled(!current).await;
        self.set_whitelist_enabled(current).await;
        self.reload_ds_config().await;
        true
    }

    pub async fn set_player_category(&mut self, who: &str, category: PlayerCategory) -> bool {
        if !self.rcon.connected().await || self.state != ServerState::Running {
            return false;
        }

        let Some(name) = self
            .snapshot
            .as_ref()
            .and_then(|s| s.players.find(who))
            .map(|pi| pi.player_name.clone())
        else {
            warn!("Unknown Player");
            return false;
        };

        match self.rcon.set_player_category(&name, category).await {
            Ok(RconReply::Json(value)) => value["status"].as_bool().unwrap_or(false),
            Ok(_) => false,
            Err(e) => {
                debug!("DSSetPlayerCategoryForPlayerName failed: {e}");
                false
            }
        }
    }

    pub async fn save_game(&mut self, name: Option<&str>) -> bool {
        if !self.rcon.connected().await || self.state != ServerState::Running {
            return false;
        }
        if let Some(name) = name {
            if !is_valid_savegame_name(name) {
                warn!("'{name}' is not a valid savegame name");
                return false;
            }
        }
        match self.rcon.save_game(name).await {
            Ok(()) => true,
            Err(e) => {
                debug!("DSSaveGame failed: {e}");
                false
            }
        }
    }

    /// Loads `save_name` after checking it exists in the last games
    /// snapshot, then polls until the DS reports it active.
    pub async fn load_game(&mut self, save_name: &str) -> bool {
        if !self.rcon.connected().await || self.state != ServerState::Running {
            return false;
        }

        let known = self
            .snapshot
            .as_ref()
            .is_some_and(|s| s.games.game_list.iter().any(|gi| gi.name == save_name));
        if !known {
            warn!("Unknown savegame '{save_name}'");
            return false;
        }
        if !is_valid_savegame_name(save_name) {
            warn!("'{save_name}' is not a valid savegame name");
            return false;
        }

        if self.rcon.load_game(save_name).await.is_err() {
            return false;
        }

        // Wait until the loaded save is the active one.
        for _ in 0..LOAD_SETTLE_TRIES {
            match self.rcon.list_games().await {
                Ok(RconReply::Json(value)) => {
                    if value["activeSaveName"].as_str() == Some(save_name) {
                        return true;
                    }
                }
                Ok(_) | Err(_) => return false,
            }
            tokio::time::sleep(LOAD_SETTLE_DELAY).await;
        }
        true
    }

    /// Disabled by policy: creating a save over RCON crashes the DS under
    /// the compatibility runtime.
    pub fn new_game(&self, _name: Option<&str>) {
        warn!("Starting a new save game is disabled: the dedicated server crashes under WINE while performing the operation");
        warn!("Please create new save games from inside the game");
    }
}

/// Decodes a status-query reply, logging the shape/parse failure modes the
/// protocol allows for.
fn parse_json_reply<T: serde::de::DeserializeOwned>(
    op: &str,
    reply: Result<RconReply, crate::rcon::RconError>,
) -> Option<T> {
    match reply {
        Ok(RconReply::Json(value)) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Malformed {op} reply: {e}");
                None
            }
        },
        Ok(_) => {
            warn!("Unexpected non-JSON reply to {op}");
            None
        }
        Err(e) => {
            debug!("{op} failed: {e}");
            None
        }
    }
}

/// Conservative savegame-name check mirroring what the DS accepts as a
/// file name on its side.
fn is_valid_savegame_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
        && !name.starts_with('.')
}
