#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;
use std::process::ExitCode;

use astrotux::config::LauncherConfig;
use astrotux::launcher::Launcher;
use astrotux::logging;
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info};

const BANNER: &str = r"
    ___         __           ______
   /   |  _____/ /__________/_  __/_  ___  __
  / /| | / ___/ __/ ___/ __ \/ / / / / / |/_/
 / ___ |(__  ) /_/ /  / /_/ / / / /_/ />  <
/_/  |_/____/\__/_/   \____/_/  \__,_/_/|_|
";
const BANNER_TEXT: &str = "Unofficial Astroneer Dedicated Server Launcher for Linux";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LauncherCommand {
    /// Install the Astroneer Dedicated Server
    Install,
    /// Check for and install available updates
    Update,
    /// Start the installed dedicated server
    Start,
}

/// AstroTux -- unofficial Astroneer Dedicated Server launcher for Linux
#[derive(Parser, Debug)]
#[command(name = "astrotux")]
#[command(about = BANNER_TEXT)]
#[command(version)]
struct Cli {
    /// What to do
    #[arg(value_enum)]
    command: LauncherCommand,

    /// The location of the configuration file
    #[arg(short = 'c', long = "config_path", default_value = "launcher.toml")]
    config_path: PathBuf,

    /// The path of the Astroneer Dedicated Server installation
    /// (overrides the config value)
    #[arg(short = 'p', long = "astro_path")]
    astro_path: Option<PathBuf>,

    /// Path or PATH-lookup name of an existing DepotDownloader executable
    #[arg(short = 'd', long = "depotdl_exec")]
    depotdl_exec: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    println!("{BANNER}");
    println!("{BANNER_TEXT}");
    println!("v{}", env!("CARGO_PKG_VERSION"));
    println!();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be up yet when config loading fails.
            error!("Quitting... (Reason: {e:#})");
            eprintln!("Quitting... (Reason: {e:#})");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = std::path::absolute(&cli.config_path)?;

    let mut config = LauncherConfig::ensure_config(&config_path).map_err(|e| {
        anyhow::anyhow!("error while loading config file: {e}. Please check the config path parameter and/or config file")
    })?;

    // CLI override beats the config value.
    if let Some(astro_path) = cli.astro_path {
        config.astro_server_path = astro_path;
    }
    config.absolutize()?;

    logging::init(&config.log_path, config.log_debug_messages);

    info!("Configuration file path: {}", config_path.display());
    if let Ok(cwd) = std::env::current_dir() {
        info!("Working directory: {}", cwd.display());
    }
    if let Ok(dump) = serde_json::to_string_pretty(&config) {
        debug!("Launcher configuration (including overrides):\n{dump}");
    }

    let launcher = Launcher::new(config, cli.depotdl_exec.as_deref())?;

    match cli.command {
        LauncherCommand::Install => {
            info!("Installing Astroneer Dedicated Server...");
            launcher.update_server().await?;
        }
        LauncherCommand::Update => {
            info!("Checking for available updates to the Astroneer Dedicated Server...");
            launcher.check_server_update(true).await?;
        }
        LauncherCommand::Start => {
            info!("Starting Astroneer Dedicated Server");
            let graceful = launcher.start_server().await?;
            if !graceful {
                anyhow::bail!("the Dedicated Server did not shut down gracefully");
            }
        }
    }

    debug!("Application finished");
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::{Cli, LauncherCommand};
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["astrotux"]).is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        for (raw, expected) in [
            ("install", LauncherCommand::Install),
            ("update", LauncherCommand::Update),
            ("start", LauncherCommand::Start),
        ] {
            let cli = Cli::try_parse_from(["astrotux", raw]).unwrap();
            assert_eq!(cli.command, expected);
        }
    }

    #[test]
    fn test_cli_config_path_default() {
        let cli = Cli::try_parse_from(["astrotux", "start"]).unwrap();
        assert_eq!(cli.config_path.to_string_lossy(), "launcher.toml");
        assert!(cli.astro_path.is_none());
        assert!(cli.depotdl_exec.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "astrotux",
            "start",
            "--config_path",
            "/etc/astrotux.toml",
            "--astro_path",
            "/srv/astro",
            "--depotdl_exec",
            "depotdownloader",
        ])
        .unwrap();
        assert_eq!(cli.config_path.to_string_lossy(), "/etc/astrotux.toml");
        assert_eq!(cli.astro_path.unwrap().to_string_lossy(), "/srv/astro");
        assert_eq!(cli.depotdl_exec.as_deref(), Some("depotdownloader"));
    }

    #[test]
    fn test_cli_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["astrotux", "reboot"]).is_err());
    }
}
