//! DS child process management: spawning under the compatibility runtime,
//! the stderr line reader, the exit monitor, and the envelope kill.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DS_EXECUTABLE: &str = "AstroServer.exe";

const STDERR_CHANNEL_CAPACITY: usize = 1024;
const KILL_TIMEOUT: Duration = Duration::from_secs(15);

/// Resolved compatibility-runtime pieces: the `wine`/`wineserver` binaries
/// and the prefix directory all child invocations run against.
#[derive(Debug, Clone)]
pub struct WineRuntime {
    pub wine: PathBuf,
    pub wineserver: PathBuf,
    pub prefix: PathBuf,
}

impl WineRuntime {
    /// A command running under this prefix with wine debug output silenced.
    pub fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("WINEPREFIX", &self.prefix).env("WINEDEBUG", "-all");
        cmd
    }
}

/// A running DS child, observed through channels: stderr lines through a
/// bounded FIFO, the exit status through a one-shot style channel. The
/// supervisor owns this handle exclusively.
pub struct DsProcess {
    pub stderr_rx: mpsc::Receiver<String>,
    pub exit_rx: mpsc::Receiver<std::io::Result<ExitStatus>>,
    stop: CancellationToken,
}

impl DsProcess {
    /// Launches `<wine> <install>/AstroServer.exe -log` with the prefix
    /// environment and cwd set to the install dir, stderr piped.
    pub fn spawn(wine: &WineRuntime, astro_path: &Path) -> std::io::Result<Self> {
        let exe = astro_path.join(DS_EXECUTABLE);
        debug!(
            "Executing '{} {} -log' in WINE prefix '{}'",
            wine.wine.display(),
            exe.display(),
            wine.prefix.display()
        );

        let mut child = wine
            .command(&wine.wine)
            .arg(&exe)
            .arg("-log")
            .current_dir(astro_path)
            .stderr(Stdio::piped())
            .spawn()?;

        let stop = CancellationToken::new();
        let (stderr_tx, stderr_rx) = mpsc::channel(STDERR_CHANNEL_CAPACITY);
        if let Some(stderr) = child.stderr.take() {
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    tokio::select! {
                        () = stop.cancelled() => break,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                if stderr_tx.send(line).await.is_err() {
                                    break;
                                }
                            }
                            // EOF or broken pipe: the child went away.
                            Ok(None) | Err(_) => break,
                        },
                    }
                }
            });
        }

        let (exit_tx, exit_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = exit_tx.send(status).await;
        });

        Ok(Self {
            stderr_rx,
            exit_rx,
            stop,
        })
    }

    /// Non-blocking exit check; `Some` once the child has been reaped.
    pub fn try_exit(&mut self) -> Option<std::io::Result<ExitStatus>> {
        self.exit_rx.try_recv().ok()
    }

    /// Stops the stderr reader; consulted between reads.
    pub fn stop_reader(&self) {
        self.stop.cancel();
    }
}

/// Kills everything inside the prefix with `wineserver -k -w`, waiting up
/// to 15 seconds before hard-killing the wineserver call itself.
pub async fn kill_wine_processes(wine: &WineRuntime) {
    debug!(
        "Executing '{} -k -w' in WINE prefix '{}'",
        wine.wineserver.display(),
        wine.prefix.display()
    );

    let child = wine.command(&wine.wineserver).arg("-k").arg("-w").spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            warn!("Could not run wineserver to kill the server: {e}");
            return;
        }
    };

    match tokio::time::timeout(KILL_TIMEOUT, child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Error while waiting for wineserver kill: {e}"),
        Err(_) => {
            warn!("Server took longer than 15 seconds to kill, killing wineserver");
            let _ = child.kill().await;
        }
    }
}
