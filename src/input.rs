//! Long-lived stdin reader.
//!
//! Reads operator lines forever. While inactive (during install/update and
//! DS startup) lines are silently discarded so stray input cannot queue up
//! commands against a server that is not there yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::console::{ConsoleParser, OperatorCommand, ParseOutcome};

pub struct InputReader {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl InputReader {
    /// Spawns the reader task. Parsed commands go to `cmd_tx` in input
    /// order; `help` output and diagnostics are answered inline.
    pub fn spawn(cmd_tx: mpsc::UnboundedSender<OperatorCommand>) -> Self {
        let active = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&active);

        let handle = tokio::spawn(async move {
            let parser = ConsoleParser::new();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!("Got input: {line}");
                        if !flag.load(Ordering::Relaxed) {
                            continue;
                        }
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parser.parse_input(&line) {
                            Ok(ParseOutcome::Help(message)) => info!("{message}"),
                            Ok(ParseOutcome::Command { record, line }) => {
                                if cmd_tx.send(OperatorCommand { record, line }).is_err() {
                                    break;
                                }
                            }
                            Err(diagnostic) => warn!("{diagnostic}"),
                        }
                    }
                    Ok(None) => {
                        debug!("Stdin closed, stopping input reader");
                        break;
                    }
                    Err(e) => {
                        warn!("Error reading console input: {e}");
                        break;
                    }
                }
            }
        });

        Self { active, handle }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
        debug!("Set input reader active: {active}");
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
