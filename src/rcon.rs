//! RCON client for the Astroneer DS console port.
//!
//! The protocol is line-oriented ASCII over a single TCP connection to
//! `127.0.0.1:ConsolePort`; the password, when set, is the first line sent
//! after connect. Status queries answer with JSON, mutating commands with an
//! opaque ASCII acknowledgement, some commands with nothing at all. Replies
//! are demultiplexed into [`RconReply`] so callers match on shape instead of
//! probing bytes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

const RECV_CHUNK: usize = 4096;

/// Unknown command the DS ignores; used as a liveness probe.
const PROBE_LINE: &[u8] = b"Hello There!\n";

/// How long the DS needs to quiesce after `DSSaveGame` before it will
/// answer further console traffic sanely.
const SAVE_QUIESCENCE: Duration = Duration::from_millis(1100);

#[derive(Debug, Error)]
pub enum RconError {
    #[error("RCON is not connected")]
    NotConnected,
    #[error("RCON connection lost: {0}")]
    ConnectionLost(std::io::Error),
}

/// Player category as understood by the DS, both in RCON commands and in
/// the persisted `PlayerProperties` tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerCategory {
    Unlisted,
    Blacklisted,
    Whitelisted,
    Admin,
    Pending,
    Owner,
}

impl fmt::Display for PlayerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unlisted => "Unlisted",
            Self::Blacklisted => "Blacklisted",
            Self::Whitelisted => "Whitelisted",
            Self::Admin => "Admin",
            Self::Pending => "Pending",
            Self::Owner => "Owner",
        };
        f.write_str(name)
    }
}

impl FromStr for PlayerCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unlisted" => Ok(Self::Unlisted),
            "blacklisted" => Ok(Self::Blacklisted),
            "whitelisted" => Ok(Self::Whitelisted),
            "admin" => Ok(Self::Admin),
            "pending" => Ok(Self::Pending),
            "owner" => Ok(Self::Owner),
            _ => Err(()),
        }
    }
}

/// A demultiplexed RCON reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RconReply {
    /// The reply parsed as a JSON document (status queries, JSON acks).
    Json(serde_json::Value),
    /// Opaque acknowledgement bytes (mutating commands).
    Raw(Bytes),
    /// No reply bytes at all.
    Empty,
}

impl RconReply {
    /// Empty input stays `Empty`; anything else is tried as JSON (modulo
    /// trailing whitespace) and falls back to the untouched raw bytes.
    pub fn parse(raw: &[u8]) -> Self {
        if raw.is_empty() {
            return Self::Empty;
        }
        let trimmed = trim_ascii_end(raw);
        match serde_json::from_slice(trimmed) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(Bytes::copy_from_slice(raw)),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn trim_ascii_end(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && raw[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &raw[..end]
}

#[derive(Default)]
struct Inner {
    stream: Option<TcpStream>,
}

impl Inner {
    /// Drops the socket; the OS close happens exactly once, on drop.
    fn disconnect(&mut self) {
        self.stream = None;
    }

    async fn send_line(&mut self, line: &[u8]) -> Result<(), RconError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(RconError::NotConnected);
        };
        if let Err(e) = stream.write_all(line).await {
            self.disconnect();
            return Err(RconError::ConnectionLost(e));
        }
        Ok(())
    }

    /// Receives 4 KiB chunks until a short read terminates the block.
    async fn recv_all(&mut self) -> Result<Vec<u8>, RconError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(RconError::NotConnected);
        };

        let mut data = Vec::new();
        let mut buf = [0u8; RECV_CHUNK];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.disconnect();
                    return Err(RconError::ConnectionLost(e));
                }
            };
            if n == 0 {
                // EOF: the DS went away. Keep whatever arrived.
                self.disconnect();
                if data.is_empty() {
                    return Err(RconError::ConnectionLost(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    )));
                }
                return Ok(data);
            }
            data.extend_from_slice(&buf[..n]);
            if n < RECV_CHUNK {
                return Ok(data);
            }
        }
    }
}

/// Serialised request/response client: at most one in-flight request per
/// connection, guarded by the inner mutex.
pub struct RconClient {
    host: String,
    port: u16,
    password: Option<String>,
    inner: Mutex<Inner>,
}

impl RconClient {
    pub fn new(port: u16, password: Option<String>) -> Self {
        Self::with_host("127.0.0.1", port, password)
    }

    pub fn with_host(host: impl Into<String>, port: u16, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn connected(&self) -> bool {
        self.inner.lock().await.stream.is_some()
    }

    pub async fn disconnect(&self) {
        self.inner.lock().await.disconnect();
    }

    /// Lazily connects and probes liveness with a dummy line. Returns the
    /// resulting connected state; never errors, callers decide on retry.
    pub async fn ensure_connection(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.stream.is_none() {
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    inner.stream = Some(stream);
                    if let Some(password) = &self.password {
                        let line = format!("{password}\n");
                        if let Err(e) = inner.send_line(line.as_bytes()).await {
                            debug!("RCON authentication write failed: {e}");
                            return false;
                        }
                    }
                }
                Err(e) => {
                    debug!("RCON connect to {}:{} failed: {e}", self.host, self.port);
                    return false;
                }
            }
        }

        if let Err(e) = inner.send_line(PROBE_LINE).await {
            debug!("RCON liveness probe failed: {e}");
        }

        inner.stream.is_some()
    }

    async fn request(&self, line: String) -> Result<RconReply, RconError> {
        let mut inner = self.inner.lock().await;
        inner.send_line(line.as_bytes()).await?;
        let raw = inner.recv_all().await?;
        Ok(RconReply::parse(&raw))
    }

    /// Sends a command the DS never answers.
    async fn send_only(&self, line: String) -> Result<(), RconError> {
        self.inner.lock().await.send_line(line.as_bytes()).await
    }

    pub async fn server_statistics(&self) -> Result<RconReply, RconError> {
        self.request("DSServerStatistics\n".to_string()).await
    }

    pub async fn list_players(&self) -> Result<RconReply, RconError> {
        self.request("DSListPlayers\n".to_string()).await
    }

    pub async fn list_games(&self) -> Result<RconReply, RconError> {
        self.request("DSListGames\n".to_string()).await
    }

    pub async fn set_player_category(
        &self,
        player_name: &str,
        category: PlayerCategory,
    ) -> Result<RconReply, RconError> {
        let escaped = escape_player_name(player_name);
        self.request(format!(
            "DSSetPlayerCategoryForPlayerName \"{escaped}\" {category}\n"
        ))
        .await
    }

    pub async fn set_deny_unlisted(&self, state: bool) -> Result<RconReply, RconError> {
        self.request(format!("DSSetDenyUnlisted {state}\n")).await
    }

    pub async fn kick_player_guid(&self, guid: &str) -> Result<RconReply, RconError> {
        self.request(format!("DSKickPlayerGuid {guid}\n")).await
    }

    pub async fn load_game(&self, save_name: &str) -> Result<RconReply, RconError> {
        self.request(format!("DSLoadGame {save_name}\n")).await
    }

    /// No reply; sleeps out the DS's save quiescence window before
    /// returning so the next command is not swallowed.
    pub async fn save_game(&self, name: Option<&str>) -> Result<(), RconError> {
        let line = match name {
            Some(name) => format!("DSSaveGame {name}\n"),
            None => "DSSaveGame\n".to_string(),
        };
        self.send_only(line).await?;
        tokio::time::sleep(SAVE_QUIESCENCE).await;
        Ok(())
    }

    pub async fn new_game(&self, name: Option<&str>) -> Result<(), RconError> {
        let line = match name {
            Some(name) => format!("DSNewGame {name}\n"),
            None => "DSNewGame\n".to_string(),
        };
        self.send_only(line).await
    }

    pub async fn server_shutdown(&self) -> Result<(), RconError> {
        self.send_only("DSServerShutdown\n".to_string()).await
    }
}

fn escape_player_name(name: &str) -> String {
    name.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reply_is_empty_not_a_parse_failure() {
        assert_eq!(RconReply::parse(b""), RconReply::Empty);
    }

    #[test]
    fn json_reply_is_parsed_despite_trailing_whitespace() {
        let reply = RconReply::parse(b"{\"status\": true}\r\n");
        assert_eq!(
            reply.as_json().and_then(|v| v["status"].as_bool()),
            Some(true)
        );
    }

    #[test]
    fn non_json_reply_keeps_raw_bytes_untrimmed() {
        let ack = b"UAstroServerCommExecutor::DSKickPlayerGuid: kicked";
        let reply = RconReply::parse(ack);
        assert_eq!(reply.as_raw(), Some(&ack[..]));
    }

    #[test]
    fn player_name_quotes_are_escaped() {
        assert_eq!(escape_player_name("a\"b"), "a\\\"b");
        assert_eq!(escape_player_name("plain"), "plain");
    }

    #[test]
    fn category_display_and_parse_are_inverse() {
        for category in [
            PlayerCategory::Unlisted,
            PlayerCategory::Blacklisted,
            PlayerCategory::Whitelisted,
            PlayerCategory::Admin,
            PlayerCategory::Pending,
            PlayerCategory::Owner,
        ] {
            let rendered = category.to_string();
            assert_eq!(rendered.to_lowercase().parse(), Ok(category));
        }
    }

    #[test]
    fn category_parse_rejects_unknown() {
        assert!("superuser".parse::<PlayerCategory>().is_err());
    }
}
