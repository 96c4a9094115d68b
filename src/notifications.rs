//! Typed event fan-out to notification sinks.
//!
//! The [`NotificationManager`] holds an ordered list of handlers. Every
//! event is offered to each handler; a handler's whitelist decides whether
//! it is rendered (through its per-event format template) and delivered.
//! The log handler is synchronous; webhook handlers own a background worker
//! and an unbounded FIFO, so delivery can never block or crash the
//! supervisor. Delivery failures are swallowed at debug level.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{NotificationConfig, NotificationMethod};

const LAUNCHER_USER_AGENT: &str = concat!("AstroTux/", env!("CARGO_PKG_VERSION"));

/// Everything the supervisor reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Message,
    Start,
    Registered,
    Shutdown,
    Crash,
    PlayerJoin,
    PlayerLeave,
    Command,
    Save,
    SavegameChange,
}

impl EventType {
    pub const ALL: [Self; 10] = [
        Self::Message,
        Self::Start,
        Self::Registered,
        Self::Shutdown,
        Self::Crash,
        Self::PlayerJoin,
        Self::PlayerLeave,
        Self::Command,
        Self::Save,
        Self::SavegameChange,
    ];

    /// Stable identifier used in outgoing payload tags.
    pub fn key(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Start => "start",
            Self::Registered => "registered",
            Self::Shutdown => "shutdown",
            Self::Crash => "crash",
            Self::PlayerJoin => "player_join",
            Self::PlayerLeave => "player_leave",
            Self::Command => "command",
            Self::Save => "save",
            Self::SavegameChange => "savegame_change",
        }
    }

    fn default_format(self) -> &'static str {
        match self {
            Self::Message => "{message}",
            Self::Start => "Server started!",
            Self::Registered => "Server registered with Playfab!",
            Self::Shutdown => "Server shutting down...",
            Self::Crash => "Server crashed!",
            Self::PlayerJoin => "Player '{player_name}'({player_guid}) joined the game",
            Self::PlayerLeave => "Player '{player_name}'({player_guid}) left the game",
            Self::Command => "Command executed: {command}",
            Self::Save => "Game saved!",
            Self::SavegameChange => "Savegame changed to '{savegame_name}'",
        }
    }
}

/// Attributes attached to one event, used to fill format templates.
pub type EventAttrs = Vec<(&'static str, String)>;

/// Formats `template`, keeping unresolved `{placeholder}`s verbatim instead
/// of failing. `{{` and `}}` escape literal braces.
pub fn safe_format(template: &str, attrs: &[(&'static str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                match attrs.iter().find(|(name, _)| *name == key) {
                    Some((_, value)) if closed => out.push_str(value),
                    _ => {
                        out.push('{');
                        out.push_str(&key);
                        if closed {
                            out.push('}');
                        }
                    }
                }
            }
            c => out.push(c),
        }
    }
    out
}

struct QueuedEvent {
    event: EventType,
    message: String,
    attrs: EventAttrs,
}

enum HandlerSink {
    /// Rendered into the shared log pipeline.
    Log,
    /// Handed to a background worker, one delivery at a time.
    Queued(mpsc::UnboundedSender<QueuedEvent>),
}

/// One notification target: a name (the source identifier in templates), a
/// whitelist of event types, format templates, and a sink.
pub struct NotificationHandler {
    name: String,
    whitelist: HashSet<EventType>,
    formats: HashMap<EventType, String>,
    sink: HandlerSink,
}

impl NotificationHandler {
    /// Synchronous handler writing rendered events to the log. The
    /// `Command` event is excluded by default: command results already
    /// appear in the log through their own result lines.
    pub fn logging(name: impl Into<String>) -> Self {
        let whitelist = EventType::ALL
            .into_iter()
            .filter(|e| *e != EventType::Command)
            .collect();
        Self {
            name: name.into(),
            whitelist,
            formats: default_formats(),
            sink: HandlerSink::Log,
        }
    }

    /// Queued handler: spawns a worker that drains an unbounded FIFO and
    /// delivers one event at a time through `deliverer`.
    pub fn queued(name: impl Into<String>, deliverer: Box<dyn Deliverer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedEvent>();
        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                if let Err(e) = deliverer
                    .deliver(queued.event, &queued.message, &queued.attrs)
                    .await
                {
                    debug!("Notification delivery failed: {e}");
                }
            }
        });
        Self {
            name: name.into(),
            whitelist: EventType::ALL.into_iter().collect(),
            formats: default_formats(),
            sink: HandlerSink::Queued(tx),
        }
    }

    fn send_event(&self, event: EventType, attrs: &EventAttrs) {
        if !self.whitelist.contains(&event) {
            return;
        }

        let mut attrs = attrs.clone();
        attrs.push(("name", self.name.clone()));

        let template = self
            .formats
            .get(&event)
            .map(String::as_str)
            .unwrap_or_else(|| event.default_format());
        let message = safe_format(template, &attrs);

        match &self.sink {
            HandlerSink::Log => match event {
                EventType::Crash => warn!("{message}"),
                _ => info!("{message}"),
            },
            HandlerSink::Queued(tx) => {
                let _ = tx.send(QueuedEvent {
                    event,
                    message,
                    attrs,
                });
            }
        }
    }
}

fn default_formats() -> HashMap<EventType, String> {
    EventType::ALL
        .into_iter()
        .map(|e| (e, e.default_format().to_string()))
        .collect()
}

/// Ordered fan-out over all registered handlers. Events crossing the bus
/// are immutable copies; handlers never see each other.
#[derive(Default)]
pub struct NotificationManager {
    handlers: Vec<NotificationHandler>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the manager from launcher configuration: the log handler is
    /// always present, a webhook handler when configured.
    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut manager = Self::new();
        manager.add_handler(NotificationHandler::logging("Server"));

        match config.method {
            NotificationMethod::None => {}
            NotificationMethod::Discord => match &config.discord {
                Some(discord) => manager.add_handler(NotificationHandler::queued(
                    "Server",
                    Box::new(DiscordDeliverer::new(discord.webhook_url.clone())),
                )),
                None => warn!("Discord notifications enabled but no webhook configured"),
            },
            NotificationMethod::Ntfy => match &config.ntfy {
                Some(ntfy) => manager.add_handler(NotificationHandler::queued(
                    "Server",
                    Box::new(NtfyDeliverer::new(ntfy.server.clone(), ntfy.topic.clone())),
                )),
                None => warn!("ntfy notifications enabled but no topic configured"),
            },
        }

        manager
    }

    pub fn add_handler(&mut self, handler: NotificationHandler) {
        self.handlers.push(handler);
    }

    pub fn send_event(&self, event: EventType, attrs: EventAttrs) {
        for handler in &self.handlers {
            handler.send_event(event, &attrs);
        }
    }
}

/// Delivery backend of a queued handler. Best effort: errors are logged at
/// debug by the worker and otherwise dropped.
#[async_trait]
pub trait Deliverer: Send + Sync + 'static {
    async fn deliver(
        &self,
        event: EventType,
        message: &str,
        attrs: &EventAttrs,
    ) -> anyhow::Result<()>;
}

fn attr<'a>(attrs: &'a EventAttrs, key: &str) -> &'a str {
    attrs
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.as_str())
        .unwrap_or("unknown")
}

/// Discord embed color + emoji tag per event type.
fn discord_extras(event: EventType) -> (u32, &'static str) {
    match event {
        EventType::Message => (10_526_880, "information_source"),
        EventType::Start => (3_256_064, "green_square"),
        EventType::Registered => (10_526_880, "white_check_mark"),
        EventType::Shutdown => (14_440_960, "orange_square"),
        EventType::Crash => (13_764_616, "red_square"),
        EventType::PlayerJoin => (41_160, "inbox_tray"),
        EventType::PlayerLeave => (6_553_800, "outbox_tray"),
        EventType::Command => (15_118_080, "wrench"),
        EventType::Save => (7_274_240, "file_cabinet"),
        EventType::SavegameChange => (15_118_080, "dividers"),
    }
}

pub struct DiscordDeliverer {
    webhook_url: String,
    http: reqwest::Client,
}

impl DiscordDeliverer {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: webhook_client(),
        }
    }
}

#[async_trait]
impl Deliverer for DiscordDeliverer {
    async fn deliver(
        &self,
        event: EventType,
        message: &str,
        attrs: &EventAttrs,
    ) -> anyhow::Result<()> {
        let (color, emoji) = discord_extras(event);
        let payload = json!({
            "content": null,
            "embeds": [
                {
                    "title": format!(":{emoji}: {message}"),
                    "color": color,
                    "fields": [
                        { "name": "Event", "value": event.key(), "inline": true },
                        { "name": "Version", "value": attr(attrs, "server_version"), "inline": true },
                    ],
                    "author": { "name": "Server Notification" },
                    "footer": { "text": LAUNCHER_USER_AGENT },
                    "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                }
            ],
            "username": attr(attrs, "name"),
            "attachments": [],
            "flags": 4096,
        });

        self.http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// ntfy priority + emoji tag per event type.
fn ntfy_extras(event: EventType) -> (u8, &'static str) {
    match event {
        EventType::Message => (2, "information_source"),
        EventType::Start => (4, "green_square"),
        EventType::Registered => (3, "white_check_mark"),
        EventType::Shutdown => (4, "orange_square"),
        EventType::Crash => (5, "red_square"),
        EventType::PlayerJoin => (3, "inbox_tray"),
        EventType::PlayerLeave => (3, "outbox_tray"),
        EventType::Command => (3, "wrench"),
        EventType::Save => (2, "file_cabinet"),
        EventType::SavegameChange => (2, "card_index_dividers"),
    }
}

pub struct NtfyDeliverer {
    server: String,
    topic: String,
    http: reqwest::Client,
}

impl NtfyDeliverer {
    pub fn new(server: String, topic: String) -> Self {
        Self {
            server,
            topic,
            http: webhook_client(),
        }
    }
}

#[async_trait]
impl Deliverer for NtfyDeliverer {
    async fn deliver(
        &self,
        event: EventType,
        message: &str,
        attrs: &EventAttrs,
    ) -> anyhow::Result<()> {
        let (priority, emoji) = ntfy_extras(event);
        let payload = json!({
            "topic": self.topic,
            "message": attr(attrs, "name"),
            "title": message,
            "tags": [emoji, event.key(), "AstroTux"],
            "priority": priority,
        });

        self.http
            .post(&self.server)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn webhook_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(LAUNCHER_USER_AGENT)
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .unwrap_or_default()
}
