#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_lines
)]

//! # AstroTux
//!
//! Unattended supervisor for the Astroneer Dedicated Server running under
//! WINE on Linux: install/update, preflight, launch, matchmaking
//! registration, RCON-backed monitoring, and operator console.

/// Launcher, DS, and engine configuration files
pub mod config;

/// Interactive console command parsing
pub mod console;

/// Duplicate-key INI documents
pub mod ini;

/// Stdin reader feeding the command queue
pub mod input;

/// Launcher orchestration and preflight
pub mod launcher;

/// Console + dated-file logging setup
pub mod logging;

/// Public-IP echo, reachability probes, port inventory
pub mod net;

/// Typed event fan-out to notification sinks
pub mod notifications;

/// Matchmaking API client
pub mod playfab;

/// RCON client for the DS console port
pub mod rcon;

/// Dedicated Server supervisor
pub mod server;

/// External downloader driving and build versioning
pub mod steam;
