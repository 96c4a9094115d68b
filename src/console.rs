//! Interactive console command parsing.
//!
//! Operator input is tokenized (quoted strings stay one token) and
//! validated into typed [`CommandRecord`]s. `help` is answered directly by
//! the parser; every other command is handed to the supervisor's queue
//! together with the original line for event logging. Parse failures
//! produce operator-readable diagnostics, never errors.

use std::fmt;

use crate::rcon::PlayerCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistAction {
    Enable,
    Disable,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCategory {
    All,
    Whitelisted,
    Blacklisted,
    Unlisted,
    Admin,
    Owner,
}

impl ListCategory {
    /// The RCON-side category this filter selects, `None` meaning all.
    pub fn as_player_category(self) -> Option<PlayerCategory> {
        match self {
            Self::All => None,
            Self::Whitelisted => Some(PlayerCategory::Whitelisted),
            Self::Blacklisted => Some(PlayerCategory::Blacklisted),
            Self::Unlisted => Some(PlayerCategory::Unlisted),
            Self::Admin => Some(PlayerCategory::Admin),
            Self::Owner => Some(PlayerCategory::Owner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveGameAction {
    Load { name: String },
    Save { name: Option<String> },
    New { name: Option<String> },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    Set {
        player: String,
        category: PlayerCategory,
    },
    Get {
        player: String,
    },
}

/// One validated operator command, ready for the supervisor's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRecord {
    Shutdown,
    Restart,
    Info,
    Kick { player: String },
    Whitelist(WhitelistAction),
    List(ListCategory),
    SaveGame(SaveGameAction),
    Player(PlayerAction),
}

/// Successful parse: either an answered `help`, or a queued command plus
/// the line that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Help(String),
    Command { record: CommandRecord, line: String },
}

/// Queue item handed from the input reader to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorCommand {
    pub record: CommandRecord,
    /// The normalised command line, for `Command` event logging.
    pub line: String,
}

/// Help text per command; `(usage, description)`.
const COMMANDS: &[(&str, &str, &str)] = &[
    ("help", "help [command [subcommand]]", "Prints this help message and help messages for commands and subcommands"),
    ("shutdown", "shutdown", "Shuts down the Dedicated Server"),
    ("restart", "restart", "Restarts the Dedicated Server"),
    ("info", "info", "Gives information about the running Dedicated Server"),
    ("kick", "kick <player>", "Kicks a player from the server by name or GUID"),
    ("whitelist", "whitelist (enable|disable|status)", "Manages/Queries the whitelist status"),
    ("list", "list [all|whitelisted|blacklisted|unlisted|admin|owner]", "List players, filtered by the provided category"),
    ("savegame", "savegame (load <name>|save [name]|new [name]|list)", "Manages savegames"),
    ("player", "player (set <player> <category>|get <player>)", "Manages and shows player categories"),
];

const SUBCOMMANDS: &[(&str, &str, &str, &str)] = &[
    ("whitelist", "enable", "whitelist enable", "Enables the whitelist"),
    ("whitelist", "disable", "whitelist disable", "Disables the whitelist"),
    ("whitelist", "status", "whitelist status", "Queries the enabled status of the whitelist"),
    ("savegame", "load", "savegame load <name>", "Loads a save and sets it as the active save for the server"),
    ("savegame", "save", "savegame save [name]", "Saves the game instantly"),
    ("savegame", "new", "savegame new [name]", "Create a new save and set it as active"),
    ("savegame", "list", "savegame list", "List all the available savegames and marks the active one"),
    ("player", "set", "player set <player> <category>", "Sets the category of a player (unlisted, blacklisted, whitelisted, admin)"),
    ("player", "get", "player get <player>", "Gets the category of a player"),
];

#[derive(Debug, Default)]
pub struct ConsoleParser;

impl ConsoleParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses one input line. `Err` carries a diagnostic for the operator.
    pub fn parse_input(&self, input: &str) -> Result<ParseOutcome, String> {
        let tokens = tokenize(input);
        let Some((cmd, args)) = tokens.split_first() else {
            return Err("No command given. See 'help' for all commands".to_string());
        };

        let record = match cmd.as_str() {
            "help" => {
                let message = self.help(args.first().map(String::as_str), args.get(1).map(String::as_str))?;
                return Ok(ParseOutcome::Help(message));
            }
            "shutdown" => no_args(CommandRecord::Shutdown, "shutdown", args)?,
            "restart" => no_args(CommandRecord::Restart, "restart", args)?,
            "info" => no_args(CommandRecord::Info, "info", args)?,
            "kick" => match args {
                [player] => CommandRecord::Kick {
                    player: player.clone(),
                },
                [] => return Err(usage_error("kick", "missing <player> argument")),
                _ => return Err(usage_error("kick", "too many arguments")),
            },
            "whitelist" => match args {
                [sub] => CommandRecord::Whitelist(match sub.as_str() {
                    "enable" => WhitelistAction::Enable,
                    "disable" => WhitelistAction::Disable,
                    "status" => WhitelistAction::Status,
                    other => return Err(unknown_subcommand("whitelist", other)),
                }),
                [] => return Err(usage_error("whitelist", "missing subcommand")),
                _ => return Err(usage_error("whitelist", "too many arguments")),
            },
            "list" => match args {
                [] => CommandRecord::List(ListCategory::All),
                [category] => CommandRecord::List(match category.as_str() {
                    "all" => ListCategory::All,
                    "whitelisted" => ListCategory::Whitelisted,
                    "blacklisted" => ListCategory::Blacklisted,
                    "unlisted" => ListCategory::Unlisted,
                    "admin" => ListCategory::Admin,
                    "owner" => ListCategory::Owner,
                    other => {
                        return Err(format!(
                            "Unknown category '{other}'. See 'help list' for valid categories"
                        ))
                    }
                }),
                _ => return Err(usage_error("list", "too many arguments")),
            },
            "savegame" => match args {
                [] => return Err(usage_error("savegame", "missing subcommand")),
                [sub, rest @ ..] => CommandRecord::SaveGame(match (sub.as_str(), rest) {
                    ("load", [name]) => SaveGameAction::Load { name: name.clone() },
                    ("load", []) => {
                        return Err(usage_error("savegame", "load requires a save name"))
                    }
                    ("save", []) => SaveGameAction::Save { name: None },
                    ("save", [name]) => SaveGameAction::Save {
                        name: Some(name.clone()),
                    },
                    ("new", []) => SaveGameAction::New { name: None },
                    ("new", [name]) => SaveGameAction::New {
                        name: Some(name.clone()),
                    },
                    ("list", []) => SaveGameAction::List,
                    ("load" | "save" | "new" | "list", _) => {
                        return Err(usage_error("savegame", "too many arguments"))
                    }
                    (other, _) => return Err(unknown_subcommand("savegame", other)),
                }),
            },
            "player" => match args {
                [] => return Err(usage_error("player", "missing subcommand")),
                [sub, rest @ ..] => CommandRecord::Player(match (sub.as_str(), rest) {
                    ("set", [player, category]) => {
                        let category: PlayerCategory = category.parse().map_err(|()| {
                            format!(
                                "Unknown category '{category}'. See 'help player set' for valid categories"
                            )
                        })?;
                        // Owner and Pending are managed by the DS itself.
                        if matches!(category, PlayerCategory::Owner | PlayerCategory::Pending) {
                            return Err(format!(
                                "Category '{category}' cannot be assigned from the console"
                            ));
                        }
                        PlayerAction::Set {
                            player: player.clone(),
                            category,
                        }
                    }
                    ("set", _) => {
                        return Err(usage_error("player", "set requires <player> and <category>"))
                    }
                    ("get", [player]) => PlayerAction::Get {
                        player: player.clone(),
                    },
                    ("get", _) => return Err(usage_error("player", "get requires <player>")),
                    (other, _) => return Err(unknown_subcommand("player", other)),
                }),
            },
            other => {
                return Err(format!(
                    "Unknown command: '{other}'. See 'help' for all commands"
                ))
            }
        };

        Ok(ParseOutcome::Command {
            record,
            line: tokens.join(" "),
        })
    }

    /// Renders help: general overview, per-command, or per-subcommand.
    pub fn help(&self, cmd: Option<&str>, subcmd: Option<&str>) -> Result<String, String> {
        match cmd {
            None | Some("") => {
                let mut out = String::from("Available commands:\n");
                for (_, usage, description) in COMMANDS {
                    append_help_line(&mut out, usage, description);
                }
                Ok(out)
            }
            Some(cmd) => {
                let Some((_, usage, description)) =
                    COMMANDS.iter().find(|(name, _, _)| *name == cmd)
                else {
                    return Err(format!(
                        "Command '{cmd}' not found. See 'help' for all commands"
                    ));
                };
                match subcmd {
                    None | Some("") => {
                        let mut out = format!("{description}\n\nUsage: {usage}\n");
                        let subs: Vec<_> = SUBCOMMANDS
                            .iter()
                            .filter(|(parent, _, _, _)| *parent == cmd)
                            .collect();
                        if !subs.is_empty() {
                            out.push_str("\nSubcommands:\n");
                            for (_, _, usage, description) in subs {
                                append_help_line(&mut out, usage, description);
                            }
                        }
                        Ok(out)
                    }
                    Some(subcmd) => {
                        let Some((_, _, usage, description)) = SUBCOMMANDS
                            .iter()
                            .find(|(parent, name, _, _)| *parent == cmd && *name == subcmd)
                        else {
                            return Err(format!(
                                "Subcommand '{subcmd}' for command '{cmd}' not found. See 'help {cmd}' for all subcommands"
                            ));
                        };
                        Ok(format!("{description}\n\nUsage: {usage}\n"))
                    }
                }
            }
        }
    }
}

fn append_help_line(out: &mut String, usage: impl fmt::Display, description: impl fmt::Display) {
    use fmt::Write;
    let usage = usage.to_string();
    let _ = writeln!(out, "    {usage:<50} {description}");
}

fn no_args(record: CommandRecord, name: &str, args: &[String]) -> Result<CommandRecord, String> {
    if args.is_empty() {
        Ok(record)
    } else {
        Err(usage_error(name, "takes no arguments"))
    }
}

fn usage_error(cmd: &str, detail: &str) -> String {
    let usage = COMMANDS
        .iter()
        .find(|(name, _, _)| *name == cmd)
        .map(|(_, usage, _)| *usage)
        .unwrap_or(cmd);
    format!("{cmd}: {detail}. Usage: {usage}")
}

fn unknown_subcommand(cmd: &str, sub: &str) -> String {
    format!("Unknown subcommand '{sub}' for '{cmd}'. See 'help {cmd}' for all subcommands")
}

/// Splits on whitespace while keeping double- or single-quoted spans as one
/// token (quotes stripped).
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<ParseOutcome, String> {
        ConsoleParser::new().parse_input(input)
    }

    fn record(input: &str) -> CommandRecord {
        match parse(input).unwrap() {
            ParseOutcome::Command { record, .. } => record,
            ParseOutcome::Help(_) => panic!("expected command, got help"),
        }
    }

    #[test]
    fn tokenize_preserves_quoted_strings() {
        assert_eq!(
            tokenize("kick \"Player One\""),
            vec!["kick".to_string(), "Player One".to_string()]
        );
        assert_eq!(
            tokenize("kick 'Player Two'"),
            vec!["kick".to_string(), "Player Two".to_string()]
        );
        assert_eq!(tokenize("  a   b  "), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn simple_commands_parse() {
        assert_eq!(record("shutdown"), CommandRecord::Shutdown);
        assert_eq!(record("restart"), CommandRecord::Restart);
        assert_eq!(record("info"), CommandRecord::Info);
    }

    #[test]
    fn kick_requires_exactly_one_player() {
        assert_eq!(
            record("kick Alice"),
            CommandRecord::Kick {
                player: "Alice".to_string()
            }
        );
        assert!(parse("kick").is_err());
        assert!(parse("kick a b").is_err());
    }

    #[test]
    fn whitelist_subcommands() {
        assert_eq!(
            record("whitelist enable"),
            CommandRecord::Whitelist(WhitelistAction::Enable)
        );
        assert_eq!(
            record("whitelist disable"),
            CommandRecord::Whitelist(WhitelistAction::Disable)
        );
        assert_eq!(
            record("whitelist status"),
            CommandRecord::Whitelist(WhitelistAction::Status)
        );
        assert!(parse("whitelist").is_err());
        assert!(parse("whitelist off").is_err());
    }

    #[test]
    fn list_defaults_to_all() {
        assert_eq!(record("list"), CommandRecord::List(ListCategory::All));
        assert_eq!(record("list admin"), CommandRecord::List(ListCategory::Admin));
        assert!(parse("list everyone").is_err());
    }

    #[test]
    fn savegame_variants() {
        assert_eq!(
            record("savegame load SAVE_1"),
            CommandRecord::SaveGame(SaveGameAction::Load {
                name: "SAVE_1".to_string()
            })
        );
        assert_eq!(
            record("savegame save"),
            CommandRecord::SaveGame(SaveGameAction::Save { name: None })
        );
        assert_eq!(
            record("savegame save backup"),
            CommandRecord::SaveGame(SaveGameAction::Save {
                name: Some("backup".to_string())
            })
        );
        assert_eq!(
            record("savegame list"),
            CommandRecord::SaveGame(SaveGameAction::List)
        );
        assert!(parse("savegame load").is_err());
        assert!(parse("savegame drop").is_err());
    }

    #[test]
    fn player_set_validates_category() {
        assert_eq!(
            record("player set Alice admin"),
            CommandRecord::Player(PlayerAction::Set {
                player: "Alice".to_string(),
                category: PlayerCategory::Admin,
            })
        );
        assert!(parse("player set Alice owner").is_err());
        assert!(parse("player set Alice pending").is_err());
        assert!(parse("player set Alice vip").is_err());
        assert_eq!(
            record("player get Alice"),
            CommandRecord::Player(PlayerAction::Get {
                player: "Alice".to_string()
            })
        );
    }

    #[test]
    fn help_is_answered_in_the_parser() {
        match parse("help").unwrap() {
            ParseOutcome::Help(text) => assert!(text.contains("shutdown")),
            other => panic!("expected help, got {other:?}"),
        }
        match parse("help savegame load").unwrap() {
            ParseOutcome::Help(text) => assert!(text.contains("savegame load <name>")),
            other => panic!("expected help, got {other:?}"),
        }
        assert!(parse("help bogus").is_err());
        assert!(parse("help savegame bogus").is_err());
    }

    #[test]
    fn command_keeps_original_line_for_event_logging() {
        match parse("whitelist   enable").unwrap() {
            ParseOutcome::Command { line, .. } => assert_eq!(line, "whitelist enable"),
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn unknown_command_is_a_diagnostic() {
        let err = parse("frobnicate").unwrap_err();
        assert!(err.contains("Unknown command"));
        assert!(err.contains("help"));
    }
}
