//! Snapshots returned by the DS status queries and the poll-to-poll diff.
//!
//! The three snapshots of one poll cycle are captured back to back, so the
//! triple is internally consistent; the diff against the previous triple is
//! what produces join/leave/save events.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::rcon::PlayerCategory;

/// `DSServerStatistics` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerStatistics {
    pub build: Option<String>,
    pub owner_name: Option<String>,
    pub max_in_game_players: Option<u32>,
    pub players_known_to_game: Option<u32>,
    pub save_game_name: Option<String>,
    pub player_activity_timeout: Option<u32>,
    pub seconds_in_game: Option<u64>,
    pub server_name: Option<String>,
    #[serde(rename = "serverURL")]
    pub server_url: Option<String>,
    #[serde(rename = "averageFPS")]
    pub average_fps: Option<f64>,
    pub has_server_password: Option<bool>,
    pub is_enforcing_whitelist: Option<bool>,
    pub creative_mode: Option<bool>,
    pub is_achievement_progression_disabled: Option<bool>,
}

fn default_category() -> PlayerCategory {
    PlayerCategory::Unlisted
}

/// One entry of the `DSListPlayers` reply; lists every player known to the
/// active save, online or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_guid: String,
    #[serde(default = "default_category")]
    pub player_category: PlayerCategory,
    pub player_name: String,
    pub in_game: bool,
    pub index: i64,
}

impl Default for PlayerInfo {
    fn default() -> Self {
        Self {
            player_guid: String::new(),
            player_category: default_category(),
            player_name: String::new(),
            in_game: false,
            index: 0,
        }
    }
}

/// `DSListPlayers` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerList {
    pub player_info: Vec<PlayerInfo>,
}

impl PlayerList {
    pub fn online(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.player_info.iter().filter(|pi| pi.in_game)
    }

    /// Resolves a player by exact name or GUID.
    pub fn find(&self, who: &str) -> Option<&PlayerInfo> {
        self.player_info
            .iter()
            .find(|pi| pi.player_guid == who || pi.player_name == who)
    }
}

/// Timestamp format the DS uses for savegame dates.
pub const GAME_DATE_FORMAT: &str = "%Y.%m.%d-%H.%M.%S";

mod game_date {
    use super::{NaiveDateTime, GAME_DATE_FORMAT};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_str(&date.format(GAME_DATE_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|raw| {
            NaiveDateTime::parse_from_str(&raw, GAME_DATE_FORMAT).map_err(D::Error::custom)
        })
        .transpose()
    }
}

/// One savegame entry of the `DSListGames` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameInfo {
    pub name: String,
    #[serde(with = "game_date")]
    pub date: Option<NaiveDateTime>,
    #[serde(rename = "bHasBeenFlaggedAsCreativeModeSave")]
    pub creative: bool,
}

/// `DSListGames` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameList {
    pub active_save_name: Option<String>,
    pub game_list: Vec<GameInfo>,
}

impl GameList {
    /// The last-modified time of the active save, when both exist.
    pub fn active_save_time(&self) -> Option<NaiveDateTime> {
        let name = self.active_save_name.as_deref()?;
        if name.is_empty() {
            return None;
        }
        self.game_list
            .iter()
            .find(|gi| gi.name == name)
            .and_then(|gi| gi.date)
    }
}

/// One poll cycle's worth of DS state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub stats: ServerStatistics,
    pub players: PlayerList,
    pub games: GameList,
}

/// What changed between two consecutive successful polls, in emission
/// order: joins, leaves, then savegame changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEvent {
    PlayerJoined { name: String, guid: String },
    PlayerLeft { name: String, guid: String },
    SavegameChanged { name: String },
    Saved { name: String },
}

pub fn diff_events(prev: &Snapshot, next: &Snapshot) -> Vec<SnapshotEvent> {
    let mut events = Vec::new();

    let prev_online: HashSet<&str> = prev.players.online().map(|pi| pi.player_guid.as_str()).collect();
    let next_online: HashSet<&str> = next.players.online().map(|pi| pi.player_guid.as_str()).collect();

    for pi in next.players.online() {
        if !prev_online.contains(pi.player_guid.as_str()) {
            events.push(SnapshotEvent::PlayerJoined {
                name: pi.player_name.clone(),
                guid: pi.player_guid.clone(),
            });
        }
    }

    for pi in prev.players.online() {
        if !next_online.contains(pi.player_guid.as_str()) {
            // Prefer the fresh list for the name; offline players stay listed.
            let name = next
                .players
                .find(&pi.player_guid)
                .map(|found| found.player_name.clone())
                .unwrap_or_else(|| pi.player_name.clone());
            events.push(SnapshotEvent::PlayerLeft {
                name,
                guid: pi.player_guid.clone(),
            });
        }
    }

    let prev_save = prev.games.active_save_name.as_deref().unwrap_or("");
    let next_save = next.games.active_save_name.as_deref().unwrap_or("");
    if prev_save != next_save {
        events.push(SnapshotEvent::SavegameChanged {
            name: next_save.to_string(),
        });
    } else if prev.games.active_save_time() != next.games.active_save_time() {
        events.push(SnapshotEvent::Saved {
            name: next_save.to_string(),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(guid: &str, name: &str, in_game: bool) -> PlayerInfo {
        PlayerInfo {
            player_guid: guid.to_string(),
            player_name: name.to_string(),
            in_game,
            ..PlayerInfo::default()
        }
    }

    fn snapshot(players: Vec<PlayerInfo>, save: &str, date: &str) -> Snapshot {
        Snapshot {
            players: PlayerList {
                player_info: players,
            },
            games: GameList {
                active_save_name: Some(save.to_string()),
                game_list: vec![GameInfo {
                    name: save.to_string(),
                    date: NaiveDateTime::parse_from_str(date, GAME_DATE_FORMAT).ok(),
                    creative: false,
                }],
            },
            ..Snapshot::default()
        }
    }

    #[test]
    fn statistics_parse_from_ds_json() {
        let raw = r#"{
            "build": "1.27.101.0",
            "ownerName": "Owner",
            "maxInGamePlayers": 8,
            "playersKnownToGame": 3,
            "saveGameName": "SAVE_1",
            "secondsInGame": 120,
            "serverName": "My Server",
            "serverURL": "203.0.113.5:7777",
            "averageFPS": 29.7,
            "hasServerPassword": false,
            "isEnforcingWhitelist": true,
            "creativeMode": false
        }"#;
        let stats: ServerStatistics = serde_json::from_str(raw).unwrap();
        assert_eq!(stats.build.as_deref(), Some("1.27.101.0"));
        assert_eq!(stats.server_url.as_deref(), Some("203.0.113.5:7777"));
        assert_eq!(stats.is_enforcing_whitelist, Some(true));
        assert!(stats.average_fps.unwrap() > 29.0);
    }

    #[test]
    fn player_list_parses_categories() {
        let raw = r#"{"playerInfo": [
            {"playerGuid": "g1", "playerCategory": "Admin", "playerName": "Alice", "inGame": true, "index": 0},
            {"playerGuid": "g2", "playerCategory": "Unlisted", "playerName": "Bob", "inGame": false, "index": 1}
        ]}"#;
        let list: PlayerList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.player_info.len(), 2);
        assert_eq!(list.player_info[0].player_category, PlayerCategory::Admin);
        assert_eq!(list.online().count(), 1);
        assert_eq!(list.find("Bob").unwrap().player_guid, "g2");
    }

    #[test]
    fn game_list_parses_dates() {
        let raw = r#"{"activeSaveName": "SAVE_1", "gameList": [
            {"name": "SAVE_1", "date": "2024.03.01-12.30.45", "bHasBeenFlaggedAsCreativeModeSave": false}
        ]}"#;
        let games: GameList = serde_json::from_str(raw).unwrap();
        let time = games.active_save_time().unwrap();
        assert_eq!(time.format(GAME_DATE_FORMAT).to_string(), "2024.03.01-12.30.45");
    }

    #[test]
    fn join_and_leave_cycle_emits_one_event_each() {
        // Polls: {g1,g2} -> {g1,g2,g3} -> {g1,g3}
        let n0 = snapshot(
            vec![player("g1", "A", true), player("g2", "B", true)],
            "SAVE_1",
            "2024.03.01-12.00.00",
        );
        let n1 = snapshot(
            vec![
                player("g1", "A", true),
                player("g2", "B", true),
                player("g3", "C", true),
            ],
            "SAVE_1",
            "2024.03.01-12.00.00",
        );
        let n2 = snapshot(
            vec![
                player("g1", "A", true),
                player("g2", "B", false),
                player("g3", "C", true),
            ],
            "SAVE_1",
            "2024.03.01-12.00.00",
        );

        assert_eq!(
            diff_events(&n0, &n1),
            vec![SnapshotEvent::PlayerJoined {
                name: "C".to_string(),
                guid: "g3".to_string()
            }]
        );
        assert_eq!(
            diff_events(&n1, &n2),
            vec![SnapshotEvent::PlayerLeft {
                name: "B".to_string(),
                guid: "g2".to_string()
            }]
        );
        assert!(diff_events(&n2, &n2.clone()).is_empty());
    }

    #[test]
    fn simultaneous_swap_emits_both_events() {
        let before = snapshot(vec![player("g1", "A", true)], "S", "2024.03.01-12.00.00");
        let after = snapshot(vec![player("g2", "B", true)], "S", "2024.03.01-12.00.00");
        let events = diff_events(&before, &after);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SnapshotEvent::PlayerJoined { guid, .. } if guid == "g2"));
        assert!(matches!(&events[1], SnapshotEvent::PlayerLeft { guid, .. } if guid == "g1"));
    }

    #[test]
    fn save_date_advance_emits_exactly_one_save_event() {
        let before = snapshot(vec![], "SAVE_1", "2024.03.01-12.00.00");
        let after = snapshot(vec![], "SAVE_1", "2024.03.01-12.15.00");
        assert_eq!(
            diff_events(&before, &after),
            vec![SnapshotEvent::Saved {
                name: "SAVE_1".to_string()
            }]
        );
    }

    #[test]
    fn savegame_change_beats_save_event() {
        let before = snapshot(vec![], "SAVE_1", "2024.03.01-12.00.00");
        let after = snapshot(vec![], "SAVE_2", "2024.03.01-12.15.00");
        assert_eq!(
            diff_events(&before, &after),
            vec![SnapshotEvent::SavegameChanged {
                name: "SAVE_2".to_string()
            }]
        );
    }
}
