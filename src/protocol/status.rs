// src/protocol/status.rs
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

use crate::models::server::Player;
use crate::steamid::SteamId;

lazy_static! {
    static ref HOSTNAME_RX: Regex = Regex::new(r"^hostname\s*:\s*(.+?)\s*$").unwrap();
    static ref VERSION_RX: Regex = Regex::new(r"^version\s*:\s*(\S+)").unwrap();
    static ref MAP_RX: Regex = Regex::new(r"^map\s*:\s*(\S+)").unwrap();
    static ref TAGS_RX: Regex = Regex::new(r"^tags\s*:\s*(.*?)\s*$").unwrap();
    static ref PLAYERS_RX: Regex =
        Regex::new(r"^players\s*:\s*(\d+)\s+humans,\s+(\d+)\s+bots\s+\((\d+)\s+max").unwrap();
    static ref PLAYERS_LEGACY_RX: Regex = Regex::new(r"^players\s*:\s*(\d+)\s+\((\d+)\s+max").unwrap();
    static ref PLAYER_ROW_RX: Regex = Regex::new(
        r#"^#\s+(\d+)\s+"(.*)"\s+(\[U:\d:\d+\])\s+(\d+:\d+(?::\d+)?)\s+(\d+)\s+(\d+)\s+(\w+)\s+(?:\d+\s+)?(\S+)\s*$"#
    )
    .unwrap();
    static ref VISIBLE_MAX_RX: Regex = Regex::new(r#"^"sv_visiblemaxplayers" = "(-?\d{1,3})""#).unwrap();
}

/// Highest sv_visiblemaxplayers value taken at face value.
pub const MAX_PLAYERS_SUPPORTED: i32 = 101;

#[derive(Debug, Error, PartialEq)]
pub enum StatusError {
    #[error("failed to parse status response: {0}")]
    Parse(String),
}

/// Parsed output of the console `status` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub hostname: String,
    pub version: String,
    pub map: String,
    pub tags: Vec<String>,
    pub humans: i32,
    pub bots: i32,
    pub max_players: i32,
    pub players: Vec<Player>,
}

pub fn parse_status(text: &str) -> Result<Status, StatusError> {
    let mut status = Status::default();
    let mut saw_header = false;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');

        if let Some(caps) = PLAYER_ROW_RX.captures(line) {
            if let Some(player) = parse_player_row(&caps) {
                status.players.push(player);
            }
            continue;
        }
        if let Some(caps) = HOSTNAME_RX.captures(line) {
            status.hostname = caps[1].to_string();
            saw_header = true;
        } else if let Some(caps) = VERSION_RX.captures(line) {
            status.version = caps[1].to_string();
        } else if let Some(caps) = MAP_RX.captures(line) {
            status.map = caps[1].to_string();
        } else if let Some(caps) = TAGS_RX.captures(line) {
            status.tags = caps[1]
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        } else if let Some(caps) = PLAYERS_RX.captures(line) {
            status.humans = caps[1].parse().unwrap_or_default();
            status.bots = caps[2].parse().unwrap_or_default();
            status.max_players = caps[3].parse().unwrap_or_default();
            saw_header = true;
        } else if let Some(caps) = PLAYERS_LEGACY_RX.captures(line) {
            status.humans = caps[1].parse().unwrap_or_default();
            status.max_players = caps[2].parse().unwrap_or_default();
            saw_header = true;
        }
    }

    if !saw_header {
        return Err(StatusError::Parse("no hostname or players line".to_string()));
    }

    // An odd slot count means SourceTV occupies one slot as a bot
    if status.max_players % 2 != 0 {
        status.max_players -= 1;
        status.bots = (status.bots - 1).max(0);
    }

    Ok(status)
}

fn parse_player_row(caps: &regex::Captures<'_>) -> Option<Player> {
    let steam_id: SteamId = caps[3].parse().ok()?;
    let adr = &caps[8];
    let ip = adr
        .parse::<SocketAddr>()
        .map(|a| a.ip())
        .or_else(|_| adr.parse::<IpAddr>())
        .ok();

    Some(Player {
        user_id: caps[1].parse().ok()?,
        name: caps[2].to_string(),
        steam_id,
        ip,
        connected: caps[4].to_string(),
        ping: caps[5].parse().unwrap_or_default(),
        loss: caps[6].parse().unwrap_or_default(),
        state: caps[7].to_string(),
    })
}

/// Reads the `sv_visiblemaxplayers` cvar reply; None when unset or out of range.
pub fn parse_visible_max(text: &str) -> Option<i32> {
    let caps = VISIBLE_MAX_RX.captures(text.trim_start())?;
    let value: i32 = caps[1].parse().ok()?;
    if (0..=MAX_PLAYERS_SUPPORTED).contains(&value) {
        Some(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"hostname: Uncletopia | Seattle | 1 | All Maps
version : 8604597/24 8604597 secure
udp/ip  : 0.0.0.0:27015  (public ip: 23.239.22.163)
steamid : [G:1:4158494] (85568392924198686)
account : not logged in  (No account specified)
map     : pl_badwater at: 0 x, 0 y, 0 z
tags    : nocrits,nodmgspread,payload
sourcetv:  0.0.0.0:27016, delay 90.0s  (local: 0.0.0.0:27016)
players : 2 humans, 1 bots (25 max)
edicts  : 1024 used of 2048 max
# userid name                uniqueid            connected ping loss state  adr
#      2 "Uncletopia TV"     BOT                                     active
#    280 "JSN_"              [U:1:118258373]     11:20       67    0 active 10.0.0.5:27005
#    281 "two words here"    [U:1:247502420]     1:02:03     90    2 spawning 192.168.1.20:27005
"#;

    #[test]
    fn parses_header_and_players() {
        let status = parse_status(STATUS).unwrap();
        assert_eq!(status.hostname, "Uncletopia | Seattle | 1 | All Maps");
        assert_eq!(status.map, "pl_badwater");
        assert_eq!(status.version, "8604597/24");
        assert_eq!(status.tags, vec!["nocrits", "nodmgspread", "payload"]);
        assert_eq!(status.humans, 2);
        // SourceTV correction
        assert_eq!(status.bots, 0);
        assert_eq!(status.max_players, 24);

        assert_eq!(status.players.len(), 2);
        let first = &status.players[0];
        assert_eq!(first.user_id, 280);
        assert_eq!(first.name, "JSN_");
        assert_eq!(first.steam_id.steam2(), "STEAM_0:1:59129186");
        assert_eq!(first.ip, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(status.players[1].name, "two words here");
        assert_eq!(status.players[1].state, "spawning");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_status("Unknown command \"status\"").is_err());
    }

    #[test]
    fn visible_max_players() {
        assert_eq!(parse_visible_max("\"sv_visiblemaxplayers\" = \"24\" ( def. \"-1\" )"), Some(24));
        assert_eq!(parse_visible_max("\"sv_visiblemaxplayers\" = \"-1\" ( def. \"-1\" )"), None);
        assert_eq!(parse_visible_max("\"sv_visiblemaxplayers\" = \"200\""), None);
        assert_eq!(parse_visible_max("nope"), None);
    }
}
