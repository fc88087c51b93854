// src/models/server.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::steamid::SteamId;

fn default_enabled() -> bool {
    true
}

/// A configured fleet member, as owned by the server registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub server_id: i32,
    pub tag: String,
    #[serde(default)]
    pub default_hostname: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub rcon_password: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub cc: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub reserved_slots: i32,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub user_id: i32,
    pub name: String,
    pub steam_id: SteamId,
    pub ip: Option<IpAddr>,
    pub connected: String,
    pub ping: i32,
    pub loss: i32,
    pub state: String,
}

/// Latest known live view of one server.
///
/// Configuration derived fields are refreshed every poll cycle. Live fields
/// keep their prior value when the protocol that feeds them fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerState {
    pub server_id: i32,
    pub name_short: String,
    pub name: String,
    pub host: String,
    // Distinct from host since steam:// links cannot use a fqdn
    pub ip: String,
    pub port: u16,
    pub enabled: bool,
    pub region: String,
    pub cc: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reserved_slots: i32,

    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub protocol: u8,
    pub version: String,
    pub vac: bool,
    pub password: bool,
    pub player_count: i32,
    pub humans: i32,
    pub max_players: i32,
    pub bots: i32,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub stv_port: u16,
    pub stv_name: String,
    pub players: Vec<Player>,

    /// Whether the most recent poll reached the console protocol.
    pub alive: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl ServerState {
    pub fn from_config(config: &ServerConfig, ip: String) -> Self {
        let mut state = Self {
            name: config.default_hostname.clone(),
            ip,
            ..Self::default()
        };
        state.apply_config(config);
        state
    }

    pub fn apply_config(&mut self, config: &ServerConfig) {
        self.server_id = config.server_id;
        self.name_short = config.tag.clone();
        if self.name.is_empty() {
            self.name = config.default_hostname.clone();
        }
        self.host = config.host.clone();
        self.port = config.port;
        self.enabled = config.enabled;
        self.region = config.region.clone();
        self.cc = config.cc.clone();
        self.latitude = config.latitude;
        self.longitude = config.longitude;
        self.reserved_slots = config.reserved_slots;
    }
}

/// A player located somewhere in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerServerInfo {
    pub player: Player,
    pub server_id: i32,
}

/// Out-of-band update pushed by a server between polls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialStateUpdate {
    #[serde(default)]
    pub hostname: String,
    pub current_map: String,
    pub players_real: i32,
    pub players_total: i32,
    pub players_visible: i32,
}
