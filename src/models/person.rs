// src/models/person.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Action;
use crate::models::anticheat::Detection;
use crate::steamid::SteamId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Person {
    pub steam_id: SteamId,
    pub personaname: String,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRequest {
    pub source_id: Option<SteamId>,
    pub target_id: SteamId,
    /// None is permanent
    pub duration_secs: Option<u64>,
    pub reason: String,
    pub note: String,
    pub demo_name: String,
    pub demo_tick: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub ban_id: i64,
    pub target_id: SteamId,
    pub reason: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemoRecord {
    pub demo_id: i64,
    pub server_id: i32,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AnticheatTrigger {
        steam_id: SteamId,
        name: String,
        server_id: i32,
        detection: Detection,
        action: Action,
        count: u32,
        summary: String,
    },
}
