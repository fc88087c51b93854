// src/models/anticheat.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::steamid::SteamId;

/// Kind of finding reported in a StAC log section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    Unknown,
    SilentAim,
    AimSnap,
    TooManyConn,
    Interp,
    Bhop,
    CmdnumSpike,
    EyeAngles,
    InvalidUserCmd,
    OobCvar,
    CheatCvar,
}

impl Detection {
    pub const ALL: [Detection; 11] = [
        Detection::Unknown,
        Detection::SilentAim,
        Detection::AimSnap,
        Detection::TooManyConn,
        Detection::Interp,
        Detection::Bhop,
        Detection::CmdnumSpike,
        Detection::EyeAngles,
        Detection::InvalidUserCmd,
        Detection::OobCvar,
        Detection::CheatCvar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Detection::Unknown => "unknown",
            Detection::SilentAim => "silent_aim",
            Detection::AimSnap => "aim_snap",
            Detection::TooManyConn => "too_many_conn",
            Detection::Interp => "interp",
            Detection::Bhop => "bhop",
            Detection::CmdnumSpike => "cmdnum_spike",
            Detection::EyeAngles => "eye_angles",
            Detection::InvalidUserCmd => "invalid_user_cmd",
            Detection::OobCvar => "oob_cvar",
            Detection::CheatCvar => "cheat_cvar",
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Detection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Detection::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown detection type: {}", s))
    }
}

/// One parsed anti-cheat detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StacEntry {
    pub anticheat_id: i64,
    pub steam_id: Option<SteamId>,
    pub server_id: i32,
    pub demo_id: Option<i64>,
    pub demo_name: String,
    pub demo_tick: i32,
    pub name: String,
    pub detection: Detection,
    pub summary: String,
    pub raw_log: String,
    pub created_on: DateTime<Utc>,
}
