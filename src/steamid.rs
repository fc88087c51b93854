// src/steamid.rs
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 64-bit id of account 0 in the public universe for individual accounts.
const BASE_ID: u64 = 76561197960265728;

lazy_static! {
    static ref STEAM2_RX: Regex = Regex::new(r"^STEAM_[0-5]:([01]):(\d+)$").unwrap();
    static ref STEAM3_RX: Regex = Regex::new(r"^\[U:1:(\d+)\]$").unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid steam id: {0:?}")]
pub struct InvalidSteamId(pub String);

/// Canonical identity of an individual steam account, stored as its 64-bit form.
///
/// Accepts the three textual forms the game servers emit: steam2
/// (`STEAM_0:1:59129186`), steam3 (`[U:1:118258373]`) and the raw 64-bit
/// number. Placeholders such as `STEAM_ID_PENDING`, `BOT` or garbage are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SteamId(u64);

impl SteamId {
    pub fn from_account_id(account_id: u32) -> Option<Self> {
        if account_id == 0 {
            return None;
        }
        Some(Self(BASE_ID + account_id as u64))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn account_id(&self) -> u32 {
        (self.0 - BASE_ID) as u32
    }

    pub fn steam2(&self) -> String {
        let account = self.account_id();
        format!("STEAM_0:{}:{}", account & 1, account >> 1)
    }

    pub fn steam3(&self) -> String {
        format!("[U:1:{}]", self.account_id())
    }
}

impl FromStr for SteamId {
    type Err = InvalidSteamId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || InvalidSteamId(trimmed.to_string());

        if let Some(caps) = STEAM3_RX.captures(trimmed) {
            let account: u32 = caps[1].parse().map_err(|_| invalid())?;
            return Self::from_account_id(account).ok_or_else(invalid);
        }

        if let Some(caps) = STEAM2_RX.captures(trimmed) {
            let low: u32 = caps[1].parse().map_err(|_| invalid())?;
            let high: u32 = caps[2].parse().map_err(|_| invalid())?;
            let account = high
                .checked_mul(2)
                .and_then(|v| v.checked_add(low))
                .ok_or_else(invalid)?;
            return Self::from_account_id(account).ok_or_else(invalid);
        }

        let raw: u64 = trimmed.parse().map_err(|_| invalid())?;
        if raw <= BASE_ID || raw - BASE_ID > u32::MAX as u64 {
            return Err(invalid());
        }
        Ok(Self(raw))
    }
}

impl TryFrom<String> for SteamId {
    type Error = InvalidSteamId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SteamId> for String {
    fn from(value: SteamId) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms_to_the_same_account() {
        let from3: SteamId = "[U:1:118258373]".parse().unwrap();
        let from2: SteamId = "STEAM_0:1:59129186".parse().unwrap();
        let from64: SteamId = "76561198078524101".parse().unwrap();

        assert_eq!(from3, from2);
        assert_eq!(from2, from64);
        assert_eq!(from3.steam2(), "STEAM_0:1:59129186");
        assert_eq!(from2.steam3(), "[U:1:118258373]");
    }

    #[test]
    fn rejects_placeholders() {
        for raw in ["STEAM_ID_PENDING", "XXXX", "BOT", "", "[U:1:0]", "12"] {
            assert!(raw.parse::<SteamId>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn rejects_out_of_range_accounts() {
        for raw in [
            "STEAM_0:0:18446744073709551615",
            "STEAM_0:1:2147483648",
            "[U:1:4294967296]",
            "99999999999999999999",
        ] {
            assert!(raw.parse::<SteamId>().is_err(), "{raw} should not parse");
        }
        let top: SteamId = "STEAM_0:1:2147483647".parse().unwrap();
        assert_eq!(top.account_id(), u32::MAX);
    }

    #[test]
    fn serializes_as_string() {
        let sid: SteamId = "STEAM_0:0:123751210".parse().unwrap();
        let json = serde_json::to_string(&sid).unwrap();
        assert_eq!(json, "\"76561198207768148\"");
        let back: SteamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sid);
    }
}
