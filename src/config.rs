use governor::Quota;
use ipnetwork::IpNetwork;
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use crate::models::anticheat::Detection;

/// Response taken once a player crosses a detection threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Kick,
    Mute,
    Ban,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kick" => Ok(Action::Kick),
            "mute" | "gag" | "silence" => Ok(Action::Mute),
            "ban" => Ok(Action::Ban),
            other => Err(format!("unknown anticheat action: {}", other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Kick => f.write_str("kick"),
            Action::Mute => f.write_str("mute"),
            Action::Ban => f.write_str("ban"),
        }
    }
}

/// Which counters are cleared when an action fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    /// Only the (steam id, detection) counter that crossed its threshold.
    Detection,
    /// Every counter held for the player.
    Player,
}

impl FromStr for ResetScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detection" => Ok(ResetScope::Detection),
            "player" => Ok(ResetScope::Player),
            other => Err(format!("unknown reset scope: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnticheatConfig {
    pub action: Action,
    pub duration_secs: u64,
    pub window_secs: u64,
    pub reset_scope: ResetScope,
    pub owner: String,

    // Thresholds per detection type, 0 disables the type
    pub max_silent_aim: u32,
    pub max_aim_snap: u32,
    pub max_bhop: u32,
    pub max_cmdnum: u32,
    pub max_eye_angles: u32,
    pub max_invalid_user_cmd: u32,
    pub max_oob_cvar: u32,
    pub max_cheat_cvar: u32,
    pub max_too_many_conn: u32,
    pub max_interp: u32,
}

impl Default for AnticheatConfig {
    fn default() -> Self {
        Self {
            action: Action::Ban,
            duration_secs: 0,
            window_secs: 3600,
            reset_scope: ResetScope::Detection,
            owner: String::new(),
            max_silent_aim: 10,
            max_aim_snap: 20,
            max_bhop: 10,
            max_cmdnum: 20,
            max_eye_angles: 10,
            max_invalid_user_cmd: 5,
            max_oob_cvar: 1,
            max_cheat_cvar: 1,
            max_too_many_conn: 0,
            max_interp: 0,
        }
    }
}

impl AnticheatConfig {
    pub fn threshold(&self, detection: Detection) -> u32 {
        match detection {
            Detection::SilentAim => self.max_silent_aim,
            Detection::AimSnap => self.max_aim_snap,
            Detection::Bhop => self.max_bhop,
            Detection::CmdnumSpike => self.max_cmdnum,
            Detection::EyeAngles => self.max_eye_angles,
            Detection::InvalidUserCmd => self.max_invalid_user_cmd,
            Detection::OobCvar => self.max_oob_cvar,
            Detection::CheatCvar => self.max_cheat_cvar,
            Detection::TooManyConn => self.max_too_many_conn,
            Detection::Interp => self.max_interp,
            Detection::Unknown => 0,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        clamped_seconds(self.window_secs)
    }

    pub fn ban_duration(&self) -> Option<u64> {
        if self.duration_secs > 0 {
            Some(self.duration_secs)
        } else {
            None
        }
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            action: var("ANTICHEAT_ACTION", defaults.action),
            duration_secs: var("ANTICHEAT_DURATION_SECS", defaults.duration_secs),
            window_secs: var("ANTICHEAT_WINDOW_SECS", defaults.window_secs),
            reset_scope: var("ANTICHEAT_RESET_SCOPE", defaults.reset_scope),
            owner: env::var("ANTICHEAT_OWNER").unwrap_or_default(),
            max_silent_aim: var("ANTICHEAT_MAX_SILENT_AIM", defaults.max_silent_aim),
            max_aim_snap: var("ANTICHEAT_MAX_AIM_SNAP", defaults.max_aim_snap),
            max_bhop: var("ANTICHEAT_MAX_BHOP", defaults.max_bhop),
            max_cmdnum: var("ANTICHEAT_MAX_CMDNUM", defaults.max_cmdnum),
            max_eye_angles: var("ANTICHEAT_MAX_EYE_ANGLES", defaults.max_eye_angles),
            max_invalid_user_cmd: var("ANTICHEAT_MAX_INVALID_USER_CMD", defaults.max_invalid_user_cmd),
            max_oob_cvar: var("ANTICHEAT_MAX_OOB_CVAR", defaults.max_oob_cvar),
            max_cheat_cvar: var("ANTICHEAT_MAX_CHEAT_CVAR", defaults.max_cheat_cvar),
            max_too_many_conn: var("ANTICHEAT_MAX_TOO_MANY_CONN", defaults.max_too_many_conn),
            max_interp: var("ANTICHEAT_MAX_INTERP", defaults.max_interp),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub servers_file: String,

    // Fleet polling
    pub status_update_secs: u64,
    pub status_timeout_secs: u64,
    pub exec_timeout_secs: u64,
    pub log_addresses: Vec<String>,

    pub anticheat: AnticheatConfig,
    pub demo_sync_secs: u64,
    pub demo_sync_limit: usize,

    pub blocklist_urls: Vec<String>,
    pub blocklist_sync_secs: u64,
    pub blocklist_kick: bool,

    // Rate limiting configs
    pub upload_period_secs: u64,
    pub upload_burst_limit: u32,
    // Peers allowed to set X-Forwarded-For
    pub trusted_proxies: Vec<IpNetwork>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 6006,
            servers_file: "servers.json".to_string(),
            status_update_secs: 60,
            status_timeout_secs: 10,
            exec_timeout_secs: 10,
            log_addresses: Vec::new(),
            anticheat: AnticheatConfig::default(),
            demo_sync_secs: 300,
            demo_sync_limit: 100,
            blocklist_urls: Vec::new(),
            blocklist_sync_secs: 3600,
            blocklist_kick: false,
            upload_period_secs: 5,
            upload_burst_limit: 10,
            trusted_proxies: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: var("PORT", defaults.port),
            servers_file: env::var("SERVERS_FILE").unwrap_or(defaults.servers_file),

            status_update_secs: var("STATUS_UPDATE_SECS", defaults.status_update_secs),
            status_timeout_secs: var("STATUS_TIMEOUT_SECS", defaults.status_timeout_secs),
            exec_timeout_secs: var("EXEC_TIMEOUT_SECS", defaults.exec_timeout_secs),
            log_addresses: list("LOG_ADDRESSES"),

            anticheat: AnticheatConfig::from_env(),
            demo_sync_secs: var("DEMO_SYNC_SECS", defaults.demo_sync_secs),
            demo_sync_limit: var("DEMO_SYNC_LIMIT", defaults.demo_sync_limit),

            blocklist_urls: list("BLOCKLIST_URLS"),
            blocklist_sync_secs: var("BLOCKLIST_SYNC_SECS", defaults.blocklist_sync_secs),
            blocklist_kick: var("BLOCKLIST_KICK", defaults.blocklist_kick),

            upload_period_secs: var("UPLOAD_PERIOD_SECS", defaults.upload_period_secs),
            upload_burst_limit: var("UPLOAD_BURST_LIMIT", defaults.upload_burst_limit),
            trusted_proxies: networks(&list("TRUSTED_PROXIES")),
        }
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn status_update_interval(&self) -> Duration {
        Duration::from_secs(self.status_update_secs.max(1))
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs.max(1))
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs.max(1))
    }

    pub fn upload_quota(&self) -> Quota {
        let period = Duration::from_secs(self.upload_period_secs.max(1));
        let burst = NonZeroU32::new(self.upload_burst_limit).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

fn var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// `secs` as a chrono duration, saturating at the largest span chrono accepts.
pub fn clamped_seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

fn networks(raw: &[String]) -> Vec<IpNetwork> {
    raw.iter()
        .filter_map(|entry| match entry.parse::<IpNetwork>() {
            Ok(net) => Some(net),
            Err(e) => {
                warn!("Ignoring trusted proxy {:?}: {}", entry, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_aliases() {
        assert_eq!("KICK".parse::<Action>(), Ok(Action::Kick));
        assert_eq!("gag".parse::<Action>(), Ok(Action::Mute));
        assert!("explode".parse::<Action>().is_err());
    }

    #[test]
    fn unknown_detection_is_never_actioned() {
        let conf = AnticheatConfig::default();
        assert_eq!(conf.threshold(Detection::Unknown), 0);
        assert!(conf.threshold(Detection::CheatCvar) > 0);
    }

    #[test]
    fn zero_duration_is_permanent() {
        let conf = AnticheatConfig::default();
        assert_eq!(conf.ban_duration(), None);
        let timed = AnticheatConfig { duration_secs: 60, ..AnticheatConfig::default() };
        assert_eq!(timed.ban_duration(), Some(60));
    }

    #[test]
    fn huge_window_saturates() {
        let conf = AnticheatConfig { window_secs: u64::MAX, ..AnticheatConfig::default() };
        assert_eq!(conf.window(), chrono::Duration::MAX);
        assert_eq!(clamped_seconds(90), chrono::Duration::seconds(90));
    }

    #[test]
    fn trusted_proxies_skip_bad_entries() {
        let parsed = networks(&["10.0.0.0/8".to_string(), "nope".to_string(), "127.0.0.1".to_string()]);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].contains("10.1.2.3".parse().unwrap()));
    }
}
