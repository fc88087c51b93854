// src/anticheat/parser.rs
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::io::{self, BufRead, BufReader, Read};
use thiserror::Error;

use crate::models::anticheat::{Detection, StacEntry};
use crate::steamid::SteamId;

const SPLIT_MARKER: &str = "----------";

lazy_static! {
    static ref LOG_NAME_RX: Regex = Regex::new(r"^stac_(\d{2})(\d{2})(\d{2})\.log$").unwrap();
    static ref SUMMARY_RX: Regex = Regex::new(r"\[StAC\]\s+(.+?)\s*$").unwrap();
    static ref PLAYER_RX: Regex = Regex::new(
        r"Player: (?P<name>.+?)<(?P<pid>\d+)><(?P<sid>.+?)><(?P<team>Unassigned|Red|Blue|Spectator|unknown)?>"
    )
    .unwrap();
    static ref CACHED_RX: Regex = Regex::new(r"StAC cached SteamID: (.+?)\s*$").unwrap();
    static ref TIME_RX: Regex = Regex::new(r"^\s*<(\d{2}):(\d{2}):(\d{2})>").unwrap();
    static ref DEMO_RX: Regex = Regex::new(r"Demo file:.+?(\d+-\d+-.+?\.dem)\..+?Demo tick: (\d+)\s*$").unwrap();
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid stac log name {0:?}, expected stac_MMDDYY.log")]
    FileName(String),
    #[error("failed to read stac log: {0}")]
    Read(#[from] io::Error),
}

/// Substring signatures, checked in order.
const SIGNATURES: &[(&str, Detection)] = &[
    ("[StAC] SilentAim", Detection::SilentAim),
    ("[StAC] Aimsnap", Detection::AimSnap),
    ("[StAC] Too many connections", Detection::TooManyConn),
    ("interp exploitation", Detection::Interp),
    ("bhopped!", Detection::Bhop),
    ("[StAC] Cmdnum SPIKE", Detection::CmdnumSpike),
    ("invalid eye angles", Detection::EyeAngles),
    ("sent an invalid usercmd!", Detection::InvalidUserCmd),
    ("OOB cvar/netvar value", Detection::OobCvar),
    ("known cheat var/concommand", Detection::CheatCvar),
];

pub fn detection_of(line: &str) -> Detection {
    SIGNATURES
        .iter()
        .find(|(needle, _)| line.contains(needle))
        .map(|(_, detection)| *detection)
        .unwrap_or(Detection::Unknown)
}

/// Date carried by a `stac_MMDDYY.log` file name.
pub fn log_date(file_name: &str) -> Result<NaiveDate, ParseError> {
    let base = file_name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(file_name);
    let invalid = || ParseError::FileName(file_name.to_string());
    let caps = LOG_NAME_RX.captures(base).ok_or_else(invalid)?;

    let month: u32 = caps[1].parse().map_err(|_| invalid())?;
    let day: u32 = caps[2].parse().map_err(|_| invalid())?;
    let year: i32 = caps[3].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(2000 + year, month, day).ok_or_else(invalid)
}

fn parse_time(caps: &regex::Captures<'_>) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
}

/// Lines collected between two split markers.
#[derive(Default)]
struct Section {
    lines: Vec<String>,
    summary: Option<String>,
    detection: Option<Detection>,
    name: Option<String>,
    player_sid: Option<SteamId>,
    cached_sid: Option<SteamId>,
    demo_name: String,
    demo_tick: i32,
    time: Option<NaiveTime>,
}

impl Section {
    fn push(&mut self, line: &str) {
        if self.time.is_none() {
            self.time = TIME_RX.captures(line).and_then(|caps| parse_time(&caps));
        }

        if self.summary.is_none() && line.contains("[StAC] ") {
            if let Some(caps) = SUMMARY_RX.captures(line) {
                self.summary = Some(caps[1].to_string());
                self.detection = Some(detection_of(line));
            }
        }

        if self.name.is_none() {
            if let Some(caps) = PLAYER_RX.captures(line) {
                self.name = Some(caps["name"].to_string());
                self.player_sid = caps["sid"].trim().parse().ok();
            }
        }

        if let Some(caps) = CACHED_RX.captures(line) {
            self.cached_sid = caps[1].trim().parse().ok();
        }

        if let Some(caps) = DEMO_RX.captures(line) {
            self.demo_name = caps[1].to_string();
            match caps[2].parse() {
                Ok(tick) => self.demo_tick = tick,
                Err(_) => debug!("Invalid demo tick in line {:?}", line),
            }
        }

        if !line.trim().is_empty() {
            self.lines.push(line.to_string());
        }
    }

    fn finish(self, date: NaiveDate) -> Option<StacEntry> {
        if self.lines.is_empty() {
            return None;
        }
        let (Some(summary), Some(name)) = (self.summary, self.name) else {
            debug!("Skipping incomplete stac section: {:?}", self.lines.first());
            return None;
        };

        let steam_id = self.player_sid.or(self.cached_sid);
        if steam_id.is_none() {
            debug!("Stac entry for {} has no resolvable steam id", name);
        }
        let at = match self.time {
            Some(time) => date.and_time(time),
            None => date.and_hms_opt(0, 0, 0)?,
        };

        Some(StacEntry {
            anticheat_id: 0,
            steam_id,
            server_id: 0,
            demo_id: None,
            demo_name: self.demo_name,
            demo_tick: self.demo_tick,
            name,
            detection: self.detection.unwrap_or(Detection::Unknown),
            summary,
            raw_log: self.lines.join("\n"),
            created_on: Utc.from_utc_datetime(&at),
        })
    }
}

/// Splits a StAC log dump into detection entries.
///
/// Sections are separated by a line of ten dashes. A section needs both a
/// `[StAC]` summary and a `Player:` line to produce an entry; anything else is
/// skipped without affecting the rest of the file. Timestamps are the file's
/// date plus the first `<hh:mm:ss>` seen in the section.
#[derive(Debug, Default, Clone, Copy)]
pub struct StacParser;

impl StacParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse<R: Read>(&self, file_name: &str, reader: R) -> Result<Vec<StacEntry>, ParseError> {
        let date = log_date(file_name)?;
        let mut reader = BufReader::new(reader);
        let mut entries = Vec::new();
        let mut section = Section::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(&['\n', '\r'][..]);

            // StAC's startup warning about missing extensions
            if line.contains("hings will break") {
                continue;
            }
            if line.trim() == SPLIT_MARKER {
                entries.extend(std::mem::take(&mut section).finish(date));
                continue;
            }
            section.push(line);
        }
        entries.extend(section.finish(date));

        Ok(entries)
    }
}
