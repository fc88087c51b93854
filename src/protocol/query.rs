// src/protocol/query.rs
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Cursor};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;

use super::QueryClient;

const SINGLE_PACKET: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = 0x54;
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";

// Extra data flags
const EDF_PORT: u8 = 0x80;
const EDF_STEAMID: u8 = 0x10;
const EDF_SOURCETV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAMEID: u8 = 0x01;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query socket error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out querying {0}")]
    Timeout(String),
    #[error("invalid query response: {0}")]
    Protocol(String),
}

/// Decoded A2S_INFO response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub server_type: char,
    pub environment: char,
    pub password: bool,
    pub vac: bool,
    pub version: String,
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub stv_port: Option<u16>,
    pub stv_name: Option<String>,
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

pub fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(29);
    packet.extend_from_slice(&SINGLE_PACKET);
    packet.push(A2S_INFO);
    packet.extend_from_slice(INFO_PAYLOAD);
    if let Some(challenge) = challenge {
        packet.extend_from_slice(&challenge);
    }
    packet
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Result<String, QueryError> {
    let mut buf = Vec::new();
    cursor.read_until(0, &mut buf)?;
    if buf.pop() != Some(0) {
        return Err(QueryError::Protocol("unterminated string".to_string()));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_bool(cursor: &mut Cursor<&[u8]>) -> Result<bool, QueryError> {
    Ok(cursor.read_u8()? != 0)
}

/// Extracts the challenge number when the server answered with S2C_CHALLENGE.
pub fn parse_challenge(packet: &[u8]) -> Option<[u8; 4]> {
    if packet.len() >= 9 && packet[..4] == SINGLE_PACKET && packet[4] == S2C_CHALLENGE {
        let mut challenge = [0u8; 4];
        challenge.copy_from_slice(&packet[5..9]);
        return Some(challenge);
    }
    None
}

pub fn parse_info(packet: &[u8]) -> Result<ServerInfo, QueryError> {
    if packet.len() < 6 || packet[..4] != SINGLE_PACKET {
        return Err(QueryError::Protocol("missing single packet header".to_string()));
    }
    if packet[4] != S2A_INFO {
        return Err(QueryError::Protocol(format!("unexpected response type 0x{:02X}", packet[4])));
    }

    let mut cursor = Cursor::new(&packet[5..]);
    let mut info = ServerInfo {
        protocol: cursor.read_u8()?,
        name: read_cstring(&mut cursor)?,
        map: read_cstring(&mut cursor)?,
        folder: read_cstring(&mut cursor)?,
        game: read_cstring(&mut cursor)?,
        app_id: cursor.read_u16::<LittleEndian>()?,
        players: cursor.read_u8()?,
        max_players: cursor.read_u8()?,
        bots: cursor.read_u8()?,
        server_type: cursor.read_u8()? as char,
        environment: cursor.read_u8()? as char,
        password: read_bool(&mut cursor)?,
        vac: read_bool(&mut cursor)?,
        version: read_cstring(&mut cursor)?,
        ..ServerInfo::default()
    };

    // Extra data is optional, older servers end here
    let edf = match cursor.read_u8() {
        Ok(edf) => edf,
        Err(_) => return Ok(info),
    };
    if edf & EDF_PORT != 0 {
        info.port = Some(cursor.read_u16::<LittleEndian>()?);
    }
    if edf & EDF_STEAMID != 0 {
        info.steam_id = Some(cursor.read_u64::<LittleEndian>()?);
    }
    if edf & EDF_SOURCETV != 0 {
        info.stv_port = Some(cursor.read_u16::<LittleEndian>()?);
        info.stv_name = Some(read_cstring(&mut cursor)?);
    }
    if edf & EDF_KEYWORDS != 0 {
        info.keywords = Some(read_cstring(&mut cursor)?);
    }
    if edf & EDF_GAMEID != 0 {
        info.game_id = Some(cursor.read_u64::<LittleEndian>()?);
    }

    Ok(info)
}

#[derive(Debug, Default, Clone)]
pub struct A2sClient;

impl A2sClient {
    pub fn new() -> Self {
        Self
    }

    async fn query(&self, addr: &str) -> Result<ServerInfo, QueryError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        socket.send(&info_request(None)).await?;

        let mut buffer = [0u8; 1400];
        let len = socket.recv(&mut buffer).await?;

        if let Some(challenge) = parse_challenge(&buffer[..len]) {
            debug!("Got A2S challenge from {}, retrying", addr);
            socket.send(&info_request(Some(challenge))).await?;
            let len = socket.recv(&mut buffer).await?;
            return parse_info(&buffer[..len]);
        }

        parse_info(&buffer[..len])
    }
}

#[async_trait]
impl QueryClient for A2sClient {
    async fn info(&self, addr: &str, timeout: Duration) -> Result<ServerInfo, QueryError> {
        match tokio::time::timeout(timeout, self.query(addr)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(addr.to_string())),
        }
    }
}
