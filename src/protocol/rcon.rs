// src/protocol/rcon.rs
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use rand::Rng;
use std::io::{self, Cursor};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use super::ConsoleClient;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

// id + type + two terminating nulls
const HEADER_SIZE: i32 = 10;
const MAX_PACKET_SIZE: i32 = 1 << 16;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("authentication rejected by {0}")]
    Auth(String),
    #[error("timed out talking to {0}")]
    Timeout(String),
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed packet: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self { id, kind, body: body.into() }
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let body = self.body.as_bytes();
        let size = body.len() as i32 + HEADER_SIZE;
        let mut buf = Vec::with_capacity(size as usize + 4);
        buf.write_i32::<LittleEndian>(size)?;
        buf.write_i32::<LittleEndian>(self.id)?;
        buf.write_i32::<LittleEndian>(self.kind)?;
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, RconError> {
        if payload.len() < HEADER_SIZE as usize {
            return Err(RconError::Protocol(format!("packet too short: {} bytes", payload.len())));
        }
        let mut cursor = Cursor::new(payload);
        let id = cursor.read_i32::<LittleEndian>()?;
        let kind = cursor.read_i32::<LittleEndian>()?;
        let body = &payload[8..payload.len() - 2];
        Ok(Self {
            id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

pub async fn read_packet(stream: &mut TcpStream) -> Result<Packet, RconError> {
    // Kept local: byteorder's ReadBytesExt also applies to Cursor<&[u8]>
    use tokio::io::AsyncReadExt;

    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await?;
    let size = LittleEndian::read_i32(&size_buf);
    if !(HEADER_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(RconError::Protocol(format!("invalid packet size {}", size)));
    }

    let mut payload = vec![0u8; size as usize];
    stream.read_exact(&mut payload).await?;
    Packet::decode(&payload)
}

pub async fn write_packet(stream: &mut TcpStream, packet: &Packet) -> Result<(), RconError> {
    use tokio::io::AsyncWriteExt;

    stream.write_all(&packet.encode()?).await?;
    Ok(())
}

/// An authenticated console session with one server.
pub struct RconConnection {
    stream: TcpStream,
    addr: String,
    next_id: i32,
}

impl RconConnection {
    pub async fn dial(addr: &str, password: &str) -> Result<Self, RconError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RconError::Connect { addr: addr.to_string(), source })?;

        let mut conn = Self {
            stream,
            addr: addr.to_string(),
            next_id: rand::thread_rng().gen_range(1..i32::MAX / 2),
        };
        conn.authenticate(password).await?;
        Ok(conn)
    }

    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let id = self.take_id();
        write_packet(&mut self.stream, &Packet::new(id, SERVERDATA_AUTH, password)).await?;

        loop {
            let packet = read_packet(&mut self.stream).await?;
            // srcds sends an empty RESPONSE_VALUE ahead of the auth result
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(RconError::Auth(self.addr.clone()));
            }
            if packet.id == id {
                debug!("Authenticated rcon session with {}", self.addr);
                return Ok(());
            }
        }
    }

    /// Runs one command and collects every response fragment.
    ///
    /// An empty RESPONSE_VALUE is sent after the command; the server mirrors
    /// it only after the full command output, which marks the end of a
    /// multi-packet response.
    pub async fn exec(&mut self, cmd: &str) -> Result<String, RconError> {
        let cmd_id = self.take_id();
        let marker_id = self.take_id();

        write_packet(&mut self.stream, &Packet::new(cmd_id, SERVERDATA_EXECCOMMAND, cmd)).await?;
        write_packet(&mut self.stream, &Packet::new(marker_id, SERVERDATA_RESPONSE_VALUE, "")).await?;

        let mut response = String::new();
        loop {
            let packet = read_packet(&mut self.stream).await?;
            if packet.id == cmd_id {
                response.push_str(&packet.body);
            } else if packet.id == marker_id {
                return Ok(response);
            }
        }
    }
}

/// Console client that opens a fresh session for every call.
#[derive(Debug, Default, Clone)]
pub struct RconClient;

impl RconClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsoleClient for RconClient {
    async fn exec(&self, addr: &str, password: &str, cmd: &str, timeout: Duration) -> Result<String, RconError> {
        let call = async {
            let mut conn = RconConnection::dial(addr, password).await?;
            conn.exec(cmd).await
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RconError::Timeout(addr.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal srcds stand-in answering one session.
    async fn fake_server(password: &'static str, reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = read_packet(&mut stream).await.unwrap();
            assert_eq!(auth.kind, SERVERDATA_AUTH);
            write_packet(&mut stream, &Packet::new(auth.id, SERVERDATA_RESPONSE_VALUE, "")).await.unwrap();
            let result_id = if auth.body == password { auth.id } else { -1 };
            write_packet(&mut stream, &Packet::new(result_id, SERVERDATA_AUTH_RESPONSE, "")).await.unwrap();
            if result_id == -1 {
                return;
            }

            let cmd = read_packet(&mut stream).await.unwrap();
            let marker = read_packet(&mut stream).await.unwrap();
            // Split the reply to exercise multi-packet reassembly
            let (head, tail) = reply.split_at(reply.len() / 2);
            write_packet(&mut stream, &Packet::new(cmd.id, SERVERDATA_RESPONSE_VALUE, head)).await.unwrap();
            write_packet(&mut stream, &Packet::new(cmd.id, SERVERDATA_RESPONSE_VALUE, tail)).await.unwrap();
            write_packet(&mut stream, &Packet::new(marker.id, SERVERDATA_RESPONSE_VALUE, "")).await.unwrap();
        });

        addr
    }

    #[test]
    fn packet_encoding_matches_wire_layout() {
        let encoded = Packet::new(7, SERVERDATA_EXECCOMMAND, "status").encode().unwrap();
        assert_eq!(LittleEndian::read_i32(&encoded[0..4]), 16);
        assert_eq!(LittleEndian::read_i32(&encoded[4..8]), 7);
        assert_eq!(&encoded[12..18], b"status");
        assert_eq!(&encoded[18..], &[0, 0]);

        let decoded = Packet::decode(&encoded[4..]).unwrap();
        assert_eq!(decoded.body, "status");
    }

    #[tokio::test]
    async fn exec_reassembles_split_responses() {
        let addr = fake_server("hunter2", "hostname: test server\nmap     : pl_upward").await;
        let resp = RconClient::new()
            .exec(&addr, "hunter2", "status", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp, "hostname: test server\nmap     : pl_upward");
    }

    #[tokio::test]
    async fn bad_password_is_an_auth_error() {
        let addr = fake_server("hunter2", "").await;
        let err = RconClient::new()
            .exec(&addr, "wrong", "status", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RconError::Auth(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = RconClient::new()
            .exec(&addr, "x", "status", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RconError::Connect { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = RconClient::new()
            .exec(&addr, "x", "status", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RconError::Timeout(_)), "got {err:?}");
    }
}
