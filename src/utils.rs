// src/utils.rs
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use ipnetwork::IpNetwork;
use log::debug;
use serde_json::json;
use std::net::IpAddr;
use thiserror::Error;

use crate::anticheat::{AntiCheatError, ParseError};
use crate::error::FleetError;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Failed to extract client IP")]
    MissingPeerIP,
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingPeerIP | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

impl From<FleetError> for RequestError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::UnknownServerId(_) | FleetError::PlayerNotFound => Self::NotFound(err.to_string()),
            FleetError::InvalidSteamId | FleetError::EmptyQuery | FleetError::InvalidAddress(_) => {
                Self::BadRequest(err.to_string())
            }
            FleetError::Rcon(_) | FleetError::Dispatch { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<AntiCheatError> for RequestError {
    fn from(err: AntiCheatError) -> Self {
        match err {
            AntiCheatError::Parse(ParseError::FileName(_)) | AntiCheatError::InvalidSteamId(_) => {
                Self::BadRequest(err.to_string())
            }
            AntiCheatError::Fleet(inner) => inner.into(),
            AntiCheatError::Parse(_) | AntiCheatError::Store(_) => Self::Internal(err.to_string()),
        }
    }
}

/// Proxies whose X-Forwarded-For header is believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Vec<IpNetwork>);

impl TrustedProxies {
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self(networks)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(ip))
    }
}

/// Client address. The first X-Forwarded-For hop is used only when the peer
/// is a registered `TrustedProxies` entry; otherwise the peer itself.
pub fn extract_real_ip(req: &HttpRequest) -> Result<IpAddr, RequestError> {
    let peer_ip = req
        .peer_addr()
        .map(|addr| addr.ip())
        .ok_or(RequestError::MissingPeerIP)?;

    let trusted = req
        .app_data::<web::Data<TrustedProxies>>()
        .map_or(false, |proxies| proxies.contains(peer_ip));
    if !trusted {
        return Ok(peer_ip);
    }

    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    match forwarded {
        Some(ip) => {
            debug!("Using X-Forwarded-For address {} from proxy {}", ip, peer_ip);
            Ok(ip)
        }
        None => Ok(peer_ip),
    }
}
