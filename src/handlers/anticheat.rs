// src/handlers/anticheat.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error};
use serde::Deserialize;
use serde_json::json;

use super::IpRateLimiter;
use crate::anticheat::AntiCheat;
use crate::models::anticheat::Detection;
use crate::steamid::SteamId;
use crate::utils::{extract_real_ip, RequestError};

#[derive(Deserialize)]
pub struct UploadQuery {
    server_id: i32,
    file_name: String,
}

/// Accepts one raw StAC log as the request body.
pub async fn upload(
    req: HttpRequest,
    anticheat: web::Data<AntiCheat>,
    rate_limiter: web::Data<IpRateLimiter>,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, RequestError> {
    let peer_ip = extract_real_ip(&req)?;
    if rate_limiter.check_key(&peer_ip).is_err() {
        error!("Rate limit exceeded for anticheat upload for ip: {}", peer_ip);
        return Err(RequestError::RateLimitExceeded);
    }

    debug!(
        "Received stac log {} for server {} ({} bytes)",
        query.file_name,
        query.server_id,
        body.len()
    );
    let imported = anticheat
        .import_source(query.server_id, &query.file_name, body.as_ref())
        .await?;

    Ok(HttpResponse::Ok().json(match imported {
        Some(entries) => json!({ "count": entries.len(), "duplicate": false }),
        None => json!({ "count": 0, "duplicate": true }),
    }))
}

pub async fn by_steam_id(
    anticheat: web::Data<AntiCheat>,
    path: web::Path<String>,
) -> Result<HttpResponse, RequestError> {
    let raw = path.into_inner();
    let steam_id: SteamId = raw
        .parse()
        .map_err(|_| RequestError::BadRequest(format!("invalid steam_id: {}", raw)))?;
    Ok(HttpResponse::Ok().json(anticheat.by_steam_id(steam_id).await?))
}

pub async fn by_detection(
    anticheat: web::Data<AntiCheat>,
    path: web::Path<String>,
) -> Result<HttpResponse, RequestError> {
    let detection: Detection = path.into_inner().parse().map_err(RequestError::BadRequest)?;
    Ok(HttpResponse::Ok().json(anticheat.by_detection(detection).await?))
}
