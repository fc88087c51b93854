// src/handlers/index.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::state::Fleet;

pub async fn index(fleet: web::Data<Fleet>) -> HttpResponse {
    let snapshot = fleet.snapshot();
    let alive = snapshot.values().filter(|s| s.alive).count();
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "servers": snapshot.len(),
        "alive": alive,
    }))
}
