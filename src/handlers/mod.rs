// src/handlers/mod.rs
pub mod anticheat;
pub mod index;
pub mod log_address;
pub mod servers;

use actix_web::web;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use std::net::IpAddr;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index::index))
        .route("/api/servers/state", web::get().to(servers::get_state))
        .route("/api/servers/find", web::get().to(servers::find))
        .route("/api/servers/broadcast", web::post().to(servers::broadcast))
        .route("/api/anticheat/upload", web::post().to(anticheat::upload))
        .route("/api/anticheat/steam/{steam_id}", web::get().to(anticheat::by_steam_id))
        .route("/api/anticheat/detection/{detection}", web::get().to(anticheat::by_detection))
        .route("/api/log_address", web::post().to(log_address::add))
        .route("/api/log_address", web::delete().to(log_address::del));
}
