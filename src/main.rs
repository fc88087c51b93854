// src/main.rs
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use governor::RateLimiter;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use fleetd::anticheat::{AntiCheat, FleetResponder};
use fleetd::blocklist::Blocklist;
use fleetd::config::Config;
use fleetd::handlers::{self, IpRateLimiter};
use fleetd::protocol::query::A2sClient;
use fleetd::protocol::rcon::RconClient;
use fleetd::state::{Fleet, FleetSettings};
use fleetd::storage::memory::{
    AnticheatStorage, BanStorage, DemoStorage, NotificationLog, PersonStorage, ServerStorage,
};
use fleetd::tasks::{wait_for_signal, TaskSet};
use fleetd::utils::TrustedProxies;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    dotenv::dotenv().ok();
    let config = Config::from_env();
    let bind = config.bind();

    let registry = ServerStorage::from_file(&config.servers_file).map_err(|e| {
        error!("Failed to load servers from {}: {}", config.servers_file, e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let fleet = Arc::new(Fleet::new(
        Arc::new(registry),
        Arc::new(RconClient::new()),
        Arc::new(A2sClient::new()),
        FleetSettings::from_config(&config),
    ));
    let configs = fleet.refresh_configs().await;
    info!("Tracking {} enabled servers", configs.len());

    let responder = FleetResponder::new(
        fleet.clone(),
        Arc::new(BanStorage::new()),
        Arc::new(NotificationLog::new()),
        &config.anticheat,
    );
    let anticheat = Arc::new(AntiCheat::new(
        config.anticheat.clone(),
        Arc::new(AnticheatStorage::new()),
        Arc::new(PersonStorage::new()),
        Arc::new(DemoStorage::new()),
        Arc::new(responder),
    ));

    let mut tasks = TaskSet::new();
    {
        let fleet = fleet.clone();
        tasks.spawn("state-collector", move |shutdown| fleet.start(shutdown));
    }
    {
        let reconciler = anticheat.reconciler();
        let every = Duration::from_secs(config.demo_sync_secs.max(1));
        let limit = config.demo_sync_limit;
        tasks.spawn("demo-reconciler", move |shutdown| reconciler.start(every, limit, shutdown));
    }
    if !config.blocklist_urls.is_empty() {
        let blocklist = Arc::new(Blocklist::new(config.blocklist_urls.clone()));
        let fleet = fleet.clone();
        let every = Duration::from_secs(config.blocklist_sync_secs.max(1));
        let kick = config.blocklist_kick;
        tasks.spawn("blocklist-sync", move |shutdown| blocklist.start(fleet, every, kick, shutdown));
    }

    let fleet_data = web::Data::from(fleet);
    let anticheat_data = web::Data::from(anticheat);
    let upload_rate_limiter: web::Data<IpRateLimiter> = web::Data::new(RateLimiter::keyed(config.upload_quota()));
    let trusted_proxies = web::Data::new(TrustedProxies::new(config.trusted_proxies.clone()));

    info!("Starting server on {}", bind);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(fleet_data.clone())
            .app_data(anticheat_data.clone())
            .app_data(upload_rate_limiter.clone())
            .app_data(trusted_proxies.clone())
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind)?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down");
        handle.stop(true).await;
    });

    let result = server.await;
    tasks.shutdown().await;
    result
}
