// src/state/collector.rs
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use super::Fleet;
use crate::models::server::{ServerConfig, ServerState};
use crate::protocol::query::ServerInfo;
use crate::protocol::status::{parse_status, parse_visible_max, Status};
use crate::tasks::ShutdownRx;

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSummary {
    pub success: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Whatever one server answered during a cycle.
#[derive(Debug, Default)]
pub(crate) struct PollOutcome {
    pub status: Option<Status>,
    pub visible_max: Option<i32>,
    pub info: Option<ServerInfo>,
    pub resolved_ip: Option<String>,
}

impl Fleet {
    /// Polls the fleet every update interval until shutdown.
    pub async fn start(self: Arc<Self>, shutdown: ShutdownRx) {
        let mut interval = tokio::time::interval(self.settings.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("State collector polling every {:?}", self.settings.update_interval);

        loop {
            let mut stop = shutdown.clone();
            tokio::select! {
                _ = stop.wait() => break,
                _ = interval.tick() => {}
            }

            // The next tick waits until this cycle has fully joined
            let mut stop = shutdown.clone();
            tokio::select! {
                _ = stop.wait() => break,
                summary = self.poll_once() => {
                    if summary.failed > 0 {
                        debug!(
                            "Poll cycle finished: {} ok, {} failed in {:?}",
                            summary.success, summary.failed, summary.duration
                        );
                    }
                }
            }
        }

        info!("State collector stopped");
    }

    /// Runs one full cycle: reload configs, query every server, swap the snapshot.
    pub async fn poll_once(&self) -> PollSummary {
        let started = Instant::now();
        let configs = self.refresh_configs().await;
        let previous = self.snapshot();

        let polls = configs.iter().map(|config| {
            let known_ip = previous
                .get(&config.server_id)
                .map(|s| s.ip.clone())
                .filter(|ip| !ip.is_empty());
            self.poll_server(config, known_ip)
        });
        let outcomes = join_all(polls).await;

        let now = Utc::now();
        let mut success = 0;
        let mut failed = 0;
        let mut revived = Vec::new();

        // Merge against the live map so updates pushed mid-cycle are kept
        self.swap_snapshot(|current| {
            let mut next = HashMap::with_capacity(configs.len());
            for (config, outcome) in configs.iter().zip(outcomes) {
                let mut state = match current.get(&config.server_id) {
                    Some(state) => state.clone(),
                    None => ServerState::from_config(config, String::new()),
                };
                let was_alive = state.alive;
                merge_outcome(&mut state, config, outcome, now);

                if state.alive {
                    success += 1;
                    if !was_alive {
                        revived.push(config.server_id);
                    }
                } else {
                    failed += 1;
                }
                next.insert(config.server_id, state);
            }
            next
        });

        if !revived.is_empty() {
            self.push_log_addresses(&revived).await;
        }

        PollSummary {
            success,
            failed,
            duration: started.elapsed(),
        }
    }

    async fn poll_server(&self, config: &ServerConfig, known_ip: Option<String>) -> PollOutcome {
        let (status, info, resolved_ip) = tokio::join!(
            self.fetch_status(config),
            self.fetch_info(config),
            resolve_ip(config, known_ip),
        );
        let (status, visible_max) = match status {
            Some((status, visible_max)) => (Some(status), visible_max),
            None => (None, None),
        };
        PollOutcome {
            status,
            visible_max,
            info,
            resolved_ip,
        }
    }

    async fn fetch_status(&self, config: &ServerConfig) -> Option<(Status, Option<i32>)> {
        let addr = config.addr();
        let timeout = self.settings.status_timeout;

        let text = match self.console().exec(&addr, &config.rcon_password, "status", timeout).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to fetch status for server {}: {}", config.server_id, e);
                return None;
            }
        };
        let status = match parse_status(&text) {
            Ok(status) => status,
            Err(e) => {
                warn!("Invalid status response from server {}: {}", config.server_id, e);
                return None;
            }
        };

        let visible_max = match self
            .console()
            .exec(&addr, &config.rcon_password, "sv_visiblemaxplayers", timeout)
            .await
        {
            Ok(text) => parse_visible_max(&text),
            Err(e) => {
                debug!("Failed to read sv_visiblemaxplayers on server {}: {}", config.server_id, e);
                None
            }
        };

        Some((status, visible_max))
    }

    async fn fetch_info(&self, config: &ServerConfig) -> Option<ServerInfo> {
        match self.query_client().info(&config.addr(), self.settings.status_timeout).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Failed to query info for server {}: {}", config.server_id, e);
                None
            }
        }
    }
}

/// Resolves the host once; later cycles reuse the known address.
async fn resolve_ip(config: &ServerConfig, known_ip: Option<String>) -> Option<String> {
    if known_ip.is_some() {
        return None;
    }
    if let Ok(ip) = config.host.parse::<IpAddr>() {
        return Some(ip.to_string());
    }
    match tokio::net::lookup_host((config.host.as_str(), config.port)).await {
        Ok(mut addrs) => Some(
            addrs
                .next()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| config.host.clone()),
        ),
        Err(e) => {
            warn!("Failed to resolve host {} for server {}: {}", config.host, config.server_id, e);
            Some(config.host.clone())
        }
    }
}

/// Folds one server's answers into its previous state.
///
/// Halves that failed leave their fields untouched. The state is alive only
/// when the console status succeeded.
pub(crate) fn merge_outcome(state: &mut ServerState, config: &ServerConfig, outcome: PollOutcome, now: DateTime<Utc>) {
    state.apply_config(config);
    if let Some(ip) = outcome.resolved_ip {
        state.ip = ip;
    }

    if let Some(info) = outcome.info {
        if !info.name.is_empty() {
            state.name = info.name;
        }
        state.map = info.map;
        state.folder = info.folder;
        state.game = info.game;
        state.app_id = info.app_id;
        state.protocol = info.protocol;
        state.version = info.version;
        state.vac = info.vac;
        state.password = info.password;
        state.player_count = info.players as i32;
        state.max_players = info.max_players as i32;
        state.bots = info.bots as i32;
        if let Some(keywords) = info.keywords {
            state.keywords = keywords
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(port) = info.stv_port {
            state.stv_port = port;
        }
        if let Some(name) = info.stv_name {
            state.stv_name = name;
        }
    }

    match outcome.status {
        Some(status) => {
            if !status.hostname.is_empty() {
                state.name = status.hostname;
            }
            if !status.map.is_empty() {
                state.map = status.map;
            }
            if state.version.is_empty() {
                state.version = status.version;
            }
            state.tags = status.tags;
            state.humans = status.humans;
            state.player_count = status.players.len() as i32;
            state.bots = status.bots;
            if status.max_players > 0 {
                state.max_players = status.max_players;
            }
            if let Some(visible) = outcome.visible_max {
                state.max_players = visible;
            }
            state.players = status.players;
            state.alive = true;
            state.last_update = Some(state.last_update.map_or(now, |prev| prev.max(now)));
        }
        None => {
            state.alive = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::protocol::query::ServerInfo;

    fn info(map: &str, players: u8) -> ServerInfo {
        ServerInfo {
            name: "Info Name".to_string(),
            map: map.to_string(),
            folder: "tf".to_string(),
            game: "Team Fortress".to_string(),
            app_id: 440,
            players,
            max_players: 24,
            vac: true,
            version: "8604597".to_string(),
            stv_port: Some(27020),
            stv_name: Some("SourceTV".to_string()),
            keywords: Some("payload,nocrits".to_string()),
            ..ServerInfo::default()
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_not_alive() {
        let one = server(1, "one");
        let two = server(2, "two");
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE)]));
        let fleet = fleet(vec![one, two], console, Arc::new(Default::default()));

        let summary = fleet.poll_once().await;
        assert_eq!((summary.success, summary.failed), (1, 1));

        let snapshot = fleet.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[&1].alive);
        assert!(!snapshot[&2].alive);
        assert_eq!(snapshot[&2].name, "two default");
        assert_eq!(snapshot[&1].players.len(), 2);
    }

    #[tokio::test]
    async fn info_failure_keeps_status_half() {
        let one = server(1, "one");
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE)]));
        let query = Arc::new(FakeQuery::default());
        query.infos.lock().insert(one.addr(), info("pl_upward", 2));
        let fleet = fleet(vec![one.clone()], console.clone(), query.clone());

        fleet.poll_once().await;
        assert_eq!(fleet.by_server_id(1).unwrap().stv_port, 27020);

        // Info drops out, console keeps answering
        query.infos.lock().clear();
        fleet.poll_once().await;
        let state = fleet.by_server_id(1).unwrap();
        assert!(state.alive);
        assert_eq!(state.stv_port, 27020);
        assert_eq!(state.keywords, vec!["payload", "nocrits"]);
        assert_eq!(state.map, "pl_upward");

        // Console drops out, info keeps answering
        query.infos.lock().insert(one.addr(), info("pl_badwater", 0));
        console.set_status(&one, None);
        fleet.poll_once().await;
        let state = fleet.by_server_id(1).unwrap();
        assert!(!state.alive);
        assert_eq!(state.map, "pl_badwater");
        assert_eq!(state.players.len(), 2);
    }

    #[tokio::test]
    async fn last_update_never_moves_backwards() {
        let one = server(1, "one");
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE)]));
        let fleet = fleet(vec![one], console, Arc::new(Default::default()));

        fleet.poll_once().await;
        let first = fleet.by_server_id(1).unwrap().last_update.unwrap();
        fleet.poll_once().await;
        let second = fleet.by_server_id(1).unwrap().last_update.unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn disabled_servers_leave_the_snapshot() {
        let one = server(1, "one");
        let two = server(2, "two");
        let registry = Arc::new(crate::storage::memory::ServerStorage::with_servers(vec![one.clone(), two.clone()]));
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE), (&two, STATUS_TWO)]));
        let fleet = Fleet::new(
            registry.clone(),
            console,
            Arc::new(FakeQuery::default()),
            super::super::FleetSettings::default(),
        );

        fleet.poll_once().await;
        assert_eq!(fleet.snapshot().len(), 2);

        registry.set_enabled(2, false);
        fleet.poll_once().await;
        let snapshot = fleet.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&1));
    }

    #[test]
    fn visible_max_overrides_status_max() {
        let config = server(1, "one");
        let mut state = ServerState::from_config(&config, String::new());
        let outcome = PollOutcome {
            status: Some(parse_status(STATUS_ONE).unwrap()),
            visible_max: Some(18),
            info: None,
            resolved_ip: Some("10.1.1.1".to_string()),
        };
        merge_outcome(&mut state, &config, outcome, Utc::now());
        assert_eq!(state.max_players, 18);
        assert_eq!(state.ip, "10.1.1.1");
        assert_eq!(state.name, "Test One");
    }

    #[tokio::test]
    async fn start_stops_on_shutdown() {
        let fleet = Arc::new(fleet(vec![], Arc::new(Default::default()), Arc::new(Default::default())));
        let (tx, rx) = crate::tasks::shutdown_channel();
        let handle = tokio::spawn(fleet.start(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
