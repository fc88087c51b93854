// src/state/mod.rs
//! Live view of the fleet and every operation run against it.
pub mod collector;
pub mod dispatch;
pub mod log_address;
pub mod query;

use log::warn;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::FleetError;
use crate::models::server::{PartialStateUpdate, ServerConfig, ServerState};
use crate::ports::ServerRegistry;
use crate::protocol::{ConsoleClient, QueryClient};

pub use self::collector::PollSummary;
pub use self::dispatch::ExecOutcome;
pub use self::log_address::LogAddresses;
pub use self::query::FindOpts;

pub type Snapshot = Arc<HashMap<i32, ServerState>>;

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub update_interval: Duration,
    pub status_timeout: Duration,
    pub exec_timeout: Duration,
    pub log_addresses: Vec<String>,
}

impl FleetSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            update_interval: config.status_update_interval(),
            status_timeout: config.status_timeout(),
            exec_timeout: config.exec_timeout(),
            log_addresses: config.log_addresses.clone(),
        }
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Owns the state snapshot and the cached server configs.
///
/// Readers clone the current `Arc` under a short read lock and work on that
/// immutable map; writers build a new map and swap it in under the write lock.
pub struct Fleet {
    snapshot: RwLock<Snapshot>,
    configs: RwLock<Arc<Vec<ServerConfig>>>,
    registry: Arc<dyn ServerRegistry>,
    console: Arc<dyn ConsoleClient>,
    query: Arc<dyn QueryClient>,
    log_addresses: LogAddresses,
    settings: FleetSettings,
}

impl Fleet {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        console: Arc<dyn ConsoleClient>,
        query: Arc<dyn QueryClient>,
        settings: FleetSettings,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            configs: RwLock::new(Arc::new(Vec::new())),
            registry,
            console,
            query,
            log_addresses: LogAddresses::new(settings.log_addresses.iter().cloned()),
            settings,
        }
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    /// Every known server state, ordered by short name.
    pub fn current(&self) -> Vec<ServerState> {
        let snapshot = self.snapshot();
        let mut states: Vec<ServerState> = snapshot.values().cloned().collect();
        states.sort_by(|a, b| a.name_short.cmp(&b.name_short).then(a.server_id.cmp(&b.server_id)));
        states
    }

    pub fn by_server_id(&self, server_id: i32) -> Option<ServerState> {
        self.snapshot().get(&server_id).cloned()
    }

    /// Patches a server's live fields between polls.
    pub fn update(&self, server_id: i32, update: PartialStateUpdate) -> Result<(), FleetError> {
        let mut guard = self.snapshot.write();
        let current = guard.get(&server_id).ok_or(FleetError::UnknownServerId(server_id))?;

        let mut state = current.clone();
        if !update.hostname.is_empty() {
            state.name = update.hostname;
        }
        state.map = update.current_map;
        state.player_count = update.players_real;
        state.humans = update.players_real;
        state.max_players = update.players_visible;
        state.bots = update.players_total.saturating_sub(update.players_real).max(0);

        let mut next = HashMap::clone(guard.as_ref());
        next.insert(server_id, state);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn configs(&self) -> Arc<Vec<ServerConfig>> {
        self.configs.read().clone()
    }

    pub fn set_configs(&self, configs: Vec<ServerConfig>) {
        *self.configs.write() = Arc::new(configs);
    }

    pub fn server_config(&self, server_id: i32) -> Option<ServerConfig> {
        self.configs().iter().find(|c| c.server_id == server_id).cloned()
    }

    /// Reloads enabled servers from the registry, keeping the cached set on failure.
    pub async fn refresh_configs(&self) -> Arc<Vec<ServerConfig>> {
        match self.registry.enabled_servers().await {
            Ok(configs) => {
                let configs = Arc::new(configs);
                *self.configs.write() = configs.clone();
                configs
            }
            Err(e) => {
                warn!("Failed to load server configs, using cached set: {}", e);
                self.configs()
            }
        }
    }

    /// Resolves a config from the cache, falling back to the registry once.
    pub async fn resolve_config(&self, server_id: i32) -> Result<ServerConfig, FleetError> {
        if let Some(config) = self.server_config(server_id) {
            return Ok(config);
        }
        self.refresh_configs()
            .await
            .iter()
            .find(|c| c.server_id == server_id)
            .cloned()
            .ok_or(FleetError::UnknownServerId(server_id))
    }

    /// Current states grouped by region.
    pub fn sort_region(&self) -> BTreeMap<String, Vec<ServerState>> {
        let mut regions: BTreeMap<String, Vec<ServerState>> = BTreeMap::new();
        for state in self.current() {
            regions.entry(state.region.clone()).or_default().push(state);
        }
        regions
    }

    /// Configs whose tag contains `name`, ignoring case. `*` selects every
    /// server when `wildcard_ok` is set.
    pub fn by_name(&self, name: &str, wildcard_ok: bool) -> Vec<ServerConfig> {
        let configs = self.configs();
        if name == "*" {
            return if wildcard_ok { configs.as_ref().clone() } else { Vec::new() };
        }
        let needle = name.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        configs
            .iter()
            .filter(|c| c.tag.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn server_ids_by_name(&self, name: &str, wildcard_ok: bool) -> Vec<i32> {
        self.by_name(name, wildcard_ok).iter().map(|c| c.server_id).collect()
    }

    pub fn log_addresses(&self) -> &LogAddresses {
        &self.log_addresses
    }

    pub(crate) fn console(&self) -> &dyn ConsoleClient {
        self.console.as_ref()
    }

    pub(crate) fn query_client(&self) -> &dyn QueryClient {
        self.query.as_ref()
    }

    pub(crate) fn swap_snapshot<F>(&self, build: F)
    where
        F: FnOnce(&HashMap<i32, ServerState>) -> HashMap<i32, ServerState>,
    {
        let mut guard = self.snapshot.write();
        let next = build(guard.as_ref());
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Fleet, FleetSettings};
    use crate::models::server::ServerConfig;
    use crate::protocol::query::{QueryError, ServerInfo};
    use crate::protocol::rcon::RconError;
    use crate::protocol::{ConsoleClient, QueryClient};
    use crate::storage::memory::ServerStorage;

    pub const STATUS_ONE: &str = r#"hostname: Test One
version : 8604597/24 8604597 secure
map     : pl_upward at: 0 x, 0 y, 0 z
tags    : payload
players : 2 humans, 0 bots (24 max)
# userid name                uniqueid            connected ping loss state  adr
#    280 "JSN_"              [U:1:118258373]     11:20       67    0 active 10.0.0.5:27005
#    281 "Shadow"            [U:1:247502420]     1:02:03     90    2 active 192.168.1.20:27005
"#;

    pub const STATUS_TWO: &str = r#"hostname: Test Two
map     : cp_process_final at: 0 x, 0 y, 0 z
players : 1 humans, 0 bots (32 max)
# userid name                uniqueid            connected ping loss state  adr
#     12 "MashingButtons"    [U:1:1159316597]    05:00       40    0 active 10.0.0.9:27005
"#;

    pub fn server(id: i32, tag: &str) -> ServerConfig {
        ServerConfig {
            server_id: id,
            tag: tag.to_string(),
            default_hostname: format!("{tag} default"),
            host: "127.0.0.1".to_string(),
            port: 27000 + id as u16,
            rcon_password: "pw".to_string(),
            region: if id % 2 == 0 { "eu".to_string() } else { "na".to_string() },
            cc: "us".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            enabled: true,
            reserved_slots: 0,
        }
    }

    /// Console fake keyed by address; unknown addresses refuse connections.
    #[derive(Default)]
    pub struct FakeConsole {
        pub status: Mutex<HashMap<String, String>>,
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeConsole {
        pub fn with_status(entries: &[(&ServerConfig, &str)]) -> Self {
            let console = Self::default();
            for (config, status) in entries {
                console.set_status(config, Some(status));
            }
            console
        }

        pub fn set_status(&self, config: &ServerConfig, status: Option<&str>) {
            let mut map = self.status.lock();
            match status {
                Some(status) => map.insert(config.addr(), status.to_string()),
                None => map.remove(&config.addr()),
            };
        }

        pub fn commands(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ConsoleClient for FakeConsole {
        async fn exec(&self, addr: &str, _password: &str, cmd: &str, _timeout: Duration) -> Result<String, RconError> {
            let status = self.status.lock().get(addr).cloned();
            let status = status.ok_or_else(|| RconError::Timeout(addr.to_string()))?;
            self.sent.lock().push((addr.to_string(), cmd.to_string()));
            match cmd {
                "status" => Ok(status),
                "sv_visiblemaxplayers" => Ok("\"sv_visiblemaxplayers\" = \"-1\" ( def. \"-1\" )".to_string()),
                _ => Ok(String::new()),
            }
        }
    }

    #[derive(Default)]
    pub struct FakeQuery {
        pub infos: Mutex<HashMap<String, ServerInfo>>,
    }

    #[async_trait]
    impl QueryClient for FakeQuery {
        async fn info(&self, addr: &str, _timeout: Duration) -> Result<ServerInfo, QueryError> {
            self.infos
                .lock()
                .get(addr)
                .cloned()
                .ok_or_else(|| QueryError::Timeout(addr.to_string()))
        }
    }

    pub fn fleet(configs: Vec<ServerConfig>, console: Arc<FakeConsole>, query: Arc<FakeQuery>) -> Fleet {
        Fleet::new(Arc::new(ServerStorage::with_servers(configs)), console, query, FleetSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn update_patches_known_server() {
        let one = server(1, "one");
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE)]));
        let fleet = fleet(vec![one], console, Arc::new(Default::default()));
        fleet.poll_once().await;

        fleet
            .update(
                1,
                PartialStateUpdate {
                    hostname: String::new(),
                    current_map: "koth_harvest_final".to_string(),
                    players_real: 5,
                    players_total: 7,
                    players_visible: 24,
                },
            )
            .unwrap();

        let state = fleet.by_server_id(1).unwrap();
        assert_eq!(state.name, "Test One");
        assert_eq!(state.map, "koth_harvest_final");
        assert_eq!(state.player_count, 5);
        assert_eq!(state.bots, 2);
        assert_eq!(state.max_players, 24);

        fleet
            .update(
                1,
                PartialStateUpdate {
                    hostname: String::new(),
                    current_map: "koth_harvest_final".to_string(),
                    players_real: i32::MAX,
                    players_total: i32::MIN,
                    players_visible: 24,
                },
            )
            .unwrap();
        assert_eq!(fleet.by_server_id(1).unwrap().bots, 0);
    }

    #[test]
    fn update_unknown_server_fails() {
        let fleet = fleet(vec![], Arc::new(Default::default()), Arc::new(Default::default()));
        let err = fleet.update(9, PartialStateUpdate::default()).unwrap_err();
        assert!(matches!(err, FleetError::UnknownServerId(9)));
    }

    #[tokio::test]
    async fn by_name_matches_tags() {
        let fleet = fleet(
            vec![server(1, "us-sea-1"), server(2, "eu-ams-1"), server(3, "us-chi-1")],
            Arc::new(Default::default()),
            Arc::new(Default::default()),
        );
        fleet.refresh_configs().await;

        assert_eq!(fleet.server_ids_by_name("US-", false), vec![1, 3]);
        assert_eq!(fleet.server_ids_by_name("*", true).len(), 3);
        assert!(fleet.server_ids_by_name("*", false).is_empty());
        assert!(fleet.server_ids_by_name("", true).is_empty());
    }

    #[tokio::test]
    async fn sort_region_groups_states() {
        let one = server(1, "one");
        let two = server(2, "two");
        let console = Arc::new(FakeConsole::with_status(&[(&one, STATUS_ONE), (&two, STATUS_TWO)]));
        let fleet = fleet(vec![one, two], console, Arc::new(Default::default()));
        fleet.poll_once().await;

        let regions = fleet.sort_region();
        assert_eq!(regions["na"][0].server_id, 1);
        assert_eq!(regions["eu"][0].server_id, 2);
    }
}
