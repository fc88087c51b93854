// src/storage/memory.rs
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::clamped_seconds;
use crate::error::StoreError;
use crate::models::anticheat::{Detection, StacEntry};
use crate::models::person::{BanRecord, BanRequest, DemoRecord, Notification, Person};
use crate::models::server::ServerConfig;
use crate::ports::{AnticheatRepository, BanService, DemoStore, Notifier, PersonStore, ServerRegistry};
use crate::steamid::SteamId;

pub struct ServerStorage {
    servers: DashMap<i32, ServerConfig>,
}

impl ServerStorage {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
        }
    }

    pub fn with_servers(servers: impl IntoIterator<Item = ServerConfig>) -> Self {
        let storage = Self::new();
        for server in servers {
            storage.add_server(server);
        }
        storage
    }

    /// Loads a JSON array of server configs. A missing file yields an empty registry.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Servers file {} not found, starting with an empty registry", path.display());
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::Other(e.to_string()))?;
        let servers: Vec<ServerConfig> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Other(format!("invalid servers file: {}", e)))?;
        info!("Loaded {} servers from {}", servers.len(), path.display());
        Ok(Self::with_servers(servers))
    }

    pub fn add_server(&self, server: ServerConfig) {
        self.servers.insert(server.server_id, server);
    }

    pub fn set_enabled(&self, server_id: i32, enabled: bool) -> bool {
        match self.servers.get_mut(&server_id) {
            Some(mut server) => {
                server.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn remove_server(&self, server_id: i32) {
        self.servers.remove(&server_id);
    }
}

impl Default for ServerStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerRegistry for ServerStorage {
    async fn enabled_servers(&self) -> Result<Vec<ServerConfig>, StoreError> {
        let mut servers: Vec<ServerConfig> = self
            .servers
            .iter()
            .filter(|r| r.value().enabled)
            .map(|r| r.value().clone())
            .collect();
        servers.sort_by_key(|s| s.server_id);
        Ok(servers)
    }
}

#[derive(Default)]
pub struct PersonStorage {
    persons: DashMap<SteamId, Person>,
}

impl PersonStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, steam_id: SteamId) -> Option<Person> {
        self.persons.get(&steam_id).map(|p| p.value().clone())
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}

#[async_trait]
impl PersonStore for PersonStorage {
    async fn get_or_create(&self, steam_id: SteamId) -> Result<Person, StoreError> {
        let person = self.persons.entry(steam_id).or_insert_with(|| Person {
            steam_id,
            personaname: String::new(),
            created_on: Utc::now(),
        });
        Ok(person.value().clone())
    }

    async fn save(&self, person: &Person) -> Result<(), StoreError> {
        self.persons.insert(person.steam_id, person.clone());
        Ok(())
    }
}

pub struct BanStorage {
    bans: DashMap<SteamId, BanRecord>,
    next_id: AtomicI64,
}

impl BanStorage {
    pub fn new() -> Self {
        Self {
            bans: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn get(&self, steam_id: SteamId) -> Option<BanRecord> {
        self.bans.get(&steam_id).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

impl Default for BanStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BanService for BanStorage {
    async fn ban(&self, request: BanRequest) -> Result<BanRecord, StoreError> {
        let now = Utc::now();
        if let Some(existing) = self.bans.get(&request.target_id) {
            let active = existing.valid_until.map(|until| until > now).unwrap_or(true);
            if active {
                return Err(StoreError::Duplicate);
            }
        }

        let record = BanRecord {
            ban_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            target_id: request.target_id,
            reason: request.reason,
            // A span past chrono's range is treated as permanent
            valid_until: request
                .duration_secs
                .and_then(|secs| now.checked_add_signed(clamped_seconds(secs))),
            created_on: now,
        };
        self.bans.insert(request.target_id, record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct DemoStorage {
    demos: DashMap<i64, DemoRecord>,
}

impl DemoStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_demo(&self, demo: DemoRecord) {
        self.demos.insert(demo.demo_id, demo);
    }
}

#[async_trait]
impl DemoStore for DemoStorage {
    async fn demos_by_titles(&self, titles: &[String]) -> Result<Vec<DemoRecord>, StoreError> {
        let wanted: HashSet<&str> = titles.iter().map(String::as_str).collect();
        let mut demos: Vec<DemoRecord> = self
            .demos
            .iter()
            .filter(|r| wanted.contains(r.value().title.as_str()))
            .map(|r| r.value().clone())
            .collect();
        demos.sort_by_key(|d| d.demo_id);
        Ok(demos)
    }
}

pub struct AnticheatStorage {
    entries: RwLock<Vec<StacEntry>>,
    imports: DashMap<(i32, String), ()>,
    next_id: AtomicI64,
}

impl AnticheatStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            imports: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn entries(&self) -> Vec<StacEntry> {
        self.entries.read().clone()
    }
}

impl Default for AnticheatStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnticheatRepository for AnticheatStorage {
    async fn record_import(&self, server_id: i32, file_name: &str) -> Result<bool, StoreError> {
        Ok(self.imports.insert((server_id, file_name.to_string()), ()).is_none())
    }

    async fn release_import(&self, server_id: i32, file_name: &str) -> Result<(), StoreError> {
        self.imports.remove(&(server_id, file_name.to_string()));
        Ok(())
    }

    async fn save_entries(&self, mut entries: Vec<StacEntry>) -> Result<Vec<StacEntry>, StoreError> {
        let mut stored = self.entries.write();
        for entry in entries.iter_mut() {
            entry.anticheat_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        stored.extend(entries.iter().cloned());
        Ok(entries)
    }

    async fn by_steam_id(&self, steam_id: SteamId) -> Result<Vec<StacEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.steam_id == Some(steam_id))
            .cloned()
            .collect())
    }

    async fn by_detection(&self, detection: Detection) -> Result<Vec<StacEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.detection == detection)
            .cloned()
            .collect())
    }

    async fn missing_demo_links(&self, limit: usize) -> Result<Vec<(i64, String)>, StoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.demo_id.is_none() && !e.demo_name.is_empty())
            .take(limit)
            .map(|e| (e.anticheat_id, e.demo_name.clone()))
            .collect())
    }

    async fn link_demo(&self, anticheat_id: i64, demo_id: i64) -> Result<bool, StoreError> {
        let mut stored = self.entries.write();
        let entry = stored
            .iter_mut()
            .find(|e| e.anticheat_id == anticheat_id)
            .ok_or(StoreError::NotFound)?;
        if entry.demo_id.is_some() {
            return Ok(false);
        }
        entry.demo_id = Some(demo_id);
        Ok(true)
    }
}

/// Notifier that logs and keeps every notification it was handed.
#[derive(Default)]
pub struct NotificationLog {
    sent: Mutex<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl Notifier for NotificationLog {
    fn send(&self, notification: Notification) {
        match &notification {
            Notification::AnticheatTrigger { steam_id, detection, action, count, .. } => {
                info!("Anticheat {} triggered for {} after {} {} detections", action, steam_id, count, detection);
            }
        }
        self.sent.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: i32, enabled: bool) -> ServerConfig {
        ServerConfig {
            server_id: id,
            tag: format!("srv-{id}"),
            default_hostname: String::new(),
            host: "127.0.0.1".to_string(),
            port: 27015,
            rcon_password: "pw".to_string(),
            region: "na".to_string(),
            cc: "us".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            enabled,
            reserved_slots: 0,
        }
    }

    #[tokio::test]
    async fn registry_returns_enabled_only() {
        let storage = ServerStorage::with_servers([server(2, true), server(1, true), server(3, false)]);
        let ids: Vec<i32> = storage.enabled_servers().await.unwrap().iter().map(|s| s.server_id).collect();
        assert_eq!(ids, vec![1, 2]);

        storage.set_enabled(3, true);
        assert_eq!(storage.enabled_servers().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn second_active_ban_is_duplicate() {
        let bans = BanStorage::new();
        let target: SteamId = "STEAM_0:1:59129186".parse().unwrap();
        let request = BanRequest {
            source_id: None,
            target_id: target,
            duration_secs: None,
            reason: "cheating".to_string(),
            note: String::new(),
            demo_name: String::new(),
            demo_tick: 0,
        };
        assert!(bans.ban(request.clone()).await.is_ok());
        assert!(matches!(bans.ban(request).await, Err(StoreError::Duplicate)));
    }

    #[tokio::test]
    async fn oversized_duration_is_permanent() {
        let bans = BanStorage::new();
        let target: SteamId = "STEAM_0:0:123751210".parse().unwrap();
        let record = bans
            .ban(BanRequest {
                source_id: None,
                target_id: target,
                duration_secs: Some(u64::MAX),
                reason: "cheating".to_string(),
                note: String::new(),
                demo_name: String::new(),
                demo_tick: 0,
            })
            .await
            .unwrap();
        assert_eq!(record.valid_until, None);

        let timed = bans
            .ban(BanRequest {
                source_id: None,
                target_id: "STEAM_0:1:59129186".parse().unwrap(),
                duration_secs: Some(3600),
                reason: "cheating".to_string(),
                note: String::new(),
                demo_name: String::new(),
                demo_tick: 0,
            })
            .await
            .unwrap();
        assert!(timed.valid_until.unwrap() > timed.created_on);
    }

    #[tokio::test]
    async fn import_ledger_rejects_repeats() {
        let repo = AnticheatStorage::new();
        assert!(repo.record_import(1, "stac_052224.log").await.unwrap());
        assert!(!repo.record_import(1, "stac_052224.log").await.unwrap());
        assert!(repo.record_import(2, "stac_052224.log").await.unwrap());

        repo.release_import(1, "stac_052224.log").await.unwrap();
        assert!(repo.record_import(1, "stac_052224.log").await.unwrap());
    }
}
