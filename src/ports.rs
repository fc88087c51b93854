//! Interfaces to the collaborators that own persistence and delivery.
use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::anticheat::{Detection, StacEntry};
use crate::models::person::{BanRecord, BanRequest, DemoRecord, Notification, Person};
use crate::models::server::ServerConfig;
use crate::steamid::SteamId;

#[async_trait]
pub trait ServerRegistry: Send + Sync {
    /// Every configured server that is not disabled.
    async fn enabled_servers(&self) -> Result<Vec<ServerConfig>, StoreError>;
}

#[async_trait]
pub trait PersonStore: Send + Sync {
    async fn get_or_create(&self, steam_id: SteamId) -> Result<Person, StoreError>;
    async fn save(&self, person: &Person) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BanService: Send + Sync {
    /// Returns `StoreError::Duplicate` when the target already has an active ban.
    async fn ban(&self, request: BanRequest) -> Result<BanRecord, StoreError>;
}

#[async_trait]
pub trait DemoStore: Send + Sync {
    async fn demos_by_titles(&self, titles: &[String]) -> Result<Vec<DemoRecord>, StoreError>;
}

#[async_trait]
pub trait AnticheatRepository: Send + Sync {
    /// Marks a source log as imported. False when it was already recorded.
    async fn record_import(&self, server_id: i32, file_name: &str) -> Result<bool, StoreError>;

    /// Forgets a recorded import so the source can be retried.
    async fn release_import(&self, server_id: i32, file_name: &str) -> Result<(), StoreError>;

    /// Persists every entry or none, assigning ids.
    async fn save_entries(&self, entries: Vec<StacEntry>) -> Result<Vec<StacEntry>, StoreError>;

    async fn by_steam_id(&self, steam_id: SteamId) -> Result<Vec<StacEntry>, StoreError>;
    async fn by_detection(&self, detection: Detection) -> Result<Vec<StacEntry>, StoreError>;

    /// Up to `limit` (anticheat id, demo name) pairs with a demo name and no demo id.
    async fn missing_demo_links(&self, limit: usize) -> Result<Vec<(i64, String)>, StoreError>;

    /// Sets the demo id if still unset. False when the entry was already linked.
    async fn link_demo(&self, anticheat_id: i64, demo_id: i64) -> Result<bool, StoreError>;
}

/// Fire-and-forget alert sink.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: Notification);
}
