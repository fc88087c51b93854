// src/anticheat/mod.rs
//! StAC log ingestion, detection counting and automated response.
pub mod correlator;
pub mod parser;
pub mod reconciler;

use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AnticheatConfig;
use crate::error::{FleetError, StoreError};
use crate::models::anticheat::{Detection, StacEntry};
use crate::ports::{AnticheatRepository, DemoStore, PersonStore};
use crate::steamid::SteamId;

pub use self::correlator::{DetectionCounter, FleetResponder, Responder};
pub use self::parser::{ParseError, StacParser};
pub use self::reconciler::DemoReconciler;

#[derive(Debug, Error)]
pub enum AntiCheatError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("anticheat store failure: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error("invalid steam id for {0:?}")]
    InvalidSteamId(String),
}

pub struct AntiCheat {
    parser: StacParser,
    repo: Arc<dyn AnticheatRepository>,
    persons: Arc<dyn PersonStore>,
    responder: Arc<dyn Responder>,
    reconciler: Arc<DemoReconciler>,
    counter: DetectionCounter,
    config: AnticheatConfig,
}

impl AntiCheat {
    pub fn new(
        config: AnticheatConfig,
        repo: Arc<dyn AnticheatRepository>,
        persons: Arc<dyn PersonStore>,
        demos: Arc<dyn DemoStore>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            parser: StacParser::new(),
            reconciler: Arc::new(DemoReconciler::new(repo.clone(), demos)),
            counter: DetectionCounter::new(config.window(), config.reset_scope),
            repo,
            persons,
            responder,
            config,
        }
    }

    pub fn reconciler(&self) -> Arc<DemoReconciler> {
        self.reconciler.clone()
    }

    /// Parses one log, tags it with `server_id` and stores every entry.
    ///
    /// Person records are created for each steam id seen; failures there are
    /// logged and do not stop the import. Storage is all or nothing.
    pub async fn import<R: Read>(
        &self,
        file_name: &str,
        reader: R,
        server_id: i32,
    ) -> Result<Vec<StacEntry>, AntiCheatError> {
        let mut entries = self.parser.parse(file_name, reader)?;
        if entries.is_empty() {
            return Ok(entries);
        }
        for entry in entries.iter_mut() {
            entry.server_id = server_id;
        }

        let mut names: BTreeMap<SteamId, &str> = BTreeMap::new();
        for entry in &entries {
            if let Some(steam_id) = entry.steam_id {
                names.entry(steam_id).or_insert(&entry.name);
            }
        }
        for (steam_id, name) in names {
            self.ensure_person(steam_id, name).await;
        }

        let saved = self.repo.save_entries(entries).await.map_err(|e| {
            error!("Failed to save anticheat entries from {}: {}", file_name, e);
            e
        })?;
        info!("Imported {} anticheat entries from {} for server {}", saved.len(), file_name, server_id);
        Ok(saved)
    }

    async fn ensure_person(&self, steam_id: SteamId, name: &str) {
        let mut person = match self.persons.get_or_create(steam_id).await {
            Ok(person) => person,
            Err(e) => {
                warn!("Failed to load person {}: {}", steam_id, e);
                return;
            }
        };
        if person.personaname.is_empty() && !name.is_empty() {
            person.personaname = name.to_string();
            if let Err(e) = self.persons.save(&person).await {
                warn!("Failed to save person {}: {}", steam_id, e);
            }
        }
    }

    /// Counts entries against their thresholds and responds to every
    /// crossing. Returns the number of actions taken.
    pub async fn handle(&self, entries: &[StacEntry]) -> usize {
        let mut triggered = 0;
        for entry in entries {
            let Some(steam_id) = entry.steam_id else {
                continue;
            };
            if entry.detection == Detection::Unknown {
                warn!("Got unknown stac detection: {}", entry.summary);
                continue;
            }

            let threshold = self.config.threshold(entry.detection);
            let Some(count) = self.counter.observe(steam_id, entry.detection, entry.created_on, threshold) else {
                continue;
            };

            info!(
                "Anticheat threshold reached for {} ({} x{}), action: {}",
                steam_id, entry.detection, count, self.config.action
            );
            triggered += 1;
            if let Err(e) = self.responder.respond(entry, self.config.action, count).await {
                error!("Failed to {} {} for {}: {}", self.config.action, steam_id, entry.detection, e);
            }
        }

        if let Some(latest) = entries.iter().map(|e| e.created_on).max() {
            let pruned = self.counter.prune(latest);
            if pruned > 0 {
                debug!("Pruned {} expired detection windows", pruned);
            }
        }
        triggered
    }

    /// Number of (player, detection) windows currently counted.
    pub fn tracked_windows(&self) -> usize {
        self.counter.len()
    }

    /// Imports a log once per (server, file name) and handles its entries.
    /// Returns None when the source was already imported.
    pub async fn import_source<R: Read>(
        &self,
        server_id: i32,
        file_name: &str,
        reader: R,
    ) -> Result<Option<Vec<StacEntry>>, AntiCheatError> {
        if !self.repo.record_import(server_id, file_name).await? {
            info!("Skipping already imported stac log {} for server {}", file_name, server_id);
            return Ok(None);
        }

        let entries = match self.import(file_name, reader, server_id).await {
            Ok(entries) => entries,
            Err(e) => {
                if let Err(release) = self.repo.release_import(server_id, file_name).await {
                    error!("Failed to release import of {}: {}", file_name, release);
                }
                return Err(e);
            }
        };
        self.handle(&entries).await;
        Ok(Some(entries))
    }

    pub async fn by_steam_id(&self, steam_id: SteamId) -> Result<Vec<StacEntry>, AntiCheatError> {
        Ok(self.repo.by_steam_id(steam_id).await?)
    }

    pub async fn by_detection(&self, detection: Detection) -> Result<Vec<StacEntry>, AntiCheatError> {
        Ok(self.repo.by_detection(detection).await?)
    }

    pub async fn sync_demo_ids(&self, limit: usize) -> Result<usize, AntiCheatError> {
        Ok(self.reconciler.sync_demo_ids(limit).await?)
    }
}
