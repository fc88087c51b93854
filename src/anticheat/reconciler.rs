// src/anticheat/reconciler.rs
use log::{debug, error, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::error::StoreError;
use crate::ports::{AnticheatRepository, DemoStore};
use crate::tasks::ShutdownRx;

pub const DEFAULT_SYNC_LIMIT: usize = 100;

/// Links stored detections to demo recordings once the demos show up.
pub struct DemoReconciler {
    repo: Arc<dyn AnticheatRepository>,
    demos: Arc<dyn DemoStore>,
}

impl DemoReconciler {
    pub fn new(repo: Arc<dyn AnticheatRepository>, demos: Arc<dyn DemoStore>) -> Self {
        Self { repo, demos }
    }

    /// Links up to `limit` unlinked entries by exact demo title. Entries whose
    /// demo has not arrived yet stay unlinked. Returns how many were linked.
    pub async fn sync_demo_ids(&self, limit: usize) -> Result<usize, StoreError> {
        let limit = if limit == 0 { DEFAULT_SYNC_LIMIT } else { limit };
        let pending = self.repo.missing_demo_links(limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let titles: Vec<String> = pending
            .iter()
            .map(|(_, name)| name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let by_title: HashMap<String, i64> = self
            .demos
            .demos_by_titles(&titles)
            .await?
            .into_iter()
            .map(|demo| (demo.title, demo.demo_id))
            .collect();

        let mut linked = 0;
        for (anticheat_id, name) in &pending {
            let Some(demo_id) = by_title.get(name) else {
                continue;
            };
            if self.repo.link_demo(*anticheat_id, *demo_id).await? {
                linked += 1;
            }
        }

        debug!("Linked {} of {} pending detections to demos", linked, pending.len());
        Ok(linked)
    }

    pub async fn start(self: Arc<Self>, every: Duration, limit: usize, shutdown: ShutdownRx) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut stop = shutdown.clone();
            tokio::select! {
                _ = stop.wait() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.sync_demo_ids(limit).await {
                error!("Failed to sync anticheat demo ids: {}", e);
            }
        }

        info!("Demo reconciler stopped");
    }
}
