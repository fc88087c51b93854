// src/blocklist.rs
use futures::future::join_all;
use ipnetwork::IpNetwork;
use log::{error, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::state::Fleet;
use crate::tasks::ShutdownRx;

const KICK_REASON: &str = "Connections from your network are blocked";

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Parses one CIDR per line, skipping blanks, comments and garbage.
pub fn parse_ranges(text: &str) -> Vec<IpNetwork> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| IpNetwork::from_str(line).ok())
        .collect()
}

/// Network ranges whose players are not allowed on the fleet.
pub struct Blocklist {
    ranges: RwLock<Vec<IpNetwork>>,
    urls: Vec<String>,
    client: reqwest::Client,
}

impl Blocklist {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            ranges: RwLock::new(Vec::new()),
            urls,
            client: reqwest::Client::new(),
        }
    }

    pub fn ranges(&self) -> Vec<IpNetwork> {
        self.ranges.read().clone()
    }

    pub fn set_ranges(&self, ranges: Vec<IpNetwork>) {
        *self.ranges.write() = ranges;
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.ranges.read().iter().any(|network| network.contains(ip))
    }

    async fn fetch_ip_ranges(&self, url: &str) -> Result<Vec<IpNetwork>, BlocklistError> {
        let fetch_err = |source| BlocklistError::Fetch { url: url.to_string(), source };
        let text = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_err)?
            .text()
            .await
            .map_err(fetch_err)?;
        Ok(parse_ranges(&text))
    }

    /// Refetches every list. The cached set is replaced only when all fetches
    /// succeed. Returns the number of ranges now held.
    pub async fn sync(&self) -> Result<usize, BlocklistError> {
        let mut ranges = Vec::new();
        for url in &self.urls {
            let fetched = self.fetch_ip_ranges(url).await?;
            info!("Loaded {} blocked ranges from {}", fetched.len(), url);
            ranges.extend(fetched);
        }
        let count = ranges.len();
        self.set_ranges(ranges);
        Ok(count)
    }

    /// Kicks connected players inside a blocked range. Returns how many kicks
    /// were sent successfully.
    pub async fn enforce(&self, fleet: &Fleet) -> usize {
        let mut targets = BTreeSet::new();
        for range in self.ranges() {
            for info in fleet.find_by_cidr(range) {
                targets.insert((info.server_id, info.player.user_id));
            }
        }

        let kicks = targets.iter().map(|(server_id, user_id)| async move {
            match fleet.kick_player_id(*server_id, *user_id, KICK_REASON).await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Failed to kick blocked user {} on server {}: {}", user_id, server_id, e);
                    false
                }
            }
        });
        join_all(kicks).await.into_iter().filter(|ok| *ok).count()
    }

    pub async fn start(self: Arc<Self>, fleet: Arc<Fleet>, every: Duration, kick: bool, shutdown: ShutdownRx) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut stop = shutdown.clone();
            tokio::select! {
                _ = stop.wait() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.sync().await {
                error!("Failed to sync blocklist: {}", e);
            }
            if kick {
                let kicked = self.enforce(&fleet).await;
                if kicked > 0 {
                    info!("Kicked {} player(s) from blocked networks", kicked);
                }
            }
        }

        info!("Blocklist sync stopped");
    }
}
