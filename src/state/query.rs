// src/state/query.rs
use futures::future::join_all;
use ipnetwork::IpNetwork;
use log::warn;
use std::collections::HashMap;
use std::net::IpAddr;

use super::Fleet;
use crate::error::FleetError;
use crate::models::server::{PlayerServerInfo, ServerState};
use crate::steamid::SteamId;

/// Search criteria. Every supplied field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOpts {
    pub name: Option<String>,
    pub steam_id: Option<SteamId>,
    pub ip: Option<IpAddr>,
    pub cidr: Option<IpNetwork>,
}

impl FindOpts {
    pub fn steam_id(steam_id: SteamId) -> Self {
        Self {
            steam_id: Some(steam_id),
            ..Self::default()
        }
    }

    pub fn ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Self::default()
        }
    }

    pub fn cidr(cidr: IpNetwork) -> Self {
        Self {
            cidr: Some(cidr),
            ..Self::default()
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.as_deref().map_or(true, str::is_empty)
            && self.steam_id.is_none()
            && self.ip.is_none()
            && self.cidr.is_none()
    }
}

/// Matches players across alive servers, ordered by server id then user id.
pub fn find_in(snapshot: &HashMap<i32, ServerState>, opts: &FindOpts) -> Vec<PlayerServerInfo> {
    if opts.is_empty() {
        return Vec::new();
    }
    let name = opts.name.as_deref().filter(|n| !n.is_empty()).map(str::to_lowercase);

    let mut states: Vec<&ServerState> = snapshot.values().filter(|s| s.alive).collect();
    states.sort_by_key(|s| s.server_id);

    let mut found = Vec::new();
    for state in states {
        for player in &state.players {
            if let Some(steam_id) = opts.steam_id {
                if player.steam_id != steam_id {
                    continue;
                }
            }
            if let Some(ip) = opts.ip {
                if player.ip != Some(ip) {
                    continue;
                }
            }
            if let Some(cidr) = opts.cidr {
                if !player.ip.map_or(false, |ip| cidr.contains(ip)) {
                    continue;
                }
            }
            if let Some(name) = &name {
                if !player.name.to_lowercase().contains(name.as_str()) {
                    continue;
                }
            }
            found.push(PlayerServerInfo {
                player: player.clone(),
                server_id: state.server_id,
            });
        }
    }
    found
}

impl Fleet {
    pub fn find(&self, opts: &FindOpts) -> Result<Vec<PlayerServerInfo>, FleetError> {
        if opts.is_empty() {
            return Err(FleetError::EmptyQuery);
        }
        Ok(find_in(&self.snapshot(), opts))
    }

    pub fn find_by_steam_id(&self, steam_id: SteamId) -> Vec<PlayerServerInfo> {
        find_in(&self.snapshot(), &FindOpts::steam_id(steam_id))
    }

    pub fn find_by_ip(&self, ip: IpAddr) -> Vec<PlayerServerInfo> {
        find_in(&self.snapshot(), &FindOpts::ip(ip))
    }

    pub fn find_by_cidr(&self, cidr: IpNetwork) -> Vec<PlayerServerInfo> {
        find_in(&self.snapshot(), &FindOpts::cidr(cidr))
    }

    /// First player whose name contains `name`, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Option<PlayerServerInfo> {
        find_in(&self.snapshot(), &FindOpts::name(name)).into_iter().next()
    }

    /// Finds and acts on one snapshot, so the command reaches the server the
    /// player was seen on.
    pub async fn on_find_exec<F>(&self, opts: &FindOpts, command: F) -> Result<(), FleetError>
    where
        F: Fn(&PlayerServerInfo) -> String,
    {
        let found = self.find(opts)?;
        if found.is_empty() {
            return Err(FleetError::PlayerNotFound);
        }

        let calls = found.iter().map(|info| {
            let cmd = command(info);
            async move { (info.server_id, self.exec_server(info.server_id, &cmd).await) }
        });

        let errors: Vec<String> = join_all(calls)
            .await
            .into_iter()
            .filter_map(|(server_id, result)| match result {
                Ok(_) => None,
                Err(e) => {
                    warn!("Failed to exec on server {}: {}", server_id, e);
                    Some(format!("server {}: {}", server_id, e))
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FleetError::Dispatch {
                failed: errors.len(),
                message: errors.join("; "),
            })
        }
    }
}
