// src/state/dispatch.rs
use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;

use super::query::FindOpts;
use super::Fleet;
use crate::error::FleetError;
use crate::protocol::rcon::RconError;
use crate::steamid::SteamId;

/// Per-server result of a fanned out command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum ExecOutcome {
    Response(String),
    Failed(String),
}

impl ExecOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecOutcome::Response(_))
    }
}

impl Fleet {
    pub async fn exec_raw(&self, addr: &str, password: &str, cmd: &str) -> Result<String, RconError> {
        debug!("Executing {:?} on {}", cmd, addr);
        self.console().exec(addr, password, cmd, self.settings.exec_timeout).await
    }

    pub async fn exec_server(&self, server_id: i32, cmd: &str) -> Result<String, FleetError> {
        let config = self.resolve_config(server_id).await?;
        Ok(self.exec_raw(&config.addr(), &config.rcon_password, cmd).await?)
    }

    /// Runs `cmd` on every listed server at once. An empty list targets every
    /// enabled server. Failures land in their server's slot.
    pub async fn broadcast(&self, server_ids: &[i32], cmd: &str) -> BTreeMap<i32, ExecOutcome> {
        let targets: Vec<i32> = if server_ids.is_empty() {
            self.configs().iter().map(|c| c.server_id).collect()
        } else {
            server_ids.to_vec()
        };

        let calls = targets.into_iter().map(|server_id| async move {
            let outcome = match self.exec_server(server_id, cmd).await {
                Ok(resp) => ExecOutcome::Response(resp),
                Err(e) => {
                    warn!("Command failed on server {}: {}", server_id, e);
                    ExecOutcome::Failed(e.to_string())
                }
            };
            (server_id, outcome)
        });

        join_all(calls).await.into_iter().collect()
    }

    pub async fn say(&self, server_id: i32, message: &str) -> Result<String, FleetError> {
        self.exec_server(server_id, &format!("sm_say {}", message)).await
    }

    pub async fn csay(&self, server_id: i32, message: &str) -> Result<String, FleetError> {
        self.exec_server(server_id, &format!("sm_csay {}", message)).await
    }

    /// Private message to a player wherever they are connected.
    pub async fn psay(&self, steam_id: SteamId, message: &str) -> Result<(), FleetError> {
        let message = message.to_string();
        self.on_find_exec(&FindOpts::steam_id(steam_id), move |info| {
            format!(r##"sm_psay "#{}" "{}""##, info.player.steam_id.steam2(), message)
        })
        .await
    }

    pub async fn kick(&self, steam_id: SteamId, reason: &str) -> Result<(), FleetError> {
        let reason = reason.to_string();
        self.on_find_exec(&FindOpts::steam_id(steam_id), move |info| {
            format!("sm_kick #{} {}", info.player.user_id, reason)
        })
        .await
    }

    /// Kicks by session user id on one server, without consulting the snapshot.
    pub async fn kick_player_id(&self, server_id: i32, user_id: i32, reason: &str) -> Result<String, FleetError> {
        self.exec_server(server_id, &format!("sm_kick #{} {}", user_id, reason)).await
    }

    pub async fn silence(&self, steam_id: SteamId, reason: &str) -> Result<(), FleetError> {
        let reason = reason.to_string();
        self.on_find_exec(&FindOpts::steam_id(steam_id), move |info| {
            format!(r##"sm_silence "#{}" {}"##, info.player.steam_id.steam2(), reason)
        })
        .await
    }
}
