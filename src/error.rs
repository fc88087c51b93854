use thiserror::Error;

use crate::protocol::rcon::RconError;

/// Failure reported by a collaborator store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate record")]
    Duplicate,
    #[error("record not found")]
    NotFound,
    #[error("store failure: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("unknown server id: {0}")]
    UnknownServerId(i32),
    #[error("player not found")]
    PlayerNotFound,
    #[error("invalid steam id")]
    InvalidSteamId,
    #[error("at least one search criterion is required")]
    EmptyQuery,
    #[error("invalid log address: {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Rcon(#[from] RconError),
    #[error("command failed on {failed} server(s): {message}")]
    Dispatch { failed: usize, message: String },
}
