pub mod query;
pub mod rcon;
pub mod status;

use async_trait::async_trait;
use std::time::Duration;

use self::query::{QueryError, ServerInfo};
use self::rcon::RconError;

/// Text command channel to a single server (the console protocol).
#[async_trait]
pub trait ConsoleClient: Send + Sync {
    async fn exec(&self, addr: &str, password: &str, cmd: &str, timeout: Duration) -> Result<String, RconError>;
}

/// Unauthenticated metadata query against a single server.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn info(&self, addr: &str, timeout: Duration) -> Result<ServerInfo, QueryError>;
}
