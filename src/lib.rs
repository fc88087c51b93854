// src/lib.rs
pub mod anticheat;
pub mod blocklist;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod ports;
pub mod protocol;
pub mod state;
pub mod steamid;
pub mod storage;
pub mod tasks;
pub mod utils;
