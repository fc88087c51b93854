// src/storage/mod.rs
pub mod memory;
