pub mod anticheat;
pub mod person;
pub mod server;
