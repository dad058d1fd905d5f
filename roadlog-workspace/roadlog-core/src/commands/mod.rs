// src/commands/mod.rs
pub mod init;
mod api;

pub use api::{Commands, IngestReport};

pub use init::{InitReport, data_root, ensure_initialized};
