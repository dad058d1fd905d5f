// src/utils/mod.rs
pub mod geo;
pub mod logbook;

pub use logbook::{LogSink, Logbook, TracingSink};
