// src/lib.rs
//! roadlog-core: GPS fixes in, monthly trip history out.
//!
//! raw fixes -> TripDetector (SampleBuffer inside) -> Store journal
//!           -> summarizer (trips) -> TripArchiver -> monthly history buckets

pub mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod services;
pub mod utils;

pub use error::{CoreError, CoreResult};
