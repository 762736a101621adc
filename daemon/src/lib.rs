//! Process memory/CPU sampling, CSV logging and per-name reporting.

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod primer;
pub mod protocol;
pub mod ranking;
pub mod sampler;
pub mod server;
pub mod sink;
