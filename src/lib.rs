#![forbid(unsafe_code)]

//! Session orchestration and supervision for sandboxed coding agents.

pub mod api;
pub mod bridge;
pub mod config;
pub mod environment;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod ports;
pub mod runner;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
