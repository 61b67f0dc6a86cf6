//! VirtVault - Backend Library
//!
//! Backup chain and retention engine for VM and container backups.

pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
