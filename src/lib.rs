//! Arcasys - Marketing Event Archive
//!
//! TigerStyle: Simulation-first services behind narrow traits.
//!
//! Staff register and wait for an administrator's approval, then record
//! marketing events with their department, tags and social links.
//! Administrators also take PostgreSQL backups, ship them to object storage,
//! and restore the database from any completed backup.
//!
//! # Layout
//!
//! - [`accounts`], [`events`]: the domain services
//! - [`backup`], [`restore`]: database dumps and restores
//! - [`storage`], [`objstore`], [`mail`]: external systems behind traits
//! - [`http`]: the axum API

pub mod accounts;
pub mod backup;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod mail;
pub mod models;
pub mod objstore;
pub mod restore;
pub mod storage;

/// Application name
pub const APP_NAME: &str = "arcasys";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
