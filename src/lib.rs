//! # Tenant Admin Library
//!
//! Core of the tenant administration service: entities and repositories,
//! account and token services, environment synchronisation and the HTTP API.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod cursor;
pub mod db;
pub mod environment_sync;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod models;
pub mod password;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
