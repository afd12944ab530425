//! flowline worker process.
//!
//! Hosts the flow engine: Postgres persistence, the CRM directory adapter,
//! HTTP notification delivery and configuration.

pub mod config;
pub mod db;
pub mod directory;
pub mod notifier;
