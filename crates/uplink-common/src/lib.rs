//! Shared types for the Uplink failover daemon.
//!
//! This crate contains:
//! - **Data models** — members, metric samples, scores, events, health states
//! - **Configuration** — TOML config parsing and validation
//! - **Metrics rendering** — Prometheus text exposition of a status snapshot

pub mod config;
pub mod metrics;
pub mod models;
