//! Rulekeeper daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `rulekeeper-daemon` is used as a binary (main.rs).

pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
