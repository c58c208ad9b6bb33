//! Rulekeeper CLI library.
//!
//! Exposes the argument definitions and command handlers so they can be
//! exercised by integration tests. The binary entry point is `main.rs`.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
