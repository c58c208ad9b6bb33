//! Command handlers -- one module per subcommand

pub mod config;
pub mod detections;
pub mod integrity;
pub mod rules;
pub mod status;
