//! Command implementations for the lmsft CLI.

pub mod config;
pub mod fetch;
pub mod model;
pub mod prepare;
pub mod types;
