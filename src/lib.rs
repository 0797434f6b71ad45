pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod output;
pub mod resolver;
pub mod session;

#[cfg(test)]
mod integration_tests;

pub use error::*;
pub use models::*;
