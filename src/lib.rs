pub mod cli;
pub mod commands;
pub mod digest;
pub mod env_loader;
pub mod error;
pub mod logging;
