pub mod audit;
pub mod config;
pub mod generation;
pub mod graph;
pub mod message;
pub mod oracle;
pub mod orchestrator;
pub mod paths;
pub mod prompt;
pub mod repair;
pub mod store;
pub mod util;
pub mod window;
