pub mod config;
pub mod db;
pub mod deployment;
pub mod orchestrator;
mod request_logging;
pub mod system;
