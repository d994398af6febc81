//! Bootstrap module for initializing the streamgate edge
//!
//! This module handles:
//! - Configuration loading
//! - Redis connection setup
//! - Service initialization and backend selection

pub mod config;
pub mod connection;
pub mod services;

pub use config::{load_config, log_config_summary};
pub use connection::{connect_redis, ping_redis};
pub use services::{init_services, Services};
