//! Bootstrap module for initializing the relay
//!
//! This module handles:
//! - Configuration loading
//! - Service initialization and dependency injection

pub mod config;
pub mod services;

pub use config::{load_config, load_config_from};
pub use services::{init_services, Services};
