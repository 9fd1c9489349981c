//! # Cuentakm Common Library
//!
//! Shared code for the odometer reading service:
//! - Database schema and models (agents, readings)
//! - Configuration loading and root folder resolution
//! - ISO week and closing-day helpers
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
