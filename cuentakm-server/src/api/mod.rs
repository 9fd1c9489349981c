//! HTTP API handlers

pub mod agents;
pub mod health;
pub mod readings;
pub mod ui;

pub use agents::{agent_routes, list_agents};
pub use health::health_routes;
pub use readings::{list_readings, reading_routes, reading_status, submit_reading};
pub use ui::serve_index;
