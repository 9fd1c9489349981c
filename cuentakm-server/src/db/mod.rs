//! Query layer for agents and readings
//!
//! Schema creation lives in `cuentakm_common::db::init`.

pub mod agents;
pub mod readings;
