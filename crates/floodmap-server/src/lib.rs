//! # floodmap-server
//!
//! HTTP surface and configuration for the elevation tile engine. The
//! binary in `main.rs` wires these modules to a runtime; integration
//! tests drive [`routes::router`] directly.

pub mod config;
pub mod routes;
