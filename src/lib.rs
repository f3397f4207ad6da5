//! Prep Server Library
//!
//! Relay between a browser and an external preprocessing job. Clients
//! stream files in chunks over a WebSocket, pick processing steps, submit,
//! and fetch the packaged results over HTTP.
//!
//! # Modules
//!
//! - `upload`: chunk reassembly, per-connection sessions, job execution
//! - `protocol`: WebSocket message types and per-connection dispatch
//! - `routes`: axum routers

pub mod config;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod upload;
