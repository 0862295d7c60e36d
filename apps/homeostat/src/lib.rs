//! # homeostat
//!
//! The daemon around `homeostat-core`: scheduler, audit writer, HTTP API,
//! CLI and configuration. Exposed as a library so integration tests can
//! build the router without a socket.

pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod scheduler;
