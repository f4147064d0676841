// Public API - backend connector, type bridge, and the wire server
pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod telemetry;

#[cfg(test)]
mod integ_tests;
