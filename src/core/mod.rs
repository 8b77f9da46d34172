//! Relay core: configuration, the LiveShare room relay and process wiring

pub mod config;
pub mod liveshare;
pub mod server;
