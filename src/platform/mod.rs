// LogScope - platform/mod.rs
//
// Platform abstraction layer: directories, config.toml, file access.
// Dependencies: util, core model types.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
