// LogScope - core/mod.rs
//
// Core business logic layer.
// Pure logic over Read/Write trait objects; never touches the filesystem.
// Must NOT depend on: platform, app.

pub mod anomaly;
pub mod chunk;
pub mod export;
pub mod filter;
pub mod index;
pub mod model;
pub mod parser;
pub mod preset;
pub mod profile;
pub mod timeline;
