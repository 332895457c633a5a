// LogScope - app/mod.rs
//
// Application layer: worker orchestration, the entry store, analysis runs,
// profile and preset management.
// Dependencies: core, platform.

pub mod analysis;
pub mod coordinator;
pub mod ingest;
pub mod presets;
pub mod profile_mgr;
pub mod store;
