// LogScope - lib.rs
//
// Library entry point. The binary in `main.rs` is a thin CLI over the
// `app` layer; everything else is reachable here for integration testing
// and programmatic use.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
