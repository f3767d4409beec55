//! Shared pieces of the `ilotoki` and `ilotoki-server` binaries

pub mod progress;
pub mod server;
