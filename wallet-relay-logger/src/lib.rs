//! Process-wide `tracing` setup shared by the wallet relay binaries.

pub mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};
