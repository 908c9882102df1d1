pub mod api;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod settings;
pub mod types;

// Re-export common types
pub use cluster::{AutoscaleHandler, ElectionEngine, ExecutionDeadline};
pub use config::Config;
pub use error::AutoscaleError;
pub use platform::{CloudPlatform, MemoryPlatform};
