//! WakaTime CLI Library
//!
//! Command line heartbeat agent: turns editor events into heartbeats, sends
//! them to the WakaTime api and keeps undelivered ones in an offline queue.

pub mod api;
pub mod cli;
pub mod config;
pub mod constants;
pub mod dependencies;
pub mod entity;
pub mod heartbeat;
pub mod language;
pub mod logger;
pub mod manager;
pub mod ntlm;
pub mod project;
pub mod queue;
pub mod redact;
pub mod session_cache;
pub mod stats;
pub mod user_agent;

// Re-export commonly used types for easier access
pub use api::ApiClient;
pub use cli::Cli;
pub use config::Settings;
pub use heartbeat::{Heartbeat, HeartbeatInput};
pub use manager::HeartbeatManager;
pub use queue::Queue;
