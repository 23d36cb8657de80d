//! Configuration Module
//!
//! Environment-driven settings for the sync layer.

mod settings;

pub use settings::{ApiSettings, ConfigError, StreamSettings, SyncConfig, load_dotenv};
