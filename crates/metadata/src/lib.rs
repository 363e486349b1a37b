//! wflink-metadata: configuration types for the platform connectivity layer
//!
//! Everything is loaded from a single YAML document; every field has a
//! default so a partial file (or none at all) yields a working setup.

pub mod error;
pub mod settings;

pub use error::SettingsError;
pub use settings::{
    AuthConfig, MonitorConfig, PlatformConfig, PoolsConfig, ReconnectConfig, SearchConfig,
    Settings, ThreadKind,
};
