//! rmsync-core — shared types, resource vectors, and `rmsync.toml` parsing.

pub mod config;
pub mod error;
pub mod limits;
pub mod resources;
pub mod types;

pub use config::{
    JobConfig, LicenseConfig, NodeConfig, PartitionConfig, RmConfig, RmFlag, SchedulerConfig,
    SchedulerSection, parse_duration,
};
pub use error::{ConfigError, ConfigResult};
pub use limits::{CredentialLimits, NodeLimits, SchedulerDefaults};
pub use resources::Resources;
pub use types::*;
