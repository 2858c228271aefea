pub mod config;
pub mod keys;
pub mod types;

pub use config::SyncdConfig;
pub use keys::SyncTargetKeys;
pub use types::*;
