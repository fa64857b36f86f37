pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, EntityEntry, RunConfig, Whitelist};
pub use error::MarketBriefError;
pub use types::*;
