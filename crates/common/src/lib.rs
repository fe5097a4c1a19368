pub mod config;
pub mod db;
pub mod error;
pub mod ports;
pub mod types;

pub use config::{
    CadenceConfig, Config, EntryConfig, ExitConfig, IntegrationConfig, TradingConfig,
};
pub use db::open_database;
pub use error::{Error, Result};
pub use ports::{DescriptorStore, LedgerSink, MarketSource};
pub use types::*;
