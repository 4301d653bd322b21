pub mod models;
pub mod config;
pub mod error;
pub mod db;
pub mod cache;
pub mod logging;
pub mod uptime;
pub mod probe;
pub mod notify;
pub mod store;
pub mod queue;
pub mod check;
pub mod instances;

pub use config::Config;
pub use error::{Error, Result};
