#![forbid(unsafe_code)]

pub mod config;
pub mod documents;
pub mod errors;
pub mod http;
pub mod models;
pub mod platform;
pub mod watcher;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
