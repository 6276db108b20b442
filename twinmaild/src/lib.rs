pub mod auth;
mod config;
pub mod federation;
pub mod server;
pub mod storage;

pub use self::config::Config;
