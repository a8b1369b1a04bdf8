pub mod api;
pub mod config;
pub mod db;
pub mod devices;
pub mod error;
pub mod export;
pub mod logs;
pub mod monitor;
pub mod polling;
pub mod readings;
pub mod status;
pub mod status_cache;
pub mod timefmt;
