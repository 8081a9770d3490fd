pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod store;
pub mod tls;
pub mod wal;
pub mod wire;
