pub mod auth;
pub mod calendar;
pub mod catalog;
pub mod command;
pub mod compactor;
pub mod config;
pub mod devices;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod wal;
pub mod wire;
