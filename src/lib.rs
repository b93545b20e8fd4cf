pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod http;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod service;
pub mod wal;
