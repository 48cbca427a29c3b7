pub mod alert;
pub mod analytics;
pub mod app;
pub mod binance;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod feed;
pub mod ingest;
pub mod model;
pub mod resample;
pub mod server;
pub mod store;
