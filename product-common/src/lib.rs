pub mod app;
pub mod config;
pub mod diff;
pub mod feed;
pub mod health;
pub mod metrics;
pub mod prices;
pub mod product;
pub mod schedule;
pub mod sink;
pub mod store;
