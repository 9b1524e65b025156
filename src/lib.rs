pub mod app;
pub mod bag;
pub mod config;
pub mod domain;
pub mod erddap;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod metadata;
pub mod months;
pub mod output;
pub mod store;
