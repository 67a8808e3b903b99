//! Multi-bureau credit score aggregation service.
//!
//! Fans out score requests to four simulated credit bureaus, consolidates
//! the responses into a weighted score, and keeps a persistent score cache
//! healthy through write-through updates and a background repair job.

pub mod aggregator;
pub mod cache_repair;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod models;
pub mod providers;
pub mod scoring;
pub mod store;
