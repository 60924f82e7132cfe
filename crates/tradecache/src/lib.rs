//! A coalescing, TTL-bound cache in front of the dashboard's sub-account
//! futures history endpoints.
//!
//! The interesting parts live in [`caching`] (the coalescing cache core) and
//! [`history`] (query normalization and the [`HistoryService`](history::HistoryService)
//! facade). [`fetch`] talks to the upstream API.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod fetch;
pub mod history;
pub mod logging;
