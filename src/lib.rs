//! RVOL discovery and scoring engine.
//!
//! Each cycle takes one bulk market snapshot, computes relative volume
//! against stored baselines, enriches RVOL-qualified symbols with bounded
//! fan-out, scores them with dynamically reweighted subscores, and publishes
//! a ranked candidate list.

pub mod api;
pub mod baseline_refresh;
pub mod config;
pub mod cycle;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod providers;
pub mod rvol;
pub mod scorer;
pub mod state;
pub mod static_source;
pub mod types;
