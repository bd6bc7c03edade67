//! taskflow - task manager core
//!
//! An optimistic task cache over a remote store, kept honest by a live
//! change feed, plus an AI gateway that prefers a trusted proxy and falls
//! back to calling the provider directly.

pub mod ai;
pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod format;
pub mod live;
pub mod models;
pub mod session;
pub mod store;
