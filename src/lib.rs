#![forbid(unsafe_code)]

//! feedtube turns video platform channels into podcast-style RSS feeds.
//!
//! Sources are listed through yt-dlp, reconciled into a local SQLite store,
//! kept fresh by background loops, and published as `{source_id}.rss` files.
//! Media bytes are either redirected to or relayed from the resolved upstream
//! URL.

pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod feed;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod proxy;
pub mod reconcile;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
