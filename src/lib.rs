//! In-process loading cache core: single-flight loads, bulk fan-in/out, resilience-aware stale
//! serving, and refresh-ahead over an arbitrary key/value pair.
//!
//! This crate implements the loading and resilience behavior only; eviction, idle scanning,
//! expiry-timer scheduling, persistence, statistics collection, and configuration-file parsing
//! are left to collaborating crates.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod loader;
pub mod resilience;
pub mod result_handle;

mod bulk;
mod dispatch;
mod executor;
mod refresh;

mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use tokio::time::Instant;

	pub use crate::error::{CacheError, Result};
}

pub use crate::{
	cache::{EntryView, LoadingCache},
	config::{CacheBuilder, CacheConfig},
	context::{CurrentEntry, LoaderContext},
	error::{BoxError, CacheError, CacheLoaderException, Result},
	loader::{BulkCallback, Loader, SingleCallback},
	resilience::ResiliencePolicy,
	result_handle::ResultHandle,
};
