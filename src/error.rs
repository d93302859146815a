//! Crate-wide error types and `Result` alias.

// std
use std::{error::Error as StdError, fmt, sync::Arc};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Boxed loader-supplied error, the only shape the cache requires from a loader.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Unified error type for the loading cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
	/// A loader failed, or a bulk loader's result was incomplete for one or more keys.
	#[error(transparent)]
	Load(#[from] CacheLoaderException),

	/// `current_entry` was accessed on a [`crate::context::LoaderContext`] after its load span
	/// ended.
	#[error("current entry accessed outside the loader's active span")]
	InactiveContext,

	/// An async loader's callback was invoked a second time for the same load.
	#[error("loader callback already completed for this load")]
	DoubleCompletion,

	/// The cache has been closed and no longer accepts new operations.
	#[error("cache is closed")]
	Closed,

	/// No loader is configured for the cache, but an operation required one.
	#[error("no loader configured")]
	NoLoader,

	/// A constructor or builder argument failed validation.
	#[error("invalid configuration for {field}: {reason}")]
	Configuration {
		/// Name of the offending configuration field.
		field: &'static str,
		/// Human-readable explanation of the violated constraint.
		reason: String,
	},

	/// A caller-supplied argument was invalid (e.g. an empty key set).
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
}

/// Wraps a loader's original throwable, matching the "N out of M" interop contract external
/// tooling pattern-matches against.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CacheLoaderException {
	message: String,
	cause: Arc<dyn StdError + Send + Sync + 'static>,
}
impl CacheLoaderException {
	/// Wrap a single-key loader failure.
	pub fn single(cause: impl StdError + Send + Sync + 'static) -> Self {
		Self { message: cause.to_string(), cause: Arc::new(cause) }
	}

	/// Wrap a single-key loader failure that has already been type-erased into a [`BoxError`].
	pub fn single_boxed(cause: BoxError) -> Self {
		Self { message: cause.to_string(), cause: Arc::from(cause) }
	}

	/// Wrap a loader failure that already carries an explicit message, preserving `cause`
	/// separately (used for synthetic failures the cache itself raises, e.g. missing keys).
	pub fn with_message(message: impl Into<String>, cause: impl StdError + Send + Sync + 'static) -> Self {
		Self { message: message.into(), cause: Arc::new(cause) }
	}

	/// Build the aggregate envelope for a multi-key failure where both the failure count and the
	/// total request size are meaningful, e.g. `3 out of 3`.
	pub fn aggregate(failed: usize, total: usize, cause: impl StdError + Send + Sync + 'static) -> Self {
		Self { message: format!("{failed} out of {total}"), cause: Arc::new(cause) }
	}

	/// Build the aggregate envelope from a cause that has already been type-erased into a
	/// [`BoxError`].
	pub fn aggregate_boxed(failed: usize, total: usize, cause: BoxError) -> Self {
		Self { message: format!("{failed} out of {total}"), cause: Arc::from(cause) }
	}

	/// Build the aggregate envelope where only a failure count is meaningful.
	pub fn count_only(failed: usize, cause: impl StdError + Send + Sync + 'static) -> Self {
		Self { message: failed.to_string(), cause: Arc::new(cause) }
	}

	/// The original loader throwable this envelope wraps.
	pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
		&*self.cause
	}

	/// Share the underlying cause without cloning the wrapped error.
	pub fn cause_arc(&self) -> Arc<dyn StdError + Send + Sync + 'static> {
		self.cause.clone()
	}
}

/// Synthetic cause used when a bulk loader omits a requested key from its result mapping.
#[derive(Debug, Clone)]
pub struct MissingKeyError;
impl fmt::Display for MissingKeyError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "key requested but absent from the loader's result mapping")
	}
}
impl StdError for MissingKeyError {}

/// Synthetic cause used when a bulk loader fails the whole batch and leaves some keys
/// uncovered by a partial `onLoadSuccess(map)`.
#[derive(Debug, Clone)]
pub struct PartialResultError;
impl fmt::Display for PartialResultError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "partial result, key missing")
	}
}
impl StdError for PartialResultError {}

/// Synthetic cause used when a loader returns a null/None value and nulls are not permitted.
#[derive(Debug, Clone)]
pub struct NullValueError;
impl fmt::Display for NullValueError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "loader returned no value and null values are not permitted")
	}
}
impl StdError for NullValueError {}
