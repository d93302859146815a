//! C3: runs a single key through whichever loader shape the cache was configured with, folding
//! the synchronous and asynchronous single-key loader shapes into one `Future`-returning call so
//! that the bulk coordinator and the direct `get` path can share it.

// self
use crate::{
	context::LoaderContext,
	error::CacheLoaderException,
	loader::{Loader, SingleCallback},
};

/// Run a single-key (non-bulk) loader for `key`, returning its outcome.
///
/// Panics if `loader` is one of the bulk shapes; callers route bulk loaders through
/// [`crate::bulk::run_bulk`] instead.
pub(crate) async fn run_single<K, V>(
	loader: &Loader<K, V>,
	key: K,
	context: LoaderContext<K, V>,
) -> Result<V, CacheLoaderException>
where
	K: Clone + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	match loader {
		Loader::Sync(f) => {
			let f = f.clone();
			let result = f(&key, &context);

			context.deactivate();

			result.map_err(|cause| CacheLoaderException::single_boxed(cause))
		},
		Loader::Async(f) => {
			let (callback, receiver) = SingleCallback::new();

			f(&key, &context, callback);

			let outcome = receiver.await.unwrap_or_else(|_| {
				Err(CacheLoaderException::with_message(
					"loader callback dropped without completing",
					CallbackDropped,
				))
			});

			context.deactivate();

			outcome
		},
		Loader::SyncBulk(_) | Loader::AsyncBulk(_) =>
			unreachable!("bulk loaders are dispatched through run_bulk, not run_single"),
	}
}

#[derive(Debug, Clone)]
struct CallbackDropped;
impl std::fmt::Display for CallbackDropped {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "async loader dropped its callback before completing")
	}
}
impl std::error::Error for CallbackDropped {}

#[cfg(test)]
mod tests {
	// std
	use std::sync::Arc;
	// self
	use super::*;

	#[tokio::test]
	async fn sync_loader_runs_inline() {
		let loader: Loader<u32, u32> = Loader::Sync(Arc::new(|k: &u32, _ctx| Ok(k * 2)));
		let ctx = LoaderContext::new(5u32, None, false, tokio::time::Instant::now());

		let result = run_single(&loader, 5u32, ctx).await;
		assert_eq!(result.unwrap(), 10);
	}

	#[tokio::test]
	async fn async_loader_awaits_callback() {
		let loader: Loader<u32, u32> = Loader::Async(Arc::new(|k: &u32, _ctx, callback: SingleCallback<u32>| {
			let value = *k + 1;
			tokio::spawn(async move {
				let _ = callback.on_load_success(value);
			});
		}));
		let ctx = LoaderContext::new(5u32, None, false, tokio::time::Instant::now());

		let result = run_single(&loader, 5u32, ctx).await;
		assert_eq!(result.unwrap(), 6);
	}
}
