//! The execution context (§3/§5/§6): shared, process-local resources for a
//! single plan execution.
//!
//! Grounded on the teacher's `ctx::MutableContext`/`Context` split (a
//! cheaply-cloned handle wrapping an `Arc`, with an explicit constructor for
//! deriving a child used by concurrent workers), reduced to the handful of
//! resources this spec actually names: a temp directory, a value comparer,
//! a registry of named temp resources, and a heap allocator factory.
use crate::heap::ExternalHeap;
use crate::value::comparer::Comparer;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A named temp resource registered by `temp-capture` and looked up by
/// `temp-yield` (§4.6). Modeled as an enum (rather than `Box<dyn Any>`) per
/// §9's instruction to avoid opaque any-typed values at the ingress/registry
/// boundary; the window-frame partition reuses the same heap type, so it is
/// exposed as a variant too even though it is never registered under a
/// user-visible name.
pub enum TempResource {
	Heap(Arc<std::sync::Mutex<ExternalHeap>>),
}

impl TempResource {
	pub fn as_heap(&self) -> Option<Arc<std::sync::Mutex<ExternalHeap>>> {
		match self {
			TempResource::Heap(h) => Some(h.clone()),
		}
	}
}

struct Inner {
	temp_dir: Option<PathBuf>,
	comparer: Comparer,
	registry: DashMap<String, TempResource>,
}

/// Process-local handle carrying the resources shared across one plan
/// execution (§3). Cheap to clone: cloning shares the same registry and
/// comparer, it does not fork them.
#[derive(Clone)]
pub struct ExecutionContext(Arc<Inner>);

impl ExecutionContext {
	pub fn new(temp_dir: Option<PathBuf>) -> Self {
		Self(Arc::new(Inner {
			temp_dir,
			comparer: Comparer::new(),
			registry: DashMap::new(),
		}))
	}

	/// An execution context with no temp directory override; heaps spill
	/// (when the `spill` feature is enabled) into a fresh OS temp dir.
	pub fn background() -> Self {
		Self::new(None)
	}

	pub fn comparer(&self) -> &Comparer {
		&self.0.comparer
	}

	pub fn temp_dir(&self) -> Option<&PathBuf> {
		self.0.temp_dir.as_ref()
	}

	/// Allocates a new spillable heap using the context's configured
	/// temp-directory and memory budget (§3 "a factory for allocating
	/// spillable heaps").
	pub fn new_heap(&self) -> ExternalHeap {
		ExternalHeap::with_default_budget(self.0.temp_dir.clone())
	}

	/// Registers a temp resource under `name` (`temp-capture`, §4.6).
	/// Overwrites any resource already registered under the same name.
	pub fn register_temp(&self, name: String, resource: TempResource) {
		self.0.registry.insert(name, resource);
	}

	/// Looks up a temp resource by name (`temp-yield`, §4.6).
	pub fn get_temp(&self, name: &str) -> Option<TempResource> {
		self.0.registry.get(name).map(|e| match e.value() {
			TempResource::Heap(h) => TempResource::Heap(h.clone()),
		})
	}

	/// Forks a context for use by one concurrent staging-pipeline actor
	/// (§5 `PushForConcurrency`): shares the comparer and registry (the
	/// registry is a `DashMap`, safe for concurrent access) but is
	/// otherwise an independent handle, matching the teacher's
	/// `MutableContext::new_concurrent`.
	pub fn push_for_concurrency(&self) -> Self {
		Self(self.0.clone())
	}
}

impl Default for ExecutionContext {
	fn default() -> Self {
		Self::background()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn temp_registry_round_trips_by_name() {
		let ctx = ExecutionContext::background();
		let heap = Arc::new(std::sync::Mutex::new(ctx.new_heap()));
		ctx.register_temp("t0".into(), TempResource::Heap(heap));
		assert!(ctx.get_temp("t0").is_some());
		assert!(ctx.get_temp("missing").is_none());
	}

	#[test]
	fn forked_context_shares_registry() {
		let ctx = ExecutionContext::background();
		let forked = ctx.push_for_concurrency();
		let heap = Arc::new(std::sync::Mutex::new(ctx.new_heap()));
		ctx.register_temp("shared".into(), TempResource::Heap(heap));
		assert!(forked.get_temp("shared").is_some());
	}
}
