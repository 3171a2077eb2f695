//! Composite request entry point for the request-handling layer.
//!
//! One [`SnapshotService`] per process ties the cache, the workspace and
//! the production pipeline together. The caller's temporary reference is a
//! scoped acquisition: it is released on every exit path, including caller
//! cancellation and production failure.

use std::sync::Arc;

use crate::Result;
use crate::cache::{CacheMetrics, EntryGuard, SnapshotCache};
use crate::checksum::Checksum;
use crate::fault::FaultReporter;
use crate::pipeline::ComputePipeline;
use crate::snapshot::Snapshot;
use crate::workspace::WorkspaceState;

/// Checksum-to-snapshot resolution service.
pub struct SnapshotService {
	cache: Arc<SnapshotCache>,
	workspace: Arc<WorkspaceState>,
	pipeline: Arc<ComputePipeline>,
}

impl SnapshotService {
	/// Creates a service over the workspace and production pipeline,
	/// reporting production faults to `faults`.
	pub fn new(
		workspace: Arc<WorkspaceState>,
		pipeline: Arc<ComputePipeline>,
		faults: Arc<dyn FaultReporter>,
	) -> Arc<Self> {
		Arc::new(Self {
			cache: SnapshotCache::new(faults),
			workspace,
			pipeline,
		})
	}

	/// Resolves `checksum` to its snapshot.
	///
	/// Deduplicates concurrent requests for the same checksum, records the
	/// result as last-requested, and, for primary-branch requests carrying
	/// a strictly newer `workspace_version`, advances the workspace's
	/// current snapshot.
	pub async fn get_snapshot(
		&self,
		checksum: Checksum,
		is_primary_branch: bool,
		workspace_version: u64,
	) -> Result<Arc<Snapshot>> {
		tracing::trace!(
			%checksum,
			primary = is_primary_branch,
			version = workspace_version,
			"snapshot.request"
		);

		let entry = self.acquire(checksum);
		let snapshot = entry.await_result().await?;

		self.cache.set_last_requested(entry.computation(), is_primary_branch);
		if is_primary_branch {
			self.workspace.try_advance(workspace_version, Arc::clone(&snapshot));
		}
		Ok(snapshot)
	}

	/// Layered acquisition: fast slots, then the map, then creation.
	fn acquire(&self, checksum: Checksum) -> EntryGuard {
		if let Some(entry) = self.cache.try_fast_get(checksum) {
			return entry;
		}

		let pipeline = Arc::clone(&self.pipeline);
		let workspace = Arc::clone(&self.workspace);
		self.cache.get_or_create(checksum, move |cancel| async move {
			// The baseline is the primary snapshot current at production
			// start, not at request arrival.
			let (_, baseline) = workspace.current();
			pipeline.compute(baseline, checksum, cancel).await
		})
	}

	/// Version-gated update, usable independently by a push-style
	/// synchronization channel from the primary host. See
	/// [`WorkspaceState::try_advance`].
	pub fn try_advance_version(&self, version: u64, snapshot: Arc<Snapshot>) -> (Arc<Snapshot>, bool) {
		self.workspace.try_advance(version, snapshot)
	}

	/// Returns the workspace this service updates.
	pub fn workspace(&self) -> &Arc<WorkspaceState> {
		&self.workspace
	}

	/// Returns a point-in-time view of cache traffic.
	pub fn cache_metrics(&self) -> CacheMetrics {
		self.cache.metrics()
	}
}

impl std::fmt::Debug for SnapshotService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SnapshotService")
			.field("cache", &self.cache)
			.field("workspace", &self.workspace)
			.finish()
	}
}

#[cfg(test)]
mod tests;
