//! Snapshot production: incremental fast path or full rebuild.
//!
//! On a true cache miss this is the only place that decides between the
//! two production strategies. Both are observably equivalent for the same
//! checksum; the choice affects cost, never the result. The cache layer
//! stays agnostic to which path a checksum took.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::checksum::Checksum;
use crate::snapshot::Snapshot;
use crate::{Error, Result};

/// Fetches and materializes the raw data backing a checksum from the
/// primary host, and constructs snapshots from it.
///
/// `synchronize_assets` must be idempotent and retryable; both methods
/// must observe the cancellation token cooperatively and propagate it into
/// any remote calls they make. A collaborator that ignores the token only
/// delays cleanup, it does not break correctness.
#[async_trait]
pub trait AssetProvider: Send + Sync {
	/// Fully materializes all data needed to build the snapshot for
	/// `checksum`.
	async fn synchronize_assets(&self, checksum: Checksum, cancel: &CancellationToken) -> Result<()>;

	/// Constructs a brand-new snapshot from previously synchronized assets.
	async fn construct_snapshot(
		&self,
		checksum: Checksum,
		cancel: &CancellationToken,
	) -> Result<Arc<Snapshot>>;
}

/// Decides whether a checksum is an incremental successor of a baseline
/// snapshot and materializes the delta when it is.
#[async_trait]
pub trait IncrementalUpdater: Send + Sync {
	/// Returns `true` when `checksum` can be built as a delta off
	/// `baseline`.
	async fn can_build_incrementally(&self, baseline: &Snapshot, checksum: Checksum) -> bool;

	/// Materializes the delta from `baseline` to `checksum`.
	async fn build_incremental(
		&self,
		baseline: Arc<Snapshot>,
		checksum: Checksum,
		cancel: &CancellationToken,
	) -> Result<Arc<Snapshot>>;
}

/// Production strategy glue in front of the collaborators.
pub struct ComputePipeline {
	assets: Arc<dyn AssetProvider>,
	updater: Arc<dyn IncrementalUpdater>,
}

impl ComputePipeline {
	/// Creates a pipeline over the two collaborators.
	pub fn new(assets: Arc<dyn AssetProvider>, updater: Arc<dyn IncrementalUpdater>) -> Arc<Self> {
		Arc::new(Self { assets, updater })
	}

	/// Produces the snapshot for `checksum`, building incrementally off
	/// `baseline` when the updater accepts it, else synchronizing the full
	/// asset set and constructing from scratch.
	pub async fn compute(
		&self,
		baseline: Arc<Snapshot>,
		checksum: Checksum,
		cancel: CancellationToken,
	) -> Result<Arc<Snapshot>> {
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		if self.updater.can_build_incrementally(&baseline, checksum).await {
			tracing::debug!(%checksum, baseline = %baseline.checksum(), "snapshot.compute.incremental");
			return self.updater.build_incremental(baseline, checksum, &cancel).await;
		}

		tracing::debug!(%checksum, "snapshot.compute.full");
		self.assets.synchronize_assets(checksum, &cancel).await?;
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}
		self.assets.construct_snapshot(checksum, &cancel).await
	}
}

impl std::fmt::Debug for ComputePipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComputePipeline").finish_non_exhaustive()
	}
}
