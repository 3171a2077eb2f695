use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::pipeline::{AssetProvider, IncrementalUpdater};
use crate::snapshot::WorkspaceId;
use crate::workspace::WorkspaceChangeKind;
use crate::{ComputeResult, Error};

fn checksum(fill: u8) -> Checksum {
	Checksum::from_bytes([fill; 32])
}

struct MockAssets {
	workspace_id: WorkspaceId,
	sync_calls: AtomicUsize,
	fail_next_sync: AtomicBool,
	block_sync: AtomicBool,
	gate: Notify,
}

impl MockAssets {
	fn new(workspace_id: WorkspaceId) -> Self {
		Self {
			workspace_id,
			sync_calls: AtomicUsize::new(0),
			fail_next_sync: AtomicBool::new(false),
			block_sync: AtomicBool::new(false),
			gate: Notify::new(),
		}
	}
}

#[async_trait]
impl AssetProvider for MockAssets {
	async fn synchronize_assets(&self, _checksum: Checksum, _cancel: &CancellationToken) -> crate::Result<()> {
		self.sync_calls.fetch_add(1, Ordering::SeqCst);
		if self.block_sync.load(Ordering::SeqCst) {
			self.gate.notified().await;
		}
		if self.fail_next_sync.swap(false, Ordering::SeqCst) {
			return Err(Error::AssetSync("synthetic host failure".into()));
		}
		Ok(())
	}

	async fn construct_snapshot(&self, checksum: Checksum, _cancel: &CancellationToken) -> ComputeResult {
		Ok(Arc::new(Snapshot::new(self.workspace_id, Path::new("/ws"), checksum, Vec::new())))
	}
}

struct MockUpdater {
	accept: AtomicBool,
	incremental_calls: AtomicUsize,
	last_baseline: Mutex<Option<Checksum>>,
}

impl MockUpdater {
	fn new() -> Self {
		Self {
			accept: AtomicBool::new(false),
			incremental_calls: AtomicUsize::new(0),
			last_baseline: Mutex::new(None),
		}
	}
}

#[async_trait]
impl IncrementalUpdater for MockUpdater {
	async fn can_build_incrementally(&self, _baseline: &Snapshot, _checksum: Checksum) -> bool {
		self.accept.load(Ordering::SeqCst)
	}

	async fn build_incremental(
		&self,
		baseline: Arc<Snapshot>,
		checksum: Checksum,
		_cancel: &CancellationToken,
	) -> ComputeResult {
		self.incremental_calls.fetch_add(1, Ordering::SeqCst);
		*self.last_baseline.lock() = Some(baseline.checksum());
		Ok(Arc::new(Snapshot::new(
			baseline.workspace_id(),
			baseline.root(),
			checksum,
			Vec::new(),
		)))
	}
}

struct CountingReporter(AtomicUsize);

impl crate::FaultReporter for CountingReporter {
	fn report(&self, _error: &Error) {
		self.0.fetch_add(1, Ordering::SeqCst);
	}
}

struct Harness {
	service: Arc<SnapshotService>,
	assets: Arc<MockAssets>,
	updater: Arc<MockUpdater>,
	faults: Arc<CountingReporter>,
}

fn harness() -> Harness {
	let assets = Arc::new(MockAssets::new(WorkspaceId::new()));
	let updater = Arc::new(MockUpdater::new());
	let faults = Arc::new(CountingReporter(AtomicUsize::new(0)));
	let workspace = WorkspaceState::new(Snapshot::bootstrap("/ws"));
	let pipeline = ComputePipeline::new(assets.clone(), updater.clone());
	let service = SnapshotService::new(workspace, pipeline, faults.clone());
	Harness {
		service,
		assets,
		updater,
		faults,
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_production_until_retired() {
	let h = harness();
	let c1 = checksum(1);
	let c2 = checksum(2);

	h.assets.block_sync.store(true, Ordering::SeqCst);
	let mut callers = Vec::new();
	for _ in 0..3 {
		let service = Arc::clone(&h.service);
		callers.push(tokio::spawn(async move { service.get_snapshot(c1, false, 0).await }));
	}

	tokio::time::sleep(Duration::from_millis(50)).await;
	h.assets.block_sync.store(false, Ordering::SeqCst);
	h.assets.gate.notify_one();

	let mut snapshots = Vec::new();
	for caller in callers {
		snapshots.push(caller.await.unwrap().unwrap());
	}
	assert_eq!(h.assets.sync_calls.load(Ordering::SeqCst), 1);
	assert!(Arc::ptr_eq(&snapshots[0], &snapshots[1]));
	assert!(Arc::ptr_eq(&snapshots[0], &snapshots[2]));

	// Displace the any-branch slot so nothing pins the first checksum,
	// then request it again: the retired computation is gone and a fresh
	// production runs.
	h.service.get_snapshot(c2, false, 0).await.unwrap();
	h.service.get_snapshot(c1, false, 0).await.unwrap();
	assert_eq!(h.assets.sync_calls.load(Ordering::SeqCst), 3);
	assert!(h.service.cache_metrics().evictions >= 1);
}

#[tokio::test]
async fn repeat_request_is_served_from_the_fast_slot() {
	let h = harness();
	let c1 = checksum(1);

	h.service.get_snapshot(c1, false, 0).await.unwrap();
	h.service.get_snapshot(c1, false, 0).await.unwrap();

	let metrics = h.service.cache_metrics();
	assert_eq!(h.assets.sync_calls.load(Ordering::SeqCst), 1);
	assert_eq!(metrics.productions, 1);
	assert_eq!(metrics.slot_hits, 1);
}

#[tokio::test]
async fn failed_production_is_reported_once_and_retryable() {
	let h = harness();
	let c1 = checksum(1);

	h.assets.fail_next_sync.store(true, Ordering::SeqCst);
	let outcome = h.service.get_snapshot(c1, false, 0).await;
	assert!(matches!(outcome, Err(Error::AssetSync(_))));
	assert_eq!(h.faults.0.load(Ordering::SeqCst), 1);

	// The failed computation retired with the caller's reference, so the
	// retry starts from scratch and succeeds.
	assert_eq!(h.service.cache_metrics().evictions, 1);
	let snapshot = h.service.get_snapshot(c1, false, 0).await.unwrap();
	assert_eq!(snapshot.checksum(), c1);
	assert_eq!(h.assets.sync_calls.load(Ordering::SeqCst), 2);
	assert_eq!(h.faults.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn incremental_path_builds_off_the_current_primary() {
	let h = harness();
	let c1 = checksum(1);
	let c2 = checksum(2);

	let first = h.service.get_snapshot(c1, true, 1).await.unwrap();
	assert_eq!(h.assets.sync_calls.load(Ordering::SeqCst), 1);

	h.updater.accept.store(true, Ordering::SeqCst);
	let second = h.service.get_snapshot(c2, true, 2).await.unwrap();

	assert_eq!(h.updater.incremental_calls.load(Ordering::SeqCst), 1);
	assert_eq!(*h.updater.last_baseline.lock(), Some(c1));
	assert_eq!(h.assets.sync_calls.load(Ordering::SeqCst), 1);
	assert_eq!(second.workspace_id(), first.workspace_id());

	let (version, current) = h.service.workspace().current();
	assert_eq!(version, 2);
	assert!(Arc::ptr_eq(&current, &second));
}

#[tokio::test]
async fn only_primary_branch_requests_advance_the_workspace() {
	let h = harness();

	h.service.get_snapshot(checksum(1), false, 7).await.unwrap();
	assert_eq!(h.service.workspace().current().0, 0);

	h.service.get_snapshot(checksum(2), true, 7).await.unwrap();
	assert_eq!(h.service.workspace().current().0, 7);
}

#[tokio::test]
async fn stale_push_never_regresses_the_workspace() {
	let h = harness();

	let newer = h.service.get_snapshot(checksum(1), true, 5).await.unwrap();
	let (returned, applied) = h.service.try_advance_version(3, Arc::clone(&newer));
	assert!(!applied);
	assert!(Arc::ptr_eq(&returned, &newer));

	let (version, current) = h.service.workspace().current();
	assert_eq!(version, 5);
	assert!(Arc::ptr_eq(&current, &newer));
}

#[tokio::test]
async fn first_applied_snapshot_is_announced_as_added() {
	let h = harness();
	let mut events = h.service.workspace().subscribe();

	h.service.get_snapshot(checksum(1), true, 1).await.unwrap();
	let event = events.recv().await.unwrap();
	assert_eq!(event.kind, WorkspaceChangeKind::Added);

	h.service.get_snapshot(checksum(2), true, 2).await.unwrap();
	let event = events.recv().await.unwrap();
	assert_eq!(event.kind, WorkspaceChangeKind::Changed);
}
