//! Checksum-addressed snapshot cache.
//!
//! Two tiers: a pair of lock-free "last requested" slots for the common
//! case of repeat queries against the same checksum, and the gated map as
//! the source of truth for everything else. The gate is held only for O(1)
//! metadata edits, never across production awaits.
//!
//! Lookup layering is slot → map → create. A slot miss (including the
//! benign died-between-load-and-reference race) falls through to the map
//! probe rather than straight to creation, so a stale slot never causes a
//! duplicate production.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ComputeResult;
use crate::checksum::Checksum;
use crate::fault::FaultReporter;
use crate::pending::PendingComputation;

/// Point-in-time counters describing cache traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
	/// Hits served from a last-requested slot without taking the gate.
	pub slot_hits: u64,
	/// Hits served from the map under the gate.
	pub map_hits: u64,
	/// True misses that started a new production.
	pub productions: u64,
	/// Entries evicted by refcount-to-zero cleanup.
	pub evictions: u64,
}

#[derive(Debug, Default)]
struct MetricCells {
	slot_hits: AtomicU64,
	map_hits: AtomicU64,
	productions: AtomicU64,
	evictions: AtomicU64,
}

impl MetricCells {
	fn snapshot(&self) -> CacheMetrics {
		CacheMetrics {
			slot_hits: self.slot_hits.load(Ordering::Relaxed),
			map_hits: self.map_hits.load(Ordering::Relaxed),
			productions: self.productions.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
		}
	}
}

/// Reference-counted cache of in-flight and completed snapshot productions.
///
/// # Concurrency
///
/// - `entries`: the gate. Serializes check-then-insert (single-flight),
///   refcount mutation, zero-transition cleanup and slot replacement.
/// - `last_any` / `last_primary`: lock-free slot loads for the fast path;
///   stores happen only under the gate. Each slot pins one reference,
///   counted in its occupant's refcount.
pub struct SnapshotCache {
	entries: Mutex<HashMap<Checksum, Arc<PendingComputation>>>,
	last_any: ArcSwapOption<PendingComputation>,
	last_primary: ArcSwapOption<PendingComputation>,
	metrics: MetricCells,
	faults: Arc<dyn FaultReporter>,
}

impl SnapshotCache {
	/// Creates an empty cache reporting production failures to `faults`.
	pub fn new(faults: Arc<dyn FaultReporter>) -> Arc<Self> {
		Arc::new(Self {
			entries: Mutex::new(HashMap::new()),
			last_any: ArcSwapOption::const_empty(),
			last_primary: ArcSwapOption::const_empty(),
			metrics: MetricCells::default(),
			faults,
		})
	}

	/// Fast lookup against the last-requested slots, falling through to the
	/// map under the gate. Returns `None` on total miss.
	///
	/// Slot loads take no lock; the occupant is re-validated with
	/// [`PendingComputation::try_add_ref`] since it may have died between
	/// the load and the reference-add. That race is expected and resolves
	/// as a miss.
	pub fn try_fast_get(self: &Arc<Self>, checksum: Checksum) -> Option<EntryGuard> {
		for slot in [&self.last_any, &self.last_primary] {
			if let Some(held) = slot.load_full() {
				if held.checksum() == checksum && held.try_add_ref() {
					self.metrics.slot_hits.fetch_add(1, Ordering::Relaxed);
					return Some(EntryGuard::new(Arc::clone(self), held));
				}
			}
		}

		let entries = self.entries.lock();
		let entry = entries.get(&checksum)?;
		entry.add_ref();
		self.metrics.map_hits.fetch_add(1, Ordering::Relaxed);
		Some(EntryGuard::new(Arc::clone(self), Arc::clone(entry)))
	}

	/// Returns the computation for `checksum`, starting one on a true miss.
	///
	/// The gate serializes the check-then-insert, so two concurrent misses
	/// for the same checksum never both construct a computation.
	pub fn get_or_create<F, Fut>(self: &Arc<Self>, checksum: Checksum, produce: F) -> EntryGuard
	where
		F: FnOnce(CancellationToken) -> Fut,
		Fut: Future<Output = ComputeResult> + Send + 'static,
	{
		let mut entries = self.entries.lock();
		if let Some(entry) = entries.get(&checksum) {
			entry.add_ref();
			self.metrics.map_hits.fetch_add(1, Ordering::Relaxed);
			return EntryGuard::new(Arc::clone(self), Arc::clone(entry));
		}

		let entry = PendingComputation::new(checksum, produce, Arc::clone(&self.faults));
		entries.insert(checksum, Arc::clone(&entry));
		self.metrics.productions.fetch_add(1, Ordering::Relaxed);
		tracing::trace!(%checksum, "snapshot.cache.create");
		EntryGuard::new(Arc::clone(self), entry)
	}

	/// Records `entry` as the most recently requested computation, pinning
	/// it in the any-branch slot and, for primary-branch requests, in the
	/// primary slot as well.
	///
	/// The new occupant's reference is acquired strictly before the old
	/// occupant's is released, so replacing a slot with its current
	/// occupant never dips the refcount to zero in between.
	pub fn set_last_requested(&self, entry: &Arc<PendingComputation>, primary_branch: bool) {
		let mut entries = self.entries.lock();

		entry.add_ref();
		let previous = self.last_any.swap(Some(Arc::clone(entry)));
		if let Some(previous) = previous {
			self.release_locked(&mut entries, &previous);
		}

		if primary_branch {
			entry.add_ref();
			let previous = self.last_primary.swap(Some(Arc::clone(entry)));
			if let Some(previous) = previous {
				self.release_locked(&mut entries, &previous);
			}
		}
	}

	/// Releases one reference under the gate, running zero-transition
	/// cleanup if it was the last.
	fn release(&self, entry: &Arc<PendingComputation>) {
		let mut entries = self.entries.lock();
		self.release_locked(&mut entries, entry);
	}

	fn release_locked(
		&self,
		entries: &mut HashMap<Checksum, Arc<PendingComputation>>,
		entry: &Arc<PendingComputation>,
	) {
		if !entry.release_ref() {
			return;
		}

		// Last reference gone: cancel the production and evict the map
		// entry, unless a successor for the same checksum already replaced
		// this instance.
		entry.cancel();
		let checksum = entry.checksum();
		if entries.get(&checksum).is_some_and(|current| Arc::ptr_eq(current, entry)) {
			entries.remove(&checksum);
			self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
			tracing::trace!(%checksum, "snapshot.cache.evict");
		}
	}

	/// Number of checksums currently mapped.
	pub fn active_count(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns a point-in-time view of the traffic counters.
	pub fn metrics(&self) -> CacheMetrics {
		self.metrics.snapshot()
	}

	#[cfg(test)]
	fn mapped_entries(&self) -> Vec<Arc<PendingComputation>> {
		self.entries.lock().values().cloned().collect()
	}
}

impl std::fmt::Debug for SnapshotCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SnapshotCache")
			.field("active", &self.active_count())
			.field("metrics", &self.metrics.snapshot())
			.finish()
	}
}

/// Scoped acquisition of one cache entry.
///
/// Holds one counted reference to a [`PendingComputation`]; dropping the
/// guard releases it under the gate on every exit path of the holder,
/// including cancellation and failure.
pub struct EntryGuard {
	cache: Arc<SnapshotCache>,
	entry: Option<Arc<PendingComputation>>,
}

impl EntryGuard {
	fn new(cache: Arc<SnapshotCache>, entry: Arc<PendingComputation>) -> Self {
		Self { cache, entry: Some(entry) }
	}

	/// Returns the underlying computation handle.
	pub fn computation(&self) -> &Arc<PendingComputation> {
		self.entry.as_ref().expect("entry guard accessed after release")
	}

	/// Returns the checksum this guard pins.
	pub fn checksum(&self) -> Checksum {
		self.computation().checksum()
	}

	/// Waits for the shared production outcome. See
	/// [`PendingComputation::await_result`].
	pub async fn await_result(&self) -> ComputeResult {
		self.computation().await_result().await
	}
}

impl Drop for EntryGuard {
	fn drop(&mut self) {
		if let Some(entry) = self.entry.take() {
			self.cache.release(&entry);
		}
	}
}

impl std::fmt::Debug for EntryGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EntryGuard").field("entry", &self.entry).finish()
	}
}
