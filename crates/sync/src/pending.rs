//! Single-flight, reference-counted snapshot production.
//!
//! One [`PendingComputation`] exists per checksum in the cache map at any
//! instant. The explicit refcount, not `Arc` reachability, decides when the
//! underlying production is cancelled: `Arc` clones of the handle may
//! outlive the logical lifetime (stale slot loads, late awaiters), but once
//! the count reaches zero the handle is dead and must never be revived.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::checksum::Checksum;
use crate::fault::FaultReporter;
use crate::{ComputeResult, Error};

/// Reference-counted handle around one asynchronous snapshot production.
///
/// # Ownership contract
///
/// - Created with a count of 1, owned by the creating caller.
/// - [`add_ref`](Self::add_ref) and [`release_ref`](Self::release_ref)
///   require the cache gate; [`try_add_ref`](Self::try_add_ref) is the
///   gate-free variant that re-validates liveness.
/// - The count reaching zero is final. Cleanup (cancelling the production,
///   evicting the map entry) is the cache's gate-serialized responsibility.
pub struct PendingComputation {
	checksum: Checksum,
	refs: AtomicU32,
	cancel: CancellationToken,
	result: watch::Receiver<Option<ComputeResult>>,
}

impl PendingComputation {
	/// Starts producing the snapshot for `checksum` immediately on the
	/// current runtime. Construction never blocks or suspends.
	///
	/// `produce` receives a child of this computation's cancellation token
	/// and must observe it cooperatively. A non-cancellation failure is
	/// reported once through `faults` before being published to awaiters.
	pub(crate) fn new<F, Fut>(checksum: Checksum, produce: F, faults: Arc<dyn FaultReporter>) -> Arc<Self>
	where
		F: FnOnce(CancellationToken) -> Fut,
		Fut: Future<Output = ComputeResult> + Send + 'static,
	{
		let cancel = CancellationToken::new();
		let (tx, rx) = watch::channel(None);

		let fut = produce(cancel.child_token());
		let task_cancel = cancel.clone();
		tokio::spawn(async move {
			let outcome = match task_cancel.run_until_cancelled(fut).await {
				Some(outcome) => outcome,
				None => Err(Error::Cancelled),
			};
			match &outcome {
				Ok(snapshot) => {
					tracing::trace!(%checksum, root = ?snapshot.root(), "snapshot.compute.done");
				}
				Err(err) if err.is_cancelled() => {
					tracing::trace!(%checksum, "snapshot.compute.cancelled");
				}
				Err(err) => faults.report(err),
			}
			// Receivers treat a dropped sender as cancellation, so a panic
			// in `produce` degrades to the cancelled outcome for awaiters.
			let _ = tx.send(Some(outcome));
		});

		Arc::new(Self {
			checksum,
			refs: AtomicU32::new(1),
			cancel,
			result: rx,
		})
	}

	/// Returns the checksum this computation produces.
	pub fn checksum(&self) -> Checksum {
		self.checksum
	}

	/// Current reference count. Observational only.
	pub fn ref_count(&self) -> u32 {
		self.refs.load(Ordering::Acquire)
	}

	/// Returns `true` once the production has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Increments the refcount. Caller must hold the cache gate.
	///
	/// # Panics
	///
	/// Panics if the count already reached zero: a dead handle must never
	/// be re-referenced through the gated path.
	pub(crate) fn add_ref(&self) {
		let prev = self.refs.fetch_add(1, Ordering::AcqRel);
		assert!(prev > 0, "pending computation revived after refcount reached zero");
	}

	/// Gate-free increment that fails once the count has reached zero.
	///
	/// Used when a handle was found outside the gate (a fast slot load) and
	/// must be re-validated before it can be trusted. A `false` return is
	/// the expected benign race, handled by falling back to the gated path.
	pub(crate) fn try_add_ref(&self) -> bool {
		self.refs
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
				(refs > 0).then_some(refs + 1)
			})
			.is_ok()
	}

	/// Decrements the refcount and reports whether it reached zero. Caller
	/// must hold the cache gate and, on `true`, run zero-transition cleanup
	/// while still holding it.
	///
	/// # Panics
	///
	/// Panics on a release without a matching reference.
	pub(crate) fn release_ref(&self) -> bool {
		let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
		assert!(prev > 0, "pending computation released more often than referenced");
		prev == 1
	}

	/// Requests cooperative cancellation of the production task.
	pub(crate) fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Waits for the shared production outcome.
	///
	/// Every holder observes the same snapshot or the same failure,
	/// regardless of arrival order. Abandoning this wait does not cancel
	/// the shared production; only the refcount reaching zero does.
	pub async fn await_result(&self) -> ComputeResult {
		let mut rx = self.result.clone();
		loop {
			{
				let published = rx.borrow_and_update();
				if let Some(outcome) = published.as_ref() {
					return outcome.clone();
				}
			}
			if rx.changed().await.is_err() {
				return Err(Error::Cancelled);
			}
		}
	}
}

impl std::fmt::Debug for PendingComputation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingComputation")
			.field("checksum", &self.checksum)
			.field("refs", &self.ref_count())
			.field("cancelled", &self.is_cancelled())
			.finish()
	}
}
