//! Authoritative current snapshot and the monotonic version protocol.
//!
//! The primary host stamps every push with a workspace version. Versions
//! only ever advance: concurrent updates are linearized by the workspace
//! gate and an update presenting a stale version is a defined no-op, not
//! an error. Subscribers learn about applied updates through a broadcast
//! channel, off the gate.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::snapshot::{DocumentId, Snapshot};

/// Default capacity of the change-notification channel.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// How an applied update relates to the previous current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceChangeKind {
	/// Wholesale replacement: a different workspace identity or root path.
	Added,
	/// In-place update of the same workspace.
	Changed,
}

/// Change notification delivered to subscribers after an applied update.
#[derive(Debug, Clone)]
pub struct WorkspaceEvent {
	/// Relation of `new` to `old`.
	pub kind: WorkspaceChangeKind,
	/// The snapshot that was current before the update.
	pub old: Arc<Snapshot>,
	/// The snapshot that is current after the update.
	pub new: Arc<Snapshot>,
	/// The version the workspace advanced to.
	pub version: u64,
}

struct Inner {
	version: u64,
	current: Arc<Snapshot>,
	open_documents: HashSet<DocumentId>,
}

/// Holder of the current snapshot behind a monotonic version counter.
///
/// A live, indefinitely-updated singleton for the process lifetime. The
/// gate is held for O(1) metadata edits only; notification delivery is
/// asynchronous through the broadcast channel, and lagging subscribers
/// drop events rather than block updates.
pub struct WorkspaceState {
	inner: Mutex<Inner>,
	events: broadcast::Sender<WorkspaceEvent>,
}

impl WorkspaceState {
	/// Creates a workspace at version 0 holding `bootstrap` as current.
	pub fn new(bootstrap: Arc<Snapshot>) -> Arc<Self> {
		Self::with_version_floor(bootstrap, 0)
	}

	/// Creates a workspace with a caller-supplied version floor, for hosts
	/// that resume from a previously negotiated version.
	pub fn with_version_floor(bootstrap: Arc<Snapshot>, floor: u64) -> Arc<Self> {
		let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
		Arc::new(Self {
			inner: Mutex::new(Inner {
				version: floor,
				current: bootstrap,
				open_documents: HashSet::new(),
			}),
			events,
		})
	}

	/// Returns the current `(version, snapshot)` pair.
	pub fn current(&self) -> (u64, Arc<Snapshot>) {
		let inner = self.inner.lock();
		(inner.version, Arc::clone(&inner.current))
	}

	/// Subscribes to applied-update notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
		self.events.subscribe()
	}

	/// Installs `snapshot` as current if `version` is strictly newer.
	///
	/// Returns `(snapshot, applied)`. On rejection the returned snapshot is
	/// the caller's unmodified input, not the current value; callers that
	/// need the actual current snapshot read it via [`Self::current`].
	///
	/// An applied update that replaces the workspace wholesale (different
	/// identity or root path) clears the session-local open-document set
	/// before installing the new snapshot.
	pub fn try_advance(&self, version: u64, snapshot: Arc<Snapshot>) -> (Arc<Snapshot>, bool) {
		let event = {
			let mut inner = self.inner.lock();
			if version <= inner.version {
				tracing::trace!(
					requested = version,
					current = inner.version,
					"workspace.advance.rejected"
				);
				return (snapshot, false);
			}

			let old = Arc::clone(&inner.current);
			let replacement = old.workspace_id() != snapshot.workspace_id()
				|| old.root() != snapshot.root();
			if replacement {
				inner.open_documents.clear();
			}
			inner.version = version;
			inner.current = Arc::clone(&snapshot);

			WorkspaceEvent {
				kind: if replacement {
					WorkspaceChangeKind::Added
				} else {
					WorkspaceChangeKind::Changed
				},
				old,
				new: Arc::clone(&snapshot),
				version,
			}
		};

		tracing::debug!(version, kind = ?event.kind, checksum = %event.new.checksum(), "workspace.advance");
		let _ = self.events.send(event);
		(snapshot, true)
	}

	/// Marks a document as open in this session.
	pub fn open_document(&self, id: DocumentId) {
		self.inner.lock().open_documents.insert(id);
	}

	/// Marks a document as closed in this session.
	pub fn close_document(&self, id: DocumentId) {
		self.inner.lock().open_documents.remove(&id);
	}

	/// Returns `true` while the document is tracked as open.
	pub fn is_open(&self, id: DocumentId) -> bool {
		self.inner.lock().open_documents.contains(&id)
	}
}

impl std::fmt::Debug for WorkspaceState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("WorkspaceState")
			.field("version", &inner.version)
			.field("checksum", &inner.current.checksum())
			.field("open_documents", &inner.open_documents.len())
			.finish()
	}
}
