//! Synchronization core of the outpost analysis host.
//!
//! The primary host identifies every complete workspace state by a content
//! [`Checksum`]. This crate turns checksums into shared in-memory
//! [`Snapshot`]s while bounding work to active demand:
//!
//! - [`SnapshotCache`] deduplicates concurrent requests for the same
//!   checksum (single-flight) behind a short-held gate, with two lock-free
//!   "last requested" slots for near-zero-cost repeat hits.
//! - [`PendingComputation`] reference-counts one in-flight production and
//!   cancels it cooperatively when the last reference is released.
//! - [`WorkspaceState`] holds the authoritative current snapshot behind a
//!   monotonic version counter; updates presenting a stale version are a
//!   defined no-op.
//! - [`ComputePipeline`] decides, on a true miss, between an incremental
//!   build off the current baseline and a full synchronization through the
//!   asset-provider collaborator.
//!
//! ```text
//! request (checksum, primary?, version)
//!     │
//!     ▼
//! ┌───────────────┐  slot hit   ┌──────────────────┐
//! │ SnapshotCache │────────────▶│PendingComputation│──▶ await result
//! │ slots → map   │  map hit /  │ (single-flight)  │
//! └───────────────┘  create     └──────────────────┘
//!     │                               │ first reference only
//!     ▼                               ▼
//! update last-requested slots    ComputePipeline
//!     │                          incremental | full rebuild
//!     ▼
//! WorkspaceState::try_advance (primary branch only)
//! ```
//!
//! Transport, RPC surface and the construction details of snapshots
//! themselves live in other crates; the seams to them are the
//! [`AssetProvider`] and [`IncrementalUpdater`] traits.

use std::sync::Arc;

pub mod cache;
pub mod checksum;
pub mod fault;
pub mod pending;
pub mod pipeline;
pub mod service;
pub mod snapshot;
pub mod workspace;

pub use cache::{CacheMetrics, EntryGuard, SnapshotCache};
pub use checksum::Checksum;
pub use fault::{FaultReporter, TracingFaultReporter};
pub use pending::PendingComputation;
pub use pipeline::{AssetProvider, ComputePipeline, IncrementalUpdater};
pub use service::SnapshotService;
pub use snapshot::{DocumentId, DocumentState, ProjectId, ProjectState, Snapshot, WorkspaceId};
pub use workspace::{WorkspaceChangeKind, WorkspaceEvent, WorkspaceState};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// The enum is `Clone` so one production failure can be re-surfaced to
/// every current and future awaiter of the same computation.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The production was cancelled after its last reference was released,
	/// or a collaborator observed the cancellation signal.
	#[error("snapshot computation cancelled")]
	Cancelled,
	/// The asset provider failed to materialize the data behind a checksum.
	#[error("asset synchronization failed: {0}")]
	AssetSync(String),
	/// Snapshot construction from synchronized assets failed.
	#[error("snapshot construction failed: {0}")]
	SnapshotConstruct(String),
	/// The incremental updater accepted a checksum but failed to build it.
	#[error("incremental update failed: {0}")]
	Incremental(String),
}

impl Error {
	/// Returns `true` for the cancellation outcome, which is never reported
	/// as a fault.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Shared outcome of one snapshot production.
pub type ComputeResult = Result<Arc<snapshot::Snapshot>>;
