//! Immutable workspace snapshots.
//!
//! A [`Snapshot`] is the computed in-memory state for one checksum: the
//! workspace identity, its root path, and the project/document listing.
//! Snapshots are never mutated in place; "updating" the workspace means
//! producing a new snapshot and swapping it in via
//! [`WorkspaceState::try_advance`](crate::workspace::WorkspaceState::try_advance).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::checksum::Checksum;

/// Stable identity of one workspace across snapshot generations.
///
/// Two snapshots with the same `WorkspaceId` and root path describe
/// successive states of the same workspace; a different identity marks a
/// wholesale replacement (the host opened something else entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
	/// Creates a fresh workspace identity.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for WorkspaceId {
	fn default() -> Self {
		Self::new()
	}
}

/// Identity of one project within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectId(Uuid);

impl ProjectId {
	/// Creates a fresh project identity.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ProjectId {
	fn default() -> Self {
		Self::new()
	}
}

/// Identity of one document within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
	/// Creates a fresh document identity.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for DocumentId {
	fn default() -> Self {
		Self::new()
	}
}

/// One document as recorded in a snapshot.
#[derive(Debug, Clone)]
pub struct DocumentState {
	id: DocumentId,
	path: PathBuf,
}

impl DocumentState {
	/// Creates a document record.
	pub fn new(id: DocumentId, path: impl Into<PathBuf>) -> Self {
		Self { id, path: path.into() }
	}

	/// Returns the document identity.
	pub fn id(&self) -> DocumentId {
		self.id
	}

	/// Returns the document path.
	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// One project as recorded in a snapshot.
#[derive(Debug, Clone)]
pub struct ProjectState {
	id: ProjectId,
	name: String,
	documents: Vec<DocumentState>,
}

impl ProjectState {
	/// Creates a project record.
	pub fn new(id: ProjectId, name: impl Into<String>, documents: Vec<DocumentState>) -> Self {
		Self {
			id,
			name: name.into(),
			documents,
		}
	}

	/// Returns the project identity.
	pub fn id(&self) -> ProjectId {
		self.id
	}

	/// Returns the project name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns the documents of this project.
	pub fn documents(&self) -> &[DocumentState] {
		&self.documents
	}
}

/// Immutable computed workspace state for one checksum.
///
/// Freely shared between concurrent readers without locking once produced.
#[derive(Debug)]
pub struct Snapshot {
	workspace_id: WorkspaceId,
	root: PathBuf,
	checksum: Checksum,
	projects: Vec<ProjectState>,
}

impl Snapshot {
	/// Creates a snapshot from fully materialized state.
	pub fn new(
		workspace_id: WorkspaceId,
		root: impl Into<PathBuf>,
		checksum: Checksum,
		projects: Vec<ProjectState>,
	) -> Self {
		Self {
			workspace_id,
			root: root.into(),
			checksum,
			projects,
		}
	}

	/// Creates the empty snapshot a workspace starts from before the first
	/// synchronization with the host.
	pub fn bootstrap(root: impl Into<PathBuf>) -> Arc<Self> {
		Arc::new(Self::new(WorkspaceId::new(), root, Checksum::ZERO, Vec::new()))
	}

	/// Returns the workspace identity.
	pub fn workspace_id(&self) -> WorkspaceId {
		self.workspace_id
	}

	/// Returns the workspace root path.
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Returns the checksum this snapshot was produced for.
	pub fn checksum(&self) -> Checksum {
		self.checksum
	}

	/// Returns the projects of this snapshot.
	pub fn projects(&self) -> &[ProjectState] {
		&self.projects
	}

	/// Looks up one project by identity.
	pub fn project(&self, id: ProjectId) -> Option<&ProjectState> {
		self.projects.iter().find(|p| p.id() == id)
	}
}
