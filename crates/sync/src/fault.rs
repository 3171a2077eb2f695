//! Process-wide fault reporting.
//!
//! Production failures are reported exactly once per computation through an
//! injected [`FaultReporter`] before being re-surfaced to every awaiter.
//! The reporter is a trait object rather than a global so tests can swap in
//! a recording implementation.

use crate::Error;

/// Sink for non-cancellation production failures.
pub trait FaultReporter: Send + Sync {
	/// Reports one production failure.
	fn report(&self, error: &Error);
}

/// Default reporter that logs faults through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultReporter;

impl FaultReporter for TracingFaultReporter {
	fn report(&self, error: &Error) {
		tracing::error!(%error, "snapshot.compute.fault");
	}
}
