use std::fmt;

/// Content digest identifying one complete requested workspace state.
///
/// Checksums are produced by the primary host over the full set of projects,
/// sources and options; this side treats them as opaque map keys with total
/// equality and no ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
	/// The all-zero checksum used by bootstrap snapshots.
	pub const ZERO: Self = Self([0; 32]);

	/// Wraps a raw digest received from the host.
	pub const fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	/// Returns the raw digest bytes.
	pub const fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

impl fmt::Display for Checksum {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for byte in &self.0 {
			write!(f, "{byte:02x}")?;
		}
		Ok(())
	}
}

impl fmt::Debug for Checksum {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Checksum(")?;
		for byte in &self.0[..4] {
			write!(f, "{byte:02x}")?;
		}
		write!(f, "..)")
	}
}
