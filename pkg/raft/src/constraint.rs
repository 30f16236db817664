//! Thin wrapper types that turn an easy-to-forget ordering requirement into
//! something the type system tracks: a reply carrying a term bump or cast
//! vote must not go out until that mutation is durable.

/// Wraps a value that must not be sent out until the metadata mutation that
/// produced it (a term bump, a cast vote) has been durably persisted. The
/// only way to get at the inner value is `persisted()`, which is meant to be
/// called immediately after the corresponding `PersistentState` write
/// completes — there is no way to verify that mechanically, so this is a
/// documentation device as much as a type-level one.
pub struct MustPersistMetadata<T> {
	inner: T,
}

impl<T> MustPersistMetadata<T> {
	pub fn new(inner: T) -> Self {
		MustPersistMetadata { inner }
	}

	pub fn persisted(self) -> T {
		self.inner
	}
}
