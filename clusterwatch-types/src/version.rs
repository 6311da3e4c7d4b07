//! Snapshot layout version.

use std::fmt;

use crate::SCHEMA_VERSION;

/// Minor revision of the snapshot layout written by this crate.
pub const SCHEMA_MINOR: u32 = 0;

/// Layout version stamped on every [`Snapshot`](crate::Snapshot).
///
/// History entries are read long after they were written, possibly by a
/// different build. Readers accept any entry sharing their major version;
/// a minor bump only ever adds optional fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct SchemaVersion {
    /// Bumped when a field is removed or changes meaning.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub major: u32,

    /// Bumped when an optional field is added.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The layout this build writes.
    pub const fn current() -> Self {
        Self::new(SCHEMA_VERSION, SCHEMA_MINOR)
    }

    /// Whether this build can read a snapshot written with this layout.
    pub fn is_compatible(&self) -> bool {
        self.major == SCHEMA_VERSION
    }

    /// Whether the layout comes from a newer build. Such snapshots are
    /// still readable if compatible; unknown fields are ignored.
    pub fn is_newer(&self) -> bool {
        *self > Self::current()
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
