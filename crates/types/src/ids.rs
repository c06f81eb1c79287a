//! Type-safe identifier newtypes.
//!
//! Server ids and generation counters are both plain `u32`s on the
//! wire, which makes them easy to mix up in code that handles both.
//! Each gets its own newtype so the compiler keeps them apart.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a numeric type for type-safe
/// identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `srv:3`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <$inner as std::str::FromStr>::Err;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a cluster member.
    ///
    /// Assigned by the topology layer when a server is first
    /// discovered and stable for the lifetime of that topology. Ids
    /// are never reused: once a server is removed, its id stays
    /// retired, so the absence of an id from a snapshot unambiguously
    /// means the server is gone.
    ///
    /// # Display
    ///
    /// Formats with `srv:` prefix: `srv:3`.
    ServerId, u32, "srv"
);

define_id!(
    /// Per-server invalidation counter.
    ///
    /// Incremented each time a server's recorded identity is
    /// invalidated without its id changing (for example, a member
    /// that was torn down and re-provisioned under the same id). A
    /// connection stamped with an older generation than the current
    /// record is stale even though the id still matches.
    ///
    /// # Display
    ///
    /// Formats with `gen:` prefix: `gen:5`.
    Generation, u32, "gen"
);

impl Generation {
    /// The generation a freshly discovered server starts at.
    pub const INITIAL: Generation = Generation::new(0);

    /// Returns the next generation.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_display() {
        assert_eq!(ServerId::new(3).to_string(), "srv:3");
        assert_eq!(Generation::new(5).to_string(), "gen:5");
    }

    #[test]
    fn server_id_ordering() {
        let mut ids = vec![ServerId::new(4), ServerId::new(1), ServerId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![ServerId::new(1), ServerId::new(2), ServerId::new(4)]);
    }

    #[test]
    fn generation_next() {
        assert_eq!(Generation::INITIAL.next(), Generation::new(1));
        assert_eq!(Generation::new(5).next(), Generation::new(6));
    }

    #[test]
    fn serde_transparent() {
        let id = ServerId::new(42);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "42");
        let back: ServerId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn parse_roundtrip() {
        let id: ServerId = "7".parse().expect("parse");
        assert_eq!(id, ServerId::new(7));
        assert!("srv:7".parse::<ServerId>().is_err());
    }
}
