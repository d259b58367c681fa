//! Error types.

use thiserror::Error;

use crate::map::MapType;

/// Result type for fallible tree, map and sharded-map operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by mutating and allocating operations.
///
/// A missing key is not an error: lookups return `Option` and deletions
/// return `bool`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The allocator refused a reservation (node slots, shards or string
    /// bytes).
    #[error("allocation failed: could not reserve {requested} elements")]
    Alloc { requested: usize },

    /// Fixed storage is full, or the node index space is used up.
    #[error("storage exhausted at {capacity} node slots")]
    CapacityExhausted { capacity: usize },

    /// A sharded map needs at least one shard.
    #[error("shard count must be at least 1")]
    ZeroShards,

    /// The key or value variant does not fit the map's type tag.
    #[error("key or value does not fit map type {map_type:?}")]
    TypeMismatch { map_type: MapType },
}

/// A broken structural invariant, as reported by the `verify` checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("slot {index} breaks in-order key ordering")]
    Unordered { index: u32 },

    #[error("root slot {index} is red")]
    RedRoot { index: u32 },

    #[error("red slot {index} has a red child")]
    RedRedLink { index: u32 },

    #[error("black height differs below slot {index}: {left} vs {right}")]
    BlackHeight { index: u32, left: usize, right: usize },

    #[error("slot {index} links to {target}, which is not a live slot")]
    DanglingIndex { index: u32, target: u32 },

    #[error("tree reaches {reachable} nodes but tracks {tracked}")]
    CountMismatch { reachable: usize, tracked: usize },

    #[error("shard {shard} has type {found:?}, expected {expected:?}")]
    MixedShardTypes {
        shard: usize,
        expected: MapType,
        found: MapType,
    },

    #[error("key in shard {shard} routes to shard {routed}")]
    Misrouted { shard: usize, routed: usize },
}
