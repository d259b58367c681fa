//! # stree-rs
//!
//! Ordered containers built on an index-addressed red-black tree.
//!
//! - [`Tree`]: a red-black tree whose nodes live in one contiguous array and
//!   link to each other by 32-bit slot index instead of pointer. Nodes carry
//!   no parent link; the descent path is kept on a small stack while
//!   rebalancing.
//! - [`Map`]: a tree of key/value entries whose pairing (integer or string
//!   keys; integer, string or opaque values) is chosen at runtime by a
//!   [`MapType`] tag.
//! - [`ShardedMap`]: a fixed set of [`Map`]s with keys routed to one of them
//!   by a pluggable function. [`LockedShardedMap`] puts each shard behind
//!   its own lock for shared use across threads.
//!
//! ## Example
//!
//! ```rust
//! use stree::{Map, MapType, ShardedMap, Value};
//!
//! let mut map = Map::new(MapType::StrInt);
//! map.insert("apples", 3i64).unwrap();
//! map.increment("apples", 2).unwrap();
//! assert_eq!(map.get("apples"), Some(Value::Int(5)));
//!
//! let mut shards = ShardedMap::new(MapType::IntStr, 4, 1000).unwrap();
//! shards.insert(42i64, "answer").unwrap();
//! assert_eq!(shards.get(42i64), Some(Value::Str(b"answer")));
//! assert!(shards.route(42i64) < shards.shard_count());
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod debug;
pub mod dmap;
pub mod error;
pub mod locked;
pub mod map;
pub mod tree;

pub use dmap::{Config, IntRouter, ShardedMap, StrRouter};
pub use error::{Error, Result, Violation};
pub use locked::LockedShardedMap;
pub use map::{Key, Map, MapType, MapVisit, Opaque, Value};
pub use tree::{Comparator, Node, NodeIndex, Order, StorageMode, Tree, Visit, NIL};

#[cfg(test)]
mod proptests;
