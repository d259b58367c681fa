//! Shared-access sharded map.
//!
//! [`LockedShardedMap`] wraps each shard of a [`ShardedMap`] in its own
//! [`RwLock`], so operations on keys routed to different shards never
//! contend. Routing is fixed once the map is locked; unlock it with
//! [`into_inner`](LockedShardedMap::into_inner) to change routers.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::dmap::{IntRouter, ShardedMap, StrRouter};
use crate::error::{Result, Violation};
use crate::map::{Key, Map, MapType, Value};

/// A [`ShardedMap`] usable through `&self` from many threads.
pub struct LockedShardedMap {
    shards: Box<[RwLock<Map>]>,
    /// Entries across all shards.
    len: AtomicUsize,
    map_type: MapType,
    int_route: IntRouter,
    str_route: StrRouter,
}

impl ShardedMap {
    /// Put every shard behind its own lock.
    pub fn into_locked(self) -> LockedShardedMap {
        LockedShardedMap::new(self)
    }
}

impl LockedShardedMap {
    pub fn new(map: ShardedMap) -> Self {
        let map_type = map.map_type();
        let len = map.len();
        let (maps, int_route, str_route) = map.into_parts();
        Self {
            shards: maps.into_vec().into_iter().map(RwLock::new).collect(),
            len: AtomicUsize::new(len),
            map_type,
            int_route,
            str_route,
        }
    }

    /// Take the shards back out of their locks.
    pub fn into_inner(self) -> ShardedMap {
        let maps: Box<[Map]> = self
            .shards
            .into_vec()
            .into_iter()
            .map(RwLock::into_inner)
            .collect();
        ShardedMap::from_parts(maps, self.int_route, self.str_route)
    }

    fn shard_of(&self, key: Key<'_>) -> usize {
        let n = self.shards.len();
        match key {
            Key::Str(s) => (self.str_route)(s, n) % n,
            Key::I32(k) => (self.int_route)(i64::from(k), n) % n,
            Key::U32(k) => (self.int_route)(i64::from(k), n) % n,
            Key::Int(k) => (self.int_route)(k, n) % n,
        }
    }

    /// Run `op` on the shard owning `key` under its write lock, keeping the
    /// shared entry count in step.
    fn write_shard<R>(&self, key: Key<'_>, op: impl FnOnce(&mut Map) -> R) -> R {
        let mut map = self.shards[self.shard_of(key)].write();
        let before = map.len();
        let out = op(&mut *map);
        let after = map.len();
        if after > before {
            self.len.fetch_add(after - before, Ordering::Relaxed);
        } else if before > after {
            self.len.fetch_sub(before - after, Ordering::Relaxed);
        }
        out
    }

    pub fn insert<'k, 'v>(&self, key: impl Into<Key<'k>>, value: impl Into<Value<'v>>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.write_shard(key, |m| m.insert(key, value))
    }

    pub fn replace<'k, 'v>(&self, key: impl Into<Key<'k>>, value: impl Into<Value<'v>>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.write_shard(key, |m| m.replace(key, value))
    }

    pub fn increment<'k>(&self, key: impl Into<Key<'k>>, delta: i64) -> Result<()> {
        let key = key.into();
        self.write_shard(key, |m| m.increment(key, delta))
    }

    pub fn remove<'k>(&self, key: impl Into<Key<'k>>) -> bool {
        let key = key.into();
        self.write_shard(key, |m| m.remove(key))
    }

    pub fn remove_with<'k, F>(&self, key: impl Into<Key<'k>>, teardown: F) -> bool
    where
        F: FnOnce(Key<'_>, Value<'_>),
    {
        let key = key.into();
        self.write_shard(key, |m| m.remove_with(key, teardown))
    }

    /// Look up `key` and hand the value to `f` while the shard's read lock
    /// is held.
    pub fn get_with<'k, R, F>(&self, key: impl Into<Key<'k>>, f: F) -> R
    where
        F: FnOnce(Option<Value<'_>>) -> R,
    {
        let key = key.into();
        let map = self.shards[self.shard_of(key)].read();
        f(map.get(key))
    }

    /// Integer value for `key`, if present and integer-typed.
    pub fn get_int<'k>(&self, key: impl Into<Key<'k>>) -> Option<i64> {
        self.get_with(key, |v| v.and_then(Value::as_int))
    }

    /// Copy of the string value for `key`, if present and string-typed.
    pub fn get_str<'k>(&self, key: impl Into<Key<'k>>) -> Option<Vec<u8>> {
        self.get_with(key, |v| v.and_then(Value::as_str).map(<[u8]>::to_vec))
    }

    pub fn contains<'k>(&self, key: impl Into<Key<'k>>) -> bool {
        let key = key.into();
        self.shards[self.shard_of(key)].read().contains(key)
    }

    /// Read-lock shard `index` for the duration of `f`.
    pub fn with_shard<R>(&self, index: usize, f: impl FnOnce(&Map) -> R) -> R {
        f(&*self.shards[index].read())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn map_type(&self) -> MapType {
        self.map_type
    }

    /// Empty every shard, one lock at a time.
    pub fn reset(&self) {
        for shard in self.shards.iter() {
            let mut map = shard.write();
            self.len.fetch_sub(map.len(), Ordering::Relaxed);
            map.reset();
        }
    }

    /// Check each shard under its read lock.
    pub fn verify(&self) -> std::result::Result<(), Violation> {
        for (shard, lock) in self.shards.iter().enumerate() {
            let map = lock.read();
            if map.map_type() != self.map_type {
                return Err(Violation::MixedShardTypes {
                    shard,
                    expected: self.map_type,
                    found: map.map_type(),
                });
            }
            map.verify()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LockedShardedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedShardedMap")
            .field("map_type", &self.map_type)
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}
