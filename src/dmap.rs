//! In-process sharded map.
//!
//! A [`ShardedMap`] owns a fixed number of [`Map`]s ("shards") of the same
//! [`MapType`] and sends each key to one of them through a routing function.
//! Each shard is a smaller, shallower tree, and a separate contention domain
//! for callers that put one lock around each shard (see
//! [`crate::locked`]). The shard array is exposed directly for callers that
//! want to iterate or parallelize per shard.
//!
//! Routers can be replaced at any time, but entries inserted under the old
//! routing are only findable under the new one if both agree on their shard.
//! [`ShardedMap::verify_routing`] detects entries left in the wrong shard.

use tracing::{debug, warn};

use crate::error::{Error, Result, Violation};
use crate::map::{Key, Map, MapType, Value};
use crate::tree::StorageMode;

/// Maps an integer key and the shard count to a shard index.
pub type IntRouter = fn(i64, usize) -> usize;

/// Maps a string key and the shard count to a shard index.
pub type StrRouter = fn(&[u8], usize) -> usize;

/// Bytes of a string key the default router looks at.
pub const STR_ROUTE_PREFIX: usize = 16;

/// Default integer router: the key, as unsigned, modulo the shard count.
/// A shard count of 0 routes to 0.
pub fn default_int_route(key: i64, shards: usize) -> usize {
    if shards == 0 {
        return 0;
    }
    (key as u64 % shards as u64) as usize
}

/// Default string router.
///
/// Only a partition has to be picked, so a checksum of the first
/// [`STR_ROUTE_PREFIX`] bytes is enough. Keys sharing that prefix always land
/// on the same shard. A shard count of 0 routes to 0.
pub fn default_str_route(key: &[u8], shards: usize) -> usize {
    if shards == 0 {
        return 0;
    }
    let h = checksum32(&key[..key.len().min(STR_ROUTE_PREFIX)]);
    (h / 2).wrapping_add(h) as usize % shards
}

/// FNV-1a over `bytes`, folded to 32 bits. Every byte reaches the low bits.
fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash ^ (hash >> 32)) as u32
}

/// Construction parameters for a [`ShardedMap`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of shards. Fixed for the map's life; must be at least 1.
    pub shard_count: usize,
    /// Total entries to reserve, split evenly (plus one) across shards.
    pub initial_reserve: usize,
    /// Storage mode of every shard.
    pub storage: StorageMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: 8,
            initial_reserve: 1024,
            storage: StorageMode::Growable,
        }
    }
}

/// A key space partitioned across independent [`Map`]s.
pub struct ShardedMap {
    maps: Box<[Map]>,
    int_route: IntRouter,
    str_route: StrRouter,
}

impl ShardedMap {
    /// `shard_count` growable shards, each reserving
    /// `initial_reserve / shard_count + 1` entries.
    pub fn new(map_type: MapType, shard_count: usize, initial_reserve: usize) -> Result<Self> {
        Self::with_config(
            map_type,
            Config {
                shard_count,
                initial_reserve,
                ..Config::default()
            },
        )
    }

    /// Allocate every shard or none: on failure the shards built so far are
    /// released before the error is returned.
    pub fn with_config(map_type: MapType, config: Config) -> Result<Self> {
        let shards = config.shard_count;
        if shards == 0 {
            return Err(Error::ZeroShards);
        }
        let per_shard = config.initial_reserve / shards + 1;
        let mut maps = Vec::new();
        maps.try_reserve_exact(shards)
            .map_err(|_| Error::Alloc { requested: shards })?;
        for shard in 0..shards {
            match Map::with_storage(map_type, per_shard, config.storage) {
                Ok(map) => maps.push(map),
                Err(e) => {
                    warn!(shard, shards, error = %e, "shard allocation failed, releasing built shards");
                    return Err(e);
                }
            }
        }
        debug!(?map_type, shards, per_shard, "allocated sharded map");
        Ok(Self {
            maps: maps.into_boxed_slice(),
            int_route: default_int_route,
            str_route: default_str_route,
        })
    }

    /// Deep copy of every shard, keeping the routers. All or nothing, like
    /// [`with_config`](Self::with_config).
    pub fn try_clone(&self) -> Result<Self> {
        let shards = self.maps.len();
        let mut maps = Vec::new();
        maps.try_reserve_exact(shards)
            .map_err(|_| Error::Alloc { requested: shards })?;
        for (shard, map) in self.maps.iter().enumerate() {
            match map.try_clone() {
                Ok(copy) => maps.push(copy),
                Err(e) => {
                    warn!(shard, shards, error = %e, "shard copy failed, releasing copied shards");
                    return Err(e);
                }
            }
        }
        debug!(map_type = ?self.map_type(), shards, "duplicated sharded map");
        Ok(Self {
            maps: maps.into_boxed_slice(),
            int_route: self.int_route,
            str_route: self.str_route,
        })
    }

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------

    /// Replace either router; `None` restores the default.
    pub fn set_routing(&mut self, int_route: Option<IntRouter>, str_route: Option<StrRouter>) {
        self.int_route = int_route.unwrap_or(default_int_route);
        self.str_route = str_route.unwrap_or(default_str_route);
    }

    #[inline]
    pub fn int_route(&self, key: i64) -> usize {
        let n = self.maps.len();
        (self.int_route)(key, n) % n
    }

    #[inline]
    pub fn str_route(&self, key: &[u8]) -> usize {
        let n = self.maps.len();
        (self.str_route)(key, n) % n
    }

    /// Shard index for `key`, always in `0..shard_count()`.
    pub fn route<'k>(&self, key: impl Into<Key<'k>>) -> usize {
        match key.into() {
            Key::Str(s) => self.str_route(s),
            Key::I32(k) => self.int_route(i64::from(k)),
            Key::U32(k) => self.int_route(i64::from(k)),
            Key::Int(k) => self.int_route(k),
        }
    }

    pub fn submap<'k>(&self, key: impl Into<Key<'k>>) -> &Map {
        &self.maps[self.route(key)]
    }

    pub fn submap_mut<'k>(&mut self, key: impl Into<Key<'k>>) -> &mut Map {
        let shard = self.route(key);
        &mut self.maps[shard]
    }

    // -------------------------------------------------------------------------
    // Forwarded entry operations
    // -------------------------------------------------------------------------

    pub fn insert<'k, 'v>(&mut self, key: impl Into<Key<'k>>, value: impl Into<Value<'v>>) -> Result<()> {
        let key = key.into();
        self.submap_mut(key).insert(key, value)
    }

    pub fn replace<'k, 'v>(&mut self, key: impl Into<Key<'k>>, value: impl Into<Value<'v>>) -> Result<()> {
        let key = key.into();
        self.submap_mut(key).replace(key, value)
    }

    pub fn increment<'k>(&mut self, key: impl Into<Key<'k>>, delta: i64) -> Result<()> {
        let key = key.into();
        self.submap_mut(key).increment(key, delta)
    }

    pub fn get<'k>(&self, key: impl Into<Key<'k>>) -> Option<Value<'_>> {
        let key = key.into();
        self.submap(key).get(key)
    }

    pub fn contains<'k>(&self, key: impl Into<Key<'k>>) -> bool {
        let key = key.into();
        self.submap(key).contains(key)
    }

    pub fn remove<'k>(&mut self, key: impl Into<Key<'k>>) -> bool {
        let key = key.into();
        self.submap_mut(key).remove(key)
    }

    pub fn remove_with<'k, F>(&mut self, key: impl Into<Key<'k>>, teardown: F) -> bool
    where
        F: FnOnce(Key<'_>, Value<'_>),
    {
        let key = key.into();
        self.submap_mut(key).remove_with(key, teardown)
    }

    // -------------------------------------------------------------------------
    // Whole-map operations (shards in ascending order)
    // -------------------------------------------------------------------------

    /// Total entries across shards.
    pub fn len(&self) -> usize {
        self.maps.iter().map(Map::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.iter().all(Map::is_empty)
    }

    /// Total entry capacity across shards.
    pub fn capacity(&self) -> usize {
        self.maps.iter().map(Map::capacity).sum()
    }

    /// Empty every shard, keeping capacity. Per-shard resets cannot fail, so
    /// their combined outcome is always success and nothing is returned.
    pub fn reset(&mut self) {
        for map in self.maps.iter_mut() {
            map.reset();
        }
    }

    pub fn shrink(&mut self) {
        for map in self.maps.iter_mut() {
            map.shrink();
        }
    }

    /// Consume the map, showing every entry to `teardown`, shard by shard.
    pub fn free_with<F>(self, mut teardown: F)
    where
        F: FnMut(Key<'_>, Value<'_>),
    {
        for map in self.maps.into_vec() {
            map.free_with(&mut teardown);
        }
    }

    /// All entries, shard by shard; sorted within a shard only.
    pub fn iter(&self) -> impl Iterator<Item = (Key<'_>, Value<'_>)> + '_ {
        self.maps.iter().flat_map(Map::iter)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.maps.len()
    }

    pub fn map_type(&self) -> MapType {
        self.maps[0].map_type()
    }

    #[inline]
    pub fn submaps(&self) -> &[Map] {
        &self.maps
    }

    /// Mutable shard array. Replacing a shard with a map of a different type
    /// breaks the map; [`verify`](Self::verify) reports it.
    #[inline]
    pub fn submaps_mut(&mut self) -> &mut [Map] {
        &mut self.maps
    }

    pub(crate) fn into_parts(self) -> (Box<[Map]>, IntRouter, StrRouter) {
        (self.maps, self.int_route, self.str_route)
    }

    pub(crate) fn from_parts(maps: Box<[Map]>, int_route: IntRouter, str_route: StrRouter) -> Self {
        Self {
            maps,
            int_route,
            str_route,
        }
    }

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------

    /// Every shard passes its tree check and shares the first shard's type.
    pub fn verify(&self) -> std::result::Result<(), Violation> {
        let expected = self.map_type();
        for (shard, map) in self.maps.iter().enumerate() {
            let found = map.map_type();
            if found != expected {
                return Err(Violation::MixedShardTypes {
                    shard,
                    expected,
                    found,
                });
            }
            map.verify()?;
        }
        Ok(())
    }

    /// Every entry sits in the shard the current routers pick for its key.
    pub fn verify_routing(&self) -> std::result::Result<(), Violation> {
        for (shard, map) in self.maps.iter().enumerate() {
            for (key, _) in map.iter() {
                let routed = self.route(key);
                if routed != shard {
                    return Err(Violation::Misrouted { shard, routed });
                }
            }
        }
        Ok(())
    }
}

/// Reset each map in turn.
pub fn reset_all<'a, I>(maps: I)
where
    I: IntoIterator<Item = &'a mut ShardedMap>,
{
    for map in maps {
        map.reset();
    }
}

impl Clone for ShardedMap {
    fn clone(&self) -> Self {
        Self {
            maps: self.maps.clone(),
            int_route: self.int_route,
            str_route: self.str_route,
        }
    }
}

impl std::fmt::Debug for ShardedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedMap")
            .field("map_type", &self.map_type())
            .field("shards", &self.maps.len())
            .field("len", &self.len())
            .finish()
    }
}
