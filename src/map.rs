//! Tagged key/value maps.
//!
//! A [`Map`] is a [`Tree`] of key/value entries whose key and value types are
//! picked at construction by a [`MapType`] tag and fixed for the map's life.
//! Each tag gets its own concrete tree, so nodes stay as small as the pairing
//! allows (an `I32I32` node is 16 bytes). Operations take [`Key`] and
//! [`Value`] variants; one that does not fit the tag is rejected with
//! [`Error::TypeMismatch`] (or a `None`/`false` result for lookups).
//!
//! String keys and values are copied into the map. Opaque references are
//! stored as-is and stay owned by the caller; use
//! [`remove_with`](Map::remove_with) or [`free_with`](Map::free_with) to
//! release them.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result, Violation};
use crate::tree::{NodeIndex, Order, StorageMode, Tree, Visit};

/// Key/value pairing of a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum MapType {
    /// `i32` keys, `i32` values.
    I32I32,
    /// `u32` keys, `u32` values.
    U32U32,
    /// `i64` keys, `i64` values.
    IntInt,
    /// `i64` keys, string values.
    IntStr,
    /// `i64` keys, opaque reference values.
    IntPtr,
    /// String keys, `i64` values.
    StrInt,
    /// String keys, string values.
    StrStr,
    /// String keys, opaque reference values.
    StrPtr,
}

impl MapType {
    pub const ALL: [MapType; 8] = [
        MapType::I32I32,
        MapType::U32U32,
        MapType::IntInt,
        MapType::IntStr,
        MapType::IntPtr,
        MapType::StrInt,
        MapType::StrStr,
        MapType::StrPtr,
    ];

    #[inline]
    pub fn has_str_keys(self) -> bool {
        matches!(self, MapType::StrInt | MapType::StrStr | MapType::StrPtr)
    }

    #[inline]
    pub fn has_int_keys(self) -> bool {
        !self.has_str_keys()
    }
}

/// Caller-owned reference stored by the `*Ptr` map types. The map never
/// dereferences or frees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Opaque(pub usize);

/// A key, as passed in or read back.
///
/// Integer variants are interchangeable: any of them is accepted by an
/// integer-keyed map as long as the number fits the map's key type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key<'a> {
    I32(i32),
    U32(u32),
    Int(i64),
    Str(&'a [u8]),
}

impl<'a> Key<'a> {
    #[inline]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Key::I32(k) => Some(i64::from(k)),
            Key::U32(k) => Some(i64::from(k)),
            Key::Int(k) => Some(k),
            Key::Str(_) => None,
        }
    }

    #[inline]
    pub fn as_str(self) -> Option<&'a [u8]> {
        match self {
            Key::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A value, as passed in or read back. Integer variants are interchangeable
/// the same way as for [`Key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value<'a> {
    I32(i32),
    U32(u32),
    Int(i64),
    Str(&'a [u8]),
    Opaque(Opaque),
}

impl<'a> Value<'a> {
    #[inline]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(i64::from(v)),
            Value::U32(v) => Some(i64::from(v)),
            Value::Int(v) => Some(v),
            Value::Str(_) | Value::Opaque(_) => None,
        }
    }

    #[inline]
    pub fn as_str(self) -> Option<&'a [u8]> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_opaque(self) -> Option<Opaque> {
        match self {
            Value::Opaque(p) => Some(p),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Key<'_> {
                fn from(v: $t) -> Self {
                    Key::$variant(v)
                }
            }

            impl From<$t> for Value<'_> {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar!(i32 => I32, u32 => U32, i64 => Int);

impl<'a> From<&'a [u8]> for Key<'a> {
    fn from(s: &'a [u8]) -> Self {
        Key::Str(s)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Key<'a> {
    fn from(s: &'a [u8; N]) -> Self {
        Key::Str(s)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(s: &'a str) -> Self {
        Key::Str(s.as_bytes())
    }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(s: &'a [u8]) -> Self {
        Value::Str(s)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Value<'a> {
    fn from(s: &'a [u8; N]) -> Self {
        Value::Str(s)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(s: &'a str) -> Self {
        Value::Str(s.as_bytes())
    }
}

impl From<Opaque> for Value<'_> {
    fn from(p: Opaque) -> Self {
        Value::Opaque(p)
    }
}

impl fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::I32(k) => write!(f, "{k}"),
            Key::U32(k) => write!(f, "{k}"),
            Key::Int(k) => write!(f, "{k}"),
            Key::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            Value::Opaque(p) => write!(f, "{:#x}", p.0),
        }
    }
}

// =============================================================================
// Entry storage
// =============================================================================

type Bytes = Box<[u8]>;

#[derive(Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
}

fn by_key<K: Ord, V>(a: &Entry<K, V>, b: &Entry<K, V>) -> Ordering {
    a.key.cmp(&b.key)
}

fn copy_bytes(s: &[u8]) -> Result<Bytes> {
    let mut v = Vec::new();
    v.try_reserve_exact(s.len())
        .map_err(|_| Error::Alloc { requested: s.len() })?;
    v.extend_from_slice(s);
    Ok(v.into_boxed_slice())
}

/// Stored key type of a map variant.
trait MapKey: Ord + Clone {
    /// Borrowed form used for searching, so lookups never copy a string.
    type Probe<'a>: Copy;

    fn probe(key: Key<'_>) -> Option<Self::Probe<'_>>;
    fn order(probe: Self::Probe<'_>, stored: &Self) -> Ordering;
    fn store(probe: Self::Probe<'_>) -> Result<Self>;
    fn as_key(&self) -> Key<'_>;
}

/// Stored value type of a map variant.
trait MapValue: Clone {
    type Input<'a>: Copy;

    fn input(value: Value<'_>) -> Option<Self::Input<'_>>;
    fn store(input: Self::Input<'_>) -> Result<Self>;
    fn as_value(&self) -> Value<'_>;

    /// Counter merge for [`Map::increment`]. False if the type has no sum.
    fn add(&mut self, _delta: &Self) -> bool {
        false
    }
}

macro_rules! int_field {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl MapKey for $t {
                type Probe<'a> = $t;

                fn probe(key: Key<'_>) -> Option<$t> {
                    key.as_int().and_then(|k| <$t>::try_from(k).ok())
                }

                #[inline]
                fn order(probe: $t, stored: &$t) -> Ordering {
                    probe.cmp(stored)
                }

                fn store(probe: $t) -> Result<$t> {
                    Ok(probe)
                }

                fn as_key(&self) -> Key<'_> {
                    Key::$variant(*self)
                }
            }

            impl MapValue for $t {
                type Input<'a> = $t;

                fn input(value: Value<'_>) -> Option<$t> {
                    value.as_int().and_then(|v| <$t>::try_from(v).ok())
                }

                fn store(input: $t) -> Result<$t> {
                    Ok(input)
                }

                fn as_value(&self) -> Value<'_> {
                    Value::$variant(*self)
                }

                fn add(&mut self, delta: &$t) -> bool {
                    *self = self.wrapping_add(*delta);
                    true
                }
            }
        )*
    };
}

int_field!(i32 => I32, u32 => U32, i64 => Int);

impl MapKey for Bytes {
    type Probe<'a> = &'a [u8];

    fn probe(key: Key<'_>) -> Option<&[u8]> {
        key.as_str()
    }

    #[inline]
    fn order(probe: &[u8], stored: &Bytes) -> Ordering {
        probe.cmp(&**stored)
    }

    fn store(probe: &[u8]) -> Result<Bytes> {
        copy_bytes(probe)
    }

    fn as_key(&self) -> Key<'_> {
        Key::Str(self)
    }
}

impl MapValue for Bytes {
    type Input<'a> = &'a [u8];

    fn input(value: Value<'_>) -> Option<&[u8]> {
        value.as_str()
    }

    fn store(input: &[u8]) -> Result<Bytes> {
        copy_bytes(input)
    }

    fn as_value(&self) -> Value<'_> {
        Value::Str(self)
    }
}

impl MapValue for Opaque {
    type Input<'a> = Opaque;

    fn input(value: Value<'_>) -> Option<Opaque> {
        value.as_opaque()
    }

    fn store(input: Opaque) -> Result<Opaque> {
        Ok(input)
    }

    fn as_value(&self) -> Value<'_> {
        Value::Opaque(*self)
    }
}

#[derive(Clone, Copy)]
enum Write {
    /// Leave an existing entry alone.
    Keep,
    /// Overwrite the existing value.
    Replace,
    /// Add to the existing value.
    Add,
}

fn write_entry<K: MapKey, V: MapValue>(
    tree: &mut Tree<Entry<K, V>>,
    map_type: MapType,
    key: Key<'_>,
    value: Value<'_>,
    mode: Write,
) -> Result<()> {
    let mismatch = Error::TypeMismatch { map_type };
    let probe = K::probe(key).ok_or_else(|| mismatch.clone())?;
    let input = V::input(value).ok_or_else(|| mismatch.clone())?;
    if let Some(old) = tree.locate_mut_by(|e| K::order(probe, &e.key)) {
        return match mode {
            Write::Keep => Ok(()),
            Write::Replace => {
                old.value = V::store(input)?;
                Ok(())
            }
            Write::Add => {
                let delta = V::store(input)?;
                if old.value.add(&delta) {
                    Ok(())
                } else {
                    Err(mismatch)
                }
            }
        };
    }
    // Strings are copied only once the key is known to be new.
    tree.insert(Entry {
        key: K::store(probe)?,
        value: V::store(input)?,
    })
}

fn find_entry<'t, K: MapKey, V>(tree: &'t Tree<Entry<K, V>>, key: Key<'_>) -> Option<&'t Entry<K, V>> {
    let probe = K::probe(key)?;
    tree.locate_by(|e| K::order(probe, &e.key))
}

fn take_entry<K: MapKey, V>(tree: &mut Tree<Entry<K, V>>, key: Key<'_>) -> Option<Entry<K, V>> {
    let probe = K::probe(key)?;
    tree.remove_by(|e| K::order(probe, &e.key))
}

/// Sorted entry iterator returned by [`Map::iter`].
pub type Entries<'a> = Box<dyn Iterator<Item = (Key<'a>, Value<'a>)> + 'a>;

/// Event passed to a [`Map::traverse`] callback.
#[derive(Clone, Copy, Debug)]
pub enum MapVisit<'a> {
    /// The walk reached depth `.0` for the first time.
    Level(usize),
    Entry {
        index: NodeIndex,
        key: Key<'a>,
        value: Value<'a>,
        left: Option<NodeIndex>,
        right: Option<NodeIndex>,
        red: bool,
        depth: usize,
    },
}

fn traverse_entries<K, V, F>(tree: &Tree<Entry<K, V>>, order: Order, f: &mut F) -> usize
where
    K: MapKey,
    V: MapValue,
    F: FnMut(MapVisit<'_>),
{
    tree.traverse(order, |visit| match visit {
        Visit::Level(depth) => f(MapVisit::Level(depth)),
        Visit::Node { index, node, depth } => f(MapVisit::Entry {
            index,
            key: node.payload().key.as_key(),
            value: node.payload().value.as_value(),
            left: node.left(),
            right: node.right(),
            red: node.is_red(),
            depth,
        }),
    })
}

// =============================================================================
// Map
// =============================================================================

#[derive(Clone)]
enum Repr {
    I32I32(Tree<Entry<i32, i32>>),
    U32U32(Tree<Entry<u32, u32>>),
    IntInt(Tree<Entry<i64, i64>>),
    IntStr(Tree<Entry<i64, Bytes>>),
    IntPtr(Tree<Entry<i64, Opaque>>),
    StrInt(Tree<Entry<Bytes, i64>>),
    StrStr(Tree<Entry<Bytes, Bytes>>),
    StrPtr(Tree<Entry<Bytes, Opaque>>),
}

/// Run `$body` with `$t` bound to the variant's tree.
macro_rules! each_tree {
    ($repr:expr, $t:ident => $body:expr) => {
        match $repr {
            Repr::I32I32($t) => $body,
            Repr::U32U32($t) => $body,
            Repr::IntInt($t) => $body,
            Repr::IntStr($t) => $body,
            Repr::IntPtr($t) => $body,
            Repr::StrInt($t) => $body,
            Repr::StrStr($t) => $body,
            Repr::StrPtr($t) => $body,
        }
    };
}

/// Like `each_tree!`, rewrapping the result in the same variant.
macro_rules! map_tree {
    ($repr:expr, $t:ident => $body:expr) => {
        match $repr {
            Repr::I32I32($t) => Repr::I32I32($body),
            Repr::U32U32($t) => Repr::U32U32($body),
            Repr::IntInt($t) => Repr::IntInt($body),
            Repr::IntStr($t) => Repr::IntStr($body),
            Repr::IntPtr($t) => Repr::IntPtr($body),
            Repr::StrInt($t) => Repr::StrInt($body),
            Repr::StrStr($t) => Repr::StrStr($body),
            Repr::StrPtr($t) => Repr::StrPtr($body),
        }
    };
}

/// Ordered map with a runtime-selected key/value pairing.
#[derive(Clone)]
pub struct Map {
    repr: Repr,
}

impl Map {
    /// Empty growable map. Allocates nothing until the first insertion.
    pub fn new(map_type: MapType) -> Self {
        let repr = match map_type {
            MapType::I32I32 => Repr::I32I32(Tree::with_comparator(by_key)),
            MapType::U32U32 => Repr::U32U32(Tree::with_comparator(by_key)),
            MapType::IntInt => Repr::IntInt(Tree::with_comparator(by_key)),
            MapType::IntStr => Repr::IntStr(Tree::with_comparator(by_key)),
            MapType::IntPtr => Repr::IntPtr(Tree::with_comparator(by_key)),
            MapType::StrInt => Repr::StrInt(Tree::with_comparator(by_key)),
            MapType::StrStr => Repr::StrStr(Tree::with_comparator(by_key)),
            MapType::StrPtr => Repr::StrPtr(Tree::with_comparator(by_key)),
        };
        Self { repr }
    }

    /// Growable map with room for `reserve` entries.
    pub fn with_capacity(map_type: MapType, reserve: usize) -> Result<Self> {
        Self::with_storage(map_type, reserve, StorageMode::Growable)
    }

    pub fn with_storage(map_type: MapType, reserve: usize, storage: StorageMode) -> Result<Self> {
        let repr = match map_type {
            MapType::I32I32 => Repr::I32I32(Tree::with_storage(by_key, reserve, storage)?),
            MapType::U32U32 => Repr::U32U32(Tree::with_storage(by_key, reserve, storage)?),
            MapType::IntInt => Repr::IntInt(Tree::with_storage(by_key, reserve, storage)?),
            MapType::IntStr => Repr::IntStr(Tree::with_storage(by_key, reserve, storage)?),
            MapType::IntPtr => Repr::IntPtr(Tree::with_storage(by_key, reserve, storage)?),
            MapType::StrInt => Repr::StrInt(Tree::with_storage(by_key, reserve, storage)?),
            MapType::StrStr => Repr::StrStr(Tree::with_storage(by_key, reserve, storage)?),
            MapType::StrPtr => Repr::StrPtr(Tree::with_storage(by_key, reserve, storage)?),
        };
        Ok(Self { repr })
    }

    pub fn map_type(&self) -> MapType {
        match self.repr {
            Repr::I32I32(_) => MapType::I32I32,
            Repr::U32U32(_) => MapType::U32U32,
            Repr::IntInt(_) => MapType::IntInt,
            Repr::IntStr(_) => MapType::IntStr,
            Repr::IntPtr(_) => MapType::IntPtr,
            Repr::StrInt(_) => MapType::StrInt,
            Repr::StrStr(_) => MapType::StrStr,
            Repr::StrPtr(_) => MapType::StrPtr,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        each_tree!(&self.repr, t => t.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        each_tree!(&self.repr, t => t.capacity())
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        each_tree!(&self.repr, t => t.slot_count())
    }

    pub fn storage(&self) -> StorageMode {
        each_tree!(&self.repr, t => t.storage())
    }

    pub fn reserve(&mut self, extra: usize) -> Result<()> {
        each_tree!(&mut self.repr, t => t.reserve(extra))
    }

    /// Insert `key -> value`. An existing entry for `key` is left unchanged.
    pub fn insert<'k, 'v>(&mut self, key: impl Into<Key<'k>>, value: impl Into<Value<'v>>) -> Result<()> {
        self.write(key.into(), value.into(), Write::Keep)
    }

    /// Insert `key -> value`, overwriting the value of an existing entry.
    pub fn replace<'k, 'v>(&mut self, key: impl Into<Key<'k>>, value: impl Into<Value<'v>>) -> Result<()> {
        self.write(key.into(), value.into(), Write::Replace)
    }

    /// Add `delta` to the value for `key` (wrapping), inserting `delta` if
    /// the key is absent. Only integer-valued maps accept this.
    pub fn increment<'k>(&mut self, key: impl Into<Key<'k>>, delta: i64) -> Result<()> {
        self.write(key.into(), Value::Int(delta), Write::Add)
    }

    fn write(&mut self, key: Key<'_>, value: Value<'_>, mode: Write) -> Result<()> {
        let map_type = self.map_type();
        each_tree!(&mut self.repr, t => write_entry(t, map_type, key, value, mode))
    }

    pub fn get<'k>(&self, key: impl Into<Key<'k>>) -> Option<Value<'_>> {
        let key = key.into();
        each_tree!(&self.repr, t => find_entry(t, key).map(|e| e.value.as_value()))
    }

    pub fn contains<'k>(&self, key: impl Into<Key<'k>>) -> bool {
        let key = key.into();
        each_tree!(&self.repr, t => find_entry(t, key).is_some())
    }

    /// Remove the entry for `key`. Returns false if absent.
    pub fn remove<'k>(&mut self, key: impl Into<Key<'k>>) -> bool {
        self.remove_with(key, |_, _| {})
    }

    /// Remove the entry for `key`, showing it to `teardown` before it is
    /// dropped.
    pub fn remove_with<'k, F>(&mut self, key: impl Into<Key<'k>>, teardown: F) -> bool
    where
        F: FnOnce(Key<'_>, Value<'_>),
    {
        let key = key.into();
        each_tree!(&mut self.repr, t => match take_entry(t, key) {
            Some(e) => {
                teardown(e.key.as_key(), e.value.as_value());
                true
            }
            None => false,
        })
    }

    /// Drop every entry, keeping the allocated capacity. Infallible.
    pub fn reset(&mut self) {
        each_tree!(&mut self.repr, t => t.reset())
    }

    /// Compact vacant slots and release capacity beyond the live entries.
    pub fn shrink(&mut self) {
        each_tree!(&mut self.repr, t => t.shrink())
    }

    /// Consume the map, showing every entry to `teardown`.
    pub fn free_with<F>(self, mut teardown: F)
    where
        F: FnMut(Key<'_>, Value<'_>),
    {
        each_tree!(self.repr, t => t.free_with(|e| teardown(e.key.as_key(), e.value.as_value())))
    }

    /// Deep copy (strings included) with the same type tag and capacity.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            repr: map_tree!(&self.repr, t => t.try_clone()?),
        })
    }

    pub fn verify(&self) -> std::result::Result<(), Violation> {
        each_tree!(&self.repr, t => t.verify())
    }

    /// Entries in key order. Strings compare bytewise.
    pub fn iter(&self) -> Entries<'_> {
        each_tree!(&self.repr, t => {
            Box::new(t.iter().map(|e| (e.key.as_key(), e.value.as_value()))) as Entries<'_>
        })
    }

    /// Entry at raw slot `index`, ignoring key order. Valid positions are
    /// `0..slot_count()`; vacant slots left by removals yield `None`, so
    /// scanning `0..len()` can miss entries until [`shrink`](Self::shrink).
    pub fn enum_slot(&self, index: NodeIndex) -> Option<(Key<'_>, Value<'_>)> {
        each_tree!(&self.repr, t => t
            .enum_slot(index)
            .map(|n| (n.payload().key.as_key(), n.payload().value.as_value())))
    }

    /// Walk the underlying tree (see [`Tree::traverse`]).
    pub fn traverse<F>(&self, order: Order, mut f: F) -> usize
    where
        F: FnMut(MapVisit<'_>),
    {
        each_tree!(&self.repr, t => traverse_entries(t, order, &mut f))
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key(map_type: MapType, i: i64) -> Vec<u8> {
        if map_type.has_str_keys() {
            format!("key{i:04}").into_bytes()
        } else {
            Vec::new()
        }
    }

    fn sample_value(map_type: MapType, i: i64) -> Value<'static> {
        match map_type {
            MapType::I32I32 => Value::I32(i as i32 * 10),
            MapType::U32U32 => Value::U32(i as u32 * 10),
            MapType::IntInt | MapType::StrInt => Value::Int(i * 10),
            MapType::IntStr | MapType::StrStr => Value::Str(b"payload"),
            MapType::IntPtr | MapType::StrPtr => Value::Opaque(Opaque(0x1000 + i as usize)),
        }
    }

    #[test]
    fn test_every_map_type() {
        for map_type in MapType::ALL {
            let mut m = Map::with_capacity(map_type, 8).unwrap();
            assert_eq!(m.map_type(), map_type);
            for i in [5i64, 3, 8, 1, 4] {
                let k = sample_key(map_type, i);
                let key = if map_type.has_str_keys() { Key::Str(&k) } else { Key::Int(i) };
                m.insert(key, sample_value(map_type, i)).unwrap();
            }
            assert_eq!(m.len(), 5, "{map_type:?}");
            m.verify().unwrap();

            let k = sample_key(map_type, 4);
            let key = if map_type.has_str_keys() { Key::Str(&k) } else { Key::Int(4) };
            let got = m.get(key).expect("present");
            assert_eq!(got.as_int(), sample_value(map_type, 4).as_int());
            assert_eq!(got.as_str(), sample_value(map_type, 4).as_str());
            assert_eq!(got.as_opaque(), sample_value(map_type, 4).as_opaque());

            assert!(m.remove(key));
            assert!(!m.contains(key));
            assert_eq!(m.len(), 4);
            m.verify().unwrap();
        }
    }

    #[test]
    fn test_int_keys_sorted() {
        let mut m = Map::new(MapType::IntInt);
        for k in [5i64, 3, 8, 1, 4, -7] {
            m.insert(k, k * 100).unwrap();
        }
        let keys: Vec<i64> = m.iter().map(|(k, _)| k.as_int().unwrap()).collect();
        assert_eq!(keys, vec![-7, 1, 3, 4, 5, 8]);
    }

    #[test]
    fn test_str_keys_bytewise_order() {
        let mut m = Map::new(MapType::StrStr);
        for k in ["b", "a", "ab", "B", "", "aa"] {
            m.insert(k, k).unwrap();
        }
        let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k.as_str().unwrap()).collect();
        let expected: Vec<&[u8]> = ["", "B", "a", "aa", "ab", "b"]
            .iter()
            .map(|s| s.as_bytes())
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_type_mismatch() {
        let mut m = Map::new(MapType::IntInt);
        assert_eq!(
            m.insert("text", 1i64),
            Err(Error::TypeMismatch {
                map_type: MapType::IntInt
            })
        );
        assert!(m.insert(1i64, "text").is_err());
        assert!(m.is_empty());
        assert_eq!(m.get("text"), None);
        assert!(!m.remove("text"));

        let mut m = Map::new(MapType::I32I32);
        assert!(m.insert(i64::MAX, 1i32).is_err());
        assert!(m.insert(1i32, i64::MIN).is_err());
        m.insert(7i64, 70i64).unwrap();
        assert_eq!(m.get(7i32), Some(Value::I32(70)));

        let mut m = Map::new(MapType::U32U32);
        assert!(m.insert(-1i32, 1u32).is_err());
        assert_eq!(m.get(-1i64), None);
    }

    #[test]
    fn test_insert_keeps_replace_overwrites() {
        let mut m = Map::new(MapType::StrStr);
        m.insert("k", "first").unwrap();
        m.insert("k", "second").unwrap();
        assert_eq!(m.get("k"), Some(Value::Str(b"first")));
        m.replace("k", "third").unwrap();
        assert_eq!(m.get("k"), Some(Value::Str(b"third")));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_increment() {
        let mut m = Map::new(MapType::StrInt);
        for word in "the cat and the hat and the bat".split(' ') {
            m.increment(word, 1).unwrap();
        }
        assert_eq!(m.get("the"), Some(Value::Int(3)));
        assert_eq!(m.get("and"), Some(Value::Int(2)));
        assert_eq!(m.get("cat"), Some(Value::Int(1)));

        let mut m = Map::new(MapType::U32U32);
        m.increment(1u32, 5).unwrap();
        m.increment(1u32, 7).unwrap();
        assert_eq!(m.get(1u32), Some(Value::U32(12)));
        assert!(m.increment(1u32, -1).is_err());

        let mut m = Map::new(MapType::IntStr);
        assert!(m.increment(1i64, 1).is_err());
        assert!(m.is_empty());
    }

    #[test]
    fn test_strings_are_copied() {
        let mut m = Map::new(MapType::StrStr);
        {
            let k = String::from("owned-key");
            let v = String::from("owned-value");
            m.insert(k.as_str(), v.as_str()).unwrap();
        }
        assert_eq!(m.get("owned-key"), Some(Value::Str(b"owned-value")));
    }

    #[test]
    fn test_remove_with_releases_opaque() {
        let mut m = Map::new(MapType::StrPtr);
        m.insert("handle", Opaque(0xdead)).unwrap();
        let mut released = None;
        assert!(m.remove_with("handle", |_, v| released = v.as_opaque()));
        assert_eq!(released, Some(Opaque(0xdead)));
        assert!(!m.remove_with("handle", |_, _| panic!("already removed")));
    }

    #[test]
    fn test_free_with_sees_every_entry() {
        let mut m = Map::new(MapType::IntPtr);
        for k in 0..10i64 {
            m.insert(k, Opaque(k as usize)).unwrap();
        }
        let mut seen = Vec::new();
        m.free_with(|_, v| seen.push(v.as_opaque().unwrap().0));
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_reset_and_shrink() {
        let mut m = Map::with_capacity(MapType::IntInt, 100).unwrap();
        for k in 0..100i64 {
            m.insert(k, k).unwrap();
        }
        let cap = m.capacity();
        m.reset();
        assert!(m.is_empty());
        assert_eq!(m.capacity(), cap);

        for k in 0..100i64 {
            m.insert(k, k).unwrap();
        }
        for k in 0..90i64 {
            assert!(m.remove(k));
        }
        m.shrink();
        assert_eq!(m.slot_count(), 10);
        assert!(m.capacity() < cap);
        m.verify().unwrap();
        assert_eq!(m.get(95i64), Some(Value::Int(95)));
    }

    #[test]
    fn test_try_clone_deep_copy() {
        let mut a = Map::with_capacity(MapType::StrStr, 16).unwrap();
        a.insert("x", "1").unwrap();
        a.insert("y", "2").unwrap();
        let mut b = a.try_clone().unwrap();
        assert_eq!(b.map_type(), MapType::StrStr);
        assert_eq!(b.capacity(), a.capacity());

        b.replace("x", "changed").unwrap();
        b.remove("y");
        a.insert("z", "3").unwrap();

        assert_eq!(a.get("x"), Some(Value::Str(b"1")));
        assert_eq!(a.get("y"), Some(Value::Str(b"2")));
        assert_eq!(b.get("x"), Some(Value::Str(b"changed")));
        assert_eq!(b.get("z"), None);
        a.verify().unwrap();
        b.verify().unwrap();
    }

    #[test]
    fn test_fixed_storage_map() {
        let mut m = Map::with_storage(MapType::I32I32, 3, StorageMode::Fixed).unwrap();
        let cap = m.capacity() as i32;
        for k in 0..cap {
            m.insert(k, k).unwrap();
        }
        assert!(matches!(
            m.insert(cap, 0i32),
            Err(Error::CapacityExhausted { .. })
        ));
        assert_eq!(m.len(), cap as usize);
    }

    #[test]
    fn test_traverse_and_enum() {
        let mut m = Map::new(MapType::IntInt);
        for k in 1..=7i64 {
            m.insert(k, -k).unwrap();
        }
        let mut levels_seen = 0;
        let mut entries = 0;
        let levels = m.traverse(Order::LevelOrder, |v| match v {
            MapVisit::Level(_) => levels_seen += 1,
            MapVisit::Entry { key, value, .. } => {
                assert_eq!(key.as_int().map(|k| -k), value.as_int());
                entries += 1;
            }
        });
        assert_eq!(levels, 4);
        assert_eq!(levels_seen, 4);
        assert_eq!(entries, 7);

        let mut unordered: Vec<i64> = (0..m.slot_count() as NodeIndex)
            .filter_map(|i| m.enum_slot(i))
            .map(|(k, _)| k.as_int().unwrap())
            .collect();
        unordered.sort();
        assert_eq!(unordered, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_typed_key_and_value() {
        let mut ints = Map::new(MapType::IntInt);
        let mut strs = Map::new(MapType::StrStr);
        for k in 0..5i64 {
            ints.insert(k, k + 100).unwrap();
            strs.insert(format!("k{k}").as_str(), format!("v{k}").as_str()).unwrap();
        }
        assert_eq!(ints.get(3i64), Some(Value::Int(103)));
        assert_eq!(strs.get("k3"), Some(Value::Str(b"v3")));
        assert_eq!(ints.iter().next(), Some((Key::Int(0), Value::Int(100))));
        assert_eq!(strs.iter().next(), Some((Key::Str(b"k0"), Value::Str(b"v0"))));
        assert_eq!(ints.enum_slot(4), Some((Key::Int(4), Value::Int(104))));
        assert_eq!(strs.enum_slot(4), Some((Key::Str(b"k4"), Value::Str(b"v4"))));

        let mut seen = None;
        assert!(strs.remove_with("k1", |k, v| seen = Some((k.to_string(), v.to_string()))));
        assert_eq!(seen, Some(("\"k1\"".to_string(), "\"v1\"".to_string())));

        let mut sum = 0;
        ints.free_with(|k, v| sum += v.as_int().unwrap() - k.as_int().unwrap());
        assert_eq!(sum, 500);
    }

    #[test]
    fn test_existing_key_writes_need_no_slot() {
        let mut m = Map::with_storage(MapType::StrInt, 2, StorageMode::Fixed).unwrap();
        let cap = m.capacity();
        for i in 0..cap {
            m.insert(format!("key{i}").as_str(), i as i64).unwrap();
        }
        assert!(matches!(
            m.insert("fresh", 0i64),
            Err(Error::CapacityExhausted { .. })
        ));

        // Writes to a stored key go through even with the array full.
        m.insert("key0", 99i64).unwrap();
        assert_eq!(m.get("key0"), Some(Value::Int(0)));
        m.replace("key0", 7i64).unwrap();
        assert_eq!(m.get("key0"), Some(Value::Int(7)));
        m.increment("key0", 3).unwrap();
        assert_eq!(m.get("key0"), Some(Value::Int(10)));
        assert_eq!(m.len(), cap);
        assert!(m.verify().is_ok());
    }

    #[test]
    fn test_enum_slot_after_removals() {
        let mut m = Map::new(MapType::IntInt);
        for k in 0..10i64 {
            m.insert(k, k).unwrap();
        }
        for k in 0..5i64 {
            m.remove(k);
        }
        assert_eq!(m.len(), 5);
        assert_eq!(m.slot_count(), 10);
        // Live entries sit anywhere below slot_count, not below len.
        let mut live: Vec<i64> = (0..m.slot_count() as NodeIndex)
            .filter_map(|i| m.enum_slot(i))
            .map(|(k, _)| k.as_int().unwrap())
            .collect();
        live.sort_unstable();
        assert_eq!(live, vec![5, 6, 7, 8, 9]);

        m.shrink();
        assert_eq!(m.slot_count(), m.len());
        assert_eq!((0..5).filter(|&i| m.enum_slot(i).is_some()).count(), 5);
    }
}
