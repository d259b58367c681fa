//! Index-addressed red-black tree.
//!
//! Nodes live in one contiguous `Vec` and reference each other by 31-bit
//! slot index instead of by pointer. A node header is two `u32` words:
//!
//! - word 0: bit 31 = red flag, bits 0..31 = left child index
//! - word 1: right child index
//!
//! [`NIL`] (the largest value the left field can hold) means "no child" and
//! counts as black. There are no parent links: insertion and deletion record
//! the descent path and run their fixups bottom-up over it.
//!
//! Deleted slots go onto a free list threaded through the vacant slots and
//! are handed out again by later insertions, so the slot count never exceeds
//! the high-water mark of live entries.

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Error, Result, Violation};

/// Slot index of a node in the backing array.
pub type NodeIndex = u32;

const NODE_BITS: u32 = 31;

/// Child index meaning "no child".
pub const NIL: NodeIndex = (1 << NODE_BITS) - 1;

const RED_BIT: u32 = 1 << NODE_BITS;
const LEFT_MASK: u32 = NIL;

/// Red-black height is at most 2*log2(n+1); 64 covers every 31-bit tree.
type Path = SmallVec<[NodeIndex; 64]>;

/// Payload comparator. `cmp(a, b)` orders `a` relative to `b`.
pub type Comparator<P> = fn(&P, &P) -> Ordering;

/// How the backing array is managed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// Reallocated on demand.
    #[default]
    Growable,
    /// Sized once at construction and never reallocated. Inserting past the
    /// initial capacity fails with [`Error::CapacityExhausted`].
    Fixed,
}

/// Traversal order for [`Tree::traverse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    PreOrder,
    InOrder,
    PostOrder,
    LevelOrder,
}

/// Event passed to a traversal callback.
#[derive(Debug)]
pub enum Visit<'a, P> {
    /// The walk reached depth `.0` for the first time.
    Level(usize),
    /// A live node.
    Node {
        index: NodeIndex,
        node: &'a Node<P>,
        depth: usize,
    },
}

/// A tree node: packed header followed by the caller's payload.
#[derive(Clone)]
pub struct Node<P> {
    link: u32,
    right: NodeIndex,
    payload: P,
}

impl<P> Node<P> {
    /// New nodes enter the tree as red leaves.
    #[inline]
    fn leaf(payload: P) -> Self {
        Self {
            link: RED_BIT | NIL,
            right: NIL,
            payload,
        }
    }

    #[inline]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    #[inline]
    pub fn left(&self) -> Option<NodeIndex> {
        Some(self.left_raw()).filter(|&i| i != NIL)
    }

    #[inline]
    pub fn right(&self) -> Option<NodeIndex> {
        Some(self.right).filter(|&i| i != NIL)
    }

    #[inline]
    pub fn is_red(&self) -> bool {
        self.link & RED_BIT != 0
    }

    #[inline]
    fn left_raw(&self) -> NodeIndex {
        self.link & LEFT_MASK
    }

    #[inline]
    fn set_left(&mut self, left: NodeIndex) {
        debug_assert!(left <= NIL);
        self.link = (self.link & RED_BIT) | left;
    }

    #[inline]
    fn set_red(&mut self, red: bool) {
        if red {
            self.link |= RED_BIT;
        } else {
            self.link &= !RED_BIT;
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Node<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("payload", &self.payload)
            .field("left", &self.left())
            .field("right", &self.right())
            .field("red", &self.is_red())
            .finish()
    }
}

/// A slot in the backing array. Vacant slots hold the next free-list entry.
#[derive(Clone)]
enum Slot<P> {
    Occupied(Node<P>),
    Vacant(NodeIndex),
}

/// Self-balancing ordered container with index-addressed nodes.
///
/// Equal payloads (per the comparator) are never stored twice. Any reference
/// obtained from [`locate`](Self::locate) or [`enum_slot`](Self::enum_slot)
/// is invalidated by the next mutation, as growth may move the array.
pub struct Tree<P> {
    slots: Vec<Slot<P>>,
    root: NodeIndex,
    /// Head of the free list threaded through vacant slots.
    free: NodeIndex,
    len: usize,
    cmp: Comparator<P>,
    storage: StorageMode,
}

impl<P: Ord> Tree<P> {
    /// Empty growable tree ordered by `Ord`. Allocates nothing until the
    /// first insertion.
    pub fn new() -> Self {
        Self::with_comparator(<P as Ord>::cmp)
    }

    /// Growable tree ordered by `Ord` with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::with_storage(<P as Ord>::cmp, capacity, StorageMode::Growable)
    }
}

impl<P: Ord> Default for Tree<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Tree<P> {
    pub fn with_comparator(cmp: Comparator<P>) -> Self {
        Self {
            slots: Vec::new(),
            root: NIL,
            free: NIL,
            len: 0,
            cmp,
            storage: StorageMode::Growable,
        }
    }

    /// Tree with `capacity` preallocated slots and the given storage mode.
    pub fn with_storage(cmp: Comparator<P>, capacity: usize, storage: StorageMode) -> Result<Self> {
        if capacity > NIL as usize {
            return Err(Error::CapacityExhausted {
                capacity: NIL as usize,
            });
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Alloc {
                requested: capacity,
            })?;
        Ok(Self {
            slots,
            root: NIL,
            free: NIL,
            len: 0,
            cmp,
            storage,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Node slots the backing array can hold without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Slots in use, live or vacant. Valid [`enum_slot`](Self::enum_slot)
    /// positions are `0..slot_count()`.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn storage(&self) -> StorageMode {
        self.storage
    }

    #[inline]
    pub fn comparator(&self) -> Comparator<P> {
        self.cmp
    }

    #[inline]
    pub fn root(&self) -> Option<NodeIndex> {
        Some(self.root).filter(|&i| i != NIL)
    }

    /// Ensure `extra` more insertions succeed without reallocating.
    pub fn reserve(&mut self, extra: usize) -> Result<()> {
        let vacant = self.slots.len() - self.len;
        let spare = self.slots.capacity() - self.slots.len() + vacant;
        if extra <= spare {
            return Ok(());
        }
        self.grow(extra - vacant)
    }

    /// Ensure room for `total` live nodes.
    pub fn reserve_total(&mut self, total: usize) -> Result<()> {
        self.reserve(total.saturating_sub(self.len))
    }

    fn grow(&mut self, additional: usize) -> Result<()> {
        let old = self.slots.capacity();
        if self.storage == StorageMode::Fixed {
            return Err(Error::CapacityExhausted { capacity: old });
        }
        if self.slots.len().saturating_add(additional) > NIL as usize {
            return Err(Error::CapacityExhausted {
                capacity: NIL as usize,
            });
        }
        self.slots
            .try_reserve(additional)
            .map_err(|_| Error::Alloc {
                requested: additional,
            })?;
        trace!(old, new = self.slots.capacity(), "grew node array");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Slot access
    // -------------------------------------------------------------------------

    #[inline]
    fn node(&self, i: NodeIndex) -> &Node<P> {
        match &self.slots[i as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("vacant slot {i} linked into tree"),
        }
    }

    #[inline]
    fn node_mut(&mut self, i: NodeIndex) -> &mut Node<P> {
        match &mut self.slots[i as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("vacant slot {i} linked into tree"),
        }
    }

    #[inline]
    fn left_of(&self, i: NodeIndex) -> NodeIndex {
        self.node(i).left_raw()
    }

    #[inline]
    fn right_of(&self, i: NodeIndex) -> NodeIndex {
        self.node(i).right
    }

    #[inline]
    fn set_left(&mut self, i: NodeIndex, left: NodeIndex) {
        self.node_mut(i).set_left(left);
    }

    #[inline]
    fn set_right(&mut self, i: NodeIndex, right: NodeIndex) {
        self.node_mut(i).right = right;
    }

    #[inline]
    fn is_red(&self, i: NodeIndex) -> bool {
        i != NIL && self.node(i).is_red()
    }

    #[inline]
    fn set_red(&mut self, i: NodeIndex, red: bool) {
        if i != NIL {
            self.node_mut(i).set_red(red);
        }
    }

    fn alloc_slot(&mut self, payload: P) -> Result<NodeIndex> {
        if self.free != NIL {
            let i = self.free;
            let next = match self.slots[i as usize] {
                Slot::Vacant(next) => next,
                Slot::Occupied(_) => unreachable!("free list points at live slot {i}"),
            };
            self.free = next;
            self.slots[i as usize] = Slot::Occupied(Node::leaf(payload));
            return Ok(i);
        }
        if self.slots.len() == self.slots.capacity() {
            self.grow(1)?;
        }
        let i = self.slots.len() as NodeIndex;
        self.slots.push(Slot::Occupied(Node::leaf(payload)));
        Ok(i)
    }

    fn free_slot(&mut self, i: NodeIndex) -> P {
        let slot = std::mem::replace(&mut self.slots[i as usize], Slot::Vacant(self.free));
        self.free = i;
        match slot {
            Slot::Occupied(node) => node.payload,
            Slot::Vacant(_) => unreachable!("double free of slot {i}"),
        }
    }

    fn swap_payloads(&mut self, a: NodeIndex, b: NodeIndex) {
        debug_assert_ne!(a, b);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.slots.split_at_mut(hi as usize);
        match (&mut head[lo as usize], &mut tail[0]) {
            (Slot::Occupied(x), Slot::Occupied(y)) => std::mem::swap(&mut x.payload, &mut y.payload),
            _ => unreachable!("payload swap on vacant slot"),
        }
    }

    // -------------------------------------------------------------------------
    // Rotations
    // -------------------------------------------------------------------------

    /// Rotate left around `n`; returns the new subtree root.
    fn rotate_left(&mut self, n: NodeIndex) -> NodeIndex {
        let r = self.right_of(n);
        let rl = self.left_of(r);
        self.set_right(n, rl);
        self.set_left(r, n);
        r
    }

    /// Rotate right around `n`; returns the new subtree root.
    fn rotate_right(&mut self, n: NodeIndex) -> NodeIndex {
        let l = self.left_of(n);
        let lr = self.right_of(l);
        self.set_left(n, lr);
        self.set_right(l, n);
        l
    }

    /// Point `parent`'s link to `old` at `new` (or the root, if `parent` is NIL).
    fn replace_child(&mut self, parent: NodeIndex, old: NodeIndex, new: NodeIndex) {
        if parent == NIL {
            self.root = new;
        } else if self.left_of(parent) == old {
            self.set_left(parent, new);
        } else {
            debug_assert_eq!(self.right_of(parent), old);
            self.set_right(parent, new);
        }
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Insert `payload`. An equal payload already in the tree is kept and the
    /// new one dropped; that still counts as success.
    pub fn insert(&mut self, payload: P) -> Result<()> {
        self.insert_with(payload, |_, _| {})
    }

    /// Insert `payload`, or hand it to `rewrite` along with the existing
    /// equal payload so the caller can merge the two in place.
    ///
    /// `rewrite` must not change how the existing payload compares.
    pub fn insert_with<F>(&mut self, payload: P, rewrite: F) -> Result<()>
    where
        F: FnOnce(&mut P, P),
    {
        let cmp = self.cmp;
        let mut path = Path::new();
        let mut went_left = false;
        let mut cur = self.root;
        while cur != NIL {
            match cmp(&payload, self.node(cur).payload()) {
                Ordering::Equal => {
                    rewrite(&mut self.node_mut(cur).payload, payload);
                    return Ok(());
                }
                Ordering::Less => {
                    path.push(cur);
                    went_left = true;
                    cur = self.left_of(cur);
                }
                Ordering::Greater => {
                    path.push(cur);
                    went_left = false;
                    cur = self.right_of(cur);
                }
            }
        }

        // Nothing is linked until the slot exists, so a failure here leaves
        // the tree untouched.
        let x = self.alloc_slot(payload)?;
        match path.last() {
            None => self.root = x,
            Some(&p) if went_left => self.set_left(p, x),
            Some(&p) => self.set_right(p, x),
        }
        self.len += 1;
        self.insert_fixup(x, path);
        Ok(())
    }

    /// `path` holds the ancestors of `x`, root first.
    fn insert_fixup(&mut self, mut x: NodeIndex, mut path: Path) {
        while let Some(&p) = path.last() {
            if !self.is_red(p) || path.len() < 2 {
                break;
            }
            let g = ancestor(&path, 1);
            let gg = ancestor(&path, 2);
            let parent_is_left = self.left_of(g) == p;
            let uncle = if parent_is_left {
                self.right_of(g)
            } else {
                self.left_of(g)
            };

            if self.is_red(uncle) {
                self.set_red(p, false);
                self.set_red(uncle, false);
                self.set_red(g, true);
                x = g;
                path.truncate(path.len() - 2);
                continue;
            }

            let mut top = p;
            if parent_is_left {
                if self.right_of(p) == x {
                    top = self.rotate_left(p);
                    self.set_left(g, top);
                }
                self.set_red(top, false);
                self.set_red(g, true);
                let sub = self.rotate_right(g);
                self.replace_child(gg, g, sub);
            } else {
                if self.left_of(p) == x {
                    top = self.rotate_right(p);
                    self.set_right(g, top);
                }
                self.set_red(top, false);
                self.set_red(g, true);
                let sub = self.rotate_left(g);
                self.replace_child(gg, g, sub);
            }
            break;
        }
        let root = self.root;
        self.set_red(root, false);
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Delete the payload equal to `key`. Returns false if absent.
    pub fn delete(&mut self, key: &P) -> bool {
        self.delete_with(key, drop)
    }

    /// Delete the payload equal to `key`, passing it to `teardown` first.
    pub fn delete_with<F: FnOnce(P)>(&mut self, key: &P, teardown: F) -> bool {
        let cmp = self.cmp;
        match self.remove_by(|node| cmp(key, node)) {
            Some(payload) => {
                teardown(payload);
                true
            }
            None => false,
        }
    }

    /// Remove and return the payload matched by `probe`.
    ///
    /// `probe(node)` orders the sought key relative to `node` and must agree
    /// with the tree's comparator.
    pub fn remove_by<F>(&mut self, mut probe: F) -> Option<P>
    where
        F: FnMut(&P) -> Ordering,
    {
        let mut path = Path::new();
        let mut z = self.root;
        while z != NIL {
            match probe(self.node(z).payload()) {
                Ordering::Equal => break,
                Ordering::Less => {
                    path.push(z);
                    z = self.left_of(z);
                }
                Ordering::Greater => {
                    path.push(z);
                    z = self.right_of(z);
                }
            }
        }
        if z == NIL {
            return None;
        }

        // With two children, trade payloads with the in-order successor and
        // unlink the successor's slot instead.
        let mut y = z;
        if self.left_of(z) != NIL && self.right_of(z) != NIL {
            path.push(z);
            y = self.right_of(z);
            while self.left_of(y) != NIL {
                path.push(y);
                y = self.left_of(y);
            }
            self.swap_payloads(z, y);
        }

        let child = if self.left_of(y) != NIL {
            self.left_of(y)
        } else {
            self.right_of(y)
        };
        let parent = path.last().copied().unwrap_or(NIL);
        let child_is_left = parent != NIL && self.left_of(parent) == y;
        self.replace_child(parent, y, child);
        let removed_black = !self.node(y).is_red();
        let payload = self.free_slot(y);
        self.len -= 1;

        if removed_black {
            self.delete_fixup(child, child_is_left, path);
        }
        Some(payload)
    }

    /// Resolve the extra black carried by `x` (possibly NIL). `path` holds the
    /// ancestors of `x`, root first.
    fn delete_fixup(&mut self, mut x: NodeIndex, mut x_is_left: bool, mut path: Path) {
        while let Some(&p) = path.last() {
            if self.is_red(x) {
                break;
            }

            if x_is_left {
                let mut w = self.right_of(p);
                if self.is_red(w) {
                    self.set_red(w, false);
                    self.set_red(p, true);
                    let top = self.rotate_left(p);
                    self.replace_child(ancestor(&path, 1), p, top);
                    let at = path.len() - 1;
                    path.insert(at, top);
                    w = self.right_of(p);
                }
                if !self.is_red(self.left_of(w)) && !self.is_red(self.right_of(w)) {
                    self.set_red(w, true);
                    x = p;
                    path.pop();
                    x_is_left = path.last().is_some_and(|&q| self.left_of(q) == x);
                    continue;
                }
                if !self.is_red(self.right_of(w)) {
                    let wl = self.left_of(w);
                    self.set_red(wl, false);
                    self.set_red(w, true);
                    w = self.rotate_right(w);
                    self.set_right(p, w);
                }
                let p_red = self.is_red(p);
                self.set_red(w, p_red);
                self.set_red(p, false);
                let wr = self.right_of(w);
                self.set_red(wr, false);
                let top = self.rotate_left(p);
                self.replace_child(ancestor(&path, 1), p, top);
            } else {
                let mut w = self.left_of(p);
                if self.is_red(w) {
                    self.set_red(w, false);
                    self.set_red(p, true);
                    let top = self.rotate_right(p);
                    self.replace_child(ancestor(&path, 1), p, top);
                    let at = path.len() - 1;
                    path.insert(at, top);
                    w = self.left_of(p);
                }
                if !self.is_red(self.left_of(w)) && !self.is_red(self.right_of(w)) {
                    self.set_red(w, true);
                    x = p;
                    path.pop();
                    x_is_left = path.last().is_some_and(|&q| self.left_of(q) == x);
                    continue;
                }
                if !self.is_red(self.left_of(w)) {
                    let wr = self.right_of(w);
                    self.set_red(wr, false);
                    self.set_red(w, true);
                    w = self.rotate_left(w);
                    self.set_left(p, w);
                }
                let p_red = self.is_red(p);
                self.set_red(w, p_red);
                self.set_red(p, false);
                let wl = self.left_of(w);
                self.set_red(wl, false);
                let top = self.rotate_right(p);
                self.replace_child(ancestor(&path, 1), p, top);
            }
            x = self.root;
            break;
        }
        self.set_red(x, false);
        let root = self.root;
        self.set_red(root, false);
    }

    // -------------------------------------------------------------------------
    // Lookup and enumeration
    // -------------------------------------------------------------------------

    pub fn locate(&self, key: &P) -> Option<&P> {
        let cmp = self.cmp;
        self.locate_by(|node| cmp(key, node))
    }

    pub fn contains(&self, key: &P) -> bool {
        self.locate(key).is_some()
    }

    /// Find the payload matched by `probe` (see [`remove_by`](Self::remove_by)).
    pub fn locate_by<F>(&self, probe: F) -> Option<&P>
    where
        F: FnMut(&P) -> Ordering,
    {
        self.locate_index_by(probe).map(|i| self.node(i).payload())
    }

    pub fn locate_index_by<F>(&self, mut probe: F) -> Option<NodeIndex>
    where
        F: FnMut(&P) -> Ordering,
    {
        let mut cur = self.root;
        while cur != NIL {
            cur = match probe(self.node(cur).payload()) {
                Ordering::Equal => return Some(cur),
                Ordering::Less => self.left_of(cur),
                Ordering::Greater => self.right_of(cur),
            };
        }
        None
    }

    /// Mutable access to the payload matched by `probe`. The caller must not
    /// change how the payload compares.
    pub fn locate_mut_by<F>(&mut self, probe: F) -> Option<&mut P>
    where
        F: FnMut(&P) -> Ordering,
    {
        let i = self.locate_index_by(probe)?;
        Some(&mut self.node_mut(i).payload)
    }

    /// Node at raw slot `index`, ignoring sort order. `None` for vacant slots
    /// and positions past [`slot_count`](Self::slot_count).
    ///
    /// Enumerate `0..slot_count()`, not `0..len()`: after deletions, live
    /// nodes can sit above `len()` until [`compact`](Self::compact) or
    /// [`shrink`](Self::shrink) closes the gaps.
    #[inline]
    pub fn enum_slot(&self, index: NodeIndex) -> Option<&Node<P>> {
        match self.slots.get(index as usize)? {
            Slot::Occupied(node) => Some(node),
            Slot::Vacant(_) => None,
        }
    }

    /// Payload at raw slot `index`. The caller must not change how the
    /// payload compares.
    #[inline]
    pub fn enum_slot_mut(&mut self, index: NodeIndex) -> Option<&mut P> {
        match self.slots.get_mut(index as usize)? {
            Slot::Occupied(node) => Some(&mut node.payload),
            Slot::Vacant(_) => None,
        }
    }

    /// Live payloads in slot order (unsorted).
    pub fn iter_unordered(&self) -> impl Iterator<Item = &P> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(node) => Some(&node.payload),
            Slot::Vacant(_) => None,
        })
    }

    /// Payloads in comparator order.
    pub fn iter(&self) -> Iter<'_, P> {
        Iter {
            tree: self,
            stack: Path::new(),
            cur: self.root,
        }
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// Visit every node once in `order`. A [`Visit::Level`] event precedes the
    /// walk's first arrival at each depth. Returns the number of levels (0
    /// for an empty tree).
    pub fn traverse<F>(&self, order: Order, mut f: F) -> usize
    where
        F: FnMut(Visit<'_, P>),
    {
        if self.root == NIL {
            return 0;
        }
        let mut levels = 0usize;
        let mut reach = |depth: usize, f: &mut F| {
            if depth == levels {
                f(Visit::Level(depth));
                levels += 1;
            }
        };

        match order {
            Order::PreOrder => {
                let mut stack: SmallVec<[(NodeIndex, usize); 64]> = SmallVec::new();
                stack.push((self.root, 0));
                while let Some((i, depth)) = stack.pop() {
                    reach(depth, &mut f);
                    let node = self.node(i);
                    f(Visit::Node { index: i, node, depth });
                    if node.right != NIL {
                        stack.push((node.right, depth + 1));
                    }
                    if node.left_raw() != NIL {
                        stack.push((node.left_raw(), depth + 1));
                    }
                }
            }
            Order::InOrder => {
                let mut stack: SmallVec<[(NodeIndex, usize); 64]> = SmallVec::new();
                let mut cur = (self.root, 0usize);
                loop {
                    while cur.0 != NIL {
                        reach(cur.1, &mut f);
                        stack.push(cur);
                        cur = (self.left_of(cur.0), cur.1 + 1);
                    }
                    let Some((i, depth)) = stack.pop() else { break };
                    let node = self.node(i);
                    f(Visit::Node { index: i, node, depth });
                    cur = (node.right, depth + 1);
                }
            }
            Order::PostOrder => {
                let mut stack: SmallVec<[(NodeIndex, usize, bool); 64]> = SmallVec::new();
                stack.push((self.root, 0, false));
                while let Some((i, depth, expanded)) = stack.pop() {
                    let node = self.node(i);
                    if expanded {
                        f(Visit::Node { index: i, node, depth });
                        continue;
                    }
                    reach(depth, &mut f);
                    stack.push((i, depth, true));
                    if node.right != NIL {
                        stack.push((node.right, depth + 1, false));
                    }
                    if node.left_raw() != NIL {
                        stack.push((node.left_raw(), depth + 1, false));
                    }
                }
            }
            Order::LevelOrder => {
                let mut current = vec![self.root];
                let mut next = Vec::new();
                let mut depth = 0usize;
                while !current.is_empty() {
                    reach(depth, &mut f);
                    for &i in &current {
                        let node = self.node(i);
                        f(Visit::Node { index: i, node, depth });
                        if node.left_raw() != NIL {
                            next.push(node.left_raw());
                        }
                        if node.right != NIL {
                            next.push(node.right);
                        }
                    }
                    std::mem::swap(&mut current, &mut next);
                    next.clear();
                    depth += 1;
                }
            }
        }
        levels
    }

    // -------------------------------------------------------------------------
    // Whole-tree operations
    // -------------------------------------------------------------------------

    /// Drop every payload, keeping the allocated capacity. Cannot fail, so
    /// there is no result to report.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.root = NIL;
        self.free = NIL;
        self.len = 0;
    }

    /// Move live nodes into the vacant slots below them, then release spare
    /// capacity (growable storage only). Afterwards `slot_count() == len()`.
    pub fn shrink(&mut self) {
        self.compact();
        if self.storage == StorageMode::Growable {
            self.slots.shrink_to_fit();
        }
    }

    /// Fill vacant slots by relocating nodes from the end of the array.
    /// Returns the number of nodes moved.
    pub fn compact(&mut self) -> usize {
        self.free = NIL;
        let mut hole = 0usize;
        let mut moved = 0usize;
        loop {
            while matches!(self.slots.last(), Some(Slot::Vacant(_))) {
                self.slots.pop();
            }
            while hole < self.slots.len() && matches!(self.slots[hole], Slot::Occupied(_)) {
                hole += 1;
            }
            if hole >= self.slots.len() {
                break;
            }
            let last = (self.slots.len() - 1) as NodeIndex;
            let parent = self.parent_of(last);
            self.slots.swap(hole, last as usize);
            self.slots.pop();
            self.replace_child(parent, last, hole as NodeIndex);
            moved += 1;
        }
        if moved > 0 {
            trace!(moved, slots = self.slots.len(), "compacted node array");
        }
        moved
    }

    /// Parent of the live node `target`, found by searching for its payload.
    fn parent_of(&self, target: NodeIndex) -> NodeIndex {
        let key = self.node(target).payload();
        let mut parent = NIL;
        let mut cur = self.root;
        while cur != target && cur != NIL {
            parent = cur;
            cur = match (self.cmp)(key, self.node(cur).payload()) {
                Ordering::Less => self.left_of(cur),
                _ => self.right_of(cur),
            };
        }
        parent
    }

    /// Consume the tree, passing every payload to `teardown` (slot order).
    pub fn free_with<F: FnMut(P)>(self, mut teardown: F) {
        for slot in self.slots {
            if let Slot::Occupied(node) = slot {
                teardown(node.payload);
            }
        }
    }

    /// Deep copy with the same capacity, storage mode and comparator.
    pub fn try_clone(&self) -> Result<Self>
    where
        P: Clone,
    {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(self.slots.capacity())
            .map_err(|_| Error::Alloc {
                requested: self.slots.capacity(),
            })?;
        slots.extend(self.slots.iter().cloned());
        Ok(Self {
            slots,
            root: self.root,
            free: self.free,
            len: self.len,
            cmp: self.cmp,
            storage: self.storage,
        })
    }

    // -------------------------------------------------------------------------
    // Integrity check
    // -------------------------------------------------------------------------

    /// O(n) check of ordering, red-black rules and slot bookkeeping.
    pub fn verify(&self) -> std::result::Result<(), Violation> {
        if self.root != NIL {
            self.check_live(NIL, self.root)?;
            if self.is_red(self.root) {
                return Err(Violation::RedRoot { index: self.root });
            }
        }
        let live = self
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count();
        if live != self.len {
            return Err(Violation::CountMismatch {
                reachable: live,
                tracked: self.len,
            });
        }
        let mut reachable = 0usize;
        if self.root != NIL {
            self.check_subtree(self.root, None, None, &mut reachable)?;
        }
        if reachable != self.len {
            return Err(Violation::CountMismatch {
                reachable,
                tracked: self.len,
            });
        }
        Ok(())
    }

    fn check_live(&self, from: NodeIndex, target: NodeIndex) -> std::result::Result<(), Violation> {
        match self.slots.get(target as usize) {
            Some(Slot::Occupied(_)) => Ok(()),
            _ => Err(Violation::DanglingIndex {
                index: from,
                target,
            }),
        }
    }

    /// Returns the black height of the subtree at `i`.
    fn check_subtree(
        &self,
        i: NodeIndex,
        lo: Option<&P>,
        hi: Option<&P>,
        reachable: &mut usize,
    ) -> std::result::Result<usize, Violation> {
        if i == NIL {
            return Ok(1);
        }
        *reachable += 1;
        if *reachable > self.len {
            // A cycle, or nodes reachable that were never counted.
            return Err(Violation::CountMismatch {
                reachable: *reachable,
                tracked: self.len,
            });
        }
        let node = self.node(i);
        let in_range = lo.map_or(true, |lo| (self.cmp)(lo, &node.payload) == Ordering::Less)
            && hi.map_or(true, |hi| (self.cmp)(&node.payload, hi) == Ordering::Less);
        if !in_range {
            return Err(Violation::Unordered { index: i });
        }
        let (l, r) = (node.left_raw(), node.right);
        for child in [l, r] {
            if child != NIL {
                self.check_live(i, child)?;
                if node.is_red() && self.node(child).is_red() {
                    return Err(Violation::RedRedLink { index: i });
                }
            }
        }
        let left = self.check_subtree(l, lo, Some(&node.payload), reachable)?;
        let right = self.check_subtree(r, Some(&node.payload), hi, reachable)?;
        if left != right {
            return Err(Violation::BlackHeight { index: i, left, right });
        }
        Ok(left + usize::from(!node.is_red()))
    }
}

/// Entry `up` steps above the last one on `path`, or NIL.
#[inline]
fn ancestor(path: &[NodeIndex], up: usize) -> NodeIndex {
    path.len().checked_sub(up + 1).map_or(NIL, |i| path[i])
}

impl<P: Clone> Clone for Tree<P> {
    fn clone(&self) -> Self {
        let mut slots = Vec::with_capacity(self.slots.capacity());
        slots.extend(self.slots.iter().cloned());
        Self {
            slots,
            root: self.root,
            free: self.free,
            len: self.len,
            cmp: self.cmp,
            storage: self.storage,
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Tree<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// In-order iterator over a [`Tree`].
pub struct Iter<'a, P> {
    tree: &'a Tree<P>,
    stack: Path,
    cur: NodeIndex,
}

impl<'a, P> Iterator for Iter<'a, P> {
    type Item = &'a P;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cur != NIL {
            self.stack.push(self.cur);
            self.cur = self.tree.left_of(self.cur);
        }
        let i = self.stack.pop()?;
        let node = self.tree.node(i);
        self.cur = node.right;
        Some(&node.payload)
    }
}

impl<'a, P> IntoIterator for &'a Tree<P> {
    type Item = &'a P;
    type IntoIter = Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
