//! GUID set - bounded-memory membership set for a sparse 64-bit key space.
//!
//! Order identifiers cluster (sequentially assigned per trader/session), so
//! the set is a red-black tree of bitmap blocks: each block covers one
//! 2^20-aligned key range with one bit per key, and a block is only
//! allocated when a key in its range first arrives. Lookups inside a block
//! are a single bit test; the tree amortizes across sparse clusters.
//!
//! Insert-only; this side of the engine uses the conventional red-black
//! rebalance rather than the order tree's LLRB delete machinery.

use crate::arena::{Slot, NIL};

/// Keys per block: 2^20, aligned on a 2^20 boundary
const BLOCK_BITS: i64 = 1 << 20;
const BLOCK_MASK: i64 = BLOCK_BITS - 1;
/// 2^20 bits as u64 words (128 KiB per block)
const BLOCK_WORDS: usize = (BLOCK_BITS as usize) / 64;

/// One bitmap block covering `[min, min + 2^20 - 1]`.
struct Block {
    min: i64,
    left: u32,
    right: u32,
    parent: u32,
    slot: Slot,
    red: bool,
    bits: Box<[u64]>,
}

impl Block {
    fn new(key: i64) -> Self {
        // Two's-complement masking rounds toward -inf, so negative keys
        // land in well-formed aligned ranges too
        let min = key & !BLOCK_MASK;
        Self {
            min,
            left: NIL,
            right: NIL,
            parent: NIL,
            slot: Slot::None,
            red: true,
            bits: vec![0u64; BLOCK_WORDS].into_boxed_slice(),
        }
    }

    #[inline]
    fn max(&self) -> i64 {
        self.min + BLOCK_MASK
    }
}

/// A sparse set of `i64` keys with bounded memory growth.
///
/// Memory is bounded by the number of distinct 2^20-wide ranges touched,
/// not by the number of keys. The structure never rejects an input.
pub struct GuidStore {
    blocks: Vec<Block>,
    root: u32,
    len: u64,
}

impl GuidStore {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    /// Record `key`. Returns true iff it was not previously present.
    pub fn push(&mut self, key: i64) -> bool {
        if self.root == NIL {
            let idx = self.alloc_block(key);
            self.link_root(idx);
            self.blocks[idx as usize].red = false;
            return self.record(idx, key);
        }
        let mut n = self.root;
        loop {
            let block = &self.blocks[n as usize];
            if key >= block.min && key <= block.max() {
                return self.record(n, key);
            }
            if key < block.min {
                if block.left == NIL {
                    let nn = self.alloc_block(key);
                    self.link_left(n, nn);
                    self.record(nn, key);
                    self.rebalance(n);
                    self.blocks[self.root as usize].red = false;
                    return true;
                }
                n = block.left;
            } else {
                if block.right == NIL {
                    let nn = self.alloc_block(key);
                    self.link_right(n, nn);
                    self.record(nn, key);
                    self.rebalance(n);
                    self.blocks[self.root as usize].red = false;
                    return true;
                }
                n = block.right;
            }
        }
    }

    /// Returns true iff `key` has been recorded.
    pub fn contains(&self, key: i64) -> bool {
        let mut n = self.root;
        while n != NIL {
            let block = &self.blocks[n as usize];
            if key >= block.min && key <= block.max() {
                let off = (key - block.min) as usize;
                return block.bits[off >> 6] & (1u64 << (off & 63)) != 0;
            }
            n = if key < block.min { block.left } else { block.right };
        }
        false
    }

    /// Number of distinct keys recorded.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no keys have been recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bitmap blocks allocated (diagnostics).
    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Set the bit for `key` in block `n`; true iff it was clear.
    fn record(&mut self, n: u32, key: i64) -> bool {
        let block = &mut self.blocks[n as usize];
        let off = (key - block.min) as usize;
        let word = off >> 6;
        let mask = 1u64 << (off & 63);
        if block.bits[word] & mask != 0 {
            return false;
        }
        block.bits[word] |= mask;
        self.len += 1;
        true
    }

    fn alloc_block(&mut self, key: i64) -> u32 {
        let idx = self.blocks.len() as u32;
        assert!(idx < NIL, "GuidStore block arena exhausted");
        self.blocks.push(Block::new(key));
        idx
    }

    // ========================================================================
    // Red-black rebalance (bottom-up, conventional)
    // ========================================================================

    fn rebalance(&mut self, mut n: u32) {
        while n != NIL {
            if self.red_at(self.left(n)) && self.red_at(self.right(n)) {
                self.flip(n);
            }
            if self.red_at(self.left(n)) {
                if self.red_at(self.left(self.left(n))) {
                    n = self.rotate_right(n);
                }
                if self.red_at(self.right(self.left(n))) {
                    let l = self.left(n);
                    self.rotate_left(l);
                    n = self.rotate_right(n);
                }
            }
            if self.red_at(self.right(n)) {
                if self.red_at(self.right(self.right(n))) {
                    n = self.rotate_left(n);
                }
                if self.red_at(self.left(self.right(n))) {
                    let r = self.right(n);
                    self.rotate_right(r);
                    n = self.rotate_left(n);
                }
            }
            n = self.parent_of(n);
        }
    }

    #[inline]
    fn red_at(&self, n: u32) -> bool {
        n != NIL && self.blocks[n as usize].red
    }

    #[inline]
    fn left(&self, n: u32) -> u32 {
        if n == NIL {
            NIL
        } else {
            self.blocks[n as usize].left
        }
    }

    #[inline]
    fn right(&self, n: u32) -> u32 {
        if n == NIL {
            NIL
        } else {
            self.blocks[n as usize].right
        }
    }

    #[inline]
    fn parent_of(&self, n: u32) -> u32 {
        self.blocks[n as usize].parent
    }

    fn rotate_left(&mut self, n: u32) -> u32 {
        let r = self.blocks[n as usize].right;
        let n_red = self.blocks[n as usize].red;
        self.give_parent(n, r);
        let rl = self.blocks[r as usize].left;
        self.link_right(n, rl);
        self.link_left(r, n);
        self.blocks[r as usize].red = n_red;
        self.blocks[n as usize].red = true;
        r
    }

    fn rotate_right(&mut self, n: u32) -> u32 {
        let l = self.blocks[n as usize].left;
        let n_red = self.blocks[n as usize].red;
        self.give_parent(n, l);
        let lr = self.blocks[l as usize].right;
        self.link_left(n, lr);
        self.link_right(l, n);
        self.blocks[l as usize].red = n_red;
        self.blocks[n as usize].red = true;
        l
    }

    fn flip(&mut self, n: u32) {
        let (l, r) = {
            let block = &mut self.blocks[n as usize];
            block.red = !block.red;
            (block.left, block.right)
        };
        let left = &mut self.blocks[l as usize];
        left.red = !left.red;
        let right = &mut self.blocks[r as usize];
        right.red = !right.red;
    }

    fn link_root(&mut self, child: u32) {
        self.root = child;
        if child != NIL {
            let block = &mut self.blocks[child as usize];
            block.parent = NIL;
            block.slot = Slot::Root;
        }
    }

    fn link_left(&mut self, parent: u32, child: u32) {
        self.blocks[parent as usize].left = child;
        if child != NIL {
            let block = &mut self.blocks[child as usize];
            block.parent = parent;
            block.slot = Slot::Left;
        }
    }

    fn link_right(&mut self, parent: u32, child: u32) {
        self.blocks[parent as usize].right = child;
        if child != NIL {
            let block = &mut self.blocks[child as usize];
            block.parent = parent;
            block.slot = Slot::Right;
        }
    }

    fn give_parent(&mut self, n: u32, nn: u32) {
        let parent = self.blocks[n as usize].parent;
        match self.blocks[n as usize].slot {
            Slot::Root => self.link_root(nn),
            Slot::Left => self.link_left(parent, nn),
            Slot::Right => self.link_right(parent, nn),
            Slot::None => debug_assert!(false, "give_parent on a slotless block"),
        }
        let block = &mut self.blocks[n as usize];
        block.parent = NIL;
        block.slot = Slot::None;
    }

    // ========================================================================
    // Validation (debug builds and tests)
    // ========================================================================

    /// Exhaustively check the block tree's invariants; panics with a
    /// descriptive diagnostic on the first violation.
    pub fn validate(&self) {
        if self.root != NIL {
            assert!(!self.blocks[self.root as usize].red, "Root must be black");
        }
        self.black_balance(self.root, 0);
        self.test_reds(self.root, 0);
        self.check_structure(self.root);
    }

    fn black_balance(&self, n: u32, depth: usize) -> usize {
        if n == NIL {
            return 0;
        }
        let lb = self.black_balance(self.left(n), depth + 1);
        let rb = self.black_balance(self.right(n), depth + 1);
        assert_eq!(
            lb, rb,
            "Unbalanced tree found at depth {}. Left: {} Right: {}",
            depth, lb, rb
        );
        if self.red_at(n) {
            lb
        } else {
            lb + 1
        }
    }

    fn test_reds(&self, n: u32, depth: usize) {
        if n == NIL {
            return;
        }
        if self.red_at(n) && (self.red_at(self.left(n)) || self.red_at(self.right(n))) {
            panic!("Red violation found at depth {}", depth);
        }
        self.test_reds(self.left(n), depth + 1);
        self.test_reds(self.right(n), depth + 1);
    }

    fn check_structure(&self, n: u32) {
        if n == NIL {
            return;
        }
        let block = &self.blocks[n as usize];
        match block.slot {
            Slot::Root => assert_eq!(self.root, n, "Root slot not pointing at me"),
            Slot::Left => assert_eq!(
                self.blocks[block.parent as usize].left, n,
                "Parent's left slot not pointing at me"
            ),
            Slot::Right => assert_eq!(
                self.blocks[block.parent as usize].right, n,
                "Parent's right slot not pointing at me"
            ),
            Slot::None => panic!("In-tree block with no slot"),
        }
        if block.left != NIL {
            assert!(
                self.blocks[block.left as usize].min < block.min,
                "Left block min {} not below block min {}",
                self.blocks[block.left as usize].min,
                block.min
            );
        }
        if block.right != NIL {
            assert!(
                self.blocks[block.right as usize].min > block.min,
                "Right block min {} not above block min {}",
                self.blocks[block.right as usize].min,
                block.min
            );
        }
        self.check_structure(block.left);
        self.check_structure(block.right);
    }
}

impl Default for GuidStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeSet;

    #[test]
    fn test_empty() {
        let store = GuidStore::new();
        assert!(store.is_empty());
        assert_eq!(store.blocks(), 0);
        assert!(!store.contains(0));
        store.validate();
    }

    #[test]
    fn test_push_once() {
        let mut store = GuidStore::new();
        assert!(store.push(42));
        assert!(store.contains(42));
        assert!(!store.contains(41));
        assert_eq!(store.len(), 1);
        assert_eq!(store.blocks(), 1);
    }

    #[test]
    fn test_push_twice_returns_false() {
        let mut store = GuidStore::new();
        assert!(store.push(42));
        assert!(!store.push(42));
        assert!(!store.push(42));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clustered_keys_share_a_block() {
        let mut store = GuidStore::new();
        for key in 0..10_000 {
            assert!(store.push(key));
        }
        assert_eq!(store.blocks(), 1);
        assert_eq!(store.len(), 10_000);
        for key in 0..10_000 {
            assert!(store.contains(key));
        }
        assert!(!store.contains(10_000));
    }

    #[test]
    fn test_block_boundaries() {
        let mut store = GuidStore::new();
        let edge = 1i64 << 20;
        assert!(store.push(edge - 1));
        assert!(store.push(edge));
        assert_eq!(store.blocks(), 2, "Adjacent ranges get their own blocks");
        assert!(store.contains(edge - 1));
        assert!(store.contains(edge));
        assert!(!store.contains(edge + 1));
        store.validate();
    }

    #[test]
    fn test_negative_keys() {
        let mut store = GuidStore::new();
        assert!(store.push(-1));
        assert!(store.push(-(1i64 << 30)));
        assert!(store.push(7));
        assert!(store.contains(-1));
        assert!(store.contains(-(1i64 << 30)));
        assert!(!store.push(-1));
        store.validate();
    }

    #[test]
    fn test_sparse_clusters_rebalance() {
        const SEED: u64 = 0xFACE_FEED;
        let mut rng = ChaCha8Rng::seed_from_u64(SEED);
        let mut store = GuidStore::new();
        let mut reference = BTreeSet::new();

        for _ in 0..20_000 {
            // Sparse cluster bases spread over a wide range, dense offsets
            let base = rng.gen_range(0..1_000i64) << 24;
            let key = base + rng.gen_range(0..4_096);
            assert_eq!(store.push(key), reference.insert(key), "push({})", key);
        }
        store.validate();
        assert_eq!(store.len(), reference.len() as u64);
        assert!(store.blocks() > 16, "Workload should span many blocks");

        for _ in 0..5_000 {
            let base = rng.gen_range(0..1_000i64) << 24;
            let key = base + rng.gen_range(0..4_096);
            assert_eq!(store.contains(key), reference.contains(&key));
        }
    }

    #[test]
    fn test_descending_inserts_stay_balanced() {
        let mut store = GuidStore::new();
        for i in (0..200i64).rev() {
            assert!(store.push(i << 20));
        }
        store.validate();
        assert_eq!(store.blocks(), 200);
    }
}
