//! Price-level tree - a left-leaning red-black tree of FIFO rings.
//!
//! Each tree node is simultaneously the head of the FIFO queue for its
//! price level; later arrivals at the same price chain into a circular
//! doubly-linked ring behind the head and never touch the tree structure.
//! Every node carries a parent index plus a slot tag, so a node's tree
//! identity can be handed to its FIFO successor in one substitution when
//! the head is consumed.
//!
//! All operations work over indices into a shared [`Arena`]; the tree
//! itself owns nothing but its root index.

use crate::arena::{Arena, ArenaIndex, Slot, NIL};

/// One side of the book: a price-ordered tree of FIFO rings.
///
/// `peek_min`/`pop_min` serve the sell side (best ask), `peek_max`/
/// `pop_max` the buy side (best bid). `pop` unlinks an arbitrary node for
/// the cancel path.
#[derive(Debug)]
pub struct Tree {
    root: ArenaIndex,
}

#[inline]
fn is_red(a: &Arena, n: ArenaIndex) -> bool {
    n != NIL && a.get(n).red
}

#[inline]
fn left_of(a: &Arena, n: ArenaIndex) -> ArenaIndex {
    if n == NIL {
        NIL
    } else {
        a.get(n).left
    }
}

#[inline]
fn right_of(a: &Arena, n: ArenaIndex) -> ArenaIndex {
    if n == NIL {
        NIL
    } else {
        a.get(n).right
    }
}

impl Tree {
    /// Create an empty tree
    pub const fn new() -> Self {
        Self { root: NIL }
    }

    /// Returns true if no orders rest in this tree
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Head node of the lowest price level, or NIL (best ask).
    #[inline]
    pub fn peek_min(&self, a: &Arena) -> ArenaIndex {
        let mut n = self.root;
        if n == NIL {
            return NIL;
        }
        while a.get(n).left != NIL {
            n = a.get(n).left;
        }
        n
    }

    /// Head node of the highest price level, or NIL (best bid).
    #[inline]
    pub fn peek_max(&self, a: &Arena) -> ArenaIndex {
        let mut n = self.root;
        if n == NIL {
            return NIL;
        }
        while a.get(n).right != NIL {
            n = a.get(n).right;
        }
        n
    }

    /// Remove and return the head node at the minimum price, or NIL.
    pub fn pop_min(&mut self, a: &mut Arena) -> ArenaIndex {
        let n = self.peek_min(a);
        if n != NIL {
            self.pop(a, n);
        }
        n
    }

    /// Remove and return the head node at the maximum price, or NIL.
    pub fn pop_max(&mut self, a: &mut Arena) -> ArenaIndex {
        let n = self.peek_max(a);
        if n != NIL {
            self.pop(a, n);
        }
        n
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert a freshly allocated node at its price.
    ///
    /// If the price level already exists the node joins the tail of its
    /// FIFO ring and the tree is untouched; otherwise the node becomes a
    /// red leaf and the LLRB fixup runs on every ancestor.
    pub fn push(&mut self, a: &mut Arena, idx: ArenaIndex) {
        debug_assert!(!a.get(idx).is_head(), "Node already linked");
        debug_assert_eq!(a.get(idx).next, idx, "Node must be a ring of one");

        if self.root == NIL {
            self.link_root(a, idx);
        } else {
            let price = a.get(idx).price;
            let mut n = self.root;
            loop {
                let np = a.get(n).price;
                if price == np {
                    add_last(a, n, idx);
                    break;
                } else if price < np {
                    if a.get(n).left == NIL {
                        self.link_left(a, n, idx);
                        self.llrb_to_root(a, n);
                        break;
                    }
                    n = a.get(n).left;
                } else {
                    if a.get(n).right == NIL {
                        self.link_right(a, n, idx);
                        self.llrb_to_root(a, n);
                        break;
                    }
                    n = a.get(n).right;
                }
            }
        }
        a.get_mut(self.root).red = false;
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Unlink a node, wherever it sits.
    ///
    /// Three cases: a ring follower splices out without touching the tree;
    /// a head with followers hands its tree identity to the earliest
    /// remaining arrival; a solitary head detaches from the tree with the
    /// black-height repair when needed.
    ///
    /// The node is left as a fully detached ring of one; the caller frees
    /// it (or re-inserts it).
    pub fn pop(&mut self, a: &mut Arena, n: ArenaIndex) {
        if !a.get(n).is_head() {
            // Ring follower: splice, tree untouched
            let prev = a.get(n).prev;
            let next = a.get(n).next;
            a.get_mut(prev).next = next;
            a.get_mut(next).prev = prev;
            let node = a.get_mut(n);
            node.parent = NIL;
            node.left = NIL;
            node.right = NIL;
        } else if a.get(n).next != n {
            // Head with followers: splice out, promote the earliest arrival
            let prev = a.get(n).prev;
            let next = a.get(n).next;
            a.get_mut(prev).next = next;
            a.get_mut(next).prev = prev;
            self.give_position(a, n, prev);
        } else {
            self.detach(a, n);
        }
        a.get_mut(n).next = n;
        a.get_mut(n).prev = n;
        // Guarantee: n.parent/left/right are NIL, slot is None, ring of one
        if self.root != NIL {
            a.get_mut(self.root).red = false;
        }
    }

    /// Remove a solitary head from the tree proper.
    fn detach(&mut self, a: &mut Arena, n: ArenaIndex) {
        let p = a.get(n).parent;
        let s = self.sibling(a, n);
        let l = a.get(n).left;
        let r = a.get(n).right;
        let nn;
        if r == NIL && l == NIL {
            self.clear_slot(a, n);
            nn = NIL;
        } else if r == NIL {
            nn = l;
            self.give_parent(a, n, nn);
            a.get_mut(n).left = NIL;
        } else if l == NIL {
            nn = r;
            self.give_parent(a, n, nn);
            a.get_mut(n).right = NIL;
        } else {
            // Two children: the max of the left subtree assumes n's position
            let m = self.detach_max(a, l);
            self.give_position(a, n, m);
            return;
        }
        self.repair_detach(a, p, n, s, nn);
    }

    /// Detach the maximum node of the subtree rooted at `n`.
    fn detach_max(&mut self, a: &mut Arena, n: ArenaIndex) -> ArenaIndex {
        let mut m = n;
        while a.get(m).right != NIL {
            m = a.get(m).right;
        }
        self.detach(a, m);
        m
    }

    /// Start the black-height repair after `detach` removed `n`.
    ///
    /// `p` and `s` are the parent and sibling as they stood before removal,
    /// `nn` the spliced-in replacement (possibly NIL).
    fn repair_detach(
        &mut self,
        a: &mut Arena,
        p: ArenaIndex,
        n: ArenaIndex,
        mut s: ArenaIndex,
        nn: ArenaIndex,
    ) {
        if a.get(n).red {
            return;
        }
        if is_red(a, nn) {
            // n was black, so its red replacement may simply turn black
            a.get_mut(nn).red = false;
            return;
        }
        if is_red(a, s) {
            // Rotate the parent away from the red sibling first
            if a.get(p).left == s {
                self.rotate_right(a, p);
                s = a.get(p).left;
            } else {
                self.rotate_left(a, p);
                s = a.get(p).right;
            }
        }
        self.repair_to_root(a, p, s);
    }

    /// Walk from `p` to the root resolving the one-black deficit on the
    /// side `s` is not on.
    fn repair_to_root(&mut self, a: &mut Arena, p: ArenaIndex, s: ArenaIndex) {
        let mut p = p;
        let mut s = s;
        while p != NIL {
            if s == NIL {
                self.llrb_to_root(a, p);
                return;
            }
            let p_red = a.get(p).red;
            let s_red = a.get(s).red;
            let sl_red = is_red(a, a.get(s).left);
            if !s_red && !sl_red && p_red {
                // Move the parent's red onto the sibling: deficit paid
                a.get_mut(p).red = false;
                a.get_mut(s).red = true;
                self.llrb_to_root(a, p);
                return;
            }
            if !s_red && !sl_red && !p_red {
                // Introduce black violation one level up
                a.get_mut(s).red = true;
            } else if !s_red && sl_red {
                // Borrow the sibling's red child to fill the deficit
                if a.get(p).left == s {
                    p = self.rotate_right(a, p);
                } else {
                    self.rotate_right(a, s);
                    p = self.rotate_left(a, p);
                }
                self.llrb_to_root(a, p);
                return;
            }
            p = self.llrb_step(a, p);
            s = self.sibling(a, p);
            p = a.get(p).parent;
        }
    }

    // ========================================================================
    // LLRB primitives
    // ========================================================================

    /// Re-establish the LLRB shape at `n`; returns the subtree's new root.
    fn llrb_step(&mut self, a: &mut Arena, n: ArenaIndex) -> ArenaIndex {
        let mut n = n;
        if is_red(a, right_of(a, n)) && !is_red(a, left_of(a, n)) {
            n = self.rotate_left(a, n);
        }
        if is_red(a, left_of(a, n)) && is_red(a, left_of(a, left_of(a, n))) {
            n = self.rotate_right(a, n);
        }
        if is_red(a, left_of(a, n)) && is_red(a, right_of(a, n)) {
            self.flip(a, n);
        }
        n
    }

    /// Apply the LLRB fixup on every node from `n` up to the root.
    fn llrb_to_root(&mut self, a: &mut Arena, n: ArenaIndex) {
        let mut n = n;
        while n != NIL {
            n = self.llrb_step(a, n);
            n = a.get(n).parent;
        }
    }

    fn rotate_left(&mut self, a: &mut Arena, n: ArenaIndex) -> ArenaIndex {
        let r = a.get(n).right;
        let n_red = a.get(n).red;
        self.give_parent(a, n, r);
        let rl = a.get(r).left;
        self.link_right(a, n, rl);
        self.link_left(a, r, n);
        a.get_mut(r).red = n_red;
        a.get_mut(n).red = true;
        r
    }

    fn rotate_right(&mut self, a: &mut Arena, n: ArenaIndex) -> ArenaIndex {
        let l = a.get(n).left;
        let n_red = a.get(n).red;
        self.give_parent(a, n, l);
        let lr = a.get(l).right;
        self.link_left(a, n, lr);
        self.link_right(a, l, n);
        a.get_mut(l).red = n_red;
        a.get_mut(n).red = true;
        l
    }

    fn flip(&mut self, a: &mut Arena, n: ArenaIndex) {
        let (l, r) = {
            let node = a.get_mut(n);
            node.red = !node.red;
            (node.left, node.right)
        };
        let left = a.get_mut(l);
        left.red = !left.red;
        let right = a.get_mut(r);
        right.red = !right.red;
    }

    // ========================================================================
    // Slot plumbing
    // ========================================================================

    /// Sibling of `n`, or NIL.
    fn sibling(&self, a: &Arena, n: ArenaIndex) -> ArenaIndex {
        let p = a.get(n).parent;
        if p == NIL {
            return NIL;
        }
        if a.get(p).left == n {
            a.get(p).right
        } else {
            a.get(p).left
        }
    }

    /// Make `child` the tree root.
    fn link_root(&mut self, a: &mut Arena, child: ArenaIndex) {
        self.root = child;
        if child != NIL {
            let node = a.get_mut(child);
            node.parent = NIL;
            node.slot = Slot::Root;
        }
    }

    /// Make `child` the left child of `parent` (child may be NIL).
    fn link_left(&mut self, a: &mut Arena, parent: ArenaIndex, child: ArenaIndex) {
        a.get_mut(parent).left = child;
        if child != NIL {
            let node = a.get_mut(child);
            node.parent = parent;
            node.slot = Slot::Left;
        }
    }

    /// Make `child` the right child of `parent` (child may be NIL).
    fn link_right(&mut self, a: &mut Arena, parent: ArenaIndex, child: ArenaIndex) {
        a.get_mut(parent).right = child;
        if child != NIL {
            let node = a.get_mut(child);
            node.parent = parent;
            node.slot = Slot::Right;
        }
    }

    /// `nn` takes over the slot `n` occupies; `n` comes out slotless.
    fn give_parent(&mut self, a: &mut Arena, n: ArenaIndex, nn: ArenaIndex) {
        let parent = a.get(n).parent;
        match a.get(n).slot {
            Slot::Root => self.link_root(a, nn),
            Slot::Left => self.link_left(a, parent, nn),
            Slot::Right => self.link_right(a, parent, nn),
            Slot::None => debug_assert!(false, "give_parent on a slotless node"),
        }
        let node = a.get_mut(n);
        node.parent = NIL;
        node.slot = Slot::None;
    }

    /// Empty the slot `n` occupies; `n` comes out slotless.
    fn clear_slot(&mut self, a: &mut Arena, n: ArenaIndex) {
        let parent = a.get(n).parent;
        match a.get(n).slot {
            Slot::Root => self.root = NIL,
            Slot::Left => a.get_mut(parent).left = NIL,
            Slot::Right => a.get_mut(parent).right = NIL,
            Slot::None => debug_assert!(false, "clear_slot on a slotless node"),
        }
        let node = a.get_mut(n);
        node.parent = NIL;
        node.slot = Slot::None;
    }

    /// `nn` takes over `n`'s children; `n` comes out childless.
    fn give_children(&mut self, a: &mut Arena, n: ArenaIndex, nn: ArenaIndex) {
        let l = a.get(n).left;
        let r = a.get(n).right;
        a.get_mut(nn).left = l;
        a.get_mut(nn).right = r;
        if l != NIL {
            let node = a.get_mut(l);
            node.parent = nn;
            node.slot = Slot::Left;
        }
        if r != NIL {
            let node = a.get_mut(r);
            node.parent = nn;
            node.slot = Slot::Right;
        }
        let node = a.get_mut(n);
        node.left = NIL;
        node.right = NIL;
    }

    /// `nn` assumes `n`'s entire tree identity: slot, children and colour.
    fn give_position(&mut self, a: &mut Arena, n: ArenaIndex, nn: ArenaIndex) {
        let n_red = a.get(n).red;
        self.give_parent(a, n, nn);
        self.give_children(a, n, nn);
        a.get_mut(nn).red = n_red;
        // Guarantee: n.parent/left/right are NIL, slot is None
    }
}

/// Append `idx` as the newest arrival of `head`'s FIFO ring.
///
/// `head.next` walks toward the newest arrival, `head.prev` toward the
/// earliest; promotion on head removal therefore takes `head.prev`.
#[inline]
fn add_last(a: &mut Arena, head: ArenaIndex, idx: ArenaIndex) {
    let last = a.get(head).next;
    a.get_mut(last).prev = idx;
    let node = a.get_mut(idx);
    node.next = last;
    node.prev = head;
    a.get_mut(head).next = idx;
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Validation (debug builds and tests)
// ============================================================================

impl Tree {
    /// Exhaustively check the tree's structural invariants.
    ///
    /// Panics with a descriptive diagnostic on the first violation found:
    /// black imbalance, red-red pair, right-leaning red, broken slot
    /// back-pointer, non-monotonic prices, or a corrupt FIFO ring. Intended
    /// for debug builds and tests; never called on the hot path.
    pub fn validate(&self, a: &Arena) {
        if self.root != NIL {
            assert!(!a.get(self.root).red, "Root must be black");
            assert_eq!(a.get(self.root).slot, Slot::Root, "Root slot tag wrong");
            assert_eq!(a.get(self.root).parent, NIL, "Root has a parent");
        }
        black_balance(a, self.root, 0);
        test_reds(a, self.root, 0);
        self.check_structure(a, self.root);
    }

    /// In-order price traversal (heads only); tests use this to check
    /// strict monotonicity.
    pub fn in_order_prices(&self, a: &Arena) -> Vec<i64> {
        let mut out = Vec::new();
        collect_in_order(a, self.root, &mut out);
        out
    }

    /// Total number of resting orders (heads plus ring followers).
    pub fn len(&self, a: &Arena) -> usize {
        count_orders(a, self.root)
    }

    /// Every resting order, in price order and arrival order within a
    /// price level.
    pub fn collect(&self, a: &Arena) -> Vec<ArenaIndex> {
        let mut out = Vec::new();
        collect_orders(a, self.root, &mut out);
        out
    }

    fn check_structure(&self, a: &Arena, n: ArenaIndex) {
        if n == NIL {
            return;
        }
        let node = a.get(n);
        // Slot back-pointer must dereference to the node itself
        match node.slot {
            Slot::Root => assert_eq!(self.root, n, "Root slot not pointing at me"),
            Slot::Left => assert_eq!(
                a.get(node.parent).left,
                n,
                "Parent's left slot not pointing at me"
            ),
            Slot::Right => assert_eq!(
                a.get(node.parent).right,
                n,
                "Parent's right slot not pointing at me"
            ),
            Slot::None => panic!("In-tree node with no slot"),
        }
        if node.left != NIL {
            assert!(
                a.get(node.left).price < node.price,
                "Left price {} not below node price {}",
                a.get(node.left).price,
                node.price
            );
        }
        if node.right != NIL {
            assert!(
                a.get(node.right).price > node.price,
                "Right price {} not above node price {}",
                a.get(node.right).price,
                node.price
            );
        }
        // FIFO ring: circular, same price, followers slotless
        let mut m = node.next;
        while m != n {
            let follower = a.get(m);
            assert_eq!(follower.slot, Slot::None, "Ring follower holds a tree slot");
            assert_eq!(follower.price, node.price, "Ring follower price mismatch");
            assert_eq!(a.get(follower.next).prev, m, "Ring linkage broken");
            m = follower.next;
        }
        self.check_structure(a, node.left);
        self.check_structure(a, node.right);
    }
}

fn black_balance(a: &Arena, n: ArenaIndex, depth: usize) -> usize {
    if n == NIL {
        return 0;
    }
    let lb = black_balance(a, a.get(n).left, depth + 1);
    let rb = black_balance(a, a.get(n).right, depth + 1);
    assert_eq!(
        lb, rb,
        "Unbalanced tree found at depth {}. Left: {} Right: {}",
        depth, lb, rb
    );
    if is_red(a, n) {
        lb
    } else {
        lb + 1
    }
}

fn test_reds(a: &Arena, n: ArenaIndex, depth: usize) {
    if n == NIL {
        return;
    }
    let l = a.get(n).left;
    let r = a.get(n).right;
    if is_red(a, n) && (is_red(a, l) || is_red(a, r)) {
        panic!("Red violation found at depth {}", depth);
    }
    if !is_red(a, l) && is_red(a, r) {
        panic!("Right leaning red found at depth {}", depth);
    }
    if is_red(a, l) && is_red(a, r) {
        panic!("Red child pair found at depth {}", depth);
    }
    test_reds(a, l, depth + 1);
    test_reds(a, r, depth + 1);
}

fn collect_in_order(a: &Arena, n: ArenaIndex, out: &mut Vec<i64>) {
    if n == NIL {
        return;
    }
    collect_in_order(a, a.get(n).left, out);
    out.push(a.get(n).price);
    collect_in_order(a, a.get(n).right, out);
}

fn collect_orders(a: &Arena, n: ArenaIndex, out: &mut Vec<ArenaIndex>) {
    if n == NIL {
        return;
    }
    collect_orders(a, a.get(n).left, out);
    // Arrival order: the head, then the prev direction of the ring
    out.push(n);
    let mut m = a.get(n).prev;
    while m != n {
        out.push(m);
        m = a.get(m).prev;
    }
    collect_orders(a, a.get(n).right, out);
}

fn count_orders(a: &Arena, n: ArenaIndex) -> usize {
    if n == NIL {
        return 0;
    }
    let mut count = 1;
    let mut m = a.get(n).next;
    while m != n {
        count += 1;
        m = a.get(m).next;
    }
    count + count_orders(a, a.get(n).left) + count_orders(a, a.get(n).right)
}
