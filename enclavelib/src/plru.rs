/// Tree pseudo-LRU state for one set (or one Set Allocation Table)
///
/// The tree is stored as a flat array of `slots - 1` direction bits, where node `i` has children
/// `2i + 1` and `2i + 2`. A bit points towards the less recently used half: `false` means left,
/// `true` means right. Accessing a slot sets every bit on its path to point away from it, and a
/// victim search follows the bits down, flipping them as it goes so consecutive searches spread
/// out over the set
///
/// Every traversal below walks the tree from the root, consuming one address bit per level, so
/// they are O(log slots) and allocation free
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlruTree {
    bits: Vec<bool>,
    depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
}

impl PlruTree {
    /// Creates a tree over `slots` leaves. `slots` must be a power of two
    pub fn new(slots: usize) -> Self {
        debug_assert!(slots.is_power_of_two());
        Self {
            bits: vec![false; slots.saturating_sub(1)],
            depth: slots.trailing_zeros(),
        }
    }

    pub fn slots(&self) -> usize {
        1 << self.depth
    }

    fn lru_direction(&self, node: usize) -> Direction {
        if self.bits[node] {
            Direction::Right
        } else {
            Direction::Left
        }
    }

    /// Moves from `node` to the child in `direction`. With `flip` set, the node's bit is pointed
    /// away from the path taken
    fn descend(&mut self, node: usize, direction: Direction, flip: bool) -> usize {
        match direction {
            Direction::Left => {
                if flip {
                    self.bits[node] = true;
                }
                2 * node + 1
            }
            Direction::Right => {
                if flip {
                    self.bits[node] = false;
                }
                2 * node + 2
            }
        }
    }

    /// Marks `slot` as most recently used
    pub fn touch(&mut self, slot: usize) {
        let mut node = 0;
        for level in (0..self.depth).rev() {
            let direction = if slot & (1 << level) != 0 {
                Direction::Right
            } else {
                Direction::Left
            };
            node = self.descend(node, direction, true);
        }
    }

    /// Plain victim search over every slot
    pub fn victim(&mut self) -> usize {
        let slots = self.slots();
        self.victim_within(0, slots)
            .expect("a PLRU tree always has a victim over its full range")
    }

    /// Victim search restricted to slots in `[low, high)`
    ///
    /// When the recency bit points at a subtree that lies entirely outside the range, the search
    /// is forced into the other subtree and the bit is left alone, since that direction wasn't
    /// picked by recency. Returns `None` when the range is empty
    pub fn victim_within(&mut self, low: usize, high: usize) -> Option<usize> {
        let high = high.min(self.slots());
        if low >= high {
            return None;
        }
        let mut node = 0;
        let mut slot = 0;
        for level in (0..self.depth).rev() {
            let half = 1 << level;
            let (direction, forced) = match self.lru_direction(node) {
                Direction::Left if slot + half <= low => (Direction::Right, true),
                Direction::Right if slot + half >= high => (Direction::Left, true),
                natural => (natural, false),
            };
            if direction == Direction::Right {
                slot |= half;
            }
            node = self.descend(node, direction, !forced);
        }
        debug_assert!(slot >= low && slot < high);
        Some(slot)
    }

    /// Victim search which, on the last level only, prefers an unprotected leaf over a protected
    /// sibling. If both leaves agree the ordinary PLRU choice is made
    pub fn victim_preferring<F>(&mut self, is_protected: F) -> usize
    where
        F: Fn(usize) -> bool,
    {
        let mut node = 0;
        let mut slot = 0;
        for level in (0..self.depth).rev() {
            if level == 0 {
                let left = slot;
                let right = slot | 1;
                let (left_protected, right_protected) = (is_protected(left), is_protected(right));
                if left_protected != right_protected {
                    return if left_protected { right } else { left };
                }
            }
            let direction = self.lru_direction(node);
            if direction == Direction::Right {
                slot |= 1 << level;
            }
            node = self.descend(node, direction, true);
        }
        slot
    }

    /// Victim search steered into the aligned group `[group_start, group_start + group_size)`
    ///
    /// While the subtree under consideration is wider than the group the search goes towards the
    /// group regardless of the bits (and leaves them untouched). Inside the group it is ordinary
    /// PLRU
    pub fn victim_in_group(&mut self, group_start: usize, group_size: usize) -> usize {
        let mut node = 0;
        let mut slot = 0;
        let mut span = self.slots();
        for level in (0..self.depth).rev() {
            let half = 1 << level;
            if span > group_size {
                let direction = if group_start < slot + half {
                    Direction::Left
                } else {
                    Direction::Right
                };
                if direction == Direction::Right {
                    slot |= half;
                }
                node = self.descend(node, direction, false);
            } else {
                let direction = self.lru_direction(node);
                if direction == Direction::Right {
                    slot |= half;
                }
                node = self.descend(node, direction, true);
            }
            span >>= 1;
        }
        slot
    }

    /// Victim search that never lands on a slot whose bit is set in `occupied`
    ///
    /// At each level a half whose slots are all occupied is skipped. Returns `None` if both halves
    /// of a subtree are fully occupied, which callers treat as a broken invariant
    pub fn victim_avoiding(&mut self, occupied: u64) -> Option<usize> {
        let mut node = 0;
        let mut slot = 0;
        let mut occupied = occupied & low_bits(self.slots());
        if occupied == low_bits(self.slots()) {
            return None;
        }
        for level in (0..self.depth).rev() {
            let half = 1usize << level;
            let mask = low_bits(half);
            let left = occupied & mask;
            let right = (occupied >> half) & mask;
            let direction = match (left == mask, right == mask) {
                (true, true) => return None,
                (true, false) => Direction::Right,
                (false, true) => Direction::Left,
                (false, false) => self.lru_direction(node),
            };
            occupied = match direction {
                Direction::Left => left,
                Direction::Right => {
                    slot |= half;
                    right
                }
            };
            node = self.descend(node, direction, true);
        }
        Some(slot)
    }
}

fn low_bits(count: usize) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}
