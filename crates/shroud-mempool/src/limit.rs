//! Size limiting: the fee-weighted tree that picks random eviction victims
//! and the time-decayed memory of recent evictions.

use crate::usage;
use bitcoin::{Amount, Txid};
use rand::Rng;
use std::collections::{HashMap, VecDeque};

/// Cost floor per transaction, so that dust-sized transactions still
/// consume a meaningful share of the pool.
pub const MIN_TX_COST: u64 = 4_000;

/// Extra eviction weight carried by transactions paying less than the
/// conventional fee. Penalized transactions are more likely victims but do
/// not consume extra capacity.
pub const LOW_FEE_PENALTY: u64 = 16_000;

/// The conventional flat fee, in zatoshis.
pub const DEFAULT_FEE: u64 = 1_000;

/// Upper bound on remembered evictions, independent of the time window.
pub const EVICTION_MEMORY_ENTRIES: usize = 40_000;

/// Cost and eviction weight of one pool member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedTxInfo {
    pub txid: Txid,
    pub cost: u64,
    pub eviction_weight: u64,
}

impl WeightedTxInfo {
    pub fn new(txid: Txid, tx_size: usize, fee: Amount) -> Self {
        let cost = (tx_size as u64).max(MIN_TX_COST);
        let eviction_weight = if fee < Amount::from_sat(DEFAULT_FEE) {
            cost + LOW_FEE_PENALTY
        } else {
            cost
        };
        Self {
            txid,
            cost,
            eviction_weight,
        }
    }
}

/// Binary-indexed prefix sums over the eviction weights, 1-based.
#[derive(Debug, Default)]
struct PrefixWeights {
    tree: Vec<i64>,
}

impl PrefixWeights {
    fn new() -> Self {
        Self { tree: vec![0] }
    }

    fn len(&self) -> usize {
        self.tree.len() - 1
    }

    fn push(&mut self, value: i64) {
        // The new node covers (n - lowbit(n), n]: seed it with the sum of
        // the elements already inside that range.
        let n = self.tree.len();
        let covered = self.prefix(n - 1) - self.prefix(n - (n & n.wrapping_neg()));
        self.tree.push(covered + value);
    }

    /// Drop the last slot. The caller must have zeroed its value first.
    fn pop(&mut self) {
        self.tree.pop();
    }

    fn add(&mut self, index: usize, delta: i64) {
        let mut i = index + 1;
        while i < self.tree.len() {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of the first `count` elements.
    fn prefix(&self, mut count: usize) -> i64 {
        let mut sum = 0;
        while count > 0 {
            sum += self.tree[count];
            count -= count & count.wrapping_neg();
        }
        sum
    }

    fn total(&self) -> i64 {
        self.prefix(self.len())
    }

    /// Index of the item containing offset `target` into the cumulative
    /// weight, i.e. the smallest `i` with `prefix(i + 1) > target`.
    fn find(&self, mut target: i64) -> usize {
        let mut pos = 0;
        let mut bit = self.tree.len().next_power_of_two() >> 1;
        while bit > 0 {
            let next = pos + bit;
            if next < self.tree.len() && self.tree[next] <= target {
                target -= self.tree[next];
                pos = next;
            }
            bit >>= 1;
        }
        pos
    }
}

/// The weighted set backing random eviction.
///
/// Capacity is compared against the summed *cost*; sampling is proportional
/// to the *eviction weight*. Membership mirrors the pool's entry set
/// exactly: the pool adds on admission and removes on any removal path.
#[derive(Debug)]
pub struct WeightedTxTree {
    capacity: u64,
    items: Vec<WeightedTxInfo>,
    index: HashMap<Txid, usize>,
    weights: PrefixWeights,
    total_cost: u64,
}

impl WeightedTxTree {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            items: Vec::new(),
            index: HashMap::new(),
            weights: PrefixWeights::new(),
            total_cost: 0,
        }
    }

    pub fn add(&mut self, info: WeightedTxInfo) {
        debug_assert!(!self.index.contains_key(&info.txid));
        self.index.insert(info.txid, self.items.len());
        self.weights.push(info.eviction_weight as i64);
        self.total_cost += info.cost;
        self.items.push(info);
    }

    /// Remove `txid` if present. Absent txids are a no-op so that repeated
    /// removal passes stay idempotent.
    pub fn remove(&mut self, txid: &Txid) {
        let Some(slot) = self.index.remove(txid) else {
            return;
        };
        let removed = self.items[slot];
        self.total_cost -= removed.cost;
        self.weights.add(slot, -(removed.eviction_weight as i64));

        let last = self.items.len() - 1;
        if slot != last {
            let moved = self.items[last];
            self.weights.add(last, -(moved.eviction_weight as i64));
            self.weights.add(slot, moved.eviction_weight as i64);
            self.items.swap(slot, last);
            self.index.insert(moved.txid, slot);
        }
        self.items.pop();
        self.weights.pop();
    }

    /// Summed cost of all members.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.weights = PrefixWeights::new();
        self.total_cost = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.index.contains_key(txid)
    }

    /// Pick an eviction victim, weight-proportionally, while the tree is
    /// over capacity. Does not remove the victim; the caller runs the full
    /// recursive removal, which circles back through [`Self::remove`].
    pub fn maybe_drop_random(&self, rng: &mut impl Rng) -> Option<Txid> {
        if self.total_cost <= self.capacity {
            return None;
        }
        let total_weight = self.weights.total();
        debug_assert!(total_weight > 0);
        let target = rng.gen_range(0..total_weight);
        Some(self.items[self.weights.find(target)].txid)
    }

    pub fn dynamic_usage(&self) -> usize {
        usage::vec_usage::<WeightedTxInfo>(self.items.capacity())
            + usage::vec_usage::<i64>(self.weights.tree.capacity())
            + usage::hash_map_usage::<Txid, usize>(self.index.len())
    }
}

/// Txids recently dropped by size-limit enforcement.
///
/// Bounded by a time window; entries older than `time_to_keep` are pruned
/// lazily on every access, and a hard entry cap keeps memory bounded even
/// under eviction storms.
#[derive(Debug)]
pub struct RecentlyEvictedList {
    time_to_keep: i64,
    capacity: usize,
    order: VecDeque<(Txid, i64)>,
    times: HashMap<Txid, i64>,
}

impl RecentlyEvictedList {
    pub fn new(time_to_keep: i64) -> Self {
        Self::with_capacity(EVICTION_MEMORY_ENTRIES, time_to_keep)
    }

    pub fn with_capacity(capacity: usize, time_to_keep: i64) -> Self {
        Self {
            time_to_keep,
            capacity,
            order: VecDeque::new(),
            times: HashMap::new(),
        }
    }

    fn prune(&mut self, now: i64) {
        while let Some(&(txid, time)) = self.order.front() {
            if time + self.time_to_keep >= now {
                break;
            }
            self.order.pop_front();
            if self.times.get(&txid) == Some(&time) {
                self.times.remove(&txid);
            }
        }
    }

    pub fn add(&mut self, txid: Txid, now: i64) {
        self.prune(now);
        if self.times.contains_key(&txid) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some((oldest, time)) = self.order.pop_front() {
                if self.times.get(&oldest) == Some(&time) {
                    self.times.remove(&oldest);
                }
            }
        }
        self.order.push_back((txid, now));
        self.times.insert(txid, now);
    }

    pub fn contains(&mut self, txid: &Txid, now: i64) -> bool {
        self.prune(now);
        self.times.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn dynamic_usage(&self) -> usize {
        usage::vec_usage::<(Txid, i64)>(self.order.capacity())
            + usage::hash_map_usage::<Txid, i64>(self.times.len())
    }
}
