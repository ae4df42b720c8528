//! Inner pool state, guarded by the lock in [`crate::MemPool`].
//!
//! Every cross map in here is keyed by value (`(txid, position)` rows
//! resolved through the entry map), never by reference, so entries can move
//! freely without dangling anything.

use crate::estimator::FeeEstimator;
use crate::index::{AddressIndex, SpentIndex};
use crate::limit::{RecentlyEvictedList, WeightedTxInfo, WeightedTxTree};
use crate::types::{MemPoolEntry, RemovalReason, ScoreKey, TxSpend};
use crate::usage;
use crate::LOG_TARGET;
use bitcoin::{OutPoint, SignedAmount, TxOut, Txid};
use rand::rngs::StdRng;
use shroud_primitives::{CoinsView, Nullifier, ShieldedKind, Transaction};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::mem;
use std::sync::Arc;

pub(crate) struct MemPoolInner {
    /// Authoritative entry set.
    pub entries: BTreeMap<Txid, MemPoolEntry>,

    /// Secondary ordering: effective fee rate descending.
    pub by_score: BTreeSet<ScoreKey>,

    /// Every transparent input of every entry has exactly one row here.
    pub spends: BTreeMap<OutPoint, TxSpend>,

    pub sprout_nullifiers: BTreeMap<Nullifier, Txid>,
    pub sapling_nullifiers: BTreeMap<Nullifier, Txid>,
    pub orchard_nullifiers: BTreeMap<Nullifier, Txid>,

    /// Operator-supplied (priority, fee) adjustments. Rows survive the
    /// entry coming and going.
    pub deltas: BTreeMap<Txid, (f64, SignedAmount)>,

    /// Explorer indexes, present when enabled in the options.
    pub address_index: Option<AddressIndex>,
    pub spent_index: Option<SpentIndex>,

    /// Entries not yet drained towards wallet notification.
    pub recently_added: BTreeMap<Txid, Arc<Transaction>>,
    pub recently_added_sequence: u64,
    pub notified_sequence: u64,

    pub weighted_tree: WeightedTxTree,
    pub recently_evicted: RecentlyEvictedList,

    pub estimator: Box<dyn FeeEstimator>,
    pub rng: StdRng,

    pub total_tx_size: u64,
    pub cached_inner_usage: usize,
    pub transactions_updated: u32,
}

impl MemPoolInner {
    pub fn nullifier_map(&self, kind: ShieldedKind) -> &BTreeMap<Nullifier, Txid> {
        match kind {
            ShieldedKind::Sprout => &self.sprout_nullifiers,
            ShieldedKind::Sapling => &self.sapling_nullifiers,
            ShieldedKind::Orchard => &self.orchard_nullifiers,
        }
    }

    /// Entries in descending score order.
    pub fn iter_by_score(&self) -> impl Iterator<Item = &MemPoolEntry> {
        self.by_score.iter().map(|key| {
            self.entries
                .get(&key.txid)
                .expect("score index row must have a pool entry")
        })
    }

    /// Resolve the output consumed by each input of `entry`, preferring
    /// in-pool parents over the base view. Inputs whose prevout script is
    /// unresolvable are skipped.
    fn resolve_inputs(&self, entry: &MemPoolEntry, view: &dyn CoinsView) -> Vec<(u32, TxOut)> {
        entry
            .tx()
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(k, input)| {
                let prevout = input.previous_output;
                let out = match self.entries.get(&prevout.txid) {
                    Some(parent) => parent.tx().outputs.get(prevout.vout as usize).cloned(),
                    None => view
                        .access_coins(&prevout.txid)
                        .and_then(|coins| coins.outputs.get(prevout.vout as usize).cloned())
                        .flatten(),
                };
                out.map(|out| (k as u32, out))
            })
            .collect()
    }

    /// Insert a fully validated entry. The caller has already rejected
    /// duplicates and colliding spends.
    pub fn add_unchecked(
        &mut self,
        mut entry: MemPoolEntry,
        use_current_estimate: bool,
        view: &dyn CoinsView,
    ) {
        let txid = entry.txid();
        self.weighted_tree
            .add(WeightedTxInfo::new(txid, entry.tx_size(), entry.fee()));

        self.cached_inner_usage += entry.dynamic_usage();
        self.total_tx_size += entry.tx_size() as u64;

        let tx = entry.tx().clone();
        self.recently_added.insert(txid, tx.clone());
        self.recently_added_sequence += 1;

        for (k, input) in tx.inputs.iter().enumerate() {
            self.spends.insert(
                input.previous_output,
                TxSpend {
                    txid,
                    input_index: k as u32,
                },
            );
        }
        for nf in tx.sprout_nullifiers() {
            self.sprout_nullifiers.insert(*nf, txid);
        }
        for nf in tx.sapling_nullifiers() {
            self.sapling_nullifiers.insert(*nf, txid);
        }
        for nf in tx.orchard_nullifiers() {
            self.orchard_nullifiers.insert(*nf, txid);
        }

        // A prioritisation recorded before this txid ever arrived applies
        // from the moment of admission.
        if let Some(&(_, fee_delta)) = self.deltas.get(&txid) {
            if fee_delta != SignedAmount::ZERO {
                entry.set_fee_delta(fee_delta);
            }
        }

        self.estimator.process_transaction(&entry, use_current_estimate);

        if self.address_index.is_some() || self.spent_index.is_some() {
            let resolved = self.resolve_inputs(&entry, view);
            if let Some(index) = self.address_index.as_mut() {
                index.insert(&entry, &resolved);
            }
            if let Some(index) = self.spent_index.as_mut() {
                index.insert(&entry, &resolved);
            }
        }

        self.by_score.insert(entry.score_key());
        self.entries.insert(txid, entry);
        self.transactions_updated += 1;
    }

    /// Re-apply a changed fee delta, relocating the entry in the score
    /// index.
    pub fn update_fee_delta(&mut self, txid: &Txid, fee_delta: SignedAmount) {
        let Some(entry) = self.entries.get_mut(txid) else {
            return;
        };
        let old_key = entry.score_key();
        entry.set_fee_delta(fee_delta);
        let new_key = entry.score_key();
        self.by_score.remove(&old_key);
        self.by_score.insert(new_key);
    }

    /// The one removal primitive every removal path funnels through.
    ///
    /// `orig` need not be in the pool: with `recursive`, its in-pool
    /// descendants are discovered through the spend index and removed
    /// anyway, which is what recovers consistency after a reorg where the
    /// root never re-entered the pool.
    pub fn remove_recursive(
        &mut self,
        orig: &Transaction,
        removed: &mut Vec<Arc<Transaction>>,
        recursive: bool,
        reason: RemovalReason,
    ) {
        let first_removed = removed.len();
        let orig_txid = orig.txid();

        let mut queue = VecDeque::new();
        queue.push_back(orig_txid);
        if recursive && !self.entries.contains_key(&orig_txid) {
            for i in 0..orig.outputs.len() as u32 {
                if let Some(spend) = self.spends.get(&OutPoint::new(orig_txid, i)) {
                    queue.push_back(spend.txid);
                }
            }
        }

        while let Some(txid) = queue.pop_front() {
            let Some(entry) = self.entries.get(&txid) else {
                continue;
            };
            if recursive {
                for i in 0..entry.tx().outputs.len() as u32 {
                    if let Some(spend) = self.spends.get(&OutPoint::new(txid, i)) {
                        queue.push_back(spend.txid);
                    }
                }
            }

            let entry = self.entries.remove(&txid).expect("entry checked above");
            self.recently_added.remove(&txid);
            for input in &entry.tx().inputs {
                self.spends.remove(&input.previous_output);
            }
            for nf in entry.tx().sprout_nullifiers() {
                self.sprout_nullifiers.remove(nf);
            }
            for nf in entry.tx().sapling_nullifiers() {
                self.sapling_nullifiers.remove(nf);
            }
            for nf in entry.tx().orchard_nullifiers() {
                self.orchard_nullifiers.remove(nf);
            }
            if let Some(index) = self.address_index.as_mut() {
                index.remove(&txid);
            }
            if let Some(index) = self.spent_index.as_mut() {
                index.remove(&txid);
            }
            self.by_score.remove(&entry.score_key());
            self.total_tx_size -= entry.tx_size() as u64;
            self.cached_inner_usage -= entry.dynamic_usage();
            self.transactions_updated += 1;
            self.estimator.remove_tx(&txid);
            tracing::trace!(
                target: LOG_TARGET,
                %txid,
                reason = reason.as_str(),
                "Removed transaction from the pool"
            );
            removed.push(entry.tx().clone());
        }

        for tx in &removed[first_removed..] {
            self.weighted_tree.remove(&tx.txid());
        }
    }

    /// Remove entries conflicting with `tx` on any transparent input or
    /// any nullifier, excluding `tx` itself.
    pub fn remove_conflicts(&mut self, tx: &Transaction, removed: &mut Vec<Arc<Transaction>>) {
        let txid = tx.txid();

        for input in &tx.inputs {
            if let Some(spend) = self.spends.get(&input.previous_output).copied() {
                if spend.txid != txid {
                    self.remove_conflict_tx(&spend.txid, removed);
                }
            }
        }
        for nf in tx.sprout_nullifiers() {
            if let Some(other) = self.sprout_nullifiers.get(nf).copied() {
                if other != txid {
                    self.remove_conflict_tx(&other, removed);
                }
            }
        }
        for nf in tx.sapling_nullifiers() {
            if let Some(other) = self.sapling_nullifiers.get(nf).copied() {
                if other != txid {
                    self.remove_conflict_tx(&other, removed);
                }
            }
        }
        for nf in tx.orchard_nullifiers() {
            if let Some(other) = self.orchard_nullifiers.get(nf).copied() {
                if other != txid {
                    self.remove_conflict_tx(&other, removed);
                }
            }
        }
    }

    fn remove_conflict_tx(&mut self, txid: &Txid, removed: &mut Vec<Arc<Transaction>>) {
        if let Some(conflict) = self.entries.get(txid).map(|entry| entry.tx().clone()) {
            self.remove_recursive(&conflict, removed, true, RemovalReason::Conflict);
        }
    }

    /// Drop entries invalidated by the chain moving backwards: transactions
    /// that are no longer final, and spends of coinbases that fell back
    /// under the maturity horizon. Spends of in-pool parents skip the
    /// maturity probe.
    pub fn remove_for_reorg(
        &mut self,
        view: &dyn CoinsView,
        mempool_height: u32,
        block_time: i64,
        assert_coins: bool,
    ) {
        let mut to_remove = Vec::new();
        for entry in self.entries.values() {
            let tx = entry.tx();
            if !tx.is_final(mempool_height, block_time) {
                to_remove.push(tx.clone());
            } else if entry.spends_coinbase() {
                for input in &tx.inputs {
                    let prevout = input.previous_output;
                    if self.entries.contains_key(&prevout.txid) {
                        continue;
                    }
                    let coins = view.access_coins(&prevout.txid);
                    if assert_coins {
                        assert!(coins.is_some(), "reorg left a pool input without coins");
                    }
                    let immature = coins.as_ref().is_none_or(|coins| {
                        coins.is_coinbase
                            && mempool_height.saturating_sub(coins.height) < shroud_primitives::COINBASE_MATURITY
                    });
                    if immature {
                        to_remove.push(tx.clone());
                        break;
                    }
                }
            }
        }
        for tx in to_remove {
            let mut removed = Vec::new();
            self.remove_recursive(&tx, &mut removed, true, RemovalReason::Reorg);
        }
    }

    /// Drop every entry proving a shielded spend against `invalid_root`.
    pub fn remove_with_anchor(&mut self, invalid_root: &shroud_primitives::Anchor, kind: ShieldedKind) {
        let mut to_remove = Vec::new();
        for entry in self.entries.values() {
            let tx = entry.tx();
            let hit = match kind {
                ShieldedKind::Sprout => tx.joinsplits.iter().any(|js| js.anchor == *invalid_root),
                ShieldedKind::Sapling => tx
                    .sapling_spends
                    .iter()
                    .any(|spend| spend.anchor == *invalid_root),
                ShieldedKind::Orchard => tx
                    .orchard_bundle
                    .as_ref()
                    .is_some_and(|bundle| bundle.anchor == *invalid_root),
            };
            if hit {
                to_remove.push(tx.clone());
            }
        }
        for tx in to_remove {
            let mut removed = Vec::new();
            self.remove_recursive(&tx, &mut removed, true, RemovalReason::AnchorInvalidated);
        }
    }

    /// Drop entries that can no longer be mined at `block_height`; returns
    /// the removed txids in entry-map order.
    pub fn remove_expired(&mut self, block_height: u32) -> Vec<Txid> {
        let to_remove: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.tx().is_expired(block_height))
            .map(|entry| entry.tx().clone())
            .collect();
        let mut ids = Vec::with_capacity(to_remove.len());
        for tx in to_remove {
            let mut removed = Vec::new();
            self.remove_recursive(&tx, &mut removed, true, RemovalReason::Expiry);
            let txid = tx.txid();
            tracing::info!(target: LOG_TARGET, %txid, "Removing expired transaction");
            ids.push(txid);
        }
        ids
    }

    /// A block connected: drop its transactions and their conflicts, clear
    /// their prioritisations, and feed the estimator the snapshot of
    /// entries the block confirmed.
    pub fn remove_for_block(
        &mut self,
        vtx: &[Arc<Transaction>],
        block_height: u32,
        conflicts: &mut Vec<Arc<Transaction>>,
        use_current_estimate: bool,
    ) {
        // Snapshot before any removal: the estimator wants the entries as
        // they were in the pool, not the survivors.
        let confirmed: Vec<MemPoolEntry> = vtx
            .iter()
            .filter_map(|tx| self.entries.get(&tx.txid()).cloned())
            .collect();

        for tx in vtx {
            let mut removed = Vec::new();
            self.remove_recursive(tx, &mut removed, false, RemovalReason::Block);
            self.remove_conflicts(tx, conflicts);
            self.deltas.remove(&tx.txid());
        }

        self.estimator
            .process_block(block_height, &confirmed, use_current_estimate);
    }

    /// Drop every entry validated under a different consensus branch.
    pub fn remove_without_branch_id(&mut self, branch_id: u32) {
        let to_remove: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.branch_id() != branch_id)
            .map(|entry| entry.tx().clone())
            .collect();
        for tx in to_remove {
            let mut removed = Vec::new();
            self.remove_recursive(&tx, &mut removed, true, RemovalReason::BranchId);
        }
    }

    /// Evict weight-proportionally random victims until the tree fits its
    /// cost limit again. Each victim's descendants go with it, so every
    /// iteration strictly shrinks the tree.
    pub fn ensure_size_limit(&mut self, now: i64) {
        while let Some(victim) = self.weighted_tree.maybe_drop_random(&mut self.rng) {
            self.recently_evicted.add(victim, now);
            let tx = self
                .entries
                .get(&victim)
                .map(|entry| entry.tx().clone())
                .expect("weighted tree member must be a pool entry");
            let mut removed = Vec::new();
            self.remove_recursive(&tx, &mut removed, true, RemovalReason::SizeLimit);
            tracing::debug!(
                target: LOG_TARGET,
                %victim,
                evicted = removed.len(),
                "Evicted transactions to honor the cost limit"
            );
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_score.clear();
        self.spends.clear();
        self.sprout_nullifiers.clear();
        self.sapling_nullifiers.clear();
        self.orchard_nullifiers.clear();
        if let Some(index) = self.address_index.as_mut() {
            index.clear();
        }
        if let Some(index) = self.spent_index.as_mut() {
            index.clear();
        }
        self.recently_added.clear();
        self.weighted_tree.clear();
        self.total_tx_size = 0;
        self.cached_inner_usage = 0;
        self.transactions_updated += 1;
    }

    /// Estimated total heap usage, for operator-facing accounting.
    pub fn dynamic_memory_usage(&self) -> usize {
        let mut total = 0;
        total += usage::malloc_usage(mem::size_of::<MemPoolEntry>() + 6 * mem::size_of::<usize>())
            * self.entries.len();
        total += usage::btree_set_usage::<ScoreKey>(self.by_score.len());
        total += usage::btree_map_usage::<OutPoint, TxSpend>(self.spends.len());
        total += usage::btree_map_usage::<Txid, (f64, SignedAmount)>(self.deltas.len());
        total += self.cached_inner_usage;
        total += usage::btree_map_usage::<Txid, Arc<Transaction>>(self.recently_added.len());
        total += usage::btree_map_usage::<Nullifier, Txid>(
            self.sprout_nullifiers.len()
                + self.sapling_nullifiers.len()
                + self.orchard_nullifiers.len(),
        );
        total += self.recently_evicted.dynamic_usage() + self.weighted_tree.dynamic_usage();
        if let Some(index) = self.address_index.as_ref() {
            total += usage::btree_map_usage::<crate::index::AddressKey, crate::index::AddressDelta>(
                index.row_count(),
            );
        }
        if let Some(index) = self.spent_index.as_ref() {
            total += usage::btree_map_usage::<OutPoint, crate::index::SpentValue>(index.row_count());
        }
        total
    }
}
