//! # Shroud transaction memory pool
//!
//! Buffers validated-but-unmined transactions and keeps a consistent view
//! of their pending spends, transparent and shielded alike.
//!
//! 1. Admission
//!     - Callers validate transactions elsewhere and hand finished entries
//!       to [`MemPool::add_unchecked`].
//!     - The pool fans the entry out to its cross maps: spend index,
//!       nullifier maps, score index, explorer indexes, fee estimator.
//! 2. Removal
//!     - Every removal path (direct, block connection, conflict, reorg,
//!       anchor invalidation, expiry, branch change, eviction) funnels
//!       through one recursive primitive that reverses every insertion.
//! 3. Size limiting
//!     - A fee-weighted tree picks random victims whenever the pool's
//!       total cost exceeds its limit; evicted txids are remembered for a
//!       configured window.

mod check;
mod coins_view;
mod error;
mod estimator;
mod index;
mod inner;
mod limit;
mod options;
#[cfg(test)]
mod tests;
mod types;
mod usage;

pub use self::coins_view::MempoolCoinView;
pub use self::error::EstimatesFileError;
pub use self::estimator::{BlockPolicyEstimator, FeeEstimator};
pub use self::index::{AddressDelta, AddressHash, AddressKey, ScriptKind, SpentValue};
pub use self::limit::{RecentlyEvictedList, WeightedTxInfo, WeightedTxTree};
pub use self::options::MemPoolOptions;
pub use self::types::{FeeRate, MemPoolEntry, ScoreKey, TxMempoolInfo};

use self::inner::MemPoolInner;
use self::types::RemovalReason;
use bitcoin::{OutPoint, SignedAmount, Txid};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use shroud_primitives::{Anchor, Coins, CoinsView, Network, Nullifier, ShieldedKind, Transaction};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const LOG_TARGET: &str = "mempool";

/// Version of this client, written into the fee-estimates file.
pub const CLIENT_VERSION: u32 = 5_000_050;

/// Minimum client version able to read the fee-estimates file format.
const FEE_ESTIMATES_MIN_VERSION: u32 = 109_900;

/// The unconfirmed transaction pool.
///
/// All state lives behind one lock; public operations hold it for their
/// full duration, so callers observe every operation atomically. The owned
/// fee estimator is called under the lock and must not re-enter the pool.
pub struct MemPool {
    options: MemPoolOptions,
    inner: RwLock<MemPoolInner>,
}

impl MemPool {
    pub fn new(options: MemPoolOptions) -> Self {
        let estimator = Box::new(BlockPolicyEstimator::new(options.min_relay_fee));
        Self::with_estimator(options, estimator)
    }

    /// Build a pool around a caller-supplied estimator.
    pub fn with_estimator(options: MemPoolOptions, estimator: Box<dyn FeeEstimator>) -> Self {
        let rng = match options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let inner = MemPoolInner {
            entries: BTreeMap::new(),
            by_score: Default::default(),
            spends: BTreeMap::new(),
            sprout_nullifiers: BTreeMap::new(),
            sapling_nullifiers: BTreeMap::new(),
            orchard_nullifiers: BTreeMap::new(),
            deltas: BTreeMap::new(),
            address_index: options.address_index.then(Default::default),
            spent_index: options.spent_index.then(Default::default),
            recently_added: BTreeMap::new(),
            recently_added_sequence: 0,
            notified_sequence: 0,
            weighted_tree: WeightedTxTree::new(options.total_cost_limit),
            recently_evicted: RecentlyEvictedList::new(options.eviction_memory_seconds),
            estimator,
            rng,
            total_tx_size: 0,
            cached_inner_usage: 0,
            transactions_updated: 0,
        };
        Self {
            options,
            inner: RwLock::new(inner),
        }
    }

    pub fn options(&self) -> &MemPoolOptions {
        &self.options
    }

    // --- Admission ---

    /// Insert a fully validated entry without checking anything.
    ///
    /// Admission logic has already verified scripts, fees, standardness and
    /// double spends; handing over a duplicate txid or colliding spend is a
    /// caller bug. `view` resolves prevout scripts for the explorer
    /// indexes and is untouched when both are disabled.
    pub fn add_unchecked(
        &self,
        entry: MemPoolEntry,
        use_current_estimate: bool,
        view: &dyn CoinsView,
    ) {
        let txid = entry.txid();
        self.inner
            .write()
            .add_unchecked(entry, use_current_estimate, view);
        tracing::trace!(target: LOG_TARGET, %txid, "Added transaction to the pool");
    }

    // --- Removal ---

    /// Remove `tx` and, when `recursive`, everything in the pool that
    /// spends from it. Removed transactions are appended to `removed`.
    /// Idempotent: absent transactions remove nothing.
    pub fn remove(&self, tx: &Transaction, removed: &mut Vec<Arc<Transaction>>, recursive: bool) {
        self.inner
            .write()
            .remove_recursive(tx, removed, recursive, RemovalReason::Request);
    }

    /// Remove entries conflicting with `tx` on any input or nullifier.
    pub fn remove_conflicts(&self, tx: &Transaction, removed: &mut Vec<Arc<Transaction>>) {
        self.inner.write().remove_conflicts(tx, removed);
    }

    /// After a reorg: drop entries that are no longer final at
    /// `mempool_height`/`block_time`, and coinbase spends that fell back
    /// under the maturity horizon.
    pub fn remove_for_reorg(&self, view: &dyn CoinsView, mempool_height: u32, block_time: i64) {
        self.inner.write().remove_for_reorg(
            view,
            mempool_height,
            block_time,
            self.options.check_frequency != 0,
        );
    }

    /// Drop every entry proving a shielded spend against `invalid_root`.
    pub fn remove_with_anchor(&self, invalid_root: &Anchor, kind: ShieldedKind) {
        self.inner.write().remove_with_anchor(invalid_root, kind);
    }

    /// Drop entries that can no longer be mined at `block_height`.
    pub fn remove_expired(&self, block_height: u32) -> Vec<Txid> {
        self.inner.write().remove_expired(block_height)
    }

    /// A block connected: remove its transactions and their conflicts,
    /// clear their prioritisations, feed the estimator the confirmed
    /// snapshot.
    pub fn remove_for_block(
        &self,
        vtx: &[Arc<Transaction>],
        block_height: u32,
        conflicts: &mut Vec<Arc<Transaction>>,
        use_current_estimate: bool,
    ) {
        self.inner
            .write()
            .remove_for_block(vtx, block_height, conflicts, use_current_estimate);
    }

    /// Drop every entry validated under a consensus branch other than
    /// `branch_id`. Called whenever the tip crosses an upgrade boundary.
    pub fn remove_without_branch_id(&self, branch_id: u32) {
        self.inner.write().remove_without_branch_id(branch_id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    // --- Queries ---

    pub fn exists(&self, txid: &Txid) -> bool {
        self.inner.read().entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Txid) -> Option<Arc<Transaction>> {
        self.inner
            .read()
            .entries
            .get(txid)
            .map(|entry| entry.tx().clone())
    }

    pub fn info(&self, txid: &Txid) -> Option<TxMempoolInfo> {
        self.inner.read().entries.get(txid).map(|entry| TxMempoolInfo {
            tx: entry.tx().clone(),
            time: entry.time(),
            fee_rate: entry.fee_rate(),
        })
    }

    /// Info for every entry, best score first.
    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        let inner = self.inner.read();
        inner
            .iter_by_score()
            .map(|entry| TxMempoolInfo {
                tx: entry.tx().clone(),
                time: entry.time(),
                fee_rate: entry.fee_rate(),
            })
            .collect()
    }

    /// All txids, best score first, ties broken by txid.
    pub fn query_hashes(&self) -> Vec<Txid> {
        let inner = self.inner.read();
        inner.iter_by_score().map(|entry| entry.txid()).collect()
    }

    /// Whether `a` should sort before `b` for relay ordering. Despite the
    /// name this compares score only; depth never made it into the
    /// ordering and renaming the API was not worth the churn.
    pub fn compare_depth_and_score(&self, a: &Txid, b: &Txid) -> bool {
        let inner = self.inner.read();
        let Some(entry_a) = inner.entries.get(a) else {
            return false;
        };
        let Some(entry_b) = inner.entries.get(b) else {
            return true;
        };
        entry_a.score_key() < entry_b.score_key()
    }

    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Summed serialized size of all entries.
    pub fn total_tx_size(&self) -> u64 {
        self.inner.read().total_tx_size
    }

    /// True when no input of `tx` spends an output of a pool entry.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        let inner = self.inner.read();
        tx.inputs
            .iter()
            .all(|input| !inner.entries.contains_key(&input.previous_output.txid))
    }

    pub fn nullifier_exists(&self, nf: &Nullifier, kind: ShieldedKind) -> bool {
        self.inner.read().nullifier_map(kind).contains_key(nf)
    }

    /// Number of pool mutations since startup.
    pub fn transactions_updated(&self) -> u32 {
        self.inner.read().transactions_updated
    }

    pub fn add_transactions_updated(&self, n: u32) {
        self.inner.write().transactions_updated += n;
    }

    /// Spend every output of `txid` that a pool entry consumes.
    pub fn prune_spent(&self, txid: &Txid, coins: &mut Coins) {
        let inner = self.inner.read();
        let low = OutPoint::new(*txid, 0);
        let high = OutPoint::new(*txid, u32::MAX);
        for (outpoint, _) in inner.spends.range(low..=high) {
            coins.spend(outpoint.vout);
        }
    }

    // --- Prioritisation ---

    /// Accumulate an operator adjustment for `txid`. Applies immediately
    /// when the entry is present and sticks around for later admission
    /// when it is not.
    pub fn prioritise_transaction(&self, txid: Txid, priority_delta: f64, fee_delta: SignedAmount) {
        {
            let mut inner = self.inner.write();
            let deltas = inner
                .deltas
                .entry(txid)
                .or_insert((0.0, SignedAmount::ZERO));
            deltas.0 += priority_delta;
            deltas.1 = deltas.1 + fee_delta;
            let fee_delta = deltas.1;
            inner.update_fee_delta(&txid, fee_delta);
        }
        tracing::info!(
            target: LOG_TARGET,
            %txid,
            priority_delta,
            fee_delta = fee_delta.to_sat(),
            "Prioritised transaction"
        );
    }

    /// Add the stored adjustments for `txid` onto the provided
    /// accumulators.
    pub fn apply_deltas(&self, txid: &Txid, priority_delta: &mut f64, fee_delta: &mut SignedAmount) {
        let inner = self.inner.read();
        if let Some((priority, fee)) = inner.deltas.get(txid) {
            *priority_delta += priority;
            *fee_delta = *fee_delta + *fee;
        }
    }

    pub fn clear_prioritisation(&self, txid: &Txid) {
        self.inner.write().deltas.remove(txid);
    }

    // --- Fee estimation ---

    pub fn estimate_fee(&self, n_blocks: usize) -> FeeRate {
        self.inner.read().estimator.estimate_fee(n_blocks)
    }

    pub fn estimate_priority(&self, n_blocks: usize) -> f64 {
        self.inner.read().estimator.estimate_priority(n_blocks)
    }

    /// Persist the estimator state. Failures are non-fatal: logged, and
    /// reported as `false`.
    pub fn write_fee_estimates(&self, out: &mut dyn Write) -> bool {
        let result: Result<(), EstimatesFileError> = (|| {
            let inner = self.inner.read();
            out.write_all(&FEE_ESTIMATES_MIN_VERSION.to_le_bytes())?;
            out.write_all(&CLIENT_VERSION.to_le_bytes())?;
            inner.estimator.write(out)?;
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    "Unable to write fee estimates (non-fatal): {err}"
                );
                false
            }
        }
    }

    /// Restore the estimator state. Failures, including a file written by
    /// a newer client, are non-fatal and leave the pool unchanged.
    pub fn read_fee_estimates(&self, input: &mut dyn Read) -> bool {
        let result: Result<(), EstimatesFileError> = (|| {
            let required = estimator::read_u32(input)?;
            let _written_by = estimator::read_u32(input)?;
            if required > CLIENT_VERSION {
                return Err(EstimatesFileError::UpVersion {
                    required,
                    client: CLIENT_VERSION,
                });
            }
            let mut inner = self.inner.write();
            inner.estimator.read(input)?;
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    "Unable to read fee estimates (non-fatal): {err}"
                );
                false
            }
        }
    }

    // --- Size management ---

    /// Replace the cost limit and eviction memory, rebuilding the weighted
    /// tree over the current entries and forgetting past evictions.
    pub fn set_mempool_cost_limit(&self, total_cost_limit: u64, eviction_memory_seconds: i64) {
        tracing::debug!(
            target: LOG_TARGET,
            limit = total_cost_limit,
            seconds = eviction_memory_seconds,
            "Setting mempool cost limit"
        );
        let mut inner = self.inner.write();
        let mut tree = WeightedTxTree::new(total_cost_limit);
        for entry in inner.entries.values() {
            tree.add(WeightedTxInfo::new(entry.txid(), entry.tx_size(), entry.fee()));
        }
        inner.weighted_tree = tree;
        inner.recently_evicted = RecentlyEvictedList::new(eviction_memory_seconds);
    }

    /// Evict until the weighted tree fits its cost limit.
    pub fn ensure_size_limit(&self) {
        let now = unix_time();
        self.inner.write().ensure_size_limit(now);
    }

    pub fn is_recently_evicted(&self, txid: &Txid) -> bool {
        let now = unix_time();
        self.inner.write().recently_evicted.contains(txid, now)
    }

    // --- Notification ---

    /// Move out everything added since the last drain, along with the
    /// sequence number observed at the drain.
    pub fn drain_recently_added(&self) -> (Vec<Arc<Transaction>>, u64) {
        let mut inner = self.inner.write();
        let sequence = inner.recently_added_sequence;
        let txs = std::mem::take(&mut inner.recently_added)
            .into_values()
            .collect();
        (txs, sequence)
    }

    /// Record how far the notifier got. Regtest-only instrumentation.
    pub fn set_notified_sequence(&self, sequence: u64) {
        assert_eq!(self.options.network, Network::Regtest);
        self.inner.write().notified_sequence = sequence;
    }

    /// Whether the notifier has caught up with every admission.
    /// Regtest-only instrumentation.
    pub fn is_fully_notified(&self) -> bool {
        assert_eq!(self.options.network, Network::Regtest);
        let inner = self.inner.read();
        inner.recently_added_sequence == inner.notified_sequence
    }

    // --- Explorer indexes ---

    /// Address rows for the given addresses, in key order. Empty when the
    /// address index is disabled.
    pub fn get_address_index(
        &self,
        addresses: &[(ScriptKind, AddressHash)],
    ) -> Vec<(AddressKey, AddressDelta)> {
        self.inner
            .read()
            .address_index
            .as_ref()
            .map(|index| index.query(addresses))
            .unwrap_or_default()
    }

    /// Consumer metadata for a spent outpoint. `None` when unknown or when
    /// the spent index is disabled.
    pub fn get_spent_index(&self, outpoint: &OutPoint) -> Option<SpentValue> {
        self.inner
            .read()
            .spent_index
            .as_ref()
            .and_then(|index| index.query(outpoint))
    }

    // --- Auditing ---

    /// Run the full consistency audit with the configured probability.
    /// A failed audit is a bug upstream and panics.
    pub fn check(&self, base: &dyn CoinsView) {
        if self.options.check_frequency == 0 {
            return;
        }
        let mut inner = self.inner.write();
        if inner.rng.next_u32() > self.options.check_frequency {
            return;
        }
        inner.check(base);
    }

    /// Estimated total heap usage of the pool and its side structures.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.inner.read().dynamic_memory_usage()
    }
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}
