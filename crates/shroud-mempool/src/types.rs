//! Core type definitions for the pool.

use bitcoin::{Amount, SignedAmount, Txid};
use shroud_primitives::Transaction;
use std::cmp::Ordering;
use std::sync::Arc;

/// Fee rate in zatoshis per kilobyte of serialized transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub fn from_sat_per_k(sat_per_k: u64) -> Self {
        Self(sat_per_k)
    }

    /// The rate implied by paying `fee` for `size` bytes.
    pub fn from_total(fee: Amount, size: usize) -> Self {
        if size == 0 {
            Self(0)
        } else {
            Self(fee.to_sat() * 1000 / size as u64)
        }
    }

    /// Fee this rate charges for `size` bytes.
    pub fn fee(&self, size: usize) -> Amount {
        Amount::from_sat(self.0 * size as u64 / 1000)
    }

    pub fn as_sat_per_k(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} zat/kB", self.0)
    }
}

/// Ordering key for the score index: effective fee rate descending, txid
/// ascending as the tie break.
///
/// The rate is compared exactly by cross-multiplication rather than through
/// a scaled integer, so entries with near-identical rates do not collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreKey {
    /// Effective fee: base fee plus the operator-supplied delta. May go
    /// negative under heavy deprioritisation.
    pub fee: i64,
    pub size: u64,
    pub txid: Txid,
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i128::from(self.fee) * i128::from(other.size);
        let rhs = i128::from(other.fee) * i128::from(self.size);
        // Reversed so that iterating the index front-to-back yields the
        // highest fee rate first.
        rhs.cmp(&lhs)
            .then_with(|| self.txid.cmp(&other.txid))
            .then_with(|| self.fee.cmp(&other.fee))
            .then_with(|| self.size.cmp(&other.size))
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Row in the spend index: which entry consumes an outpoint, and through
/// which of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSpend {
    pub txid: Txid,
    pub input_index: u32,
}

/// Why a transaction left the pool. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Request,
    Block,
    Reorg,
    Conflict,
    Expiry,
    AnchorInvalidated,
    BranchId,
    SizeLimit,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Block => "block",
            Self::Reorg => "reorg",
            Self::Conflict => "conflict",
            Self::Expiry => "expiry",
            Self::AnchorInvalidated => "anchor",
            Self::BranchId => "branchid",
            Self::SizeLimit => "sizelimit",
        }
    }
}

/// A pool entry: the transaction plus everything admission knew about it.
///
/// Immutable after insertion except for the prioritisation fee delta.
#[derive(Debug, Clone)]
pub struct MemPoolEntry {
    tx: Arc<Transaction>,
    txid: Txid,
    fee: Amount,
    fee_delta: SignedAmount,
    tx_size: usize,
    mod_size: usize,
    usage_size: usize,
    time: i64,
    entry_height: u32,
    entry_priority: f64,
    had_no_dependencies: bool,
    spends_coinbase: bool,
    sigop_count: u32,
    branch_id: u32,
}

impl MemPoolEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: Arc<Transaction>,
        fee: Amount,
        time: i64,
        entry_priority: f64,
        entry_height: u32,
        had_no_dependencies: bool,
        spends_coinbase: bool,
        sigop_count: u32,
        branch_id: u32,
    ) -> Self {
        let txid = tx.txid();
        let tx_size = tx.serialized_size();
        let mod_size = tx.modified_size(tx_size);
        let usage_size = tx.dynamic_usage();
        Self {
            tx,
            txid,
            fee,
            fee_delta: SignedAmount::ZERO,
            tx_size,
            mod_size,
            usage_size,
            time,
            entry_height,
            entry_priority,
            had_no_dependencies,
            spends_coinbase,
            sigop_count,
            branch_id,
        }
    }

    pub fn tx(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn fee_delta(&self) -> SignedAmount {
        self.fee_delta
    }

    pub fn tx_size(&self) -> usize {
        self.tx_size
    }

    pub fn dynamic_usage(&self) -> usize {
        self.usage_size
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn entry_height(&self) -> u32 {
        self.entry_height
    }

    pub fn had_no_dependencies(&self) -> bool {
        self.had_no_dependencies
    }

    pub fn spends_coinbase(&self) -> bool {
        self.spends_coinbase
    }

    pub fn sigop_count(&self) -> u32 {
        self.sigop_count
    }

    pub fn branch_id(&self) -> u32 {
        self.branch_id
    }

    /// Base-fee rate, as reported through `info`.
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_total(self.fee, self.tx_size)
    }

    /// Fee with the prioritisation delta applied. Drives the score index.
    pub fn effective_fee(&self) -> i64 {
        self.fee.to_sat() as i64 + self.fee_delta.to_sat()
    }

    pub fn score_key(&self) -> ScoreKey {
        ScoreKey {
            fee: self.effective_fee(),
            size: self.tx_size as u64,
            txid: self.txid,
        }
    }

    /// Priority at `current_height`: the priority computed at admission
    /// plus what the inputs have accrued since, per modified-size byte.
    pub fn priority(&self, current_height: u32) -> f64 {
        let value_in = self.tx.value_out().to_sat() + self.fee.to_sat();
        let accrued = f64::from(current_height.saturating_sub(self.entry_height))
            * value_in as f64
            / self.mod_size as f64;
        self.entry_priority + accrued
    }

    pub(crate) fn set_fee_delta(&mut self, fee_delta: SignedAmount) {
        self.fee_delta = fee_delta;
    }
}

/// Snapshot of one entry, as answered to `info` queries.
#[derive(Debug, Clone)]
pub struct TxMempoolInfo {
    pub tx: Arc<Transaction>,
    pub time: i64,
    pub fee_rate: FeeRate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn key(fee: i64, size: u64, byte: u8) -> ScoreKey {
        ScoreKey {
            fee,
            size,
            txid: Txid::from_byte_array([byte; 32]),
        }
    }

    #[test]
    fn score_orders_by_rate_descending() {
        let mut keys = vec![key(100, 100, 1), key(300, 100, 2), key(200, 100, 3)];
        keys.sort();
        assert_eq!(keys[0].fee, 300);
        assert_eq!(keys[1].fee, 200);
        assert_eq!(keys[2].fee, 100);
    }

    #[test]
    fn score_rate_is_exact() {
        // 1000/3000 vs 999/2997 are the same rate; the txid breaks the tie.
        let a = key(1000, 3000, 2);
        let b = key(999, 2997, 1);
        assert_eq!(a.max(b).txid, Txid::from_byte_array([2; 32]));
        // A minimally better rate wins regardless of txid.
        let c = key(1000, 2997, 9);
        assert!(c < a);
    }

    #[test]
    fn score_handles_negative_effective_fee() {
        let penalized = key(-500, 100, 1);
        let free = key(0, 100, 2);
        assert!(free < penalized);
    }
}
