//! Shared fixtures: an in-memory chain view and transaction builders.

mod eviction;
mod prioritisation;

use crate::types::MemPoolEntry;
use crate::{MemPool, MemPoolOptions};
use bitcoin::hashes::Hash;
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use shroud_primitives::{
    Anchor, Coins, CoinsView, Network, Nullifier, SaplingMerkleTree, ShieldedKind,
    SproutMerkleTree, Transaction, TxIn,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Branch id every test entry is validated under.
pub(crate) const CURRENT_BRANCH_ID: u32 = 0x5c70_11d6;

pub(crate) fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub(crate) fn nullifier(n: u8) -> Nullifier {
    Nullifier::from_bytes([n; 32])
}

pub(crate) fn p2pkh_script(hash_byte: u8) -> ScriptBuf {
    let mut bytes = vec![0x76, 0xa9, 0x14];
    bytes.extend_from_slice(&[hash_byte; 20]);
    bytes.extend_from_slice(&[0x88, 0xac]);
    ScriptBuf::from_bytes(bytes)
}

/// A transparent transfer spending the given outpoints.
pub(crate) fn transfer(inputs: &[(Txid, u32)], output_values: &[u64]) -> Transaction {
    Transaction {
        version: 4,
        inputs: inputs
            .iter()
            .map(|(txid, vout)| TxIn::new(OutPoint::new(*txid, *vout)))
            .collect(),
        outputs: output_values
            .iter()
            .map(|value| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: p2pkh_script(0xab),
            })
            .collect(),
        lock_time: 0,
        expiry_height: 0,
        joinsplits: Vec::new(),
        sapling_spends: Vec::new(),
        orchard_bundle: None,
    }
}

/// In-memory chain state serving coins, nullifiers and anchors.
#[derive(Default)]
pub(crate) struct MockChainView {
    pub coins: HashMap<Txid, Coins>,
    pub nullifiers: HashSet<(Nullifier, ShieldedKind)>,
    pub sprout_anchors: HashMap<Anchor, SproutMerkleTree>,
    pub sapling_anchors: HashMap<Anchor, SaplingMerkleTree>,
    pub height: u32,
}

impl MockChainView {
    pub fn at_height(height: u32) -> Self {
        Self {
            height,
            ..Default::default()
        }
    }

    /// Install a confirmed funding transaction with `outputs` equal-valued
    /// outputs.
    pub fn fund(&mut self, txid: Txid, outputs: u32, value: u64) {
        self.fund_at(txid, outputs, value, 1, false);
    }

    pub fn fund_at(&mut self, txid: Txid, outputs: u32, value: u64, height: u32, coinbase: bool) {
        self.coins.insert(
            txid,
            Coins {
                outputs: (0..outputs)
                    .map(|_| {
                        Some(TxOut {
                            value: Amount::from_sat(value),
                            script_pubkey: p2pkh_script(0xaa),
                        })
                    })
                    .collect(),
                height,
                is_coinbase: coinbase,
            },
        );
    }

    pub fn add_sprout_anchor(&mut self, tree: SproutMerkleTree) -> Anchor {
        let root = tree.root();
        self.sprout_anchors.insert(root, tree);
        root
    }

    pub fn add_sapling_anchor(&mut self, tree: SaplingMerkleTree) -> Anchor {
        let root = tree.root();
        self.sapling_anchors.insert(root, tree);
        root
    }
}

impl CoinsView for MockChainView {
    fn access_coins(&self, txid: &Txid) -> Option<Coins> {
        self.coins.get(txid).cloned()
    }

    fn have_coins(&self, txid: &Txid) -> bool {
        self.coins.contains_key(txid)
    }

    fn get_nullifier(&self, nf: &Nullifier, kind: ShieldedKind) -> bool {
        self.nullifiers.contains(&(*nf, kind))
    }

    fn get_sprout_anchor_at(&self, root: &Anchor) -> Option<SproutMerkleTree> {
        self.sprout_anchors.get(root).cloned()
    }

    fn get_sapling_anchor_at(&self, root: &Anchor) -> Option<SaplingMerkleTree> {
        self.sapling_anchors.get(root).cloned()
    }

    fn height(&self) -> u32 {
        self.height
    }
}

pub(crate) fn test_options() -> MemPoolOptions {
    MemPoolOptions::new()
        .network(Network::Regtest)
        .sanity_check_ratio(1.0)
        .rng_seed(1234)
}

pub(crate) fn test_pool() -> (MemPool, MockChainView) {
    (MemPool::new(test_options()), MockChainView::at_height(200))
}

/// Wrap `tx` in an entry with sensible defaults for tests.
pub(crate) fn entry_for(tx: &Transaction, fee: u64) -> MemPoolEntry {
    entry_at_height(tx, fee, 200)
}

pub(crate) fn entry_at_height(tx: &Transaction, fee: u64, height: u32) -> MemPoolEntry {
    MemPoolEntry::new(
        Arc::new(tx.clone()),
        Amount::from_sat(fee),
        1_000,
        0.0,
        height,
        true,
        false,
        1,
        CURRENT_BRANCH_ID,
    )
}

/// Admit `tx` with defaults and return its shared form.
pub(crate) fn add_tx(
    pool: &MemPool,
    view: &MockChainView,
    tx: &Transaction,
    fee: u64,
) -> Arc<Transaction> {
    let entry = entry_for(tx, fee);
    let shared = entry.tx().clone();
    pool.add_unchecked(entry, true, view);
    shared
}
