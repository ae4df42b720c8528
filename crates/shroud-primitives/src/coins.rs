//! Unspent-output bookkeeping and the read interface over confirmed state.

use crate::merkle::{SaplingMerkleTree, SproutMerkleTree};
use crate::transaction::Transaction;
use crate::{Anchor, Nullifier, ShieldedKind};
use bitcoin::{TxOut, Txid};
use std::collections::HashMap;

/// The unspent outputs of a single transaction.
///
/// A slot is `None` once the output has been spent. Trailing spent slots are
/// trimmed so a fully spent transaction is represented by an empty vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coins {
    pub outputs: Vec<Option<TxOut>>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl Coins {
    pub fn from_tx(tx: &Transaction, height: u32) -> Self {
        Self {
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
            height,
            is_coinbase: tx.is_coinbase(),
        }
    }

    /// Whether output `n` exists and is still unspent.
    pub fn is_available(&self, n: u32) -> bool {
        self.outputs.get(n as usize).is_some_and(|out| out.is_some())
    }

    /// Mark output `n` spent. Out-of-range indices are ignored.
    pub fn spend(&mut self, n: u32) {
        if let Some(slot) = self.outputs.get_mut(n as usize) {
            *slot = None;
        }
        while matches!(self.outputs.last(), Some(None)) {
            self.outputs.pop();
        }
    }

    /// A pruned record no longer carries any unspent output.
    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(|out| out.is_none())
    }
}

/// Read interface over confirmed chain state.
///
/// Implementations are expected to answer for the chain tip they were
/// created at; the pool never asks them to travel in time.
pub trait CoinsView {
    /// The unspent outputs of `txid`, if any record exists.
    fn access_coins(&self, txid: &Txid) -> Option<Coins>;

    /// Whether any record for `txid` exists.
    fn have_coins(&self, txid: &Txid) -> bool;

    /// Whether `nf` has been revealed on chain for the given protocol.
    fn get_nullifier(&self, nf: &Nullifier, kind: ShieldedKind) -> bool;

    /// The sprout commitment tree whose root is `root`, if that root is a
    /// valid historical anchor.
    fn get_sprout_anchor_at(&self, root: &Anchor) -> Option<SproutMerkleTree>;

    /// The sapling commitment tree whose root is `root`.
    fn get_sapling_anchor_at(&self, root: &Anchor) -> Option<SaplingMerkleTree>;

    /// Height of the chain tip this view answers for.
    fn height(&self) -> u32;
}

/// A mutable coin overlay on top of a borrowed base view.
///
/// Reads copy records up into the overlay on first access; writes only ever
/// touch the overlay. Used by consensus helpers to connect transactions
/// against a scratch copy of the chain state.
pub struct CoinsCache<'a> {
    base: &'a dyn CoinsView,
    coins: HashMap<Txid, Coins>,
}

impl<'a> CoinsCache<'a> {
    pub fn new(base: &'a dyn CoinsView) -> Self {
        Self {
            base,
            coins: HashMap::new(),
        }
    }

    pub fn access_coins(&mut self, txid: &Txid) -> Option<&Coins> {
        if !self.coins.contains_key(txid) {
            let coins = self.base.access_coins(txid)?;
            self.coins.insert(*txid, coins);
        }
        self.coins.get(txid)
    }

    pub fn access_coins_mut(&mut self, txid: &Txid) -> Option<&mut Coins> {
        self.access_coins(txid)?;
        self.coins.get_mut(txid)
    }

    /// Install a fresh record, replacing whatever was there.
    pub fn set_coins(&mut self, txid: Txid, coins: Coins) {
        self.coins.insert(txid, coins);
    }

    /// Whether every transparent input of `tx` is currently spendable.
    pub fn have_inputs(&mut self, tx: &Transaction) -> bool {
        if tx.is_coinbase() {
            return true;
        }
        tx.inputs.iter().all(|input| {
            let prevout = input.previous_output;
            self.access_coins(&prevout.txid)
                .is_some_and(|coins| coins.is_available(prevout.vout))
        })
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }
}
