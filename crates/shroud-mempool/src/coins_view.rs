//! Coin view overlay exposing unconfirmed transactions to validation.

use crate::MemPool;
use shroud_primitives::{
    Anchor, Coins, CoinsView, Nullifier, SaplingMerkleTree, ShieldedKind, SproutMerkleTree,
    MEMPOOL_HEIGHT,
};
use bitcoin::Txid;

/// A read-only coin view backed by a base view plus the pool.
///
/// Borrows both; construct one per validation call and drop it after.
pub struct MempoolCoinView<'a> {
    base: &'a dyn CoinsView,
    mempool: &'a MemPool,
}

impl<'a> MempoolCoinView<'a> {
    pub fn new(base: &'a dyn CoinsView, mempool: &'a MemPool) -> Self {
        Self { base, mempool }
    }
}

impl CoinsView for MempoolCoinView<'_> {
    fn access_coins(&self, txid: &Txid) -> Option<Coins> {
        // Always prefer the pool entry: it can never conflict with the base
        // and, unlike a base record, can never be pruned.
        if let Some(tx) = self.mempool.get(txid) {
            return Some(Coins::from_tx(&tx, MEMPOOL_HEIGHT));
        }
        self.base.access_coins(txid).filter(|coins| !coins.is_pruned())
    }

    fn have_coins(&self, txid: &Txid) -> bool {
        self.mempool.exists(txid) || self.base.have_coins(txid)
    }

    fn get_nullifier(&self, nf: &Nullifier, kind: ShieldedKind) -> bool {
        self.mempool.nullifier_exists(nf, kind) || self.base.get_nullifier(nf, kind)
    }

    fn get_sprout_anchor_at(&self, root: &Anchor) -> Option<SproutMerkleTree> {
        self.base.get_sprout_anchor_at(root)
    }

    fn get_sapling_anchor_at(&self, root: &Anchor) -> Option<SaplingMerkleTree> {
        self.base.get_sapling_anchor_at(root)
    }

    fn height(&self) -> u32 {
        self.base.height()
    }
}
