//! Full consistency audit of the pool against a coin view.
//!
//! Every assertion here guards a cross-map invariant; a failure means a
//! mutation path upstream broke the pool, so failures are fatal.

use crate::inner::MemPoolInner;
use crate::types::MemPoolEntry;
use crate::LOG_TARGET;
use shroud_primitives::consensus::{check_tx_inputs, update_coins};
use shroud_primitives::{Anchor, CoinsCache, CoinsView, ShieldedKind, SproutMerkleTree};
use std::collections::{HashMap, VecDeque};

/// Height installed for coins synthesized while replaying the pool onto the
/// replica view. Any value beyond real chain heights works; it never feeds
/// back into consensus.
const REPLAY_HEIGHT: u32 = 1_000_000;

impl MemPoolInner {
    pub(crate) fn check(&self, base: &dyn CoinsView) {
        tracing::debug!(
            target: LOG_TARGET,
            transactions = self.entries.len(),
            spends = self.spends.len(),
            "Checking mempool consistency"
        );

        let mut check_total: u64 = 0;
        let mut inner_usage: usize = 0;
        let spend_height = base.height() + 1;
        let mut replica = CoinsCache::new(base);
        let mut waiting: VecDeque<&MemPoolEntry> = VecDeque::new();

        for (txid, entry) in &self.entries {
            check_total += entry.tx_size() as u64;
            inner_usage += entry.dynamic_usage();
            let tx = entry.tx();

            let mut depends_wait = false;
            for (k, input) in tx.inputs.iter().enumerate() {
                let prevout = input.previous_output;
                // Inputs refer to available base coins or to other entries.
                if let Some(parent) = self.entries.get(&prevout.txid) {
                    assert!(
                        parent.tx().outputs.len() > prevout.vout as usize,
                        "pool input points past its in-pool parent's outputs"
                    );
                    depends_wait = true;
                } else {
                    let coins = base
                        .access_coins(&prevout.txid)
                        .expect("pool input must have base coins");
                    assert!(
                        coins.is_available(prevout.vout),
                        "pool input spends an unavailable base output"
                    );
                }
                let spend = self
                    .spends
                    .get(&prevout)
                    .expect("every pool input must have a spend row");
                assert_eq!(spend.txid, *txid, "spend row names the wrong spender");
                assert_eq!(spend.input_index, k as u32, "spend row names the wrong input");
            }

            // Joinsplits may chain: one can anchor at the tree produced by
            // an earlier joinsplit of the same transaction, so track the
            // intermediate trees by root.
            let mut intermediates: HashMap<Anchor, SproutMerkleTree> = HashMap::new();
            for js in &tx.joinsplits {
                for nf in &js.nullifiers {
                    assert!(
                        !base.get_nullifier(nf, ShieldedKind::Sprout),
                        "pool sprout nullifier already on chain"
                    );
                }
                let mut tree = match intermediates.get(&js.anchor) {
                    Some(tree) => tree.clone(),
                    None => base
                        .get_sprout_anchor_at(&js.anchor)
                        .expect("joinsplit anchors at an unknown sprout root"),
                };
                for cm in &js.commitments {
                    tree.append(*cm);
                }
                intermediates.insert(tree.root(), tree);
            }
            for spend in &tx.sapling_spends {
                assert!(
                    base.get_sapling_anchor_at(&spend.anchor).is_some(),
                    "sapling spend anchors at an unknown root"
                );
                assert!(
                    !base.get_nullifier(&spend.nullifier, ShieldedKind::Sapling),
                    "pool sapling nullifier already on chain"
                );
            }

            if depends_wait {
                waiting.push_back(entry);
            } else {
                let ok = tx.is_coinbase()
                    || check_tx_inputs(tx, &mut replica, spend_height).is_ok();
                assert!(ok, "pool entry does not connect against the replica view");
                update_coins(tx, &mut replica, REPLAY_HEIGHT);
            }
        }

        // Entries waiting on in-pool parents connect once those parents
        // have been replayed; the step counter proves the queue keeps
        // shrinking.
        let mut steps_since_last_remove = 0usize;
        while let Some(entry) = waiting.pop_front() {
            let tx = entry.tx();
            if !replica.have_inputs(tx) {
                waiting.push_back(entry);
                steps_since_last_remove += 1;
                assert!(
                    steps_since_last_remove < waiting.len(),
                    "pool dependency graph does not resolve"
                );
            } else {
                let ok = tx.is_coinbase()
                    || check_tx_inputs(tx, &mut replica, spend_height).is_ok();
                assert!(ok, "dependent pool entry does not connect");
                update_coins(tx, &mut replica, REPLAY_HEIGHT);
                steps_since_last_remove = 0;
            }
        }

        // Reverse direction: every spend row points at a live entry whose
        // named input consumes exactly that outpoint.
        for (outpoint, spend) in &self.spends {
            let entry = self
                .entries
                .get(&spend.txid)
                .expect("spend row must point at a pool entry");
            let input = entry
                .tx()
                .inputs
                .get(spend.input_index as usize)
                .expect("spend row names an input position that exists");
            assert_eq!(
                input.previous_output, *outpoint,
                "spend row disagrees with the entry's input"
            );
        }

        self.check_nullifiers(ShieldedKind::Sprout);
        self.check_nullifiers(ShieldedKind::Sapling);
        self.check_nullifiers(ShieldedKind::Orchard);
        self.check_explorer_indexes();

        assert_eq!(
            self.weighted_tree.len(),
            self.entries.len(),
            "weighted tree out of step with the entry set"
        );
        for txid in self.entries.keys() {
            assert!(
                self.weighted_tree.contains(txid),
                "entry missing from the weighted tree"
            );
        }

        assert_eq!(self.total_tx_size, check_total, "total size counter drifted");
        assert_eq!(
            self.cached_inner_usage, inner_usage,
            "inner usage counter drifted"
        );
    }

    /// The per-txid reverse maps must agree 1:1 with the index rows.
    fn check_explorer_indexes(&self) {
        if let Some(index) = self.address_index.as_ref() {
            let mut rows = 0;
            for txid in self.entries.keys() {
                let keys = index
                    .inserted_keys(txid)
                    .expect("indexed entry must have an address key list");
                for key in keys {
                    assert_eq!(key.txid, *txid, "address key filed under the wrong txid");
                    assert!(
                        index.rows.contains_key(key),
                        "address key without a matching row"
                    );
                }
                rows += keys.len();
            }
            assert_eq!(rows, index.row_count(), "stray address rows");
            assert_eq!(index.tracked_tx_count(), self.entries.len());
        }

        if let Some(index) = self.spent_index.as_ref() {
            let mut rows = 0;
            for txid in self.entries.keys() {
                let keys = index
                    .inserted_keys(txid)
                    .expect("indexed entry must have a spent key list");
                for key in keys {
                    let value = index.rows.get(key).expect("spent key without a matching row");
                    assert_eq!(value.txid, *txid, "spent row names the wrong consumer");
                }
                rows += keys.len();
            }
            assert_eq!(rows, index.row_count(), "stray spent rows");
        }
    }

    fn check_nullifiers(&self, kind: ShieldedKind) {
        for (nf, txid) in self.nullifier_map(kind) {
            let entry = self
                .entries
                .get(txid)
                .expect("nullifier row must point at a pool entry");
            let tx = entry.tx();
            let revealed = match kind {
                ShieldedKind::Sprout => tx.sprout_nullifiers().any(|cand| cand == nf),
                ShieldedKind::Sapling => tx.sapling_nullifiers().any(|cand| cand == nf),
                ShieldedKind::Orchard => tx.orchard_nullifiers().any(|cand| cand == nf),
            };
            assert!(revealed, "nullifier row not revealed by its entry");
        }
    }
}
