//! Optional explorer indexes: address-level deltas and spent-outpoint rows
//! for unconfirmed transactions.

use crate::types::MemPoolEntry;
use bitcoin::{Amount, OutPoint, Script, SignedAmount, Txid};
use std::collections::BTreeMap;

/// Standard script shapes the address index understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptKind {
    PubkeyHash,
    ScriptHash,
}

/// The 20-byte hash a standard script pays to.
pub type AddressHash = [u8; 20];

/// Extract the address form of a script, if it is a standard shape.
pub fn script_address(script: &Script) -> Option<(ScriptKind, AddressHash)> {
    let bytes = script.as_bytes();
    if script.is_p2pkh() {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[3..23]);
        Some((ScriptKind::PubkeyHash, hash))
    } else if script.is_p2sh() {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[2..22]);
        Some((ScriptKind::ScriptHash, hash))
    } else {
        None
    }
}

/// Key of one address row. Field order matters: rows for one address are
/// contiguous in the map, so queries are a single range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddressKey {
    pub kind: ScriptKind,
    pub hash: AddressHash,
    pub txid: Txid,
    pub index: u32,
    /// True for rows contributed by an input (value leaves the address).
    pub spending: bool,
}

/// Value movement recorded against an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDelta {
    pub time: i64,
    pub amount: SignedAmount,
    /// The consumed outpoint, for spending rows.
    pub prevout: Option<OutPoint>,
}

/// Metadata about an outpoint consumed by an unconfirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpentValue {
    pub txid: Txid,
    pub input_index: u32,
    /// Spending height; unconfirmed spends report -1.
    pub height: i32,
    pub value: Amount,
    pub address: Option<(ScriptKind, AddressHash)>,
}

/// Address rows plus the per-txid reverse map used to undo insertions.
#[derive(Debug, Default)]
pub struct AddressIndex {
    pub rows: BTreeMap<AddressKey, AddressDelta>,
    inserted: BTreeMap<Txid, Vec<AddressKey>>,
}

impl AddressIndex {
    /// Record the rows for `entry`. `resolved_inputs` pairs each input
    /// index with the output it consumes, as resolved by the coordinator.
    pub fn insert(
        &mut self,
        entry: &MemPoolEntry,
        resolved_inputs: &[(u32, bitcoin::TxOut)],
    ) {
        let txid = entry.txid();
        let mut inserted = Vec::new();

        for (input_index, prev_output) in resolved_inputs {
            let Some((kind, hash)) = script_address(&prev_output.script_pubkey) else {
                continue;
            };
            let key = AddressKey {
                kind,
                hash,
                txid,
                index: *input_index,
                spending: true,
            };
            let input = &entry.tx().inputs[*input_index as usize];
            self.rows.insert(
                key,
                AddressDelta {
                    time: entry.time(),
                    amount: -prev_output.value.to_signed().unwrap_or(SignedAmount::MAX_MONEY),
                    prevout: Some(input.previous_output),
                },
            );
            inserted.push(key);
        }

        for (output_index, output) in entry.tx().outputs.iter().enumerate() {
            let Some((kind, hash)) = script_address(&output.script_pubkey) else {
                continue;
            };
            let key = AddressKey {
                kind,
                hash,
                txid,
                index: output_index as u32,
                spending: false,
            };
            self.rows.insert(
                key,
                AddressDelta {
                    time: entry.time(),
                    amount: output.value.to_signed().unwrap_or(SignedAmount::MAX_MONEY),
                    prevout: None,
                },
            );
            inserted.push(key);
        }

        self.inserted.insert(txid, inserted);
    }

    pub fn remove(&mut self, txid: &Txid) {
        if let Some(keys) = self.inserted.remove(txid) {
            for key in keys {
                self.rows.remove(&key);
            }
        }
    }

    /// All rows touching any of `addresses`, in key order.
    pub fn query(&self, addresses: &[(ScriptKind, AddressHash)]) -> Vec<(AddressKey, AddressDelta)> {
        use bitcoin::hashes::Hash;
        let mut results = Vec::new();
        for (kind, hash) in addresses {
            let low = AddressKey {
                kind: *kind,
                hash: *hash,
                txid: Txid::from_byte_array([0; 32]),
                index: 0,
                spending: false,
            };
            let high = AddressKey {
                kind: *kind,
                hash: *hash,
                txid: Txid::from_byte_array([0xff; 32]),
                index: u32::MAX,
                spending: true,
            };
            results.extend(self.rows.range(low..=high).map(|(k, v)| (*k, *v)));
        }
        results
    }

    pub fn inserted_keys(&self, txid: &Txid) -> Option<&[AddressKey]> {
        self.inserted.get(txid).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.inserted.clear();
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn tracked_tx_count(&self) -> usize {
        self.inserted.len()
    }
}

/// Spent-outpoint rows plus the per-txid reverse map.
#[derive(Debug, Default)]
pub struct SpentIndex {
    pub rows: BTreeMap<OutPoint, SpentValue>,
    inserted: BTreeMap<Txid, Vec<OutPoint>>,
}

impl SpentIndex {
    pub fn insert(
        &mut self,
        entry: &MemPoolEntry,
        resolved_inputs: &[(u32, bitcoin::TxOut)],
    ) {
        let txid = entry.txid();
        let mut inserted = Vec::new();

        for (input_index, prev_output) in resolved_inputs {
            let input = &entry.tx().inputs[*input_index as usize];
            let key = input.previous_output;
            self.rows.insert(
                key,
                SpentValue {
                    txid,
                    input_index: *input_index,
                    height: -1,
                    value: prev_output.value,
                    address: script_address(&prev_output.script_pubkey),
                },
            );
            inserted.push(key);
        }

        self.inserted.insert(txid, inserted);
    }

    pub fn remove(&mut self, txid: &Txid) {
        if let Some(keys) = self.inserted.remove(txid) {
            for key in keys {
                self.rows.remove(&key);
            }
        }
    }

    pub fn query(&self, outpoint: &OutPoint) -> Option<SpentValue> {
        self.rows.get(outpoint).copied()
    }

    pub fn inserted_keys(&self, txid: &Txid) -> Option<&[OutPoint]> {
        self.inserted.get(txid).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.inserted.clear();
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
