//! The shroud transaction model.

use crate::{Anchor, LOCKTIME_THRESHOLD, NoteCommitment, Nullifier};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use std::mem;

/// Sequence number that opts an input out of lock-time enforcement.
pub const SEQUENCE_FINAL: u32 = u32::MAX;

/// A transparent transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: ScriptBuf,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: ScriptBuf::new(),
            sequence: SEQUENCE_FINAL,
        }
    }
}

/// A sprout joinsplit description: spends and creates shielded notes in one
/// step, anchored at a sprout commitment tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSplit {
    pub anchor: Anchor,
    pub nullifiers: Vec<Nullifier>,
    pub commitments: Vec<NoteCommitment>,
}

/// A sapling spend description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaplingSpend {
    pub anchor: Anchor,
    pub nullifier: Nullifier,
}

/// The orchard part of a transaction. All actions in a bundle share one
/// anchor; each action reveals a nullifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchardBundle {
    pub anchor: Anchor,
    pub nullifiers: Vec<Nullifier>,
}

/// A shroud transaction.
///
/// `expiry_height` of zero means the transaction never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry_height: u32,
    pub joinsplits: Vec<JoinSplit>,
    pub sapling_spends: Vec<SaplingSpend>,
    pub orchard_bundle: Option<OrchardBundle>,
}

impl Transaction {
    /// The double-sha256 of the wire encoding.
    pub fn txid(&self) -> Txid {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buf);
        Txid::from_byte_array(sha256d::Hash::hash(&buf).to_byte_array())
    }

    /// Wire-serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf.len()
    }

    /// Size used for priority computation: the serialized size reduced by a
    /// free allowance per transparent input, so that the pure overhead of
    /// spending an output does not count against a transaction's priority.
    pub fn modified_size(&self, serialized_size: usize) -> usize {
        let mut size = serialized_size;
        for input in &self.inputs {
            let offset = 41 + input.script_sig.len().min(110);
            if size > offset {
                size -= offset;
            }
        }
        size
    }

    /// Coarse estimate of the heap memory owned by this transaction.
    pub fn dynamic_usage(&self) -> usize {
        let transparent: usize = self.inputs.iter().map(|i| i.script_sig.len()).sum::<usize>()
            + self.inputs.len() * mem::size_of::<TxIn>()
            + self.outputs.iter().map(|o| o.script_pubkey.len()).sum::<usize>()
            + self.outputs.len() * mem::size_of::<TxOut>();
        let shielded: usize = self
            .joinsplits
            .iter()
            .map(|js| (js.nullifiers.len() + js.commitments.len()) * 32)
            .sum::<usize>()
            + self.joinsplits.len() * mem::size_of::<JoinSplit>()
            + self.sapling_spends.len() * mem::size_of::<SaplingSpend>()
            + self
                .orchard_bundle
                .as_ref()
                .map_or(0, |bundle| bundle.nullifiers.len() * 32);
        mem::size_of::<Self>() + transparent + shielded
    }

    pub fn value_out(&self) -> Amount {
        let total: u64 = self.outputs.iter().map(|out| out.value.to_sat()).sum();
        Amount::from_sat(total)
    }

    /// A coinbase transaction has exactly one input spending the null
    /// outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].previous_output.is_null()
            && self.joinsplits.is_empty()
            && self.sapling_spends.is_empty()
            && self.orchard_bundle.is_none()
    }

    /// Lock-time rule: final if the lock time has passed the current height
    /// (or time), or if every input opted out via a final sequence number.
    pub fn is_final(&self, block_height: u32, block_time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            i64::from(block_height)
        } else {
            block_time
        };
        if i64::from(self.lock_time) < cutoff {
            return true;
        }
        self.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
    }

    /// Whether the transaction can no longer be mined at `block_height`.
    pub fn is_expired(&self, block_height: u32) -> bool {
        self.expiry_height != 0 && block_height > self.expiry_height
    }

    /// Nullifiers revealed by the orchard bundle, if any.
    pub fn orchard_nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.orchard_bundle
            .iter()
            .flat_map(|bundle| bundle.nullifiers.iter())
    }

    /// Nullifiers revealed by sprout joinsplits.
    pub fn sprout_nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.joinsplits.iter().flat_map(|js| js.nullifiers.iter())
    }

    /// Nullifiers revealed by sapling spends.
    pub fn sapling_nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.sapling_spends.iter().map(|spend| &spend.nullifier)
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_u32(buf, self.inputs.len() as u32);
        for input in &self.inputs {
            buf.extend_from_slice(&input.previous_output.txid.to_byte_array());
            buf.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            write_bytes(buf, input.script_sig.as_bytes());
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_u32(buf, self.outputs.len() as u32);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_sat().to_le_bytes());
            write_bytes(buf, output.script_pubkey.as_bytes());
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf.extend_from_slice(&self.expiry_height.to_le_bytes());
        write_u32(buf, self.joinsplits.len() as u32);
        for js in &self.joinsplits {
            buf.extend_from_slice(js.anchor.as_bytes());
            write_u32(buf, js.nullifiers.len() as u32);
            for nf in &js.nullifiers {
                buf.extend_from_slice(nf.as_bytes());
            }
            write_u32(buf, js.commitments.len() as u32);
            for cm in &js.commitments {
                buf.extend_from_slice(cm.as_bytes());
            }
        }
        write_u32(buf, self.sapling_spends.len() as u32);
        for spend in &self.sapling_spends {
            buf.extend_from_slice(spend.anchor.as_bytes());
            buf.extend_from_slice(spend.nullifier.as_bytes());
        }
        match &self.orchard_bundle {
            Some(bundle) => {
                buf.push(1);
                buf.extend_from_slice(bundle.anchor.as_bytes());
                write_u32(buf, bundle.nullifiers.len() as u32);
                for nf in &bundle.nullifiers {
                    buf.extend_from_slice(nf.as_bytes());
                }
            }
            None => buf.push(0),
        }
    }
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn simple_tx(lock_time: u32) -> Transaction {
        Transaction {
            version: 4,
            inputs: vec![TxIn::new(OutPoint::new(Txid::all_zeros(), 7))],
            outputs: vec![TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
            }],
            lock_time,
            expiry_height: 0,
            joinsplits: Vec::new(),
            sapling_spends: Vec::new(),
            orchard_bundle: None,
        }
    }

    #[test]
    fn txid_commits_to_content() {
        let a = simple_tx(0);
        let mut b = simple_tx(0);
        assert_eq!(a.txid(), b.txid());
        b.outputs[0].value = Amount::from_sat(50_001);
        assert_ne!(a.txid(), b.txid());
    }

    #[test]
    fn modified_size_discounts_inputs() {
        let mut tx = simple_tx(0);
        tx.inputs[0].script_sig = ScriptBuf::from_bytes(vec![0u8; 70]);
        let serialized = tx.serialized_size();
        assert_eq!(tx.modified_size(serialized), serialized - (41 + 70));
    }

    #[test]
    fn lock_time_finality() {
        assert!(simple_tx(0).is_final(0, 0));
        let by_height = simple_tx(100);
        assert!(by_height.is_final(101, 0));
        let mut pending = simple_tx(100);
        pending.inputs[0].sequence = 0;
        assert!(!pending.is_final(100, 0));
        // Final sequence numbers disable the lock time entirely.
        assert!(simple_tx(u32::MAX).is_final(0, 0));
    }

    #[test]
    fn expiry_is_strict() {
        let mut tx = simple_tx(0);
        tx.expiry_height = 20;
        assert!(!tx.is_expired(20));
        assert!(tx.is_expired(21));
        tx.expiry_height = 0;
        assert!(!tx.is_expired(u32::MAX));
    }
}
