//! The fee/priority estimator owned by the pool.
//!
//! The pool treats the estimator as an opaque sink: it feeds admissions and
//! confirmed-block snapshots in, and forwards `estimate_*` queries out. The
//! default implementation below keeps a small per-depth confirmation model;
//! hosts with richer models implement [`FeeEstimator`] themselves.

use crate::types::{FeeRate, MemPoolEntry};
use bitcoin::Txid;
use std::collections::HashSet;
use std::io::{self, Read, Write};

/// How far ahead (in blocks) confirmation statistics are kept.
const MAX_CONFIRM_HORIZON: usize = 25;

/// Samples a bucket needs before it answers queries.
const MIN_BUCKET_SAMPLES: u64 = 8;

/// Weight of a new sample in the per-bucket running average.
const SAMPLE_WEIGHT: f64 = 0.05;

/// Sink for pool events plus the estimate queries derived from them.
pub trait FeeEstimator: Send + Sync {
    /// A transaction entered the pool. `current_estimate` is false while
    /// the node is catching up and admissions carry no signal.
    fn process_transaction(&mut self, entry: &MemPoolEntry, current_estimate: bool);

    /// A transaction left the pool without confirming.
    fn remove_tx(&mut self, txid: &Txid);

    /// A block connected at `height`; `entries` are the pool entries it
    /// confirmed, snapshotted before removal.
    fn process_block(&mut self, height: u32, entries: &[MemPoolEntry], current_estimate: bool);

    /// Fee rate expected to confirm within `n_blocks`. Zero when unknown.
    fn estimate_fee(&self, n_blocks: usize) -> FeeRate;

    /// Priority expected to confirm within `n_blocks`. Negative when
    /// unknown.
    fn estimate_priority(&self, n_blocks: usize) -> f64;

    /// Serialize the estimator state.
    fn write(&self, out: &mut dyn Write) -> io::Result<()>;

    /// Replace the estimator state from a serialized payload.
    fn read(&mut self, input: &mut dyn Read) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
struct ConfirmBucket {
    avg_fee_rate: f64,
    samples: u64,
}

impl ConfirmBucket {
    fn record(&mut self, fee_rate: u64) {
        if self.samples == 0 {
            self.avg_fee_rate = fee_rate as f64;
        } else {
            self.avg_fee_rate += (fee_rate as f64 - self.avg_fee_rate) * SAMPLE_WEIGHT;
        }
        self.samples += 1;
    }

    fn primed(&self) -> bool {
        self.samples >= MIN_BUCKET_SAMPLES
    }
}

/// Default estimator: tracks dependency-free admissions and records, per
/// confirmation depth, a running average of the fee rates that confirmed at
/// that depth.
pub struct BlockPolicyEstimator {
    min_relay_fee: FeeRate,
    /// Admissions currently awaiting confirmation.
    tracked: HashSet<Txid>,
    buckets: [ConfirmBucket; MAX_CONFIRM_HORIZON + 1],
}

impl BlockPolicyEstimator {
    pub fn new(min_relay_fee: FeeRate) -> Self {
        Self {
            min_relay_fee,
            tracked: HashSet::new(),
            buckets: [ConfirmBucket::default(); MAX_CONFIRM_HORIZON + 1],
        }
    }
}

impl FeeEstimator for BlockPolicyEstimator {
    fn process_transaction(&mut self, entry: &MemPoolEntry, current_estimate: bool) {
        // Entries that arrived with in-pool parents confirm on their
        // ancestors' schedule and would skew the model.
        if !current_estimate || !entry.had_no_dependencies() {
            return;
        }
        self.tracked.insert(entry.txid());
    }

    fn remove_tx(&mut self, txid: &Txid) {
        self.tracked.remove(txid);
    }

    fn process_block(&mut self, height: u32, entries: &[MemPoolEntry], current_estimate: bool) {
        // The entries arrive as a pre-removal snapshot; work from them
        // directly, since `remove_tx` has already fired for each one.
        for entry in entries {
            self.tracked.remove(&entry.txid());
            if !current_estimate || !entry.had_no_dependencies() {
                continue;
            }
            let depth = height.saturating_sub(entry.entry_height()) as usize;
            if (1..=MAX_CONFIRM_HORIZON).contains(&depth) {
                self.buckets[depth].record(entry.fee_rate().as_sat_per_k());
            }
        }
    }

    fn estimate_fee(&self, n_blocks: usize) -> FeeRate {
        if n_blocks == 0 {
            return FeeRate::ZERO;
        }
        // The deepest primed bucket within the horizon is the cheapest rate
        // known to confirm in time.
        for depth in (1..=n_blocks.min(MAX_CONFIRM_HORIZON)).rev() {
            let bucket = &self.buckets[depth];
            if bucket.primed() {
                let rate = FeeRate::from_sat_per_k(bucket.avg_fee_rate as u64);
                return rate.max(self.min_relay_fee);
            }
        }
        FeeRate::ZERO
    }

    fn estimate_priority(&self, _n_blocks: usize) -> f64 {
        // Priority-based inclusion has no model yet.
        -1.0
    }

    fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.min_relay_fee.as_sat_per_k().to_le_bytes())?;
        out.write_all(&(self.buckets.len() as u32).to_le_bytes())?;
        for bucket in &self.buckets {
            out.write_all(&bucket.avg_fee_rate.to_le_bytes())?;
            out.write_all(&bucket.samples.to_le_bytes())?;
        }
        Ok(())
    }

    fn read(&mut self, input: &mut dyn Read) -> io::Result<()> {
        let min_relay_fee = FeeRate::from_sat_per_k(read_u64(input)?);
        let count = read_u32(input)? as usize;
        if count != self.buckets.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected bucket count {count}"),
            ));
        }
        let mut buckets = [ConfirmBucket::default(); MAX_CONFIRM_HORIZON + 1];
        for bucket in buckets.iter_mut() {
            bucket.avg_fee_rate = f64::from_le_bytes(read_array(input)?);
            bucket.samples = read_u64(input)?;
        }
        self.min_relay_fee = min_relay_fee;
        self.buckets = buckets;
        self.tracked.clear();
        Ok(())
    }
}

fn read_array<const N: usize>(input: &mut dyn Read) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u32(input: &mut dyn Read) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_array(input)?))
}

fn read_u64(input: &mut dyn Read) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_array(input)?))
}
