//! Operator fee/priority adjustments.

use super::*;
use bitcoin::SignedAmount;

#[test]
fn delta_applied_after_insert() {
    let (pool, mut view) = test_pool();
    view.fund(txid(0), 2, 50_000);

    let plain = transfer(&[(txid(0), 0)], &[10_000]);
    let boosted = transfer(&[(txid(0), 1)], &[10_001]);
    add_tx(&pool, &view, &plain, 500);
    add_tx(&pool, &view, &boosted, 100);

    // The plain transaction wins on base fee.
    assert_eq!(pool.query_hashes()[0], plain.txid());

    pool.prioritise_transaction(boosted.txid(), 0.0, SignedAmount::from_sat(1_000));
    assert_eq!(pool.query_hashes()[0], boosted.txid());
}

#[test]
fn delta_applied_before_insert() {
    let (pool, mut view) = test_pool();
    view.fund(txid(0), 2, 50_000);

    // Prioritise a txid the pool has never seen.
    let boosted = transfer(&[(txid(0), 1)], &[10_001]);
    pool.prioritise_transaction(boosted.txid(), 0.0, SignedAmount::from_sat(1_000));

    let plain = transfer(&[(txid(0), 0)], &[10_000]);
    add_tx(&pool, &view, &plain, 500);
    add_tx(&pool, &view, &boosted, 100);

    // Same final score as if the delta had been applied after admission.
    assert_eq!(pool.query_hashes()[0], boosted.txid());
    let entry_fee = {
        let inner = pool.inner.read();
        inner.entries[&boosted.txid()].effective_fee()
    };
    assert_eq!(entry_fee, 1_100);
}

#[test]
fn deltas_accumulate() {
    let (pool, _) = test_pool();
    let target = txid(42);

    pool.prioritise_transaction(target, 1.5, SignedAmount::from_sat(300));
    pool.prioritise_transaction(target, 0.5, SignedAmount::from_sat(-100));

    let mut priority = 10.0;
    let mut fee = SignedAmount::from_sat(7);
    pool.apply_deltas(&target, &mut priority, &mut fee);
    assert_eq!(priority, 12.0);
    assert_eq!(fee, SignedAmount::from_sat(207));

    // Unknown txids leave the accumulators alone.
    pool.apply_deltas(&txid(43), &mut priority, &mut fee);
    assert_eq!(priority, 12.0);
    assert_eq!(fee, SignedAmount::from_sat(207));
}

#[test]
fn negative_delta_demotes() {
    let (pool, mut view) = test_pool();
    view.fund(txid(0), 2, 50_000);

    let a = transfer(&[(txid(0), 0)], &[10_000]);
    let b = transfer(&[(txid(0), 1)], &[10_001]);
    add_tx(&pool, &view, &a, 500);
    add_tx(&pool, &view, &b, 400);

    pool.prioritise_transaction(a.txid(), 0.0, SignedAmount::from_sat(-450));
    assert_eq!(pool.query_hashes()[0], b.txid());
    // The stored base fee is untouched.
    assert_eq!(
        pool.info(&a.txid()).expect("entry present").fee_rate,
        entry_for(&a, 500).fee_rate()
    );
}

#[test]
fn delta_survives_entry_removal() {
    let (pool, mut view) = test_pool();
    view.fund(txid(0), 1, 50_000);

    let tx = transfer(&[(txid(0), 0)], &[10_000]);
    add_tx(&pool, &view, &tx, 100);
    pool.prioritise_transaction(tx.txid(), 0.0, SignedAmount::from_sat(1_000));

    let mut removed = Vec::new();
    pool.remove(&tx, &mut removed, true);

    // The delta row outlives the entry and re-applies on re-admission.
    add_tx(&pool, &view, &tx, 100);
    let inner = pool.inner.read();
    assert_eq!(inner.entries[&tx.txid()].effective_fee(), 1_100);
}

#[test]
fn block_connection_clears_prioritisation() {
    let (pool, mut view) = test_pool();
    view.fund(txid(0), 1, 50_000);

    let tx = transfer(&[(txid(0), 0)], &[10_000]);
    let shared = add_tx(&pool, &view, &tx, 100);
    pool.prioritise_transaction(tx.txid(), 0.0, SignedAmount::from_sat(1_000));

    let mut conflicts = Vec::new();
    pool.remove_for_block(&[shared], 201, &mut conflicts, true);
    assert!(conflicts.is_empty());

    let inner = pool.inner.read();
    assert!(inner.deltas.is_empty());
}

#[test]
fn clear_prioritisation_drops_the_row() {
    let (pool, _) = test_pool();
    let target = txid(42);

    pool.prioritise_transaction(target, 1.0, SignedAmount::from_sat(300));
    pool.clear_prioritisation(&target);

    let mut priority = 0.0;
    let mut fee = SignedAmount::ZERO;
    pool.apply_deltas(&target, &mut priority, &mut fee);
    assert_eq!(priority, 0.0);
    assert_eq!(fee, SignedAmount::ZERO);
}
