//! Transparent value-flow checks used when connecting a transaction
//! against a coin view.
//!
//! Script evaluation and shielded proof verification happen elsewhere;
//! these helpers only cover the transparent pool, which is all the
//! unconfirmed-pool checker needs.

use crate::coins::{Coins, CoinsCache};
use crate::transaction::Transaction;
use crate::COINBASE_MATURITY;
use bitcoin::Amount;

/// Transparent input validation error.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("input {index} references missing coins {txid}")]
    MissingInputs { txid: bitcoin::Txid, index: usize },
    #[error("input {index} references spent output")]
    SpentOutput { index: usize },
    #[error("tried to spend coinbase at depth {depth}")]
    ImmatureCoinbase { depth: u32 },
    #[error("value in ({value_in}) below value out ({value_out})")]
    ValueInBelowOut { value_in: Amount, value_out: Amount },
    #[error("total input value out of range")]
    ValueOutOfRange,
}

/// Check that every transparent input of `tx` is present and spendable in
/// `view` at `spend_height`, and that the inputs cover the outputs.
///
/// Returns the transparent fee. Coinbase transactions vacuously pass with a
/// zero fee. Shielded value balance is accounted during admission and is
/// not re-derived here.
pub fn check_tx_inputs(
    tx: &Transaction,
    view: &mut CoinsCache<'_>,
    spend_height: u32,
) -> Result<Amount, TxError> {
    if tx.is_coinbase() {
        return Ok(Amount::ZERO);
    }

    let mut value_in: u64 = 0;
    for (index, input) in tx.inputs.iter().enumerate() {
        let prevout = input.previous_output;
        let coins = view.access_coins(&prevout.txid).ok_or(TxError::MissingInputs {
            txid: prevout.txid,
            index,
        })?;

        if coins.is_coinbase {
            let depth = spend_height.saturating_sub(coins.height);
            if depth < COINBASE_MATURITY {
                return Err(TxError::ImmatureCoinbase { depth });
            }
        }

        let out = coins
            .outputs
            .get(prevout.vout as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(TxError::SpentOutput { index })?;
        value_in = value_in
            .checked_add(out.value.to_sat())
            .ok_or(TxError::ValueOutOfRange)?;
    }

    if value_in > Amount::MAX_MONEY.to_sat() {
        return Err(TxError::ValueOutOfRange);
    }

    let value_out = tx.value_out();
    if value_in < value_out.to_sat() {
        return Err(TxError::ValueInBelowOut {
            value_in: Amount::from_sat(value_in),
            value_out,
        });
    }

    Ok(Amount::from_sat(value_in - value_out.to_sat()))
}

/// Apply `tx` to `view`: spend its transparent inputs and install its own
/// outputs at `height`.
pub fn update_coins(tx: &Transaction, view: &mut CoinsCache<'_>, height: u32) {
    if !tx.is_coinbase() {
        for input in &tx.inputs {
            let prevout = input.previous_output;
            if let Some(coins) = view.access_coins_mut(&prevout.txid) {
                coins.spend(prevout.vout);
            }
        }
    }
    view.set_coins(tx.txid(), Coins::from_tx(tx, height));
}
