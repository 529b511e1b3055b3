use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Flat fee charged per transaction, in sats.
pub const FIXED_FEE_SATS: u64 = 10_000;

/// Change below or at this value is folded into the fee instead of
/// creating an output.
pub const DUST_LIMIT_SATS: u64 = 546;

/// A single unspent transaction output as reported by the ledger query.
///
/// UTXO sets are refreshed per query, never mutated locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    /// Transaction ID as a hex string (big-endian / display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in sats.
    pub value_sats: u64,
    /// Ledger height the output confirmed at, if known.
    #[serde(default)]
    pub height: Option<u32>,
    /// Owning address, if known.
    #[serde(default)]
    pub address: Option<String>,
}

/// The single input consumed by a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub txid: String,
    pub vout: u32,
    pub value_sats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub address: String,
    pub value_sats: u64,
}

/// A fully-funded single-input transaction plan.
///
/// Invariant: `input.value_sats == Σ outputs + fee_sats`. A dust-suppressed
/// change output is accounted for inside `fee_sats`, so the invariant holds
/// for every plan this module emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxPlan {
    pub input: TxInput,
    /// Payment output first, optional change output second.
    pub outputs: Vec<TxOutput>,
    pub fee_sats: u64,
    pub change_sats: u64,
    pub change_address: String,
}

impl TxPlan {
    /// Whether the funding invariant holds.
    pub fn is_balanced(&self) -> bool {
        let out_total: u64 = self.outputs.iter().map(|o| o.value_sats).sum();
        self.input.value_sats == out_total + self.fee_sats
    }
}

fn input_from(utxo: &Utxo) -> TxInput {
    TxInput {
        txid: utxo.txid.clone(),
        vout: utxo.vout,
        value_sats: utxo.value_sats,
    }
}

/// Build a plan spending `utxo` that pays `send_sats` to `recipient`.
///
/// Change above the dust floor goes back to `change_address`; change at or
/// below it is folded into the fee.
fn plan_for_utxo(
    utxo: &Utxo,
    send_sats: u64,
    fee_sats: u64,
    dust_sats: u64,
    recipient: &str,
    change_address: &str,
) -> TxPlan {
    let change = utxo.value_sats - send_sats - fee_sats;
    let mut outputs = vec![TxOutput {
        address: recipient.to_string(),
        value_sats: send_sats,
    }];

    if change > dust_sats {
        outputs.push(TxOutput {
            address: change_address.to_string(),
            value_sats: change,
        });
        TxPlan {
            input: input_from(utxo),
            outputs,
            fee_sats,
            change_sats: change,
            change_address: change_address.to_string(),
        }
    } else {
        TxPlan {
            input: input_from(utxo),
            outputs,
            fee_sats: fee_sats + change,
            change_sats: 0,
            change_address: change_address.to_string(),
        }
    }
}

/// Select UTXOs to pay `amount_sats` to `recipient` under a flat per-tx fee.
///
/// Strategy A spends the smallest single UTXO that covers amount + fee,
/// which keeps the UTXO set unfragmented. Only when no single UTXO is
/// large enough does Strategy B decompose the payment into several
/// single-input transactions, consuming the largest UTXOs first. UTXOs
/// that cannot cover the fee on their own are skipped entirely.
///
/// Returns the plans in broadcast order. Each plan satisfies
/// `input == Σ outputs + fee`; plans never chain each other's outputs.
pub fn plan_transactions(
    utxos: &[Utxo],
    amount_sats: u64,
    fee_sats: u64,
    dust_sats: u64,
    recipient: &str,
    change_address: &str,
) -> Result<Vec<TxPlan>, EngineError> {
    if amount_sats == 0 {
        return Ok(Vec::new());
    }

    let available: u64 = utxos.iter().map(|u| u.value_sats).sum();
    let required = amount_sats + fee_sats;
    if available < required {
        return Err(EngineError::InsufficientFunds {
            available_sats: available,
            required_sats: required,
        });
    }

    let mut sorted: Vec<&Utxo> = utxos.iter().collect();

    // Strategy A: smallest single UTXO covering amount + fee.
    sorted.sort_by(|a, b| a.value_sats.cmp(&b.value_sats));
    if let Some(utxo) = sorted.iter().find(|u| u.value_sats >= required) {
        let plan = plan_for_utxo(
            utxo,
            amount_sats,
            fee_sats,
            dust_sats,
            recipient,
            change_address,
        );
        return Ok(vec![plan]);
    }

    // Strategy B: greedy decomposition, largest first. Each consumed UTXO
    // becomes its own single-input transaction paying its value minus fee
    // toward the remainder.
    sorted.sort_by(|a, b| b.value_sats.cmp(&a.value_sats));
    let mut plans = Vec::new();
    let mut remaining = amount_sats;

    for utxo in sorted {
        if remaining == 0 {
            break;
        }
        if utxo.value_sats <= fee_sats {
            // Too small to pay its own fee; not worth consuming.
            continue;
        }

        let usable = utxo.value_sats - fee_sats;
        if usable >= remaining {
            plans.push(plan_for_utxo(
                utxo,
                remaining,
                fee_sats,
                dust_sats,
                recipient,
                change_address,
            ));
            remaining = 0;
        } else {
            plans.push(plan_for_utxo(
                utxo,
                usable,
                fee_sats,
                dust_sats,
                recipient,
                change_address,
            ));
            remaining -= usable;
        }
    }

    if remaining > 0 {
        return Err(EngineError::InsufficientFunds {
            available_sats: amount_sats - remaining,
            required_sats: amount_sats,
        });
    }

    log::debug!(
        "planned {} transaction(s) for {} sats",
        plans.len(),
        amount_sats
    );
    Ok(plans)
}
