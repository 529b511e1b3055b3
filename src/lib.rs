//! Transaction engine for the L1 ledger.
//!
//! Provides bech32/P2WPKH address encoding, fixed-fee UTXO selection,
//! SegWit transaction construction and signing, and a coin-ancestry
//! classifier that decides whether a UTXO descends from an early-era
//! reward transaction. The wire format (signature hash, witness
//! serialization, transaction ids) is implemented here directly so the
//! produced bytes are bit-exact against the ledger's consensus rules.

pub mod address;
pub mod error;
pub mod network;
pub mod transaction;
pub mod utxo;
pub mod vesting;
