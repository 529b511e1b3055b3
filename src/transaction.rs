use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::address;
use crate::error::EngineError;
use crate::utxo::{TxOutput, TxPlan};

/// Transaction format version.
pub const TX_VERSION: u32 = 2;

/// Sequence for every input: locktime-aware, RBF disabled.
pub const INPUT_SEQUENCE: u32 = 0xffff_fffe;

/// Locktime is always zero; plans are broadcast immediately.
pub const LOCK_TIME: u32 = 0;

/// SIGHASH_ALL.
pub const SIGHASH_ALL: u8 = 0x01;

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// Full segwit serialization (marker, flag, witness included).
    pub raw: Vec<u8>,
    /// Transaction id in display order (byte-reversed double-SHA256 of
    /// the non-witness serialization).
    pub txid: [u8; 32],
}

impl SignedTransaction {
    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid)
    }
}

/// Double SHA-256.
fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Encode a length as a wire varint.
fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Decode a display-order txid into the 32 reversed bytes used on the wire.
fn txid_wire_bytes(txid: &str) -> Result<[u8; 32], EngineError> {
    let mut bytes = hex::decode(txid)
        .map_err(|e| EngineError::Signing(format!("invalid txid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(EngineError::Signing(format!(
            "invalid txid length: {}",
            bytes.len()
        )));
    }
    bytes.reverse();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parse a hex private key, scrubbing the intermediate buffer.
pub fn parse_private_key(hex_key: &str) -> Result<[u8; 32], EngineError> {
    let mut bytes = hex::decode(hex_key.trim())
        .map_err(|e| EngineError::InvalidPrivateKey(format!("invalid hex: {e}")))?;
    if bytes.len() != 32 {
        let len = bytes.len();
        bytes.zeroize();
        return Err(EngineError::InvalidPrivateKey(format!(
            "expected 32 bytes, got {len}"
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(out)
}

fn signing_key_from(private_key: &[u8; 32]) -> Result<SigningKey, EngineError> {
    SigningKey::from_bytes(private_key.into())
        .map_err(|e| EngineError::InvalidPrivateKey(format!("not a valid scalar: {e}")))
}

fn compressed_pubkey(signing_key: &SigningKey) -> Result<[u8; 33], EngineError> {
    signing_key
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .map_err(|_| EngineError::Signing("unexpected public key encoding".into()))
}

/// Derive the P2WPKH address controlled by a private key.
pub fn derive_address(
    private_key: &[u8; 32],
    network: crate::network::Network,
) -> Result<String, EngineError> {
    let signing_key = signing_key_from(private_key)?;
    address::pubkey_to_address(&compressed_pubkey(&signing_key)?, network)
}

/// The P2WPKH script code signed in the digest:
/// `0x19 OP_DUP OP_HASH160 PUSH20 <pubkey-hash> OP_EQUALVERIFY OP_CHECKSIG`.
fn script_code(pubkey_hash: &[u8; 20]) -> [u8; 26] {
    let mut code = [0u8; 26];
    code[0] = 0x19;
    code[1] = 0x76;
    code[2] = 0xa9;
    code[3] = 0x14;
    code[4..24].copy_from_slice(pubkey_hash);
    code[24] = 0x88;
    code[25] = 0xac;
    code
}

/// Serialize outputs as `value || varint(script len) || script`.
///
/// Fails (before any signing) if an output address is not P2WPKH.
fn serialize_outputs(outputs: &[TxOutput]) -> Result<Vec<u8>, EngineError> {
    let mut buf = Vec::new();
    for out in outputs {
        let script = address::script_pubkey(&out.address)?;
        buf.extend_from_slice(&out.value_sats.to_le_bytes());
        write_varint(&mut buf, script.len() as u64);
        buf.extend_from_slice(&script);
    }
    Ok(buf)
}

/// Compute the 32-byte digest to sign for the plan's single input.
///
/// The preimage follows the segwit v0 digest layout: version, double-SHA256
/// of the outpoint, double-SHA256 of the sequence, the outpoint itself, the
/// P2WPKH script code, the spent value, the sequence, double-SHA256 of the
/// serialized outputs, locktime, and the sighash type, all little-endian.
/// The digest is the double-SHA256 of that preimage.
fn sighash_digest(
    outpoint: &[u8; 36],
    value_sats: u64,
    pubkey_hash: &[u8; 20],
    outputs_serialized: &[u8],
) -> [u8; 32] {
    let hash_prevouts = double_sha256(outpoint);
    let hash_sequence = double_sha256(&INPUT_SEQUENCE.to_le_bytes());
    let hash_outputs = double_sha256(outputs_serialized);

    let mut preimage = Vec::with_capacity(156);
    preimage.extend_from_slice(&TX_VERSION.to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend_from_slice(outpoint);
    preimage.extend_from_slice(&script_code(pubkey_hash));
    preimage.extend_from_slice(&value_sats.to_le_bytes());
    preimage.extend_from_slice(&INPUT_SEQUENCE.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&LOCK_TIME.to_le_bytes());
    preimage.extend_from_slice(&(SIGHASH_ALL as u32).to_le_bytes());

    double_sha256(&preimage)
}

/// Non-witness serialization: version, input, outputs, locktime.
/// The txid is the double-SHA256 of these bytes.
fn serialize_base(outpoint: &[u8; 36], outputs_serialized: &[u8], output_count: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&TX_VERSION.to_le_bytes());
    write_varint(&mut buf, 1);
    buf.extend_from_slice(outpoint);
    buf.push(0x00); // empty scriptSig
    buf.extend_from_slice(&INPUT_SEQUENCE.to_le_bytes());
    write_varint(&mut buf, output_count as u64);
    buf.extend_from_slice(outputs_serialized);
    buf.extend_from_slice(&LOCK_TIME.to_le_bytes());
    buf
}

/// Full segwit serialization with marker, flag, and the two-item witness.
fn serialize_witness_tx(
    outpoint: &[u8; 36],
    outputs_serialized: &[u8],
    output_count: usize,
    signature: &[u8],
    pubkey: &[u8; 33],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&TX_VERSION.to_le_bytes());
    buf.push(0x00); // segwit marker
    buf.push(0x01); // segwit flag
    write_varint(&mut buf, 1);
    buf.extend_from_slice(outpoint);
    buf.push(0x00);
    buf.extend_from_slice(&INPUT_SEQUENCE.to_le_bytes());
    write_varint(&mut buf, output_count as u64);
    buf.extend_from_slice(outputs_serialized);
    // Witness stack: [signature || sighash byte, pubkey].
    write_varint(&mut buf, 2);
    write_varint(&mut buf, signature.len() as u64);
    buf.extend_from_slice(signature);
    write_varint(&mut buf, pubkey.len() as u64);
    buf.extend_from_slice(pubkey);
    buf.extend_from_slice(&LOCK_TIME.to_le_bytes());
    buf
}

/// Sign a plan and serialize it for broadcast.
///
/// Aborts before touching the key if the plan is unbalanced or any output
/// address fails script construction. Signatures are deterministic
/// (RFC 6979) and canonicalized to low-S before DER encoding.
pub fn sign_plan(plan: &TxPlan, private_key: &[u8; 32]) -> Result<SignedTransaction, EngineError> {
    let out_total: u64 = plan.outputs.iter().map(|o| o.value_sats).sum();
    if plan.input.value_sats != out_total + plan.fee_sats {
        return Err(EngineError::SigningPrecondition(format!(
            "input {} sats != outputs {} + fee {}",
            plan.input.value_sats, out_total, plan.fee_sats
        )));
    }
    if plan.outputs.is_empty() || plan.outputs.len() > 2 {
        return Err(EngineError::SigningPrecondition(format!(
            "plan has {} outputs, expected 1 or 2",
            plan.outputs.len()
        )));
    }

    let outputs_serialized = serialize_outputs(&plan.outputs)?;

    let mut outpoint = [0u8; 36];
    outpoint[..32].copy_from_slice(&txid_wire_bytes(&plan.input.txid)?);
    outpoint[32..].copy_from_slice(&plan.input.vout.to_le_bytes());

    let signing_key = signing_key_from(private_key)?;
    let pubkey = compressed_pubkey(&signing_key)?;
    let pubkey_hash = address::hash160(&pubkey);

    let digest = sighash_digest(
        &outpoint,
        plan.input.value_sats,
        &pubkey_hash,
        &outputs_serialized,
    );

    let signature: Signature = signing_key
        .sign_prehash(&digest)
        .map_err(|e| EngineError::Signing(format!("ecdsa signing failed: {e}")))?;
    let signature = signature.normalize_s().unwrap_or(signature);

    let mut sig_bytes = signature.to_der().as_bytes().to_vec();
    sig_bytes.push(SIGHASH_ALL);

    let raw = serialize_witness_tx(
        &outpoint,
        &outputs_serialized,
        plan.outputs.len(),
        &sig_bytes,
        &pubkey,
    );
    let base = serialize_base(&outpoint, &outputs_serialized, plan.outputs.len());
    let mut txid = double_sha256(&base);
    txid.reverse();

    Ok(SignedTransaction { raw, txid })
}
