use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::network::Network;

const CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Hash160 = RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

fn polymod_step(pre: u32) -> u32 {
    let b = pre >> 25;
    ((pre & 0x1ff_ffff) << 5)
        ^ (if b & 1 != 0 { 0x3b6a_57b2 } else { 0 })
        ^ (if b & 2 != 0 { 0x2650_8e6d } else { 0 })
        ^ (if b & 4 != 0 { 0x1ea1_19fa } else { 0 })
        ^ (if b & 8 != 0 { 0x3d42_33dd } else { 0 })
        ^ (if b & 16 != 0 { 0x2a14_62b3 } else { 0 })
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(hrp.len() * 2 + 1);
    for c in hrp.bytes() {
        out.push(c >> 5);
    }
    out.push(0);
    for c in hrp.bytes() {
        out.push(c & 0x1f);
    }
    out
}

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for &v in values {
        chk = polymod_step(chk) ^ (v as u32);
    }
    chk
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let pm = polymod(&values) ^ 1;
    let mut out = [0u8; 6];
    for (i, b) in out.iter_mut().enumerate() {
        *b = ((pm >> (5 * (5 - i))) & 0x1f) as u8;
    }
    out
}

/// Regroup bits, e.g. 8-bit bytes into 5-bit bech32 values.
///
/// With `pad` set, a final partial group is zero-padded; without it, a
/// non-zero partial group (or over-long padding) is rejected.
fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>, EngineError> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::new();
    let max: u32 = (1 << to) - 1;

    for &value in data {
        if (value as u32) >> from != 0 {
            return Err(EngineError::InvalidAddress(format!(
                "value {value} exceeds {from} bits"
            )));
        }
        acc = (acc << from) | value as u32;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max) != 0 {
        return Err(EngineError::InvalidAddress("invalid bit padding".into()));
    }

    Ok(out)
}

/// Encode a witness program as a bech32 address.
pub fn encode_address(hrp: &str, version: u8, program: &[u8]) -> Result<String, EngineError> {
    if version > 16 {
        return Err(EngineError::InvalidAddress(format!(
            "witness version {version} out of range"
        )));
    }
    if program.len() < 2 || program.len() > 40 {
        return Err(EngineError::InvalidAddress(format!(
            "witness program length {} out of range",
            program.len()
        )));
    }

    let mut data = vec![version];
    data.extend(convert_bits(program, 8, 5, true)?);
    let checksum = create_checksum(hrp, &data);

    let mut address = String::with_capacity(hrp.len() + 1 + data.len() + 6);
    address.push_str(hrp);
    address.push('1');
    for &d in data.iter().chain(checksum.iter()) {
        address.push(CHARSET[d as usize] as char);
    }
    Ok(address)
}

/// Decode a bech32 address into `(hrp, witness_version, program)`.
///
/// Exact inverse of [`encode_address`]; rejects bad checksums, mixed
/// case, out-of-charset characters, and malformed witness programs.
pub fn decode_address(address: &str) -> Result<(String, u8, Vec<u8>), EngineError> {
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(EngineError::InvalidAddress("mixed-case address".into()));
    }
    let address = address.to_lowercase();

    let sep = address
        .rfind('1')
        .ok_or_else(|| EngineError::InvalidAddress("missing separator".into()))?;
    if sep == 0 {
        return Err(EngineError::InvalidAddress("empty prefix".into()));
    }
    let hrp = &address[..sep];
    let data_part = &address[sep + 1..];
    if data_part.len() < 7 {
        return Err(EngineError::InvalidAddress("data part too short".into()));
    }

    let mut data = Vec::with_capacity(data_part.len());
    for c in data_part.bytes() {
        let value = CHARSET
            .iter()
            .position(|&x| x == c)
            .ok_or_else(|| EngineError::InvalidAddress(format!("invalid character {:?}", c as char)))?;
        data.push(value as u8);
    }

    if !verify_checksum(hrp, &data) {
        return Err(EngineError::InvalidAddress("bad checksum".into()));
    }
    let data = &data[..data.len() - 6];

    let version = data[0];
    if version > 16 {
        return Err(EngineError::InvalidAddress(format!(
            "witness version {version} out of range"
        )));
    }
    let program = convert_bits(&data[1..], 5, 8, false)?;
    if program.len() < 2 || program.len() > 40 {
        return Err(EngineError::InvalidAddress(format!(
            "witness program length {} out of range",
            program.len()
        )));
    }
    if version == 0 && program.len() != 20 && program.len() != 32 {
        return Err(EngineError::InvalidAddress(format!(
            "version-0 program must be 20 or 32 bytes, got {}",
            program.len()
        )));
    }

    Ok((hrp.to_string(), version, program))
}

/// Build the P2WPKH scriptPubKey (`OP_0 PUSH20 <pubkey-hash>`) for an address.
///
/// Only version-0, 20-byte witness programs are spendable by this engine;
/// anything else is rejected rather than silently substituted.
pub fn script_pubkey(address: &str) -> Result<Vec<u8>, EngineError> {
    let (_, version, program) = decode_address(address)?;
    if version != 0 || program.len() != 20 {
        return Err(EngineError::InvalidAddress(format!(
            "not a P2WPKH address: version {version}, program {} bytes",
            program.len()
        )));
    }
    let mut script = Vec::with_capacity(22);
    script.push(0x00);
    script.push(0x14);
    script.extend_from_slice(&program);
    Ok(script)
}

/// SHA-256 of the scriptPubKey, byte-reversed.
///
/// The ledger indexes history/balance/UTXOs by this script hash rather
/// than by address string.
pub fn script_hash(address: &str) -> Result<[u8; 32], EngineError> {
    let script = script_pubkey(address)?;
    let mut hash: [u8; 32] = Sha256::digest(&script).into();
    hash.reverse();
    Ok(hash)
}

/// Derive the P2WPKH address for a 33-byte compressed public key.
pub fn pubkey_to_address(pubkey: &[u8; 33], network: Network) -> Result<String, EngineError> {
    if pubkey[0] != 0x02 && pubkey[0] != 0x03 {
        return Err(EngineError::InvalidAddress(
            "public key is not in compressed SEC1 form".into(),
        ));
    }
    encode_address(network.hrp(), 0, &hash160(pubkey))
}
