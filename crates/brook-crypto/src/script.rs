//! Locking scripts, addresses and output descriptors.
//!
//! A locking script is a one-byte [`AddressType`] tag followed by a 32-byte
//! BLAKE3 commitment: to the public key for key types, to the redeem script
//! for script types, and to the nested witness program for the p2sh-wrapped
//! witness types.
//!
//! Addresses are Base58 over `prefix || tag || commitment || checksum`, with
//! a four-byte double-SHA256 checksum. Confidential addresses insert a marker
//! byte and the 32-byte blinding public key after the network prefix.

use sha2::{Digest, Sha256};

use brook_core::address::AddressType;
use brook_core::error::CryptoError;
use brook_core::network::Network;
use brook_core::traits::{ParsedAddress, ScriptInfo, ScriptSpec};

/// Length of a locking script: tag plus commitment.
pub const LOCKING_SCRIPT_LEN: usize = 33;

/// Marker byte distinguishing confidential addresses.
const CONFIDENTIAL_MARKER: u8 = 0x0c;

/// Upper bound on multisig participants.
pub const MAX_MULTISIG_KEYS: usize = 16;

/// Multisig script terminator.
const OP_CHECKMULTISIG: u8 = 0xae;

/// Small-integer opcode base (`OP_1` is `0x51`).
const OP_N_BASE: u8 = 0x50;

/// BLAKE3 commitment used in locking scripts.
pub fn commitment(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Locking script for `address_type` committing to `data`.
pub fn locking_script(address_type: AddressType, data: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(LOCKING_SCRIPT_LEN);
    script.push(address_type.tag());
    script.extend_from_slice(&commitment(data));
    script
}

/// Split a locking script into its type and commitment.
pub fn parse_locking_script(script: &[u8]) -> Result<(AddressType, [u8; 32]), CryptoError> {
    if script.len() != LOCKING_SCRIPT_LEN {
        return Err(CryptoError::Script(format!(
            "locking script must be {LOCKING_SCRIPT_LEN} bytes, got {}",
            script.len()
        )));
    }
    let address_type = AddressType::from_tag(script[0])
        .ok_or_else(|| CryptoError::Script(format!("unknown script tag {:#04x}", script[0])))?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&script[1..]);
    Ok((address_type, hash))
}

/// The witness program nested inside a p2sh-wrapped witness output.
///
/// For a key this is the p2wpkh locking script of the key; for a script it
/// is the p2wsh locking script of the script.
pub fn nested_program(inner: AddressType, data: &[u8]) -> Vec<u8> {
    locking_script(inner, data)
}

/// Locking script of a single-key output type paying to `pubkey`.
pub fn key_locking_script(address_type: AddressType, pubkey: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match address_type {
        AddressType::P2pkh | AddressType::P2wpkh => Ok(locking_script(address_type, pubkey)),
        AddressType::P2shP2wpkh => Ok(locking_script(
            address_type,
            &nested_program(AddressType::P2wpkh, pubkey),
        )),
        other => Err(CryptoError::Script(format!(
            "{other} is a script type, not a key type"
        ))),
    }
}

/// `m`-of-`n` multisig redeem script.
pub fn multisig_script(required: u32, pubkeys: &[Vec<u8>]) -> Result<Vec<u8>, CryptoError> {
    if pubkeys.is_empty() || pubkeys.len() > MAX_MULTISIG_KEYS {
        return Err(CryptoError::Script(format!(
            "multisig needs 1..={MAX_MULTISIG_KEYS} keys, got {}",
            pubkeys.len()
        )));
    }
    if required == 0 || required as usize > pubkeys.len() {
        return Err(CryptoError::Script(format!(
            "required signatures {required} out of range for {} keys",
            pubkeys.len()
        )));
    }
    let mut script = vec![OP_N_BASE + required as u8];
    for pk in pubkeys {
        if pk.len() != 32 {
            return Err(CryptoError::Script(format!(
                "multisig pubkey must be 32 bytes, got {}",
                pk.len()
            )));
        }
        push_data(&mut script, pk);
    }
    script.push(OP_N_BASE + pubkeys.len() as u8);
    script.push(OP_CHECKMULTISIG);
    Ok(script)
}

/// Append a length-prefixed push of `data`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

/// Read back the pushes of a script built with [`push_data`].
pub fn read_pushes(mut script: &[u8]) -> Result<Vec<Vec<u8>>, CryptoError> {
    let mut pushes = Vec::new();
    while let Some((&len, rest)) = script.split_first() {
        let len = len as usize;
        if rest.len() < len {
            return Err(CryptoError::Script("truncated push".into()));
        }
        pushes.push(rest[..len].to_vec());
        script = &rest[len..];
    }
    Ok(pushes)
}

/// Build the script info for `spec` on `network`.
pub fn build(spec: &ScriptSpec, network: Network) -> Result<ScriptInfo, CryptoError> {
    match spec {
        ScriptSpec::Pubkey { address_type, pubkey } => build_pubkey(*address_type, pubkey, network),
        ScriptSpec::Multisig {
            address_type,
            required,
            pubkeys,
        } => {
            let script = multisig_script(*required, pubkeys)?;
            let keys: Vec<String> = pubkeys.iter().map(hex::encode).collect();
            let inner = format!("multi({required},{})", keys.join(","));
            build_script(*address_type, script, inner, network)
        }
        ScriptSpec::Script { address_type, script } => {
            if script.is_empty() {
                return Err(CryptoError::Script("empty redeem script".into()));
            }
            let inner = format!("raw({})", hex::encode(script));
            build_script(*address_type, script.clone(), inner, network)
        }
    }
}

fn build_pubkey(address_type: AddressType, pubkey: &[u8], network: Network) -> Result<ScriptInfo, CryptoError> {
    if pubkey.len() != 32 {
        return Err(CryptoError::Script(format!(
            "pubkey must be 32 bytes, got {}",
            pubkey.len()
        )));
    }
    let key = hex::encode(pubkey);
    let (locking, redeem, descriptor) = match address_type {
        AddressType::P2pkh => (locking_script(address_type, pubkey), None, format!("pkh({key})")),
        AddressType::P2wpkh => (locking_script(address_type, pubkey), None, format!("wpkh({key})")),
        AddressType::P2shP2wpkh => {
            let program = nested_program(AddressType::P2wpkh, pubkey);
            (
                locking_script(address_type, &program),
                Some(program),
                format!("sh(wpkh({key}))"),
            )
        }
        other => {
            return Err(CryptoError::Script(format!(
                "{other} is a script type, not a key type"
            )));
        }
    };
    Ok(ScriptInfo {
        address: encode_address(network, &locking)?,
        locking_script: locking,
        redeem_script: redeem,
        descriptor,
    })
}

fn build_script(
    address_type: AddressType,
    script: Vec<u8>,
    inner: String,
    network: Network,
) -> Result<ScriptInfo, CryptoError> {
    let (locking, descriptor) = match address_type {
        AddressType::P2sh => (locking_script(address_type, &script), format!("sh({inner})")),
        AddressType::P2wsh => (locking_script(address_type, &script), format!("wsh({inner})")),
        AddressType::P2shP2wsh => {
            let program = nested_program(AddressType::P2wsh, &script);
            (locking_script(address_type, &program), format!("sh(wsh({inner}))"))
        }
        other => {
            return Err(CryptoError::Script(format!(
                "{other} is a key type, not a script type"
            )));
        }
    };
    Ok(ScriptInfo {
        address: encode_address(network, &locking)?,
        locking_script: locking,
        redeem_script: Some(script),
        descriptor,
    })
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

fn base58_check(mut payload: Vec<u8>) -> String {
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);
    bs58::encode(payload).into_string()
}

/// Encode the address of `locking_script` on `network`.
pub fn encode_address(network: Network, locking_script: &[u8]) -> Result<String, CryptoError> {
    parse_locking_script(locking_script)?;
    let mut payload = Vec::with_capacity(1 + LOCKING_SCRIPT_LEN + 4);
    payload.push(network.address_prefix());
    payload.extend_from_slice(locking_script);
    Ok(base58_check(payload))
}

/// Encode the confidential form of `address`.
pub fn encode_confidential(
    network: Network,
    address: &str,
    blinding_pubkey: &[u8],
) -> Result<String, CryptoError> {
    if !network.ledger_kind().is_confidential() {
        return Err(CryptoError::InvalidAddress(format!(
            "{network} has no confidential addresses"
        )));
    }
    if blinding_pubkey.len() != 32 {
        return Err(CryptoError::InvalidAddress(format!(
            "blinding pubkey must be 32 bytes, got {}",
            blinding_pubkey.len()
        )));
    }
    let parsed = decode_address(network, address)?;
    if parsed.blinding_pubkey.is_some() {
        return Err(CryptoError::InvalidAddress(format!(
            "{address} is already confidential"
        )));
    }
    let mut payload = Vec::with_capacity(2 + 32 + LOCKING_SCRIPT_LEN + 4);
    payload.push(network.address_prefix());
    payload.push(CONFIDENTIAL_MARKER);
    payload.extend_from_slice(blinding_pubkey);
    payload.extend_from_slice(&parsed.locking_script);
    Ok(base58_check(payload))
}

/// Decode a plain or confidential address for `network`.
pub fn decode_address(network: Network, address: &str) -> Result<ParsedAddress, CryptoError> {
    let invalid = |why: &str| CryptoError::InvalidAddress(format!("{address}: {why}"));
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|_| invalid("not base58"))?;
    if raw.len() < 5 {
        return Err(invalid("too short"));
    }
    let (payload, sum) = raw.split_at(raw.len() - 4);
    if checksum(payload)[..] != *sum {
        return Err(invalid("bad checksum"));
    }
    if payload[0] != network.address_prefix() {
        return Err(invalid(&format!("not a {network} address")));
    }
    let body = &payload[1..];
    let (blinding_pubkey, locking) = match body.len() {
        LOCKING_SCRIPT_LEN => (None, body),
        n if n == 1 + 32 + LOCKING_SCRIPT_LEN && body[0] == CONFIDENTIAL_MARKER => {
            if !network.ledger_kind().is_confidential() {
                return Err(invalid("confidential address on a plain ledger"));
            }
            (Some(body[1..33].to_vec()), &body[33..])
        }
        _ => return Err(invalid("bad length")),
    };
    let (address_type, _) = parse_locking_script(locking).map_err(|e| invalid(&e.to_string()))?;
    Ok(ParsedAddress {
        address_type,
        locking_script: locking.to_vec(),
        blinding_pubkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(b: u8) -> Vec<u8> {
        vec![b; 32]
    }

    #[test]
    fn pubkey_types_build() {
        for t in [AddressType::P2pkh, AddressType::P2wpkh, AddressType::P2shP2wpkh] {
            let info = build(&ScriptSpec::Pubkey { address_type: t, pubkey: pk(1) }, Network::Regtest).unwrap();
            assert_eq!(info.locking_script[0], t.tag());
            assert_eq!(info.locking_script.len(), LOCKING_SCRIPT_LEN);
            let parsed = decode_address(Network::Regtest, &info.address).unwrap();
            assert_eq!(parsed.address_type, t);
            assert_eq!(parsed.locking_script, info.locking_script);
        }
    }

    #[test]
    fn nested_witness_key_commits_to_program() {
        let info = build(
            &ScriptSpec::Pubkey { address_type: AddressType::P2shP2wpkh, pubkey: pk(2) },
            Network::Testnet,
        )
        .unwrap();
        let program = info.redeem_script.clone().unwrap();
        assert_eq!(program, locking_script(AddressType::P2wpkh, &pk(2)));
        assert_eq!(info.locking_script, locking_script(AddressType::P2shP2wpkh, &program));
        assert_eq!(info.descriptor, format!("sh(wpkh({}))", hex::encode(pk(2))));
    }

    #[test]
    fn key_spec_rejects_script_type() {
        let err = build(&ScriptSpec::Pubkey { address_type: AddressType::P2wsh, pubkey: pk(1) }, Network::Regtest);
        assert!(matches!(err, Err(CryptoError::Script(_))));
    }

    #[test]
    fn multisig_build_and_bounds() {
        let spec = ScriptSpec::Multisig {
            address_type: AddressType::P2wsh,
            required: 2,
            pubkeys: vec![pk(1), pk(2), pk(3)],
        };
        let info = build(&spec, Network::Regtest).unwrap();
        let script = info.redeem_script.unwrap();
        assert_eq!(script[0], OP_N_BASE + 2);
        assert_eq!(script[script.len() - 2], OP_N_BASE + 3);
        assert_eq!(*script.last().unwrap(), OP_CHECKMULTISIG);
        assert!(info.descriptor.starts_with("wsh(multi(2,"));

        assert!(multisig_script(0, &[pk(1)]).is_err());
        assert!(multisig_script(2, &[pk(1)]).is_err());
        assert!(multisig_script(1, &[]).is_err());
        assert!(multisig_script(1, &[vec![1; 33]]).is_err());
    }

    #[test]
    fn raw_script_descriptor() {
        let info = build(
            &ScriptSpec::Script { address_type: AddressType::P2shP2wsh, script: vec![0x51] },
            Network::Regtest,
        )
        .unwrap();
        assert_eq!(info.descriptor, "sh(wsh(raw(51)))");
        assert_eq!(info.redeem_script, Some(vec![0x51]));
    }

    #[test]
    fn address_rejects_wrong_network_and_corruption() {
        let info = build(
            &ScriptSpec::Pubkey { address_type: AddressType::P2wpkh, pubkey: pk(4) },
            Network::Testnet,
        )
        .unwrap();
        assert!(decode_address(Network::Mainnet, &info.address).is_err());

        let mut raw = bs58::decode(&info.address).into_vec().unwrap();
        raw[5] ^= 0xff;
        let corrupted = bs58::encode(raw).into_string();
        assert!(decode_address(Network::Testnet, &corrupted).is_err());
        assert!(decode_address(Network::Testnet, "0OIl").is_err());
    }

    #[test]
    fn confidential_roundtrip() {
        let net = Network::LiquidRegtest;
        let info = build(&ScriptSpec::Pubkey { address_type: AddressType::P2wpkh, pubkey: pk(5) }, net).unwrap();
        let conf = encode_confidential(net, &info.address, &[9u8; 32]).unwrap();
        let parsed = decode_address(net, &conf).unwrap();
        assert_eq!(parsed.blinding_pubkey, Some(vec![9u8; 32]));
        assert_eq!(parsed.locking_script, info.locking_script);
        assert!(encode_confidential(net, &conf, &[9u8; 32]).is_err());
    }

    #[test]
    fn no_confidential_on_plain_ledger() {
        let info = build(
            &ScriptSpec::Pubkey { address_type: AddressType::P2wpkh, pubkey: pk(6) },
            Network::Regtest,
        )
        .unwrap();
        assert!(encode_confidential(Network::Regtest, &info.address, &[1u8; 32]).is_err());
    }

    #[test]
    fn pushes_roundtrip() {
        let mut script = Vec::new();
        push_data(&mut script, &[1, 2, 3]);
        push_data(&mut script, &[]);
        push_data(&mut script, &[7; 40]);
        assert_eq!(read_pushes(&script).unwrap(), vec![vec![1, 2, 3], vec![], vec![7; 40]]);
        assert!(read_pushes(&[5, 1]).is_err());
    }
}
