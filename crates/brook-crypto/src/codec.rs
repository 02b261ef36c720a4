//! Per-ledger transaction wire format.
//!
//! Each ledger kind has its own wire struct; the format is chosen by the
//! caller's [`LedgerKind`], never guessed from the bytes. The plain ledger
//! carries a bare amount per output and cannot represent assets or blinded
//! data. Both formats lead with a one-byte format tag and are `bincode`
//! encoded, then hex encoded.

use brook_core::error::CryptoError;
use brook_core::network::LedgerKind;
use brook_core::types::{Asset, AssetId, OutPoint, Transaction, TxIn, TxOut, Value};

/// Leading byte of the plain-ledger format.
const BITCOIN_FORMAT: u8 = 0x01;

/// Leading byte of the asset-extended format.
const ELEMENTS_FORMAT: u8 = 0x02;

/// Upper bound on bytes a single decode may claim, including container
/// preallocation. Length prefixes that would exceed it fail instead of
/// allocating.
const MAX_DECODE_BYTES: usize = 4_000_000;

#[derive(bincode::Encode, bincode::Decode)]
struct WireInput {
    previous_output: OutPoint,
    script_sig: Vec<u8>,
    witness: Vec<Vec<u8>>,
    sequence: u32,
}

#[derive(bincode::Encode, bincode::Decode)]
struct BitcoinOutput {
    value: u64,
    script_pubkey: Vec<u8>,
}

#[derive(bincode::Encode, bincode::Decode)]
struct BitcoinTx {
    version: u32,
    lock_time: u32,
    inputs: Vec<WireInput>,
    outputs: Vec<BitcoinOutput>,
}

#[derive(bincode::Encode, bincode::Decode)]
enum WireAsset {
    Explicit(AssetId),
    Confidential(Vec<u8>),
}

#[derive(bincode::Encode, bincode::Decode)]
enum WireValue {
    Explicit(u64),
    Confidential(Vec<u8>),
}

#[derive(bincode::Encode, bincode::Decode)]
struct ElementsOutput {
    asset: WireAsset,
    value: WireValue,
    nonce: Vec<u8>,
    script_pubkey: Vec<u8>,
}

#[derive(bincode::Encode, bincode::Decode)]
struct ElementsTx {
    version: u32,
    lock_time: u32,
    inputs: Vec<WireInput>,
    outputs: Vec<ElementsOutput>,
}

impl From<&TxIn> for WireInput {
    fn from(i: &TxIn) -> Self {
        Self {
            previous_output: i.previous_output,
            script_sig: i.script_sig.clone(),
            witness: i.witness.clone(),
            sequence: i.sequence,
        }
    }
}

impl From<WireInput> for TxIn {
    fn from(i: WireInput) -> Self {
        Self {
            previous_output: i.previous_output,
            script_sig: i.script_sig,
            witness: i.witness,
            sequence: i.sequence,
        }
    }
}

/// Serialize `tx` in the wire format of `ledger`, hex encoded.
pub fn encode(tx: &Transaction, ledger: LedgerKind) -> Result<String, CryptoError> {
    let config = bincode::config::standard();
    let inputs = tx.inputs.iter().map(WireInput::from).collect();
    let (tag, body) = match ledger {
        LedgerKind::Bitcoin => {
            let outputs = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(i, out)| {
                    let value = out.value.explicit().ok_or_else(|| {
                        CryptoError::Encode(format!("output {i}: blinded value on the plain ledger"))
                    })?;
                    match out.asset {
                        Asset::Explicit(a) if a == AssetId::DEFAULT => Ok(BitcoinOutput {
                            value,
                            script_pubkey: out.script_pubkey.clone(),
                        }),
                        _ => Err(CryptoError::Encode(format!(
                            "output {i}: assets are not supported on the plain ledger"
                        ))),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            let wire = BitcoinTx {
                version: tx.version,
                lock_time: tx.lock_time,
                inputs,
                outputs,
            };
            let body = bincode::encode_to_vec(&wire, config)
                .map_err(|e| CryptoError::Encode(e.to_string()))?;
            (BITCOIN_FORMAT, body)
        }
        LedgerKind::Elements => {
            let outputs = tx
                .outputs
                .iter()
                .map(|out| ElementsOutput {
                    asset: match &out.asset {
                        Asset::Explicit(a) => WireAsset::Explicit(*a),
                        Asset::Confidential(c) => WireAsset::Confidential(c.clone()),
                    },
                    value: match &out.value {
                        Value::Explicit(v) => WireValue::Explicit(*v),
                        Value::Confidential(c) => WireValue::Confidential(c.clone()),
                    },
                    nonce: out.nonce.clone(),
                    script_pubkey: out.script_pubkey.clone(),
                })
                .collect();
            let wire = ElementsTx {
                version: tx.version,
                lock_time: tx.lock_time,
                inputs,
                outputs,
            };
            let body = bincode::encode_to_vec(&wire, config)
                .map_err(|e| CryptoError::Encode(e.to_string()))?;
            (ELEMENTS_FORMAT, body)
        }
    };
    let mut bytes = Vec::with_capacity(1 + body.len());
    bytes.push(tag);
    bytes.extend_from_slice(&body);
    Ok(hex::encode(bytes))
}

fn decode_body<T: bincode::Decode<()>>(body: &[u8]) -> Result<T, CryptoError> {
    if body.len() > MAX_DECODE_BYTES {
        return Err(CryptoError::Decode(format!(
            "transaction of {} bytes exceeds {MAX_DECODE_BYTES}",
            body.len()
        )));
    }
    let config = bincode::config::standard().with_limit::<MAX_DECODE_BYTES>();
    let (wire, read) = bincode::decode_from_slice(body, config)
        .map_err(|e| CryptoError::Decode(e.to_string()))?;
    if read != body.len() {
        return Err(CryptoError::Decode(format!(
            "{} trailing bytes",
            body.len() - read
        )));
    }
    Ok(wire)
}

/// Parse a hex transaction in the wire format of `ledger`.
pub fn decode(hex_tx: &str, ledger: LedgerKind) -> Result<Transaction, CryptoError> {
    let bytes = hex::decode(hex_tx.trim()).map_err(|e| CryptoError::Decode(format!("hex: {e}")))?;
    let (&tag, body) = bytes
        .split_first()
        .ok_or_else(|| CryptoError::Decode("empty transaction".into()))?;
    match (ledger, tag) {
        (LedgerKind::Bitcoin, BITCOIN_FORMAT) => {
            let wire: BitcoinTx = decode_body(body)?;
            Ok(Transaction {
                version: wire.version,
                lock_time: wire.lock_time,
                inputs: wire.inputs.into_iter().map(TxIn::from).collect(),
                outputs: wire
                    .outputs
                    .into_iter()
                    .map(|o| TxOut::explicit(AssetId::DEFAULT, o.value, o.script_pubkey))
                    .collect(),
            })
        }
        (LedgerKind::Elements, ELEMENTS_FORMAT) => {
            let wire: ElementsTx = decode_body(body)?;
            Ok(Transaction {
                version: wire.version,
                lock_time: wire.lock_time,
                inputs: wire.inputs.into_iter().map(TxIn::from).collect(),
                outputs: wire
                    .outputs
                    .into_iter()
                    .map(|o| TxOut {
                        asset: match o.asset {
                            WireAsset::Explicit(a) => Asset::Explicit(a),
                            WireAsset::Confidential(c) => Asset::Confidential(c),
                        },
                        value: match o.value {
                            WireValue::Explicit(v) => Value::Explicit(v),
                            WireValue::Confidential(c) => Value::Confidential(c),
                        },
                        nonce: o.nonce,
                        script_pubkey: o.script_pubkey,
                    })
                    .collect(),
            })
        }
        (ledger, tag) => Err(CryptoError::Decode(format!(
            "format tag {tag:#04x} is not a {ledger:?} transaction"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::types::Hash256;
    use proptest::prelude::*;

    fn sample(asset: AssetId) -> Transaction {
        let mut input = TxIn::unsigned(OutPoint::new(Hash256([4; 32]), 2), 0xfffffffd);
        input.witness = vec![vec![1; 65], vec![2; 32]];
        Transaction {
            version: 2,
            lock_time: 77,
            inputs: vec![input],
            outputs: vec![
                TxOut::explicit(asset, 10_000, vec![0x03; 33]),
                TxOut::explicit(asset, 2_500, vec![0x01; 33]),
            ],
        }
    }

    #[test]
    fn bitcoin_roundtrip() {
        let tx = sample(AssetId::DEFAULT);
        let hex = encode(&tx, LedgerKind::Bitcoin).unwrap();
        assert_eq!(decode(&hex, LedgerKind::Bitcoin).unwrap(), tx);
    }

    #[test]
    fn elements_roundtrip_with_blinded_and_fee_outputs() {
        let asset = AssetId(Hash256([9; 32]));
        let mut tx = sample(asset);
        tx.outputs[1] = TxOut {
            asset: Asset::Confidential(vec![0xaa; 40]),
            value: Value::Confidential(vec![0xbb; 16]),
            nonce: vec![0xcc; 32],
            script_pubkey: vec![0x03; 33],
        };
        tx.outputs.push(TxOut::fee(asset, 300));
        let hex = encode(&tx, LedgerKind::Elements).unwrap();
        assert_eq!(decode(&hex, LedgerKind::Elements).unwrap(), tx);
    }

    #[test]
    fn plain_ledger_rejects_assets_and_blinding() {
        let tx = sample(AssetId(Hash256([9; 32])));
        assert!(matches!(encode(&tx, LedgerKind::Bitcoin), Err(CryptoError::Encode(_))));

        let mut blinded = sample(AssetId::DEFAULT);
        blinded.outputs[0].value = Value::Confidential(vec![1; 16]);
        assert!(matches!(encode(&blinded, LedgerKind::Bitcoin), Err(CryptoError::Encode(_))));
    }

    #[test]
    fn decode_dispatches_on_ledger_kind() {
        let tx = sample(AssetId::DEFAULT);
        let btc = encode(&tx, LedgerKind::Bitcoin).unwrap();
        let elements = encode(&tx, LedgerKind::Elements).unwrap();
        assert!(matches!(decode(&btc, LedgerKind::Elements), Err(CryptoError::Decode(_))));
        assert!(matches!(decode(&elements, LedgerKind::Bitcoin), Err(CryptoError::Decode(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("", LedgerKind::Bitcoin).is_err());
        assert!(decode("zz", LedgerKind::Bitcoin).is_err());
        assert!(decode("01ff", LedgerKind::Bitcoin).is_err());
        let mut hex = encode(&sample(AssetId::DEFAULT), LedgerKind::Bitcoin).unwrap();
        hex.push_str("00");
        assert!(decode(&hex, LedgerKind::Bitcoin).is_err());
    }

    #[test]
    fn decode_rejects_huge_length_prefixes() {
        // Input count prefix claiming ~2^62 entries.
        let mut plain = vec![BITCOIN_FORMAT, 2, 0, 0xfd];
        plain.extend_from_slice(&(u64::MAX / 4).to_le_bytes());
        assert!(matches!(
            decode(&hex::encode(&plain), LedgerKind::Bitcoin),
            Err(CryptoError::Decode(_))
        ));

        // One input, then a script_sig length far beyond the buffer.
        let mut elements = vec![ELEMENTS_FORMAT, 2, 0, 1];
        elements.extend_from_slice(&[7; 32]);
        elements.push(0);
        elements.push(0xfd);
        elements.extend_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(
            decode(&hex::encode(&elements), LedgerKind::Elements),
            Err(CryptoError::Decode(_))
        ));
    }

    #[test]
    fn decode_rejects_oversized_body() {
        let mut bytes = vec![BITCOIN_FORMAT];
        bytes.resize(MAX_DECODE_BYTES + 2, 0);
        assert!(matches!(
            decode(&hex::encode(&bytes), LedgerKind::Bitcoin),
            Err(CryptoError::Decode(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn elements_codec_roundtrip(
            version in any::<u32>(),
            lock_time in any::<u32>(),
            amounts in proptest::collection::vec(any::<u64>(), 0..6),
            vouts in proptest::collection::vec(any::<u32>(), 0..6),
        ) {
            let tx = Transaction {
                version,
                lock_time,
                inputs: vouts.iter().map(|v| TxIn::unsigned(OutPoint::new(Hash256([3; 32]), *v), *v)).collect(),
                outputs: amounts.iter().map(|a| TxOut::explicit(AssetId(Hash256([1; 32])), *a, vec![0x03; 33])).collect(),
            };
            let hex = encode(&tx, LedgerKind::Elements).unwrap();
            prop_assert_eq!(decode(&hex, LedgerKind::Elements).unwrap(), tx);
        }
    }
}
