//! The textual serialization that transaction hashes are computed over.
//!
//! A transaction's JSON object is serialized as `icx_sendTransaction` followed by `.key.value` for
//! each field in ascending key order, skipping the signature and the hash itself. Values serialize
//! as follows:
//! - strings are written with `\`, `.`, `{`, `}`, `[`, and `]` escaped by a backslash,
//! - `null` is written as `\0`,
//! - objects are written as `{key.value.key.value}` with keys in ascending order,
//! - arrays are written as `[item.item]`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};

use crate::types::{
    crypto_primitives::{address_of, sha3_256, Keypair, VerifyingKey},
    data_types::{Address, CryptoHash, SignatureBytes},
};

use super::TransactionError;

pub const HASH_PREFIX: &str = "icx_sendTransaction";

const EXCLUDED_FIELDS: [&str; 3] = ["signature", "txHash", "tx_hash"];

fn escape(s: &str, out: &mut Vec<u8>) {
    for c in s.chars() {
        if matches!(c, '\\' | '.' | '{' | '}' | '[' | ']') {
            out.push(b'\\');
        }
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }
}

fn sorted(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), TransactionError> {
    match value {
        Value::Null => out.extend_from_slice(b"\\0"),
        Value::String(s) => escape(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b'.');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            out.push(b'{');
            for (i, (key, item)) in sorted(map).into_iter().enumerate() {
                if i > 0 {
                    out.push(b'.');
                }
                escape(key, out);
                out.push(b'.');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
        other => {
            return Err(TransactionError::InvalidFormat(format!(
                "{} cannot be serialized, only strings, objects, arrays and null can",
                other
            )))
        }
    }
    Ok(())
}

pub fn serialize_value(value: &Value) -> Result<Vec<u8>, TransactionError> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Serialize the fields of a transaction object for hashing.
pub fn serialize_transaction(fields: &Map<String, Value>) -> Result<Vec<u8>, TransactionError> {
    let mut out = HASH_PREFIX.as_bytes().to_vec();
    for (key, value) in sorted(fields) {
        if EXCLUDED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        out.push(b'.');
        out.extend_from_slice(key.as_bytes());
        out.push(b'.');
        write_value(value, &mut out)?;
    }
    Ok(out)
}

pub fn transaction_hash(fields: &Map<String, Value>) -> Result<CryptoHash, TransactionError> {
    Ok(sha3_256(&serialize_transaction(fields)?))
}

/// Sign `id` with `keypair` and encode the result as the `signature` field: base64 of the 32-byte
/// public key followed by the 64-byte signature.
pub fn encode_signature(keypair: &Keypair, id: &CryptoHash) -> String {
    let mut bytes = keypair.public().as_bytes().to_vec();
    bytes.extend_from_slice(&keypair.sign(id.as_slice()).bytes());
    STANDARD.encode(bytes)
}

/// Check a `signature` field over `id` and return the address of the signer.
pub fn verify_encoded_signature(signature: &str, id: &CryptoHash) -> Result<Address, TransactionError> {
    let invalid = |msg: &str| TransactionError::InvalidSignature(msg.to_string());
    let bytes = STANDARD
        .decode(signature)
        .map_err(|_| invalid("signature is not base64"))?;
    if bytes.len() != 96 {
        return Err(invalid("signature has the wrong length"));
    }
    let public: [u8; 32] = bytes[..32]
        .try_into()
        .map_err(|_| invalid("malformed public key"))?;
    let verifying_key =
        VerifyingKey::from_bytes(&public).map_err(|_| invalid("malformed public key"))?;
    let signature =
        SignatureBytes::from_slice(&bytes[32..]).ok_or_else(|| invalid("malformed signature"))?;
    if !crate::types::crypto_primitives::verify_signature(
        &verifying_key,
        id.as_slice(),
        &signature,
    ) {
        return Err(invalid("signature does not match"));
    }
    Ok(address_of(&verifying_key))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn nested_values_serialize_in_key_order() {
        let tx = json!({
            "version": "0x3",
            "from": "hx0000000000000000000000000000000000000001",
            "data": {"method": "transfer", "params": {"to": "hx.1", "list": ["a", null]}},
            "signature": "ignored",
            "txHash": "ignored",
        });
        let text = serialize_transaction(tx.as_object().unwrap()).unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap(),
            "icx_sendTransaction.data.{method.transfer.params.{list.[a.\\0].to.hx\\.1}}\
             .from.hx0000000000000000000000000000000000000001.version.0x3"
        );
        assert!(serialize_value(&json!(1)).is_err());
    }

    #[test]
    fn escapes_structural_characters() {
        assert_eq!(
            serialize_value(&json!("a.b{c}[d]\\")).unwrap(),
            b"a\\.b\\{c\\}\\[d\\]\\\\".to_vec()
        );
    }
}
