//! Legacy version 2 transfers.
//!
//! A v2 transaction is a JSON object without a `version` field:
//!
//! ```text
//! {"from": "hx..", "to": "hx..", "value": "0x..", "fee": "0x..", "timestamp": "0x..",
//!  "nonce": "0x..", "tx_hash": "<hex>", "signature": "<base64>"}
//! ```
//!
//! It only ever exists in JSON form. Its bytes are the JSON text it was parsed from, so that the
//! hash of a block body does not depend on how this crate would re-serialize the object.

use serde_json::{Map, Value};

use crate::types::data_types::{Address, CryptoHash, NetworkID};

use super::{
    field_address, field_i64, field_str, field_u128, optional_u128,
    serialize::{transaction_hash, verify_encoded_signature},
    TransactionContext, TransactionError, TransactionGroup, TransactionInfo,
};

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionV2 {
    raw: Vec<u8>,
    fields: Map<String, Value>,
    id: CryptoHash,
    from: Address,
    to: Address,
    value: u128,
    fee: u128,
    timestamp: i64,
    nonce: Option<u128>,
}

impl TransactionV2 {
    /// Check whether `fields` looks like a v2 transaction.
    pub fn is_v2(fields: &Map<String, Value>) -> bool {
        !fields.contains_key("version") && fields.contains_key("from")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<TransactionV2, TransactionError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| TransactionError::InvalidFormat(err.to_string()))?;
        let fields = match value {
            Value::Object(fields) => fields,
            _ => {
                return Err(TransactionError::InvalidFormat(
                    "transaction is not a JSON object".to_string(),
                ))
            }
        };
        if !Self::is_v2(&fields) {
            return Err(TransactionError::InvalidVersion(
                "object is not a version 2 transaction".to_string(),
            ));
        }

        Ok(TransactionV2 {
            raw: bytes.to_vec(),
            id: transaction_hash(&fields)?,
            from: field_address(&fields, "from")?,
            to: field_address(&fields, "to")?,
            value: field_u128(&fields, "value")?,
            fee: field_u128(&fields, "fee")?,
            timestamp: field_i64(&fields, "timestamp")?,
            nonce: optional_u128(&fields, "nonce")?,
            fields,
        })
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn fee(&self) -> u128 {
        self.fee
    }
}

impl TransactionInfo for TransactionV2 {
    fn id(&self) -> CryptoHash {
        self.id
    }

    fn bytes(&self) -> Vec<u8> {
        self.raw.clone()
    }

    fn verify(&self) -> Result<(), TransactionError> {
        if let Some(claimed) = self.fields.get("tx_hash").and_then(Value::as_str) {
            let claimed = claimed.strip_prefix("0x").unwrap_or(claimed);
            if claimed != hex::encode(self.id.bytes()) {
                return Err(TransactionError::InvalidFormat(format!(
                    "tx_hash {} does not match the computed hash {}",
                    claimed, self.id
                )));
            }
        }
        let signer = verify_encoded_signature(field_str(&self.fields, "signature")?, &self.id)?;
        if signer != self.from {
            return Err(TransactionError::InvalidSignature(format!(
                "signed by {} but sent from {}",
                signer, self.from
            )));
        }
        Ok(())
    }

    fn pre_validate(&self, ctx: &dyn TransactionContext) -> Result<(), TransactionError> {
        let required = self.value.saturating_add(self.fee);
        let balance = ctx.balance(&self.from);
        if balance < required {
            return Err(TransactionError::OutOfBalance { balance, required });
        }
        Ok(())
    }

    fn group(&self) -> TransactionGroup {
        TransactionGroup::Normal
    }

    fn version(&self) -> u16 {
        2
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn nonce(&self) -> Option<u128> {
        self.nonce
    }

    fn from(&self) -> Address {
        self.from
    }

    fn to(&self) -> Address {
        self.to
    }

    /// v2 transactions predate network IDs and are valid on every network.
    fn validate_network(&self, _network_id: NetworkID) -> bool {
        true
    }

    fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
