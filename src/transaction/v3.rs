/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Version 3 transactions.
//!
//! A v3 transaction optionally carries a `data` payload whose meaning is given by `dataType`:
//! `message`, `call`, `deploy`, or `patch`. Patch transactions form the patch group of a block; all
//! others are normal. (`dsr` payloads are parsed as [`DoubleSignReportTx`](super::double_sign::DoubleSignReportTx)
//! instead.)
//!
//! ## Forms
//!
//! A v3 transaction is received either as a JSON object or in binary form: [`BINARY_TAG`] followed by
//! the borsh encoding of [`TransactionV3Data`]. Either way its ID is the hash of its JSON projection,
//! so the two forms of the same transaction share an ID. [`bytes`](TransactionInfo::bytes) returns
//! the form the transaction was received in.

use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::{json, Map, Value};
use typed_builder::TypedBuilder;

use crate::types::{
    crypto_primitives::Keypair,
    data_types::{hex_int, Address, CryptoHash, NetworkID},
};

use super::{
    field_address, field_i64, field_str, field_u128, optional_u128,
    serialize::{encode_signature, transaction_hash, verify_encoded_signature},
    BinaryHeader, TransactionContext, TransactionError, TransactionGroup, TransactionInfo,
    BINARY_TAG,
};

pub const VERSION: u16 = 3;

/// Data types accepted by [`TransactionV3`].
pub const DATA_TYPES: [&str; 4] = ["message", "call", "deploy", "patch"];

/// The fields of a v3 transaction, in the order of its binary form.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionV3Data {
    pub version: u16,
    pub data_type: Option<String>,
    pub from: Address,
    pub to: Address,
    pub value: Option<u128>,
    pub step_limit: u128,
    pub timestamp: i64,
    pub nid: Option<NetworkID>,
    pub nonce: Option<u128>,
    /// JSON text of the `data` field.
    pub data: Option<String>,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionV3 {
    data: TransactionV3Data,
    id: CryptoHash,
    /// The JSON text this transaction was parsed from, if it was received as JSON.
    json: Option<Vec<u8>>,
}

/// Parameters of a new transaction for [`TransactionV3Params::sign`].
#[derive(TypedBuilder)]
pub struct TransactionV3Params {
    to: Address,
    #[builder(default, setter(strip_option))]
    value: Option<u128>,
    step_limit: u128,
    timestamp: i64,
    #[builder(default, setter(strip_option))]
    nid: Option<NetworkID>,
    #[builder(default, setter(strip_option))]
    nonce: Option<u128>,
    #[builder(default, setter(strip_option, into))]
    data_type: Option<String>,
    #[builder(default, setter(strip_option))]
    data: Option<Value>,
}

impl TransactionV3Params {
    /// Sign the transaction with `keypair`. The result is in binary form if `binary` is set and in
    /// JSON form otherwise.
    pub fn sign(self, keypair: &Keypair, binary: bool) -> Result<TransactionV3, TransactionError> {
        let mut data = TransactionV3Data {
            version: VERSION,
            data_type: self.data_type,
            from: keypair.address(),
            to: self.to,
            value: self.value,
            step_limit: self.step_limit,
            timestamp: self.timestamp,
            nid: self.nid,
            nonce: self.nonce,
            data: self.data.map(|value| value.to_string()),
            signature: String::new(),
        };
        let id = transaction_hash(&json_fields(&data)?)?;
        data.signature = encode_signature(keypair, &id);
        if binary {
            Ok(TransactionV3 {
                data,
                id,
                json: None,
            })
        } else {
            let text = serde_json::to_vec(&Value::Object(json_fields(&data)?))
                .map_err(|err| TransactionError::InvalidFormat(err.to_string()))?;
            Ok(TransactionV3 {
                data,
                id,
                json: Some(text),
            })
        }
    }
}

fn json_fields(data: &TransactionV3Data) -> Result<Map<String, Value>, TransactionError> {
    let mut fields = Map::new();
    fields.insert("version".into(), json!(hex_int(data.version)));
    fields.insert("from".into(), json!(data.from.to_string()));
    fields.insert("to".into(), json!(data.to.to_string()));
    if let Some(value) = data.value {
        fields.insert("value".into(), json!(format!("{:#x}", value)));
    }
    fields.insert("stepLimit".into(), json!(format!("{:#x}", data.step_limit)));
    fields.insert("timestamp".into(), json!(hex_int(data.timestamp)));
    if let Some(nid) = data.nid {
        fields.insert("nid".into(), json!(nid.to_string()));
    }
    if let Some(nonce) = data.nonce {
        fields.insert("nonce".into(), json!(format!("{:#x}", nonce)));
    }
    if let Some(data_type) = &data.data_type {
        fields.insert("dataType".into(), json!(data_type));
    }
    if let Some(text) = &data.data {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| TransactionError::InvalidFormat(err.to_string()))?;
        fields.insert("data".into(), value);
    }
    if !data.signature.is_empty() {
        fields.insert("signature".into(), json!(data.signature));
    }
    Ok(fields)
}

fn check_data_type(data_type: &Option<String>) -> Result<(), TransactionError> {
    match data_type {
        Some(data_type) if !DATA_TYPES.contains(&data_type.as_str()) => Err(
            TransactionError::InvalidFormat(format!("unknown data type {}", data_type)),
        ),
        _ => Ok(()),
    }
}

impl TransactionV3 {
    /// Check whether `fields` is the JSON form of a v3 transaction.
    pub fn is_v3_json(fields: &Map<String, Value>) -> bool {
        fields.get("version").and_then(Value::as_str) == Some("0x3")
            && fields.get("dataType").and_then(Value::as_str) != Some("dsr")
    }

    /// Check whether `bytes` is the binary form of a v3 transaction.
    pub fn is_v3_binary(bytes: &[u8]) -> bool {
        matches!(BinaryHeader::peek(bytes),
            Some(header) if header.version == VERSION && header.data_type.as_deref() != Some("dsr"))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<TransactionV3, TransactionError> {
        let fields = match serde_json::from_slice(bytes) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                return Err(TransactionError::InvalidFormat(
                    "transaction is not a JSON object".to_string(),
                ))
            }
            Err(err) => return Err(TransactionError::InvalidFormat(err.to_string())),
        };
        if !Self::is_v3_json(&fields) {
            return Err(TransactionError::InvalidVersion(
                "object is not a version 3 transaction".to_string(),
            ));
        }

        let data_type = match fields.get("dataType") {
            None | Some(Value::Null) => None,
            Some(_) => Some(field_str(&fields, "dataType")?.to_string()),
        };
        check_data_type(&data_type)?;
        let nid = optional_u128(&fields, "nid")?
            .map(|nid| {
                u32::try_from(nid)
                    .map(NetworkID::new)
                    .map_err(|_| TransactionError::InvalidValue("nid overflows".to_string()))
            })
            .transpose()?;
        let data = TransactionV3Data {
            version: VERSION,
            data_type,
            from: field_address(&fields, "from")?,
            to: field_address(&fields, "to")?,
            value: optional_u128(&fields, "value")?,
            step_limit: field_u128(&fields, "stepLimit")?,
            timestamp: field_i64(&fields, "timestamp")?,
            nid,
            nonce: optional_u128(&fields, "nonce")?,
            data: fields.get("data").map(Value::to_string),
            signature: field_str(&fields, "signature")?.to_string(),
        };
        Ok(TransactionV3 {
            id: transaction_hash(&fields)?,
            data,
            json: Some(bytes.to_vec()),
        })
    }

    pub fn from_binary(bytes: &[u8]) -> Result<TransactionV3, TransactionError> {
        let body = match bytes.split_first() {
            Some((&BINARY_TAG, body)) => body,
            _ => {
                return Err(TransactionError::InvalidFormat(
                    "missing binary transaction tag".to_string(),
                ))
            }
        };
        let data = TransactionV3Data::try_from_slice(body)
            .map_err(|err| TransactionError::InvalidFormat(err.to_string()))?;
        if data.version != VERSION {
            return Err(TransactionError::InvalidVersion(format!(
                "binary transaction has version {}",
                data.version
            )));
        }
        check_data_type(&data.data_type)?;
        Ok(TransactionV3 {
            id: transaction_hash(&json_fields(&data)?)?,
            data,
            json: None,
        })
    }

    pub fn data(&self) -> &TransactionV3Data {
        &self.data
    }

    pub fn step_limit(&self) -> u128 {
        self.data.step_limit
    }

    pub fn value(&self) -> u128 {
        self.data.value.unwrap_or(0)
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data.data_type.as_deref()
    }

    /// Get the `data` payload.
    pub fn payload(&self) -> Option<Value> {
        self.data
            .data
            .as_deref()
            .and_then(|text| serde_json::from_str(text).ok())
    }

    /// Get the binary form of this transaction, whatever form it was received in.
    pub fn binary_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![BINARY_TAG];
        bytes.extend(self.data.try_to_vec().unwrap());
        bytes
    }
}

impl TransactionInfo for TransactionV3 {
    fn id(&self) -> CryptoHash {
        self.id
    }

    fn bytes(&self) -> Vec<u8> {
        match &self.json {
            Some(text) => text.clone(),
            None => self.binary_bytes(),
        }
    }

    fn verify(&self) -> Result<(), TransactionError> {
        let signer = verify_encoded_signature(&self.data.signature, &self.id)?;
        if signer != self.data.from {
            return Err(TransactionError::InvalidSignature(format!(
                "signed by {} but sent from {}",
                signer, self.data.from
            )));
        }
        Ok(())
    }

    fn pre_validate(&self, ctx: &dyn TransactionContext) -> Result<(), TransactionError> {
        if self.group() == TransactionGroup::Patch {
            return Ok(());
        }

        let minimum = ctx.minimum_step();
        if self.data.step_limit < minimum {
            return Err(TransactionError::OutOfStep {
                step_limit: self.data.step_limit,
                minimum,
            });
        }

        let required = self
            .data
            .step_limit
            .saturating_mul(ctx.step_price())
            .saturating_add(self.value());
        let balance = ctx.balance(&self.data.from);
        if balance < required {
            return Err(TransactionError::OutOfBalance { balance, required });
        }
        Ok(())
    }

    fn group(&self) -> TransactionGroup {
        if self.data_type() == Some("patch") {
            TransactionGroup::Patch
        } else {
            TransactionGroup::Normal
        }
    }

    fn version(&self) -> u16 {
        self.data.version
    }

    fn timestamp(&self) -> i64 {
        self.data.timestamp
    }

    fn nonce(&self) -> Option<u128> {
        self.data.nonce
    }

    fn from(&self) -> Address {
        self.data.from
    }

    fn to(&self) -> Address {
        self.data.to
    }

    /// A transaction without `nid` is valid on every network.
    fn validate_network(&self, network_id: NetworkID) -> bool {
        self.data.nid.map_or(true, |nid| nid == network_id)
    }

    fn to_json(&self) -> Value {
        let mut fields = json_fields(&self.data).unwrap_or_default();
        fields.insert("txHash".into(), json!(self.id.to_hex()));
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;

    struct Ctx {
        balance: u128,
    }

    impl TransactionContext for Ctx {
        fn network_id(&self) -> NetworkID {
            NetworkID::new(1)
        }
        fn revision(&self) -> crate::types::revision::Revision {
            crate::types::revision::Revision::LATEST
        }
        fn step_price(&self) -> u128 {
            10
        }
        fn minimum_step(&self) -> u128 {
            100
        }
        fn balance(&self, _address: &Address) -> u128 {
            self.balance
        }
    }

    fn params(step_limit: u128) -> TransactionV3Params {
        TransactionV3Params::builder()
            .to(Address::account([2u8; 20]))
            .value(5)
            .step_limit(step_limit)
            .timestamp(1_700_000_000_000_000)
            .nid(NetworkID::new(1))
            .data_type("call")
            .data(json!({"method": "transfer", "params": {"amount": "0x1"}}))
            .build()
    }

    #[test]
    fn json_and_binary_forms_share_an_id() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let json_tx = params(1000).sign(&keypair, false).unwrap();
        let binary_tx = params(1000).sign(&keypair, true).unwrap();
        assert_eq!(json_tx.id(), binary_tx.id());

        let parsed_json = TransactionV3::from_json_bytes(&json_tx.bytes()).unwrap();
        let parsed_binary = TransactionV3::from_binary(&binary_tx.bytes()).unwrap();
        assert_eq!(parsed_json.id(), parsed_binary.id());
        assert!(parsed_json.verify().is_ok());
        assert!(parsed_binary.verify().is_ok());
        assert!(TransactionV3::is_v3_binary(&binary_tx.bytes()));
    }

    #[test]
    fn pre_validation_checks_steps_and_balance() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let tx = params(50).sign(&keypair, false).unwrap();
        assert!(matches!(
            tx.pre_validate(&Ctx { balance: u128::MAX }),
            Err(TransactionError::OutOfStep { .. })
        ));

        let tx = params(1000).sign(&keypair, false).unwrap();
        assert!(matches!(
            tx.pre_validate(&Ctx { balance: 10_004 }),
            Err(TransactionError::OutOfBalance {
                balance: 10_004,
                required: 10_005
            })
        ));
        assert!(tx.pre_validate(&Ctx { balance: 10_005 }).is_ok());
    }

    #[test]
    fn patch_data_type_selects_patch_group() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let tx = TransactionV3Params::builder()
            .to(Address::system())
            .step_limit(0)
            .timestamp(1)
            .data_type("patch")
            .build()
            .sign(&keypair, true)
            .unwrap();
        assert_eq!(tx.group(), TransactionGroup::Patch);
        assert!(tx.pre_validate(&Ctx { balance: 0 }).is_ok());
    }
}
