/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Double-sign reports: evidence that a validator signed two conflicting messages.
//!
//! A report carries two [`DoubleSignData`] records and a [`DoubleSignContext`] that resolves the
//! raw signer bytes of the records to an address. The report itself is unsigned: each record carries
//! the equivocator's own signature, so the evidence authenticates itself.
//!
//! Reports are patch transactions. They are accepted only at revisions that enable
//! [`DOUBLE_SIGN_REPORT`](crate::types::revision::Revision::DOUBLE_SIGN_REPORT).
//!
//! The JSON projection is:
//!
//! ```text
//! {"version": "0x3", "nid": "0x1", "timestamp": "0x..", "dataType": "dsr",
//!  "data": {"context": "0x..", "data": ["0x..", "0x.."], "type": "vote"}, "txHash": "0x.."}
//! ```

use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::{json, Map, Value};

use crate::types::{
    crypto_primitives::{verify_signature, Keypair, VerifyingKey},
    data_types::{hex_int, Address, BlockHeight, CryptoHash, NetworkID, SignatureBytes},
    validator_list::ValidatorList,
};

use super::{
    field_i64, field_str, field_u128, serialize::transaction_hash, BinaryHeader,
    TransactionContext, TransactionError, TransactionGroup, TransactionInfo, BINARY_TAG,
};

pub const DATA_TYPE: &str = "dsr";

/// Kind of message a double-sign record is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum DoubleSignDataType {
    Vote,
    Proposal,
}

impl DoubleSignDataType {
    pub fn name(&self) -> &'static str {
        match self {
            DoubleSignDataType::Vote => "vote",
            DoubleSignDataType::Proposal => "proposal",
        }
    }
}

impl FromStr for DoubleSignDataType {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vote" => Ok(DoubleSignDataType::Vote),
            "proposal" => Ok(DoubleSignDataType::Proposal),
            other => Err(TransactionError::InvalidFormat(format!(
                "unknown double sign data type {}",
                other
            ))),
        }
    }
}

/// One signed consensus message.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DoubleSignData {
    pub data_type: DoubleSignDataType,
    pub network_id: NetworkID,
    pub height: BlockHeight,
    pub round: u32,
    /// The block voted for or proposed. `None` is a nil vote.
    pub block_id: Option<CryptoHash>,
    /// The signer's verifying key.
    pub signer: [u8; 32],
    pub signature: SignatureBytes,
}

impl DoubleSignData {
    /// Sign a record with `keypair`.
    pub fn new(
        keypair: &Keypair,
        data_type: DoubleSignDataType,
        network_id: NetworkID,
        height: BlockHeight,
        round: u32,
        block_id: Option<CryptoHash>,
    ) -> DoubleSignData {
        let mut data = DoubleSignData {
            data_type,
            network_id,
            height,
            round,
            block_id,
            signer: keypair.public().to_bytes(),
            signature: SignatureBytes::new([0u8; 64]),
        };
        data.signature = keypair.sign(&data.message_bytes());
        data
    }

    /// Get the bytes the signature covers: every field but the signature.
    pub fn message_bytes(&self) -> Vec<u8> {
        (
            self.data_type,
            self.network_id,
            self.height,
            self.round,
            self.block_id,
            self.signer,
        )
            .try_to_vec()
            .unwrap()
    }

    pub fn verify_signature(&self) -> bool {
        match VerifyingKey::from_bytes(&self.signer) {
            Ok(key) => verify_signature(&key, &self.message_bytes(), &self.signature),
            Err(_) => false,
        }
    }

    pub fn validate_network(&self, network_id: NetworkID) -> bool {
        self.network_id == network_id
    }

    /// Check whether `self` and `other` are two different messages that the same signer may sign
    /// only one of.
    pub fn is_conflict_with(&self, other: &DoubleSignData) -> bool {
        self.data_type == other.data_type
            && self.network_id == other.network_id
            && self.height == other.height
            && self.round == other.round
            && self.signer == other.signer
            && self.block_id != other.block_id
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DoubleSignData, TransactionError> {
        DoubleSignData::try_from_slice(bytes)
            .map_err(|err| TransactionError::InvalidFormat(format!("double sign data: {}", err)))
    }
}

/// Resolves the signer of a double-sign record to an address: the validator list in force at the
/// height of the records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoubleSignContext(ValidatorList);

impl DoubleSignContext {
    pub fn new(validators: ValidatorList) -> DoubleSignContext {
        DoubleSignContext(validators)
    }

    pub fn address_of(&self, signer: &[u8]) -> Option<Address> {
        self.0.address_of(signer)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DoubleSignContext, TransactionError> {
        ValidatorList::from_bytes(bytes)
            .map(DoubleSignContext)
            .map_err(|err| TransactionError::InvalidFormat(format!("double sign context: {:?}", err)))
    }
}

/// Fields of a double-sign report, in the order of its binary form.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct ReportData {
    version: u16,
    data_type: Option<String>,
    nid: NetworkID,
    timestamp: i64,
    ds_type: DoubleSignDataType,
    records: Vec<Vec<u8>>,
    context: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoubleSignReportTx {
    data: ReportData,
    id: CryptoHash,
    json: Option<Vec<u8>>,
}

fn hex_bytes(bytes: &[u8]) -> Value {
    json!(format!("0x{}", hex::encode(bytes)))
}

fn parse_hex_bytes(value: &Value) -> Result<Vec<u8>, TransactionError> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix("0x"))
        .and_then(|s| hex::decode(s).ok())
        .ok_or_else(|| TransactionError::InvalidFormat(format!("{} is not hex bytes", value)))
}

fn json_fields(data: &ReportData) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("version".into(), json!(hex_int(data.version)));
    fields.insert("nid".into(), json!(data.nid.to_string()));
    fields.insert("timestamp".into(), json!(hex_int(data.timestamp)));
    fields.insert("dataType".into(), json!(DATA_TYPE));
    fields.insert(
        "data".into(),
        json!({
            "context": hex_bytes(&data.context),
            "data": data.records.iter().map(|record| hex_bytes(record)).collect::<Vec<Value>>(),
            "type": data.ds_type.name(),
        }),
    );
    fields
}

impl DoubleSignReportTx {
    /// Build a report of the conflicting `records`.
    pub fn new(
        network_id: NetworkID,
        timestamp: i64,
        records: [&DoubleSignData; 2],
        context: &DoubleSignContext,
    ) -> Result<DoubleSignReportTx, TransactionError> {
        let data = ReportData {
            version: 3,
            data_type: Some(DATA_TYPE.to_string()),
            nid: network_id,
            timestamp,
            ds_type: records[0].data_type,
            records: records.iter().map(|record| record.bytes()).collect(),
            context: context.bytes(),
        };
        Ok(DoubleSignReportTx {
            id: transaction_hash(&json_fields(&data))?,
            data,
            json: None,
        })
    }

    pub fn is_dsr_json(fields: &Map<String, Value>) -> bool {
        fields.get("version").and_then(Value::as_str) == Some("0x3")
            && fields.get("dataType").and_then(Value::as_str) == Some(DATA_TYPE)
    }

    pub fn is_dsr_binary(bytes: &[u8]) -> bool {
        matches!(BinaryHeader::peek(bytes),
            Some(header) if header.version == 3 && header.data_type.as_deref() == Some(DATA_TYPE))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<DoubleSignReportTx, TransactionError> {
        let fields = match serde_json::from_slice(bytes) {
            Ok(Value::Object(fields)) => fields,
            _ => {
                return Err(TransactionError::InvalidFormat(
                    "double sign report is not a JSON object".to_string(),
                ))
            }
        };
        if !Self::is_dsr_json(&fields) {
            return Err(TransactionError::InvalidVersion(
                "object is not a double sign report".to_string(),
            ));
        }
        let payload = fields
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| TransactionError::InvalidFormat("missing data".to_string()))?;
        let records = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| TransactionError::InvalidFormat("missing data.data".to_string()))?
            .iter()
            .map(parse_hex_bytes)
            .collect::<Result<Vec<Vec<u8>>, TransactionError>>()?;
        let context = parse_hex_bytes(
            payload
                .get("context")
                .ok_or_else(|| TransactionError::InvalidFormat("missing data.context".to_string()))?,
        )?;
        let nid = u32::try_from(field_u128(&fields, "nid")?)
            .map_err(|_| TransactionError::InvalidValue("nid overflows".to_string()))?;

        let data = ReportData {
            version: 3,
            data_type: Some(DATA_TYPE.to_string()),
            nid: NetworkID::new(nid),
            timestamp: field_i64(&fields, "timestamp")?,
            ds_type: field_str(payload, "type")?.parse()?,
            records,
            context,
        };
        Ok(DoubleSignReportTx {
            id: transaction_hash(&fields)?,
            data,
            json: Some(bytes.to_vec()),
        })
    }

    pub fn from_binary(bytes: &[u8]) -> Result<DoubleSignReportTx, TransactionError> {
        let body = match bytes.split_first() {
            Some((&BINARY_TAG, body)) => body,
            _ => {
                return Err(TransactionError::InvalidFormat(
                    "missing binary transaction tag".to_string(),
                ))
            }
        };
        let data = ReportData::try_from_slice(body)
            .map_err(|err| TransactionError::InvalidFormat(err.to_string()))?;
        Ok(DoubleSignReportTx {
            id: transaction_hash(&json_fields(&data))?,
            data,
            json: None,
        })
    }

    pub fn data_type(&self) -> DoubleSignDataType {
        self.data.ds_type
    }

    /// Decode both records.
    pub fn records(&self) -> Result<Vec<DoubleSignData>, TransactionError> {
        self.data
            .records
            .iter()
            .map(|bytes| DoubleSignData::from_bytes(bytes))
            .collect()
    }

    pub fn context(&self) -> Result<DoubleSignContext, TransactionError> {
        DoubleSignContext::from_bytes(&self.data.context)
    }

    /// Get the height of the equivocation and the address of the equivocator.
    pub fn double_sign_info(&self) -> Result<(BlockHeight, Address), TransactionError> {
        let records = self.records()?;
        let first = records
            .first()
            .ok_or_else(|| TransactionError::InvalidFormat("report has no records".to_string()))?;
        let address = self.context()?.address_of(&first.signer).ok_or_else(|| {
            TransactionError::InvalidValue(format!(
                "signer 0x{} is not in the context",
                hex::encode(first.signer)
            ))
        })?;
        Ok((first.height, address))
    }
}

impl TransactionInfo for DoubleSignReportTx {
    fn id(&self) -> CryptoHash {
        self.id
    }

    fn bytes(&self) -> Vec<u8> {
        match &self.json {
            Some(text) => text.clone(),
            None => {
                let mut bytes = vec![BINARY_TAG];
                bytes.extend(self.data.try_to_vec().unwrap());
                bytes
            }
        }
    }

    fn verify(&self) -> Result<(), TransactionError> {
        let records = self.records()?;
        if records.len() != 2 {
            return Err(TransactionError::InvalidFormat(format!(
                "report carries {} records instead of 2",
                records.len()
            )));
        }
        for record in records.iter() {
            if record.data_type != self.data.ds_type {
                return Err(TransactionError::InvalidFormat(format!(
                    "record of type {} in a {} report",
                    record.data_type.name(),
                    self.data.ds_type.name()
                )));
            }
            if !record.verify_signature() {
                return Err(TransactionError::InvalidSignature(
                    "double sign record has a bad signature".to_string(),
                ));
            }
        }
        if !records[0].is_conflict_with(&records[1]) {
            return Err(TransactionError::InvalidValue(
                "records do not conflict".to_string(),
            ));
        }
        Ok(())
    }

    fn pre_validate(&self, ctx: &dyn TransactionContext) -> Result<(), TransactionError> {
        if !ctx.revision().double_sign_report_enabled() {
            return Err(TransactionError::Disabled(format!(
                "double sign reports are disabled at revision {:#x}",
                ctx.revision().flags()
            )));
        }
        let records = self.records()?;
        if records
            .iter()
            .any(|record| !record.validate_network(ctx.network_id()))
        {
            return Err(TransactionError::InvalidValue(
                "record is not for this network".to_string(),
            ));
        }
        if records.len() != 2 || !records[0].is_conflict_with(&records[1]) {
            return Err(TransactionError::InvalidValue(
                "records do not conflict".to_string(),
            ));
        }
        self.double_sign_info().map(|_| ())
    }

    fn group(&self) -> TransactionGroup {
        TransactionGroup::Patch
    }

    fn version(&self) -> u16 {
        self.data.version
    }

    fn timestamp(&self) -> i64 {
        self.data.timestamp
    }

    fn nonce(&self) -> Option<u128> {
        None
    }

    fn from(&self) -> Address {
        Address::system()
    }

    fn to(&self) -> Address {
        Address::system()
    }

    fn validate_network(&self, network_id: NetworkID) -> bool {
        self.data.nid == network_id
    }

    fn to_json(&self) -> Value {
        let mut fields = json_fields(&self.data);
        fields.insert("txHash".into(), json!(self.id.to_hex()));
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;

    fn conflicting(keypair: &Keypair) -> (DoubleSignData, DoubleSignData) {
        let vote = |id: u8| {
            DoubleSignData::new(
                keypair,
                DoubleSignDataType::Vote,
                NetworkID::new(1),
                BlockHeight::new(100),
                0,
                Some(CryptoHash::new([id; 32])),
            )
        };
        (vote(1), vote(2))
    }

    #[test]
    fn conflicting_votes_form_a_valid_report() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let (a, b) = conflicting(&keypair);
        assert!(a.verify_signature());
        assert!(a.is_conflict_with(&b));
        assert!(!a.is_conflict_with(&a));

        let context = DoubleSignContext::new(ValidatorList::new(vec![keypair.public()]));
        let report = DoubleSignReportTx::new(NetworkID::new(1), 5, [&a, &b], &context).unwrap();
        assert!(report.verify().is_ok());
        assert_eq!(
            report.double_sign_info().unwrap(),
            (BlockHeight::new(100), keypair.address())
        );

        let json_bytes = serde_json::to_vec(&report.to_json()).unwrap();
        let parsed = DoubleSignReportTx::from_json_bytes(&json_bytes).unwrap();
        assert_eq!(parsed.id(), report.id());
        assert!(DoubleSignReportTx::is_dsr_binary(&report.bytes()));
    }

    #[test]
    fn tampered_record_fails_verification() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let (a, mut b) = conflicting(&keypair);
        b.round = 1;
        let context = DoubleSignContext::new(ValidatorList::new(vec![keypair.public()]));
        let report = DoubleSignReportTx::new(NetworkID::new(1), 5, [&a, &b], &context).unwrap();
        assert!(matches!(
            report.verify(),
            Err(TransactionError::InvalidSignature(_))
        ));
    }
}
