/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-transaction [`Receipt`].
//!
//! ## Versions
//!
//! Three versions coexist in storage. A stored receipt is a list of fields, and the number of fields
//! tells the versions apart:
//!
//! | Version | Fields | Difference to the previous version |
//! |---------|--------|------------------------------------|
//! | 1       | 8      | Event logs are stored inline. |
//! | 2       | 9      | Event logs live in a merkle trie keyed by varint index; the receipt stores its root. |
//! | 3       | 10, 11 | An extension bitmap follows, then the fee detail if the bitmap says so. The logs bloom is stored compressed. |
//!
//! A receipt starts as v1 or v2 depending on the [`Revision`], and is bumped to v3 the first time a
//! fee payment is recorded or the logs bloom is disabled.

use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::{json, Map, Value};

use crate::{
    merkle::{trie::MerkleTrie, varint, MerkleRoot},
    storage::{pluggables::EmptyStore, write_batch::ChainWriteBatch, KVGet, WriteBatch},
    types::{data_types::Address, revision::Revision},
};

use super::{event_log::EventLog, fee_detail::FeeDetail, logs_bloom::LogsBloom, ReceiptError};

const FIELDS_V1: usize = 8;
const FIELDS_V2: usize = 9;
const FIELDS_V3: usize = 10;

const EXTENSION_FEE_DETAIL: u32 = 1;
const EXTENSION_DISABLE_LOGS_BLOOM: u32 = 1 << 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReceiptVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

/// Outcome of executing a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const UNKNOWN_FAILURE: Status = Status(1);
    pub const CONTRACT_NOT_FOUND: Status = Status(2);
    pub const METHOD_NOT_FOUND: Status = Status(3);
    pub const ILLEGAL_FORMAT: Status = Status(5);
    pub const INVALID_PARAMETER: Status = Status(6);
    pub const ACCESS_DENIED: Status = Status(9);
    pub const OUT_OF_STEP: Status = Status(10);
    pub const OUT_OF_BALANCE: Status = Status(11);
    pub const TIMEOUT: Status = Status(12);
    pub const SKIP_TRANSACTION: Status = Status(14);

    pub fn is_success(&self) -> bool {
        *self == Status::SUCCESS
    }

    pub fn name(&self) -> String {
        match *self {
            Status::SUCCESS => "Success".to_string(),
            Status::UNKNOWN_FAILURE => "UnknownFailure".to_string(),
            Status::CONTRACT_NOT_FOUND => "ContractNotFound".to_string(),
            Status::METHOD_NOT_FOUND => "MethodNotFound".to_string(),
            Status::ILLEGAL_FORMAT => "IllegalFormat".to_string(),
            Status::INVALID_PARAMETER => "InvalidParameter".to_string(),
            Status::ACCESS_DENIED => "AccessDenied".to_string(),
            Status::OUT_OF_STEP => "OutOfStep".to_string(),
            Status::OUT_OF_BALANCE => "OutOfBalance".to_string(),
            Status::TIMEOUT => "Timeout".to_string(),
            Status::SKIP_TRANSACTION => "SkipTransaction".to_string(),
            Status(code) => format!("Status({})", code),
        }
    }
}

/// Result of executing one transaction. See the [module-level docs](self) for versions.
#[derive(Clone, Debug)]
pub struct Receipt {
    version: ReceiptVersion,
    revision: Revision,
    status: Status,
    to: Address,
    cumulative_step_used: u128,
    step_used: u128,
    step_price: u128,
    logs_bloom: LogsBloom,
    score_address: Option<Address>,
    fee_detail: FeeDetail,
    disable_logs_bloom: bool,

    /// All event logs for v1 receipts. For v2+ receipts, a resident copy of the logs, present if the
    /// receipt was built in this process rather than decoded from storage.
    event_logs: Vec<EventLog>,
    events_resident: bool,
    event_logs_root: MerkleRoot,

    /// Steps charged as fee, which may be less than the steps paid when virtual steps are involved.
    /// Not persisted.
    fee_steps: Option<u128>,
}

impl Receipt {
    pub fn new(revision: Revision, to: Address) -> Receipt {
        Receipt {
            version: if revision.use_mpt_on_events() {
                ReceiptVersion::V2
            } else {
                ReceiptVersion::V1
            },
            revision,
            status: Status::UNKNOWN_FAILURE,
            to,
            cumulative_step_used: 0,
            step_used: 0,
            step_price: 0,
            logs_bloom: LogsBloom::new(),
            score_address: None,
            fee_detail: FeeDetail::default(),
            disable_logs_bloom: false,
            event_logs: Vec::new(),
            events_resident: true,
            event_logs_root: None,
            fee_steps: None,
        }
    }

    /* ↓↓↓ Building ↓↓↓ */

    /// Append an event. `indexed[0]` must be the event signature.
    pub fn add_log(&mut self, address: Address, indexed: Vec<Vec<u8>>, data: Vec<Vec<u8>>) {
        if !self.disable_logs_bloom {
            self.logs_bloom.add_log(&address, &indexed, self.revision);
        }
        self.event_logs.push(EventLog::new(address, indexed, data));
    }

    /// Record that `payer` paid `steps`, of which `fee_steps` count as fee.
    pub fn add_payment(&mut self, payer: &Address, steps: u128, fee_steps: Option<u128>) {
        if self.fee_detail.add_payment(payer, steps) && self.version < ReceiptVersion::V3 {
            self.version = ReceiptVersion::V3;
        }
        if let Some(fee_steps) = fee_steps {
            self.fee_steps = Some(self.fee_steps.unwrap_or(0).saturating_add(fee_steps));
        }
    }

    pub fn disable_logs_bloom(&mut self) {
        self.disable_logs_bloom = true;
        self.logs_bloom = LogsBloom::new();
        if self.version < ReceiptVersion::V3 {
            self.version = ReceiptVersion::V3;
        }
    }

    pub fn set_cumulative_step_used(&mut self, cumulative_step_used: u128) {
        self.cumulative_step_used = cumulative_step_used;
    }

    /// Finish the receipt: record the outcome, build the event-log trie (v2+) and normalize the fee
    /// detail (v3).
    pub fn set_result(
        &mut self,
        status: Status,
        step_used: u128,
        step_price: u128,
        score_address: Option<Address>,
    ) {
        self.status = status;
        if status.is_success() && score_address.is_some() {
            self.score_address = score_address;
        }
        self.step_used = step_used;
        self.step_price = step_price;
        if self.version >= ReceiptVersion::V2 {
            self.event_logs_root = self.resident_event_trie(EmptyStore).root_hash();
        }
        if self.version >= ReceiptVersion::V3 {
            self.fee_detail.normalize();
        }
    }

    fn resident_event_trie<S: KVGet>(&self, source: S) -> MerkleTrie<S> {
        let mut trie = MerkleTrie::new(source, None);
        for (index, event) in self.event_logs.iter().enumerate() {
            trie.set(&varint(index as u64), event.bytes())
                .expect("in-memory trie over an empty source never loads a node");
        }
        trie
    }

    /// Write the nodes of the event-log trie into `wb`.
    pub fn flush<W: WriteBatch>(&self, wb: &mut ChainWriteBatch<W>) {
        if self.version >= ReceiptVersion::V2 && self.events_resident {
            self.resident_event_trie(EmptyStore).flush(wb);
        }
    }

    /* ↓↓↓ Accessors ↓↓↓ */

    pub fn version(&self) -> ReceiptVersion {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn to(&self) -> &Address {
        &self.to
    }

    pub fn cumulative_step_used(&self) -> u128 {
        self.cumulative_step_used
    }

    pub fn step_used(&self) -> u128 {
        self.step_used
    }

    pub fn step_price(&self) -> u128 {
        self.step_price
    }

    pub fn score_address(&self) -> Option<&Address> {
        self.score_address.as_ref()
    }

    pub fn logs_bloom(&self) -> &LogsBloom {
        &self.logs_bloom
    }

    pub fn logs_bloom_disabled(&self) -> bool {
        self.disable_logs_bloom
    }

    pub fn fee_detail(&self) -> &FeeDetail {
        &self.fee_detail
    }

    pub fn event_logs_root(&self) -> MerkleRoot {
        self.event_logs_root
    }

    /// Total fee, excluding virtual steps.
    pub fn fee(&self) -> u128 {
        let fee_steps = if self.fee_detail.has() {
            self.fee_steps.unwrap_or(0)
        } else {
            self.step_used
        };
        fee_steps.saturating_mul(self.step_price)
    }

    /// Fee paid by externally owned accounts.
    pub fn fee_by_eoa(&self) -> u128 {
        let steps = if self.fee_detail.has() {
            self.fee_detail.steps_paid_by_eoa()
        } else {
            self.step_used
        };
        steps.saturating_mul(self.step_price)
    }

    /* ↓↓↓ Event logs ↓↓↓ */

    /// Iterate over the event logs, reading the event-log trie from `source` if needed.
    pub fn event_log_iter<S: KVGet>(&self, source: S) -> EventLogIter<'_, S> {
        let trie = (self.version >= ReceiptVersion::V2 && !self.events_resident)
            .then(|| MerkleTrie::new(source, self.event_logs_root));
        EventLogIter {
            receipt: self,
            trie,
            index: 0,
            done: false,
        }
    }

    pub fn event_logs<S: KVGet>(&self, source: S) -> Result<Vec<EventLog>, ReceiptError> {
        self.event_log_iter(source).collect()
    }

    /// Get a merkle proof of the `index`th event against [`event_logs_root`](Self::event_logs_root).
    pub fn proof_of_event<S: KVGet>(
        &self,
        index: usize,
        source: S,
    ) -> Result<Vec<Vec<u8>>, ReceiptError> {
        if self.version < ReceiptVersion::V2 {
            return Err(ReceiptError::InvalidState(
                "v1 receipts have no event-log trie".into(),
            ));
        }
        let trie = if self.events_resident {
            self.resident_event_trie(source)
        } else {
            MerkleTrie::new(source, self.event_logs_root)
        };
        trie.proof(&varint(index as u64))?
            .ok_or_else(|| ReceiptError::NotFound(format!("event {}", index)))
    }

    /* ↓↓↓ Encoding ↓↓↓ */

    fn extension(&self) -> u32 {
        let mut extension = 0;
        if self.fee_detail.has() {
            extension |= EXTENSION_FEE_DETAIL;
        }
        if self.disable_logs_bloom {
            extension |= EXTENSION_DISABLE_LOGS_BLOOM;
        }
        extension
    }

    pub fn bytes(&self) -> Vec<u8> {
        let logs_bloom = match self.version {
            ReceiptVersion::V3 => self.logs_bloom.compressed_bytes(),
            _ => self.logs_bloom.bytes(),
        };
        let inline_logs: &[EventLog] = match self.version {
            ReceiptVersion::V1 => &self.event_logs,
            _ => &[],
        };
        let mut fields: Vec<Vec<u8>> = vec![
            self.status.try_to_vec().unwrap(),
            self.to.try_to_vec().unwrap(),
            self.cumulative_step_used.try_to_vec().unwrap(),
            self.step_used.try_to_vec().unwrap(),
            self.step_price.try_to_vec().unwrap(),
            logs_bloom,
            inline_logs.to_vec().try_to_vec().unwrap(),
            self.score_address.try_to_vec().unwrap(),
        ];
        if self.version >= ReceiptVersion::V2 {
            fields.push(self.event_logs_root.try_to_vec().unwrap());
        }
        if self.version >= ReceiptVersion::V3 {
            let extension = self.extension();
            fields.push(extension.try_to_vec().unwrap());
            if extension & EXTENSION_FEE_DETAIL != 0 {
                fields.push(self.fee_detail.try_to_vec().unwrap());
            }
        }
        fields.try_to_vec().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Receipt, ReceiptError> {
        let fields = decode_fields(bytes)?;
        let version = match fields.len() {
            FIELDS_V1 => ReceiptVersion::V1,
            FIELDS_V2 => ReceiptVersion::V2,
            n if n == FIELDS_V3 || n == FIELDS_V3 + 1 => ReceiptVersion::V3,
            n => {
                return Err(ReceiptError::InvalidFormat(format!(
                    "receipt with {} fields",
                    n
                )))
            }
        };

        let mut receipt = Receipt::new(Revision::default(), field(&fields, 1)?);
        receipt.version = version;
        receipt.status = field(&fields, 0)?;
        receipt.cumulative_step_used = field(&fields, 2)?;
        receipt.step_used = field(&fields, 3)?;
        receipt.step_price = field(&fields, 4)?;
        receipt.score_address = field(&fields, 7)?;

        if version >= ReceiptVersion::V2 {
            receipt.event_logs_root = field(&fields, 8)?;
            receipt.events_resident = false;
        } else {
            receipt.event_logs = field(&fields, 6)?;
        }

        if version >= ReceiptVersion::V3 {
            let extension: u32 = field(&fields, 9)?;
            if extension & EXTENSION_FEE_DETAIL != 0 {
                receipt.fee_detail = field(&fields, 10)?;
            }
            receipt.disable_logs_bloom = extension & EXTENSION_DISABLE_LOGS_BLOOM != 0;
            receipt.logs_bloom = LogsBloom::from_compressed_bytes(&fields[5])?;
        } else {
            receipt.logs_bloom = LogsBloom::from_bytes(&fields[5])?;
        }
        Ok(receipt)
    }

    /// Read the root of the event-log trie out of an encoded receipt without decoding the rest.
    pub fn event_logs_root_from_bytes(bytes: &[u8]) -> Result<MerkleRoot, ReceiptError> {
        let fields = decode_fields(bytes)?;
        if fields.len() < FIELDS_V2 {
            return Ok(None);
        }
        field(&fields, 8)
    }

    /* ↓↓↓ Comparison and JSON ↓↓↓ */

    fn same_data(&self, other: &Receipt) -> bool {
        self.status == other.status
            && self.to == other.to
            && self.cumulative_step_used == other.cumulative_step_used
            && self.step_used == other.step_used
            && self.step_price == other.step_price
            && self.logs_bloom == other.logs_bloom
            && self.score_address == other.score_address
            && self.disable_logs_bloom == other.disable_logs_bloom
            && self.fee_detail == other.fee_detail
    }

    /// Check that `other` records the same outcome and the same events as this receipt.
    pub fn check<S: KVGet + Clone>(&self, other: &Receipt, source: S) -> Result<(), ReceiptError> {
        if !self.same_data(other) {
            return Err(ReceiptError::InvalidState("different data".into()));
        }
        let mine = self.event_logs(source.clone())?;
        let theirs = other.event_logs(source)?;
        if mine.len() != theirs.len() {
            return Err(ReceiptError::InvalidState(format!(
                "different event count ({} vs {})",
                mine.len(),
                theirs.len()
            )));
        }
        if let Some(index) = mine.iter().zip(theirs.iter()).position(|(a, b)| a != b) {
            return Err(ReceiptError::InvalidState(format!(
                "different event (idx={})",
                index
            )));
        }
        Ok(())
    }

    pub fn to_json<S: KVGet>(&self, source: S) -> Result<Value, ReceiptError> {
        let mut json = Map::new();
        json.insert("to".into(), Value::String(self.to.to_string()));
        json.insert(
            "cumulativeStepUsed".into(),
            Value::String(format!("{:#x}", self.cumulative_step_used)),
        );
        json.insert("stepUsed".into(), Value::String(format!("{:#x}", self.step_used)));
        json.insert("stepPrice".into(), Value::String(format!("{:#x}", self.step_price)));
        if !self.disable_logs_bloom {
            json.insert("logsBloom".into(), Value::String(self.logs_bloom.to_hex()));
        }
        let logs = self
            .event_log_iter(source)
            .map(|event| event.map(|event| event.to_json()))
            .collect::<Result<Vec<Value>, ReceiptError>>()?;
        json.insert("eventLogs".into(), Value::Array(logs));
        if self.fee_detail.has() {
            json.insert("stepUsedDetails".into(), self.fee_detail.to_json());
        }
        if self.status.is_success() {
            json.insert("status".into(), Value::String("0x1".into()));
            if let Some(score_address) = &self.score_address {
                json.insert("scoreAddress".into(), Value::String(score_address.to_string()));
            }
        } else {
            json.insert("status".into(), Value::String("0x0".into()));
            json.insert(
                "failure".into(),
                json!({
                    "code": format!("{:#x}", self.status.0),
                    "message": self.status.name(),
                }),
            );
        }
        Ok(Value::Object(json))
    }

    /// Parse the JSON projection produced by [`to_json`](Self::to_json).
    pub fn from_json(revision: Revision, value: &Value) -> Result<Receipt, ReceiptError> {
        let invalid = |what: &str| ReceiptError::InvalidFormat(format!("receipt JSON: {}", what));
        let hex_u128 = |key: &str| {
            value[key]
                .as_str()
                .and_then(|s| s.strip_prefix("0x"))
                .and_then(|digits| u128::from_str_radix(digits, 16).ok())
                .ok_or_else(|| invalid(key))
        };
        let to = value["to"]
            .as_str()
            .and_then(|s| s.parse::<Address>().ok())
            .ok_or_else(|| invalid("to"))?;

        let mut receipt = Receipt::new(revision, to);
        receipt.cumulative_step_used = hex_u128("cumulativeStepUsed")?;
        receipt.step_used = hex_u128("stepUsed")?;
        receipt.step_price = hex_u128("stepPrice")?;

        if value["status"] == "0x1" {
            receipt.status = Status::SUCCESS;
            if let Some(score_address) = value["scoreAddress"].as_str() {
                receipt.score_address =
                    Some(score_address.parse().map_err(|_| invalid("scoreAddress"))?);
            }
        } else {
            let code = value["failure"]["code"]
                .as_str()
                .and_then(|s| s.strip_prefix("0x"))
                .and_then(|digits| u16::from_str_radix(digits, 16).ok())
                .ok_or_else(|| invalid("failure"))?;
            receipt.status = Status(code);
        }

        if let Some(logs) = value["eventLogs"].as_array() {
            receipt.event_logs = logs
                .iter()
                .map(EventLog::from_json)
                .collect::<Result<Vec<EventLog>, ReceiptError>>()?;
        }
        match value["logsBloom"].as_str() {
            Some(bloom) => {
                let raw = bloom
                    .strip_prefix("0x")
                    .and_then(|digits| hex::decode(digits).ok())
                    .ok_or_else(|| invalid("logsBloom"))?;
                receipt.logs_bloom = LogsBloom::from_bytes(&raw)?;
            }
            None => receipt.disable_logs_bloom = true,
        }
        if !value["stepUsedDetails"].is_null() {
            receipt.fee_detail = FeeDetail::from_json(&value["stepUsedDetails"])?;
        }

        if receipt.extension() != 0 && receipt.version < ReceiptVersion::V3 {
            receipt.version = ReceiptVersion::V3;
        }
        if receipt.version >= ReceiptVersion::V2 {
            receipt.event_logs_root = receipt.resident_event_trie(EmptyStore).root_hash();
        }
        Ok(receipt)
    }
}

impl PartialEq for Receipt {
    /// Receipts are equal if their encodings are.
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

fn decode_fields(bytes: &[u8]) -> Result<Vec<Vec<u8>>, ReceiptError> {
    Vec::<Vec<u8>>::deserialize(&mut &*bytes)
        .map_err(|err| ReceiptError::InvalidFormat(format!("receipt: {}", err)))
}

fn field<T: BorshDeserialize>(fields: &[Vec<u8>], index: usize) -> Result<T, ReceiptError> {
    let bytes = fields
        .get(index)
        .ok_or_else(|| ReceiptError::InvalidFormat(format!("receipt field {} missing", index)))?;
    T::try_from_slice(bytes)
        .map_err(|err| ReceiptError::InvalidFormat(format!("receipt field {}: {}", index, err)))
}

/// Iterator over the event logs of a [`Receipt`], in emission order.
pub struct EventLogIter<'r, S> {
    receipt: &'r Receipt,
    trie: Option<MerkleTrie<S>>,
    index: usize,
    done: bool,
}

impl<'r, S: KVGet> Iterator for EventLogIter<'r, S> {
    type Item = Result<EventLog, ReceiptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.index;
        self.index += 1;
        let item = match &self.trie {
            None => self.receipt.event_logs.get(index).cloned().map(Ok),
            Some(trie) => match trie.get(&varint(index as u64)) {
                Ok(Some(bytes)) => Some(EventLog::from_bytes(&bytes)),
                Ok(None) => None,
                Err(err) => Some(Err(err.into())),
            },
        };
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use crate::merkle::proof::verify_proof;

    use super::*;

    fn transfer_log(receipt: &mut Receipt, value: u8) {
        receipt.add_log(
            Address::account([1u8; 20]),
            vec![b"Transfer(Address,int)".to_vec(), vec![2u8; 21]],
            vec![vec![value]],
        );
    }

    #[test]
    fn version_follows_revision_and_payments() {
        let to = Address::account([3u8; 20]);
        assert_eq!(Receipt::new(Revision::new(0), to).version(), ReceiptVersion::V1);

        let mut receipt = Receipt::new(Revision::LATEST, to);
        assert_eq!(receipt.version(), ReceiptVersion::V2);
        receipt.add_payment(&Address::account([4u8; 20]), 30, Some(30));
        assert_eq!(receipt.version(), ReceiptVersion::V3);
    }

    #[test]
    fn events_are_provable_against_their_root() {
        let mut receipt = Receipt::new(Revision::LATEST, Address::account([3u8; 20]));
        for value in 0..3 {
            transfer_log(&mut receipt, value);
        }
        receipt.set_result(Status::SUCCESS, 100, 10, None);

        let root = receipt.event_logs_root().unwrap();
        let events = receipt.event_logs(EmptyStore).unwrap();
        assert_eq!(events.len(), 3);
        for (index, event) in events.iter().enumerate() {
            let proof = receipt.proof_of_event(index, EmptyStore).unwrap();
            assert_eq!(
                verify_proof(&root, &varint(index as u64), &proof).unwrap(),
                event.bytes()
            );
        }
        assert!(receipt.proof_of_event(3, EmptyStore).is_err());

        let mut v1 = Receipt::new(Revision::new(0), Address::account([3u8; 20]));
        transfer_log(&mut v1, 0);
        v1.set_result(Status::SUCCESS, 100, 10, None);
        assert!(v1.proof_of_event(0, EmptyStore).is_err());
    }

    #[test]
    fn fee_counts_charged_steps() {
        let mut plain = Receipt::new(Revision::LATEST, Address::account([3u8; 20]));
        plain.set_result(Status::SUCCESS, 100, 10, None);
        assert_eq!(plain.fee(), 1_000);
        assert_eq!(plain.fee_by_eoa(), 1_000);

        let mut shared = Receipt::new(Revision::LATEST, Address::account([3u8; 20]));
        shared.add_payment(&Address::account([5u8; 20]), 60, Some(60));
        shared.add_payment(&Address::contract([6u8; 20]), 40, Some(20));
        shared.set_result(Status::SUCCESS, 100, 10, None);
        assert_eq!(shared.fee(), 800);
        assert_eq!(shared.fee_by_eoa(), 600);
    }

    #[test]
    fn payments_saturate_at_max_steps() {
        let mut receipt = Receipt::new(Revision::LATEST, Address::account([3u8; 20]));
        receipt.add_payment(&Address::account([5u8; 20]), u128::MAX, Some(u128::MAX));
        receipt.add_payment(&Address::account([7u8; 20]), u128::MAX, Some(u128::MAX));
        receipt.set_result(Status::SUCCESS, 100, 1, None);
        assert_eq!(receipt.fee(), u128::MAX);
        assert_eq!(receipt.fee_by_eoa(), u128::MAX);
    }

    #[test]
    fn failure_is_projected_with_code_and_name() {
        let mut receipt = Receipt::new(Revision::LATEST, Address::account([3u8; 20]));
        receipt.set_result(Status::OUT_OF_BALANCE, 10, 1, None);
        let json = receipt.to_json(EmptyStore).unwrap();
        assert_eq!(json["status"], "0x0");
        assert_eq!(json["failure"]["code"], "0xb");
        assert_eq!(json["failure"]["message"], "OutOfBalance");

        let decoded = Receipt::from_json(Revision::LATEST, &json).unwrap();
        assert_eq!(decoded.status(), Status::OUT_OF_BALANCE);
        assert!(decoded.check(&receipt, EmptyStore).is_ok());
    }
}
