//! A single [`EventLog`] emitted during the execution of a transaction.

use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::{json, Value};

use crate::types::data_types::Address;

use super::{
    event_signature::{decompose, EventDataType},
    ReceiptError,
};

/// An event emitted by a contract.
///
/// The first element of `indexed` is the UTF-8 event signature. The remaining indexed elements and
/// the data elements hold one parameter each, encoded according to the types declared in the
/// signature.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct EventLog {
    pub address: Address,
    pub indexed: Vec<Vec<u8>>,
    pub data: Vec<Vec<u8>>,
}

impl EventLog {
    pub fn new(address: Address, indexed: Vec<Vec<u8>>, data: Vec<Vec<u8>>) -> EventLog {
        EventLog {
            address,
            indexed,
            data,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<EventLog, ReceiptError> {
        EventLog::deserialize(&mut &*bytes)
            .map_err(|err| ReceiptError::InvalidFormat(format!("event log: {}", err)))
    }

    /// Get the event signature, if the first indexed element is valid UTF-8.
    pub fn signature(&self) -> Option<&str> {
        self.indexed
            .first()
            .and_then(|sig| std::str::from_utf8(sig).ok())
    }

    fn declared_types(&self) -> Result<Vec<EventDataType>, ReceiptError> {
        let signature = self
            .signature()
            .ok_or_else(|| ReceiptError::InvalidFormat("missing event signature".into()))?;
        let (_, types) = decompose(signature)
            .ok_or_else(|| ReceiptError::InvalidFormat(format!("bad signature {}", signature)))?;
        let slots = self.indexed.len() - 1 + self.data.len();
        if types.len() != slots {
            return Err(ReceiptError::InvalidState(format!(
                "{} declares {} parameters but the event has {}",
                signature,
                types.len(),
                slots
            )));
        }
        types.into_iter().map(str::parse).collect()
    }

    /// Get the JSON projection, with every slot decoded by its declared type.
    pub fn to_valid_json(&self) -> Result<Value, ReceiptError> {
        let types = self.declared_types()?;
        let (indexed_types, data_types) = types.split_at(self.indexed.len() - 1);
        let mut indexed = vec![Value::String(self.signature().unwrap_or_default().to_string())];
        for (ty, slot) in indexed_types.iter().zip(&self.indexed[1..]) {
            indexed.push(ty.to_json(slot)?);
        }
        let data = data_types
            .iter()
            .zip(&self.data)
            .map(|(ty, slot)| ty.to_json(slot))
            .collect::<Result<Vec<Value>, ReceiptError>>()?;
        Ok(json!({
            "scoreAddress": self.address.to_string(),
            "indexed": indexed,
            "data": data,
        }))
    }

    /// Get the JSON projection. Events whose slots do not match their signature are rendered with
    /// every slot as raw hex.
    pub fn to_json(&self) -> Value {
        self.to_valid_json().unwrap_or_else(|_| {
            let raw = |slots: &[Vec<u8>]| -> Vec<Value> {
                slots
                    .iter()
                    .map(|slot| Value::String(format!("0x{}", hex::encode(slot))))
                    .collect()
            };
            json!({
                "scoreAddress": self.address.to_string(),
                "indexed": raw(&self.indexed),
                "data": raw(&self.data),
            })
        })
    }

    /// Parse the JSON projection produced by [`to_valid_json`](Self::to_valid_json).
    pub fn from_json(value: &Value) -> Result<EventLog, ReceiptError> {
        let invalid = |what: &str| ReceiptError::InvalidFormat(format!("event log JSON: {}", what));
        let address = value["scoreAddress"]
            .as_str()
            .ok_or_else(|| invalid("scoreAddress"))?
            .parse::<Address>()
            .map_err(|_| invalid("scoreAddress"))?;
        let indexed = value["indexed"].as_array().ok_or_else(|| invalid("indexed"))?;
        let data = match &value["data"] {
            Value::Null => Vec::new(),
            Value::Array(data) => data.clone(),
            _ => return Err(invalid("data")),
        };
        let signature = indexed
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("signature"))?;
        let (_, types) = decompose(signature).ok_or_else(|| invalid("signature"))?;
        if types.len() + 1 != indexed.len() + data.len() {
            return Err(ReceiptError::InvalidState(format!(
                "{} does not match {} slots",
                signature,
                indexed.len() + data.len() - 1
            )));
        }
        let types = types
            .into_iter()
            .map(str::parse)
            .collect::<Result<Vec<EventDataType>, ReceiptError>>()?;

        let mut slots = indexed[1..].iter().chain(data.iter()).zip(types.iter());
        let mut decoded_indexed = vec![signature.as_bytes().to_vec()];
        for (slot, ty) in slots.by_ref().take(indexed.len() - 1) {
            decoded_indexed.push(ty.from_json(slot)?);
        }
        let decoded_data = slots
            .map(|(slot, ty)| ty.from_json(slot))
            .collect::<Result<Vec<Vec<u8>>, ReceiptError>>()?;
        Ok(EventLog::new(address, decoded_indexed, decoded_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::event_signature::encode_int;

    fn transfer() -> EventLog {
        EventLog::new(
            Address::system(),
            vec![
                b"ICXTransfer(Address,Address,int)".to_vec(),
                Address::account([1u8; 20]).bytes(),
                Address::account([2u8; 20]).bytes(),
            ],
            vec![encode_int(1000)],
        )
    }

    #[test]
    fn json_projection_decodes_slots() {
        let json = transfer().to_json();
        assert_eq!(json["indexed"][0], "ICXTransfer(Address,Address,int)");
        assert_eq!(json["indexed"][1], Address::account([1u8; 20]).to_string());
        assert_eq!(json["data"][0], "0x3e8");
        assert_eq!(EventLog::from_json(&json).unwrap(), transfer());
    }

    #[test]
    fn mismatched_signature_falls_back_to_hex() {
        let mut event = transfer();
        event.data.push(vec![0xab]);
        assert!(event.to_valid_json().is_err());
        let json = event.to_json();
        assert_eq!(json["data"][1], "0xab");
    }
}
