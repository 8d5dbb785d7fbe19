//! Decoding transaction bytes into the right [`Transaction`] variant.
//!
//! A [`FactoryRegistry`] holds [`Factory`]s ordered by priority. To parse bytes, the registry asks
//! each factory in turn whether it recognises them, and lets the first that does parse them. JSON
//! input (a leading `{`) is offered to the JSON checks; anything else to the binary checks.

use serde_json::{Map, Value};

use super::{
    double_sign::DoubleSignReportTx, v2::TransactionV2, v3::TransactionV3, Transaction,
    TransactionError,
};

/// Recognises and parses one transaction variant.
#[derive(Clone, Copy)]
pub struct Factory {
    /// Lower runs first.
    pub priority: u32,
    pub check_json: Option<fn(&Map<String, Value>) -> bool>,
    pub parse_json: fn(&[u8]) -> Result<Transaction, TransactionError>,
    pub check_binary: Option<fn(&[u8]) -> bool>,
    pub parse_binary: fn(&[u8]) -> Result<Transaction, TransactionError>,
}

fn unsupported(_bytes: &[u8]) -> Result<Transaction, TransactionError> {
    Err(TransactionError::InvalidFormat(
        "form not supported by this factory".to_string(),
    ))
}

fn parse_dsr_json(bytes: &[u8]) -> Result<Transaction, TransactionError> {
    DoubleSignReportTx::from_json_bytes(bytes).map(Transaction::DoubleSignReport)
}

fn parse_dsr_binary(bytes: &[u8]) -> Result<Transaction, TransactionError> {
    DoubleSignReportTx::from_binary(bytes).map(Transaction::DoubleSignReport)
}

fn parse_v3_json(bytes: &[u8]) -> Result<Transaction, TransactionError> {
    TransactionV3::from_json_bytes(bytes).map(Transaction::V3)
}

fn parse_v3_binary(bytes: &[u8]) -> Result<Transaction, TransactionError> {
    TransactionV3::from_binary(bytes).map(Transaction::V3)
}

fn parse_v2_json(bytes: &[u8]) -> Result<Transaction, TransactionError> {
    TransactionV2::from_json_bytes(bytes).map(Transaction::V2)
}

pub const DOUBLE_SIGN_REPORT_FACTORY: Factory = Factory {
    priority: 10,
    check_json: Some(DoubleSignReportTx::is_dsr_json),
    parse_json: parse_dsr_json,
    check_binary: Some(DoubleSignReportTx::is_dsr_binary),
    parse_binary: parse_dsr_binary,
};

pub const V3_BINARY_FACTORY: Factory = Factory {
    priority: 20,
    check_json: None,
    parse_json: unsupported,
    check_binary: Some(TransactionV3::is_v3_binary),
    parse_binary: parse_v3_binary,
};

pub const V3_JSON_FACTORY: Factory = Factory {
    priority: 30,
    check_json: Some(TransactionV3::is_v3_json),
    parse_json: parse_v3_json,
    check_binary: None,
    parse_binary: unsupported,
};

pub const V2_JSON_FACTORY: Factory = Factory {
    priority: 40,
    check_json: Some(TransactionV2::is_v2),
    parse_json: parse_v2_json,
    check_binary: None,
    parse_binary: unsupported,
};

#[derive(Clone)]
pub struct FactoryRegistry {
    factories: Vec<Factory>,
}

impl FactoryRegistry {
    /// Create a registry without any factories.
    pub fn empty() -> FactoryRegistry {
        FactoryRegistry {
            factories: Vec::new(),
        }
    }

    /// Add `factory`, keeping the registry sorted by priority. Factories of equal priority run in
    /// registration order.
    pub fn register(&mut self, factory: Factory) {
        let position = self
            .factories
            .iter()
            .position(|f| f.priority > factory.priority)
            .unwrap_or(self.factories.len());
        self.factories.insert(position, factory);
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<Transaction, TransactionError> {
        if bytes.first() == Some(&b'{') {
            let fields = match serde_json::from_slice(bytes) {
                Ok(Value::Object(fields)) => fields,
                _ => {
                    return Err(TransactionError::InvalidFormat(
                        "transaction is not a JSON object".to_string(),
                    ))
                }
            };
            for factory in self.factories.iter() {
                if let Some(check) = factory.check_json {
                    if check(&fields) {
                        return (factory.parse_json)(bytes);
                    }
                }
            }
        } else {
            for factory in self.factories.iter() {
                if let Some(check) = factory.check_binary {
                    if check(bytes) {
                        return (factory.parse_binary)(bytes);
                    }
                }
            }
        }
        Err(TransactionError::InvalidVersion(
            "no factory recognises the transaction".to_string(),
        ))
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        let mut registry = FactoryRegistry::empty();
        for factory in [
            V2_JSON_FACTORY,
            V3_JSON_FACTORY,
            V3_BINARY_FACTORY,
            DOUBLE_SIGN_REPORT_FACTORY,
        ] {
            registry.register(factory);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_orders_by_priority() {
        let registry = FactoryRegistry::default();
        let priorities: Vec<u32> = registry.factories.iter().map(|f| f.priority).collect();
        assert_eq!(priorities, vec![10, 20, 30, 40]);
    }

    #[test]
    fn unknown_input_is_rejected() {
        let registry = FactoryRegistry::default();
        assert!(registry.parse(b"{\"version\": \"0x9\"}").is_err());
        assert!(registry.parse(&[0x07, 0x00]).is_err());
        assert!(registry.parse(b"{not json").is_err());
    }
}
