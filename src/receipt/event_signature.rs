//! Parsing of event signatures (`Name(T1,T2,...)`) and conversion of event slots between their
//! binary and JSON forms.

use std::str::FromStr;

use serde_json::Value;

use crate::types::data_types::Address;

use super::ReceiptError;

/// Split `signature` into its name and declared parameter types.
///
/// Returns `None` unless `signature` is a word followed by a parenthesized, comma-separated,
/// non-empty list of words.
pub fn decompose(signature: &str) -> Option<(&str, Vec<&str>)> {
    let open = signature.find('(')?;
    let inner = signature[open + 1..].strip_suffix(')')?;
    let name = &signature[..open];
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_word(name) {
        return None;
    }
    let types: Vec<&str> = inner.split(',').collect();
    if !types.iter().all(|t| is_word(t)) {
        return None;
    }
    Some((name, types))
}

/// Types an event slot can be declared as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventDataType {
    Address,
    Int,
    Str,
    Bytes,
    Bool,
}

impl FromStr for EventDataType {
    type Err = ReceiptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Address" => Ok(EventDataType::Address),
            "int" => Ok(EventDataType::Int),
            "str" => Ok(EventDataType::Str),
            "bytes" => Ok(EventDataType::Bytes),
            "bool" => Ok(EventDataType::Bool),
            other => Err(ReceiptError::InvalidFormat(format!("unknown type {}", other))),
        }
    }
}

impl EventDataType {
    /// Convert the binary form of a slot to JSON.
    pub fn to_json(&self, bytes: &[u8]) -> Result<Value, ReceiptError> {
        let invalid = || ReceiptError::InvalidFormat(format!("{:?} from 0x{}", self, hex::encode(bytes)));
        Ok(match self {
            EventDataType::Address => {
                Value::String(Address::from_bytes(bytes).ok_or_else(invalid)?.to_string())
            }
            EventDataType::Int => Value::String(format_signed(decode_int(bytes).ok_or_else(invalid)?)),
            EventDataType::Str => {
                Value::String(String::from_utf8(bytes.to_vec()).map_err(|_| invalid())?)
            }
            EventDataType::Bytes => Value::String(format!("0x{}", hex::encode(bytes))),
            EventDataType::Bool => match bytes {
                [0] => Value::String("0x0".to_string()),
                [1] => Value::String("0x1".to_string()),
                _ => return Err(invalid()),
            },
        })
    }

    /// Convert the JSON form of a slot back to binary. `null` becomes an empty slot.
    pub fn from_json(&self, value: &Value) -> Result<Vec<u8>, ReceiptError> {
        let s = match value {
            Value::Null => return Ok(Vec::new()),
            Value::String(s) => s.as_str(),
            other => {
                return Err(ReceiptError::InvalidFormat(format!("slot {} is not a string", other)))
            }
        };
        let invalid = || ReceiptError::InvalidFormat(format!("{:?} from {}", self, s));
        match self {
            EventDataType::Address => Ok(Address::from_str(s).map_err(|_| invalid())?.bytes()),
            EventDataType::Int => Ok(encode_int(parse_signed(s).ok_or_else(invalid)?)),
            EventDataType::Str => Ok(s.as_bytes().to_vec()),
            EventDataType::Bytes => s
                .strip_prefix("0x")
                .and_then(|digits| hex::decode(digits).ok())
                .ok_or_else(invalid),
            EventDataType::Bool => Ok(vec![(s == "0x1") as u8]),
        }
    }
}

/// Minimal big-endian two's complement encoding of `int`.
pub fn encode_int(int: i128) -> Vec<u8> {
    let bytes = int.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Decode a big-endian two's complement integer of at most 16 bytes. An empty slice is zero.
pub fn decode_int(bytes: &[u8]) -> Option<i128> {
    if bytes.len() > 16 {
        return None;
    }
    let fill = if bytes.first().map_or(false, |b| b & 0x80 != 0) {
        0xff
    } else {
        0x00
    };
    let mut buf = [fill; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Some(i128::from_be_bytes(buf))
}

fn format_signed(int: i128) -> String {
    if int < 0 {
        format!("-{:#x}", int.unsigned_abs())
    } else {
        format!("{:#x}", int)
    }
}

fn parse_signed(s: &str) -> Option<i128> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let int = match digits.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -int } else { int })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_signatures() {
        assert_eq!(
            decompose("ICXTransfer(Address,Address,int)"),
            Some(("ICXTransfer", vec!["Address", "Address", "int"]))
        );
        assert_eq!(decompose("Single(bool)"), Some(("Single", vec!["bool"])));
        assert_eq!(decompose("NoParams()"), None);
        assert_eq!(decompose("Bad Name(int)"), None);
        assert_eq!(decompose("Trailing(int,)"), None);
        assert_eq!(decompose("Unclosed(int"), None);
    }

    #[test]
    fn int_slots_are_minimal_twos_complement() {
        assert_eq!(encode_int(0), vec![0x00]);
        assert_eq!(encode_int(127), vec![0x7f]);
        assert_eq!(encode_int(128), vec![0x00, 0x80]);
        assert_eq!(encode_int(-1), vec![0xff]);
        assert_eq!(encode_int(-129), vec![0xff, 0x7f]);
        for int in [0i128, 1, -1, 255, -256, i64::MAX as i128] {
            assert_eq!(decode_int(&encode_int(int)), Some(int));
        }
    }

    #[test]
    fn slots_convert_through_json() {
        let int = EventDataType::Int;
        assert_eq!(int.to_json(&encode_int(-16)).unwrap(), Value::String("-0x10".into()));
        assert_eq!(int.from_json(&Value::String("0x10".into())).unwrap(), vec![0x10]);

        let address = Address::account([9u8; 20]);
        let json = EventDataType::Address.to_json(&address.bytes()).unwrap();
        assert_eq!(EventDataType::Address.from_json(&json).unwrap(), address.bytes());

        assert_eq!(EventDataType::Bool.to_json(&[1]).unwrap(), Value::String("0x1".into()));
        assert!(EventDataType::Bool.to_json(&[2]).is_err());
        assert!("float".parse::<EventDataType>().is_err());
    }
}
