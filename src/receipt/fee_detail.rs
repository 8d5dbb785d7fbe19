//! Who paid for the steps a transaction used.

use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::{Map, Value};

use crate::types::data_types::Address;

use super::ReceiptError;

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct FeePayment {
    pub payer: Address,
    pub amount: u128,
}

/// Steps paid per payer.
///
/// Payments are accumulated per payer in the order they were first made. After
/// [`normalize`](FeeDetail::normalize) the list is sorted by the binary form of the payer's address
/// and holds no zero amounts.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct FeeDetail(Vec<FeePayment>);

impl FeeDetail {
    pub fn has(&self) -> bool {
        !self.0.is_empty()
    }

    /// Add `steps` to `payer`'s payment, saturating at `u128::MAX`. Returns whether anything was
    /// recorded.
    pub fn add_payment(&mut self, payer: &Address, steps: u128) -> bool {
        if steps == 0 {
            return false;
        }
        let payment = self.payment_of(payer);
        payment.amount = payment.amount.saturating_add(steps);
        true
    }

    fn payment_of(&mut self, payer: &Address) -> &mut FeePayment {
        let pos = match self.0.iter().position(|payment| payment.payer == *payer) {
            Some(pos) => pos,
            None => {
                self.0.push(FeePayment {
                    payer: *payer,
                    amount: 0,
                });
                self.0.len() - 1
            }
        };
        &mut self.0[pos]
    }

    pub fn normalize(&mut self) {
        self.0.retain(|payment| payment.amount != 0);
        self.0.sort_by_key(|payment| payment.payer.bytes());
    }

    /// Sum of the steps paid by externally owned accounts.
    pub fn steps_paid_by_eoa(&self) -> u128 {
        self.0
            .iter()
            .filter(|payment| !payment.payer.is_contract())
            .fold(0u128, |sum, payment| sum.saturating_add(payment.amount))
    }

    pub fn payments(&self) -> std::slice::Iter<'_, FeePayment> {
        self.0.iter()
    }

    /// `{ "<payer>": "0x<steps>" }`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for payment in self.0.iter() {
            map.insert(
                payment.payer.to_string(),
                Value::String(format!("{:#x}", payment.amount)),
            );
        }
        Value::Object(map)
    }

    pub fn from_json(value: &Value) -> Result<FeeDetail, ReceiptError> {
        let invalid = || ReceiptError::InvalidFormat(format!("fee detail {}", value));
        let map = value.as_object().ok_or_else(invalid)?;
        let mut detail = FeeDetail::default();
        for (payer, amount) in map {
            let payer = payer.parse::<Address>().map_err(|_| invalid())?;
            let amount = amount
                .as_str()
                .and_then(|s| s.strip_prefix("0x"))
                .and_then(|digits| u128::from_str_radix(digits, 16).ok())
                .ok_or_else(invalid)?;
            // Spellings that differ only in case name the same payer.
            let payment = detail.payment_of(&payer);
            payment.amount = payment.amount.checked_add(amount).ok_or_else(invalid)?;
        }
        detail.normalize();
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_canonical_and_idempotent() {
        let eoa = Address::account([5u8; 20]);
        let contract = Address::contract([1u8; 20]);
        let other = Address::account([1u8; 20]);

        let mut detail = FeeDetail::default();
        assert!(detail.add_payment(&contract, 10));
        assert!(detail.add_payment(&eoa, 5));
        assert!(!detail.add_payment(&other, 0));
        assert!(detail.add_payment(&eoa, 7));
        detail.normalize();

        let payers: Vec<Address> = detail.payments().map(|p| p.payer).collect();
        assert_eq!(payers, vec![eoa, contract]);
        assert_eq!(detail.steps_paid_by_eoa(), 12);

        let once = detail.clone();
        detail.normalize();
        assert_eq!(detail, once);
        assert_eq!(FeeDetail::from_json(&detail.to_json()).unwrap(), detail);
    }

    #[test]
    fn eoa_steps_saturate() {
        let max = format!("{:#x}", u128::MAX);
        let json = serde_json::json!({
            (format!("hx{}", "11".repeat(20))): max,
            (format!("hx{}", "22".repeat(20))): max,
        });
        let mut detail = FeeDetail::from_json(&json).unwrap();
        assert_eq!(detail.payments().count(), 2);
        assert_eq!(detail.steps_paid_by_eoa(), u128::MAX);

        let payer = Address::account([0x11; 20]);
        assert!(detail.add_payment(&payer, 1));
        assert_eq!(detail.payments().find(|p| p.payer == payer).unwrap().amount, u128::MAX);
    }

    #[test]
    fn overflowing_payer_total_is_rejected() {
        let max = format!("{:#x}", u128::MAX);
        let json = serde_json::json!({
            (format!("hx{}", "aa".repeat(20))): max,
            (format!("hx{}", "AA".repeat(20))): "0x1",
        });
        assert!(matches!(
            FeeDetail::from_json(&json),
            Err(ReceiptError::InvalidFormat(_))
        ));

        let json = serde_json::json!({
            (format!("hx{}", "aa".repeat(20))): "0x2",
            (format!("hx{}", "AA".repeat(20))): "0x3",
        });
        let detail = FeeDetail::from_json(&json).unwrap();
        assert_eq!(detail.steps_paid_by_eoa(), 5);
    }
}
