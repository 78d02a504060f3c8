// Amounts of a single denom
// Arithmetic across denoms fails instead of coercing

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::Denom;
use crate::error::{OrchestrationError, Result};

/// A non-negative quantity of one denom
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainAmount {
    pub denom: Denom,
    #[serde(serialize_with = "value_to_string", deserialize_with = "value_from_string")]
    pub value: u128,
}

impl ChainAmount {
    pub fn new(denom: impl Into<Denom>, value: u128) -> Self {
        Self { denom: denom.into(), value }
    }

    pub fn zero(denom: impl Into<Denom>) -> Self {
        Self::new(denom, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    pub fn checked_add(&self, other: &ChainAmount) -> Result<ChainAmount> {
        self.same_denom(other)?;
        let value = self.value.checked_add(other.value).ok_or_else(|| {
            OrchestrationError::validation(format!("{} + {} overflows", self, other))
        })?;
        Ok(Self::new(self.denom.clone(), value))
    }

    pub fn checked_sub(&self, other: &ChainAmount) -> Result<ChainAmount> {
        self.same_denom(other)?;
        let value = self.value.checked_sub(other.value).ok_or_else(|| {
            OrchestrationError::validation(format!("{} - {} is negative", self, other))
        })?;
        Ok(Self::new(self.denom.clone(), value))
    }

    fn same_denom(&self, other: &ChainAmount) -> Result<()> {
        if self.denom != other.denom {
            return Err(OrchestrationError::DenomMismatch {
                left: self.denom.to_string(),
                right: other.denom.to_string(),
            });
        }
        Ok(())
    }

    /// Cosmos SDK coin JSON: `{"denom": "...", "amount": "..."}`
    pub fn to_coin_json(&self) -> serde_json::Value {
        serde_json::json!({
            "denom": self.denom.as_str(),
            "amount": self.value.to_string(),
        })
    }
}

impl fmt::Display for ChainAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.denom)
    }
}

/// Sum amounts per denom, keeping first-seen order
pub fn merge_amounts(amounts: impl IntoIterator<Item = ChainAmount>) -> Result<Vec<ChainAmount>> {
    let mut merged: Vec<ChainAmount> = Vec::new();
    for amount in amounts {
        match merged.iter_mut().find(|a| a.denom == amount.denom) {
            Some(existing) => *existing = existing.checked_add(&amount)?,
            None => merged.push(amount),
        }
    }
    Ok(merged)
}

fn value_to_string<S: Serializer>(value: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn value_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Number(n) => Ok(n as u128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_denom_arithmetic() {
        let a = ChainAmount::new("uatom", 100);
        let b = ChainAmount::new("uatom", 40);
        assert_eq!(a.checked_add(&b).unwrap().value, 140);
        assert_eq!(a.checked_sub(&b).unwrap().value, 60);
        assert!(b.checked_sub(&a).is_err());
    }

    #[test]
    fn test_mixed_denoms_fail_loudly() {
        let a = ChainAmount::new("uatom", 100);
        let b = ChainAmount::new("utia", 1);
        assert!(matches!(a.checked_add(&b), Err(OrchestrationError::DenomMismatch { .. })));
        assert!(matches!(a.checked_sub(&b), Err(OrchestrationError::DenomMismatch { .. })));
    }

    #[test]
    fn test_merge_amounts() {
        let merged = merge_amounts(vec![
            ChainAmount::new("uatom", 1),
            ChainAmount::new("utia", 2),
            ChainAmount::new("uatom", 3),
        ])
        .unwrap();
        assert_eq!(merged, vec![ChainAmount::new("uatom", 4), ChainAmount::new("utia", 2)]);
    }

    #[test]
    fn test_amount_serializes_value_as_string() {
        let amount = ChainAmount::new("uatom", 340_282_366_920_938_463_463_374_607_431_768_211_455);
        let json = serde_json::to_value(&amount).unwrap();
        assert_eq!(json["value"], "340282366920938463463374607431768211455");
        let back: ChainAmount = serde_json::from_value(json).unwrap();
        assert_eq!(back, amount);

        let from_number: ChainAmount = serde_json::from_str(r#"{"denom":"uatom","value":5}"#).unwrap();
        assert_eq!(from_number.value, 5);
    }
}
