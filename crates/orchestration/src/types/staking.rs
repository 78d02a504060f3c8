// Staking snapshots returned by queries
// Never constructed locally except from query results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChainAddress, ChainAmount, ValidatorAddress};

/// An active delegation from an account to a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: ChainAddress,
    pub validator: ValidatorAddress,
    /// Decimal share count as reported by the chain
    pub shares: String,
    pub balance: ChainAmount,
}

/// Tokens leaving a validator, one entry per undelegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingDelegation {
    pub delegator: ChainAddress,
    pub validator: ValidatorAddress,
    /// In the order the chain returned them
    pub entries: Vec<UnbondingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingEntry {
    pub creation_height: u64,
    pub completion_time: DateTime<Utc>,
    pub initial_balance: u128,
    pub balance: u128,
}

/// Stake moving between two validators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redelegation {
    pub delegator: ChainAddress,
    pub src_validator: ValidatorAddress,
    pub dst_validator: ValidatorAddress,
    pub entries: Vec<RedelegationEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedelegationEntry {
    pub creation_height: u64,
    pub completion_time: DateTime<Utc>,
    pub initial_balance: u128,
    pub shares_dst: String,
    pub balance: u128,
}

impl UnbondingDelegation {
    /// Earliest completion among the entries, without assuming they are sorted
    pub fn next_completion(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.completion_time).min()
    }

    pub fn total_balance(&self) -> u128 {
        self.entries.iter().map(|e| e.balance).sum()
    }
}

impl Redelegation {
    pub fn next_completion(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.completion_time).min()
    }
}

/// Pending rewards owed by one validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorReward {
    pub validator: ValidatorAddress,
    pub amounts: Vec<ChainAmount>,
}
