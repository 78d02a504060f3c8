// Multi-hop transfer instructions
// A TransferMsg owns its continuation, so a route is always a finite list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chains::TxAck;
use crate::error::{OrchestrationError, Result};
use crate::types::{Brand, ChainAddress, ChainAmount};

pub mod compose;
pub mod memo;

pub use compose::TransferComposer;
pub use memo::{decode_swap_args, encode_route_memo, MemoOptions};

/// Send to `to_account`; on arrival continue with `next`, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMsg {
    to_account: ChainAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<Box<TransferMsg>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<TransferData>,
}

/// Auxiliary instructions interpreted on arrival at a hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferData {
    Swap(SwapArgs),
}

impl TransferMsg {
    /// Single hop, no forwarding
    pub fn new(to_account: ChainAddress) -> Self {
        Self {
            to_account,
            timeout: None,
            next: None,
            data: None,
        }
    }

    pub fn with_timeout(mut self, timeout: DateTime<Utc>) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn with_data(mut self, data: TransferData) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach `next` after the last hop of this route
    pub(crate) fn then(mut self, next: TransferMsg) -> Self {
        self.next = Some(Box::new(match self.next.take() {
            Some(existing) => existing.then(next),
            None => next,
        }));
        self
    }

    pub fn to_account(&self) -> &ChainAddress {
        &self.to_account
    }

    pub fn timeout(&self) -> Option<DateTime<Utc>> {
        self.timeout
    }

    pub fn next(&self) -> Option<&TransferMsg> {
        self.next.as_deref()
    }

    pub fn data(&self) -> Option<&TransferData> {
        self.data.as_ref()
    }

    /// Swap parameters carried by this hop
    pub fn swap_args(&self) -> Option<&SwapArgs> {
        match &self.data {
            Some(TransferData::Swap(args)) => Some(args),
            None => None,
        }
    }

    /// Hops in route order, starting with this one
    pub fn hops(&self) -> impl Iterator<Item = &TransferMsg> {
        std::iter::successors(Some(self), |hop| hop.next())
    }

    pub fn hop_count(&self) -> usize {
        self.hops().count()
    }

    /// Number of `next` links
    pub fn links(&self) -> usize {
        self.hop_count() - 1
    }
}

/// Ratio in `[0, 1)`, e.g. 3/100 for 3% slippage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self> {
        if denominator == 0 {
            return Err(OrchestrationError::validation("ratio denominator must be positive"));
        }
        Ok(Self { numerator, denominator })
    }

    pub fn percent(numerator: u64) -> Result<Self> {
        Self::new(numerator, 100)
    }

    /// Decimal rendering used in memos, e.g. `0.03`
    pub fn to_decimal_string(&self) -> String {
        let scaled = (self.numerator as u128 * 1_000_000) / self.denominator as u128;
        let text = format!("{}.{:06}", scaled / 1_000_000, scaled % 1_000_000);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Loosely-shaped swap request as supplied by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub amount_in: Option<ChainAmount>,
    pub amount_out: Option<ChainAmount>,
    pub brand_out: Option<Brand>,
    pub max_slippage: Option<Ratio>,
    /// Where swap proceeds go; omitted keeps them at the swap venue
    pub after: Option<ChainAddress>,
}

/// Validated swap intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapArgs {
    pub amount_in: ChainAmount,
    pub output: SwapOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<ChainAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapOutput {
    /// Receive exactly this amount
    Exact { amount_out: ChainAmount },
    /// Receive whatever the pool gives, within the slippage bound
    MaxSlippage { brand_out: Brand, max_slippage: Ratio },
}

impl TryFrom<SwapRequest> for SwapArgs {
    type Error = OrchestrationError;

    fn try_from(request: SwapRequest) -> Result<Self> {
        let amount_in = request
            .amount_in
            .ok_or_else(|| OrchestrationError::validation("swap requires amount_in"))?;
        if amount_in.is_zero() {
            return Err(OrchestrationError::validation("swap amount_in must be positive"));
        }

        let output = match (request.amount_out, request.brand_out, request.max_slippage) {
            (Some(amount_out), None, None) => {
                if amount_out.is_zero() {
                    return Err(OrchestrationError::validation("swap amount_out must be positive"));
                }
                SwapOutput::Exact { amount_out }
            }
            (None, Some(brand_out), Some(max_slippage)) => {
                if max_slippage.numerator >= max_slippage.denominator {
                    return Err(OrchestrationError::validation(format!(
                        "slippage {} must be below 1",
                        max_slippage.to_decimal_string()
                    )));
                }
                SwapOutput::MaxSlippage { brand_out, max_slippage }
            }
            (Some(_), _, _) => {
                return Err(OrchestrationError::validation(
                    "give either amount_out or brand_out with max_slippage, not both",
                ))
            }
            (None, None, None) => {
                return Err(OrchestrationError::validation(
                    "swap requires amount_out or brand_out with max_slippage",
                ))
            }
            (None, _, _) => {
                return Err(OrchestrationError::validation(
                    "brand_out and max_slippage must be given together",
                ))
            }
        };

        Ok(Self {
            amount_in,
            output,
            after: request.after,
        })
    }
}

/// How far a transfer is known to have progressed when its call resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// The first hop was acknowledged; later hops are left to the forwarding middleware
    FirstHop,
}

/// Result of `transfer_steps`
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub ack: TxAck,
    pub first_hop: ChainAddress,
    pub remaining_hops: usize,
    pub settlement: Settlement,
    /// Memo sent with the first hop
    pub memo: String,
}
