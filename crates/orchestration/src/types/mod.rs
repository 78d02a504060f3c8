// Value types shared by every component
// All of them are immutable once constructed

pub mod address;
pub mod amount;
pub mod denom;
pub mod msg;
pub mod staking;

pub use address::{ChainAddress, ValidatorAddress};
pub use amount::{merge_amounts, ChainAmount};
pub use denom::{Brand, Denom, DenomArg, DenomResolver, DenomTrace};
pub use msg::{type_urls, EncodeObject, Proto3JsonMsg, TypeUrl};
pub use staking::{
    Delegation, Redelegation, RedelegationEntry, UnbondingDelegation, UnbondingEntry, ValidatorReward,
};
