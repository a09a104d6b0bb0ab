//! Core data types for the ledger kernel.
//!
//! All amounts use fixed-point representation (scaled by 10^8) and all
//! persisted records have a deterministic byte encoding. Witness types
//! additionally derive serde for the prover handoff.

mod account;
mod nft;
mod order;
mod primitives;
mod witness;
pub mod amount;

pub use account::{AccountLeaf, TokenLeaf};
pub use amount::{Amount, SCALE};
pub use nft::{ErcProtocol, NftStatus};
pub use order::{AssetPair, OrderStatus, Side, SpotOrder};
pub use primitives::{
    AccountId, ChainId, EthAddress, Hash, L2Address, NftId, OrderId, PublicKey, SignatureBytes,
    TokenId, TxType,
};
pub use witness::{
    AccountWitness, OperationBranch, OperationInfo, OperationMetaBranch, SpecialInfo, TokenWitness,
};
