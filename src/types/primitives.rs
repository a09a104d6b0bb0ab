//! Primitive identifier and address types.
//!
//! Field widths here are part of the witness contract with the external
//! circuit: account ids occupy 24 bits of tree path, token ids 16 bits,
//! amounts 64 bits. The packing helpers in `auth` and `tree::hasher`
//! rely on these widths exactly.

use serde::{Deserialize, Serialize};

/// Dense, monotonically assigned account identifier (24-bit tree path).
pub type AccountId = u32;

/// Token identifier (16-bit tree path). Ids below the NFT threshold are
/// fungible; above it, NFT instances.
pub type TokenId = u32;

/// Resting order identifier.
pub type OrderId = u64;

/// NFT instance identifier (always a `TokenId` above the threshold, but
/// kept wide for the registry records).
pub type NftId = u64;

/// Source chain identifier for bridge events.
pub type ChainId = u32;

/// L1 address (20 bytes).
pub type EthAddress = [u8; 20];

/// Rollup-native address (32 bytes).
pub type L2Address = [u8; 32];

/// Account public key (ed25519 verifying key bytes).
pub type PublicKey = [u8; 32];

/// Detached signature over a packed operation message.
pub type SignatureBytes = [u8; 64];

/// 32-byte hash (Merkle nodes, roots, content hashes).
pub type Hash = [u8; 32];

/// Business operation kind, one per provable transaction type.
///
/// The discriminant is the `tx_type` byte in the packed signing message
/// and in `OperationInfo`; it must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    Deposit = 1,
    Withdraw = 2,
    Transfer = 3,
    TransferToNew = 4,
    BridgeIn = 5,
    BridgeOut = 6,
    ForceExit = 7,
    FullExit = 8,
    SetPublicKey = 9,
    MintNft = 10,
    WithdrawNft = 11,
    TransferNft = 12,
    PlaceOrder = 13,
    RevokeOrder = 14,
    /// Internal: one settlement leg of a matched trade.
    Swap = 15,
    /// Internal: fee credit to the fee-collector account.
    FeeCollect = 16,
}

impl TxType {
    /// Discriminant byte for message packing.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
