//! Account and token leaves.
//!
//! An `AccountLeaf` is a position in the top-level account tree; it owns
//! a token sub-tree whose root is embedded in the leaf. A `TokenLeaf` is
//! a position in that sub-tree. Leaves are created once per address pair
//! and never deleted.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::store::prefix;
use crate::types::{AccountId, Amount, EthAddress, Hash, L2Address, PublicKey, TokenId};

/// A leaf of the account tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLeaf {
    /// Dense sequential id (also the tree path).
    pub account_id: AccountId,

    /// L1 address the account was created for.
    pub eth_address: EthAddress,

    /// Rollup-native address.
    pub l2_address: L2Address,

    /// Key L2 signatures are verified against.
    pub public_key: PublicKey,

    /// Additional keys accepted for this account (set-key operation).
    pub proxy_public_keys: Vec<PublicKey>,

    /// Root of the per-account token sub-tree. Always equals the
    /// recomputed sub-tree root immediately after any mutation.
    pub token_tree_root: Hash,
}

impl AccountLeaf {
    /// Create a leaf for a fresh address pair with an empty token tree.
    pub fn new(
        account_id: AccountId,
        eth_address: EthAddress,
        l2_address: L2Address,
        public_key: PublicKey,
        empty_token_root: Hash,
    ) -> Self {
        Self {
            account_id,
            eth_address,
            l2_address,
            public_key,
            proxy_public_keys: Vec::new(),
            token_tree_root: empty_token_root,
        }
    }

    /// True if `key` is the primary key or a registered proxy key.
    pub fn accepts_key(&self, key: &PublicKey) -> bool {
        self.public_key == *key || self.proxy_public_keys.contains(key)
    }

    /// Store encoding: fixed header followed by the proxy key list.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(122 + 32 * self.proxy_public_keys.len());
        out.extend_from_slice(&self.account_id.to_be_bytes());
        out.extend_from_slice(&self.eth_address);
        out.extend_from_slice(&self.l2_address);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.token_tree_root);
        out.extend_from_slice(&(self.proxy_public_keys.len() as u16).to_be_bytes());
        for key in &self.proxy_public_keys {
            out.extend_from_slice(key);
        }
        out
    }

    /// Decode a store record. Length mismatches are `Corrupt`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        const HEADER: usize = 4 + 20 + 32 + 32 + 32 + 2;
        if data.len() < HEADER {
            return Err(KernelError::Corrupt(prefix::ACCOUNT_LEAF));
        }
        let account_id = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let mut eth_address = [0u8; 20];
        eth_address.copy_from_slice(&data[4..24]);
        let mut l2_address = [0u8; 32];
        l2_address.copy_from_slice(&data[24..56]);
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[56..88]);
        let mut token_tree_root = [0u8; 32];
        token_tree_root.copy_from_slice(&data[88..120]);
        let count = u16::from_be_bytes(data[120..122].try_into().unwrap()) as usize;
        if data.len() != HEADER + count * 32 {
            return Err(KernelError::Corrupt(prefix::ACCOUNT_LEAF));
        }
        let mut proxy_public_keys = Vec::with_capacity(count);
        for i in 0..count {
            let start = HEADER + i * 32;
            let mut key = [0u8; 32];
            key.copy_from_slice(&data[start..start + 32]);
            proxy_public_keys.push(key);
        }
        Ok(Self {
            account_id,
            eth_address,
            l2_address,
            public_key,
            proxy_public_keys,
            token_tree_root,
        })
    }
}

/// A leaf of a per-account token sub-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenLeaf {
    pub token_id: TokenId,
    /// Fixed-point balance (decimal-string encoded at the boundary).
    pub balance: Amount,
}

impl TokenLeaf {
    pub fn new(token_id: TokenId, balance: Amount) -> Self {
        Self { token_id, balance }
    }

    /// Store encoding: token id (u32 BE) then balance (u64 BE).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&self.token_id.to_be_bytes());
        out.extend_from_slice(&self.balance.to_be_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 12 {
            return Err(KernelError::Corrupt(prefix::TOKEN_LEAF));
        }
        Ok(Self {
            token_id: u32::from_be_bytes(data[0..4].try_into().unwrap()),
            balance: u64::from_be_bytes(data[4..12].try_into().unwrap()),
        })
    }
}
