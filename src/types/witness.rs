//! Witness records handed to the external prover.
//!
//! `OperationInfo` plus its ordered `operation_branches` is the bit-exact
//! contract consumed by the SNARK proof generator. Every mutation of a
//! leaf is bracketed by an inclusion proof before and after, so all
//! operation kinds share one uniform witness shape and one external
//! circuit family can prove them all.

use serde::{Deserialize, Serialize};

use crate::types::{
    AccountId, Amount, EthAddress, Hash, L2Address, NftId, OrderId, PublicKey, SignatureBytes,
    TokenId, TxType,
};

/// Inclusion proof for an account leaf in the account tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountWitness {
    pub id: AccountId,
    pub eth_address: EthAddress,
    pub l2_address: L2Address,
    pub token_tree_root: Hash,
    pub public_key: PublicKey,
    /// Sibling hashes, leaf to root. Helper bits are the id's bits.
    pub sibling_path: Vec<Hash>,
}

/// Inclusion proof for a token leaf in an account's token sub-tree.
///
/// An absent token is witnessed as a zero balance against the empty-leaf
/// default hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWitness {
    pub id: TokenId,
    pub balance: Amount,
    pub sibling_path: Vec<Hash>,
}

/// Combined account + token proof against one account root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetaBranch {
    pub account_witness: AccountWitness,
    pub token_witness: TokenWitness,
}

/// One prove-mutate-prove bracket: the state of a leaf immediately
/// before and immediately after a single mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationBranch {
    pub before: OperationMetaBranch,
    pub after: OperationMetaBranch,
}

/// Operation-specific payload attached to the witness record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialInfo {
    None,
    /// A fresh account leaf was created (deposit / transfer-to-new).
    NewAccount {
        account_id: AccountId,
        eth_address: EthAddress,
        l2_address: L2Address,
    },
    /// Full or forced exit: the amount the bridge must release.
    Exit { amount: Amount },
    /// NFT mint: the id assigned to the content hash.
    Nft {
        nft_id: NftId,
        creator_serial_id: u64,
        content_hash: Hash,
    },
    /// Order placement: fills produced by the matching pass.
    Trade {
        order_id: OrderId,
        filled: Amount,
        trade_count: u32,
        resting: bool,
    },
    /// Order revocation: the released frozen commitment.
    Revoke { order_id: OrderId, released: Amount },
}

/// The full audit/witness record for one business operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub block_height: u64,
    pub tx_index: u32,
    /// Position among the sub-operations a transaction expands into
    /// (settlement legs, fee legs).
    pub op_index: u32,
    pub tx_type: TxType,
    pub token_id: TokenId,
    pub amount: Amount,
    pub fee_amount: Amount,
    /// L2 signature, zeroed for bridge-originated operations.
    #[serde(with = "serde_bytes_64")]
    pub signature: SignatureBytes,
    /// Account root after every mutation, first entry is the pre-state.
    pub roots: Vec<Hash>,
    /// One before/after pair per leaf touched, in mutation order.
    pub operation_branches: Vec<OperationBranch>,
    pub special_info: SpecialInfo,
}

impl OperationInfo {
    pub fn new(block_height: u64, tx_index: u32, tx_type: TxType) -> Self {
        Self {
            block_height,
            tx_index,
            op_index: 0,
            tx_type,
            token_id: 0,
            amount: 0,
            fee_amount: 0,
            signature: [0u8; 64],
            roots: Vec::new(),
            operation_branches: Vec::new(),
            special_info: SpecialInfo::None,
        }
    }

    /// Append a prove-mutate-prove bracket and the resulting root.
    pub fn push_branch(&mut self, before: OperationMetaBranch, after: OperationMetaBranch) {
        self.operation_branches.push(OperationBranch { before, after });
    }

    /// Record the account root after a mutation.
    pub fn push_root(&mut self, root: Hash) {
        self.roots.push(root);
    }

    /// Root transition of the whole operation: (pre, post).
    pub fn root_transition(&self) -> Option<(Hash, Hash)> {
        Some((*self.roots.first()?, *self.roots.last()?))
    }
}

/// Serde helper for the fixed 64-byte signature array.
mod serde_bytes_64 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 64], D::Error> {
        let v: Vec<u8> = Vec::deserialize(de)?;
        v.try_into()
            .map_err(|_| D::Error::custom("expected 64 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(balance: Amount, root: Hash) -> OperationMetaBranch {
        OperationMetaBranch {
            account_witness: AccountWitness {
                id: 3,
                eth_address: [0u8; 20],
                l2_address: [0u8; 32],
                token_tree_root: root,
                public_key: [0u8; 32],
                sibling_path: vec![[1u8; 32]; 24],
            },
            token_witness: TokenWitness {
                id: 5,
                balance,
                sibling_path: vec![[2u8; 32]; 16],
            },
        }
    }

    #[test]
    fn test_operation_info_branches_ordered() {
        let mut info = OperationInfo::new(10, 0, TxType::Transfer);
        info.push_root([0u8; 32]);
        info.push_branch(meta(0, [3u8; 32]), meta(100, [4u8; 32]));
        info.push_root([5u8; 32]);

        assert_eq!(info.operation_branches.len(), 1);
        assert_eq!(info.operation_branches[0].before.token_witness.balance, 0);
        assert_eq!(info.operation_branches[0].after.token_witness.balance, 100);
        assert_eq!(info.root_transition(), Some(([0u8; 32], [5u8; 32])));
    }

    #[test]
    fn test_empty_operation_has_no_transition() {
        let info = OperationInfo::new(1, 0, TxType::Deposit);
        assert_eq!(info.root_transition(), None);
    }
}
