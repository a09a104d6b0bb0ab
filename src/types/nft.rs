//! NFT registry records.
//!
//! NFTs are content-hash addressed: the `content_hash -> nft_id` binding
//! is a bijection enforced by a secondary store index. Instance ids live
//! above the fungible token range and are balances like any other token.

use ssz_rs::prelude::*;

// The crate-level `Result` alias must stay out of scope here: the
// `SimpleSerialize` derive expands an unqualified two-parameter
// `Result` and would pick up the alias.
use crate::error::KernelError;
use crate::store::prefix;
use crate::types::{AccountId, Amount, EthAddress, Hash, NftId};

/// Supported issuance protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErcProtocol {
    /// Single-instance tokens; mint amount must be exactly 1.
    #[default]
    Erc721,
    /// Multi-instance tokens.
    Erc1155,
}

impl ErcProtocol {
    pub fn to_u16(self) -> u16 {
        match self {
            ErcProtocol::Erc721 => 721,
            ErcProtocol::Erc1155 => 1155,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            721 => Some(ErcProtocol::Erc721),
            1155 => Some(ErcProtocol::Erc1155),
            _ => None,
        }
    }
}

/// Registry record for one minted NFT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftStatus {
    pub id: NftId,
    pub creator_account_id: AccountId,
    pub creator_eth_address: EthAddress,
    /// Per-creator serial number, tracked as a balance on the reserved
    /// counter token.
    pub creator_serial_id: u64,
    pub erc_protocol: ErcProtocol,
    pub mint_amount: Amount,
    pub burned_amount: Amount,
    pub content_hash: Hash,
}

impl NftStatus {
    /// Deterministic store encoding.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        let mut creator_eth = [0u8; 32];
        creator_eth[..20].copy_from_slice(&self.creator_eth_address);
        let record = NftStatusRecord {
            id: self.id,
            creator_account_id: self.creator_account_id as u64,
            creator_eth,
            creator_serial_id: self.creator_serial_id,
            protocol_raw: self.erc_protocol.to_u16() as u64,
            mint_amount: self.mint_amount,
            burned_amount: self.burned_amount,
            content_hash: self.content_hash,
        };
        ssz_rs::serialize(&record).map_err(|_| KernelError::Corrupt(prefix::NFT_STATUS))
    }

    pub fn from_bytes(data: &[u8]) -> crate::error::Result<Self> {
        let record: NftStatusRecord =
            ssz_rs::deserialize(data).map_err(|_| KernelError::Corrupt(prefix::NFT_STATUS))?;
        let mut creator_eth_address = [0u8; 20];
        creator_eth_address.copy_from_slice(&record.creator_eth[..20]);
        Ok(Self {
            id: record.id,
            creator_account_id: record.creator_account_id as AccountId,
            creator_eth_address,
            creator_serial_id: record.creator_serial_id,
            erc_protocol: ErcProtocol::from_u16(record.protocol_raw as u16)
                .ok_or(KernelError::Corrupt(prefix::NFT_STATUS))?,
            mint_amount: record.mint_amount,
            burned_amount: record.burned_amount,
            content_hash: record.content_hash,
        })
    }
}

/// Fixed-shape SSZ record backing [`NftStatus`] persistence.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct NftStatusRecord {
    id: u64,
    creator_account_id: u64,
    creator_eth: [u8; 32],
    creator_serial_id: u64,
    protocol_raw: u64,
    mint_amount: u64,
    burned_amount: u64,
    content_hash: [u8; 32],
}
