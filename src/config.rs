//! Chain configuration.
//!
//! A single immutable `ChainConfig` is constructed at process start and
//! passed into the state machine. There is no hidden global registration
//! state: everything the kernel needs to know about reserved accounts,
//! token id ranges, fee defaults, and bridge operators lives here.

use crate::types::{AccountId, Amount, EthAddress, TokenId};

/// Depth of the top-level account tree (24-bit account ids).
pub const ACCOUNT_TREE_DEPTH: usize = 24;

/// Depth of each per-account token sub-tree (16-bit token ids).
pub const TOKEN_TREE_DEPTH: usize = 16;

/// Token ids strictly below this are fungible tokens.
/// The threshold itself is the NFT-issuance counter token; ids above it
/// are NFT instances.
pub const NFT_TOKEN_THRESHOLD: TokenId = 256;

/// Immutable kernel configuration.
///
/// Lifecycle: constructed once, never mutated. The state machine borrows
/// it for every operation.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Reserved account collecting all fee legs.
    pub fee_account_id: AccountId,

    /// Reserved account holding NFT issuance counters and synthetic
    /// mint balances.
    pub nft_account_id: AccountId,

    /// Token id of the NFT-issuance counter (`NFT_TOKEN_THRESHOLD`).
    pub nft_counter_token: TokenId,

    /// Token in which flat fees (mint, withdraw, transfer) are charged.
    pub fee_token: TokenId,

    /// Flat fee charged from an NFT creator on mint.
    pub nft_mint_fee: Amount,

    /// Upper bound on matches per incoming order. This is the sole
    /// admission-control device: it caps the worst-case work of a single
    /// transaction.
    pub max_match_count: usize,

    /// Addresses allowed to originate bridge events (deposit, full exit).
    pub managers: Vec<EthAddress>,

    /// Addresses allowed to attest bridge events alongside managers.
    pub verifiers: Vec<EthAddress>,
}

impl ChainConfig {
    /// Configuration with the reserved account layout from the rollup
    /// contract: account 1 collects fees, account 2 holds NFT counters.
    pub fn new(managers: Vec<EthAddress>, verifiers: Vec<EthAddress>) -> Self {
        Self {
            fee_account_id: 1,
            nft_account_id: 2,
            nft_counter_token: NFT_TOKEN_THRESHOLD,
            fee_token: 0,
            nft_mint_fee: 0,
            max_match_count: 32,
            managers,
            verifiers,
        }
    }

    /// True if `addr` may originate bridge events.
    pub fn is_bridge_operator(&self, addr: &EthAddress) -> bool {
        self.managers.contains(addr) || self.verifiers.contains(addr)
    }

    /// True if `addr` holds the manager role (fee schedule changes).
    pub fn is_manager(&self, addr: &EthAddress) -> bool {
        self.managers.contains(addr)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_account_layout() {
        let config = ChainConfig::default();
        assert_eq!(config.fee_account_id, 1);
        assert_eq!(config.nft_account_id, 2);
        assert_eq!(config.nft_counter_token, 256);
    }

    #[test]
    fn test_bridge_operator_roles() {
        let manager = [1u8; 20];
        let verifier = [2u8; 20];
        let stranger = [3u8; 20];
        let config = ChainConfig::new(vec![manager], vec![verifier]);

        assert!(config.is_bridge_operator(&manager));
        assert!(config.is_bridge_operator(&verifier));
        assert!(!config.is_bridge_operator(&stranger));

        assert!(config.is_manager(&manager));
        assert!(!config.is_manager(&verifier));
    }
}
