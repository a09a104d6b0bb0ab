//! Content-hash addressed NFT registry.
//!
//! ## Model
//!
//! NFT instance ids are token ids above the fungible range; an NFT
//! balance is an ordinary token-leaf balance, so ownership is committed
//! by the same tree root as everything else. Each content hash maps to
//! exactly one instance id, enforced through a secondary store index.
//!
//! Two reserved balances bind the registry into the tree:
//! - the system NFT account's counter token holds the total number of
//!   instances ever minted (instance ids are derived from it), and each
//!   creator's counter token holds its per-creator serial number;
//! - for every instance the system NFT account also holds a synthetic
//!   balance derived from the instance's registry record, so tampering
//!   with registry fields is detectable against the root.
//!
//! The balance mutations themselves are driven by the state machine;
//! this module owns id assignment, validation, the synthetic binding,
//! and registry persistence.

use sha2::{Digest, Sha256};

use crate::config::NFT_TOKEN_THRESHOLD;
use crate::error::{KernelError, Result};
use crate::store::{nft_hash_key, nft_status_key, KvStore, LeafStore};
use crate::types::{Amount, ErcProtocol, Hash, NftId, NftStatus, TokenId};

/// Instance id for the `counter`-th mint (zero-based). Ids start just
/// above the reserved counter token.
#[inline]
pub fn nft_id_for_counter(counter: u64) -> NftId {
    NFT_TOKEN_THRESHOLD as u64 + 1 + counter
}

/// True if `token` is an NFT instance id rather than a fungible token.
#[inline]
pub fn is_nft_token(token: TokenId) -> bool {
    token > NFT_TOKEN_THRESHOLD
}

/// Protocol-specific mint amount rules: ERC-721 instances are unique.
pub fn validate_mint_amount(protocol: ErcProtocol, amount: Amount) -> Result<()> {
    if amount == 0 || (protocol == ErcProtocol::Erc721 && amount != 1) {
        return Err(KernelError::InvalidNftAmount {
            protocol: protocol.to_u16(),
            amount,
        });
    }
    Ok(())
}

/// Synthetic balance binding a registry record into the tree.
///
/// Derived from the immutable identity fields only, so it stays stable
/// across burns.
pub fn synthetic_balance(status: &NftStatus) -> Amount {
    let mut hasher = Sha256::new();
    hasher.update(status.id.to_be_bytes());
    hasher.update(status.creator_account_id.to_be_bytes());
    hasher.update(status.creator_eth_address);
    hasher.update(status.creator_serial_id.to_be_bytes());
    hasher.update(status.erc_protocol.to_u16().to_be_bytes());
    hasher.update(status.mint_amount.to_be_bytes());
    hasher.update(status.content_hash);
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Fail with `DuplicateContentHash` if the hash is already registered.
pub fn assert_unique<S: KvStore>(store: &LeafStore<S>, content_hash: &Hash) -> Result<()> {
    if store.get(&nft_hash_key(content_hash)).is_some() {
        return Err(KernelError::DuplicateContentHash(hex::encode(content_hash)));
    }
    Ok(())
}

/// Instance id registered for a content hash, if any.
pub fn lookup_by_hash<S: KvStore>(
    store: &LeafStore<S>,
    content_hash: &Hash,
) -> Result<Option<NftId>> {
    match store.get(&nft_hash_key(content_hash)) {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .try_into()
                .map_err(|_| KernelError::Corrupt(crate::store::prefix::NFT_HASH_INDEX))?;
            Ok(Some(u64::from_be_bytes(raw)))
        }
        None => Ok(None),
    }
}

/// Load a registry record, or `NftNotFound`.
pub fn load_status<S: KvStore>(store: &LeafStore<S>, id: NftId) -> Result<NftStatus> {
    let bytes = store
        .get(&nft_status_key(id))
        .ok_or(KernelError::NftNotFound(id))?;
    NftStatus::from_bytes(&bytes)
}

/// Persist a registry record and, on first write, its hash index entry.
pub fn save_status<S: KvStore>(store: &mut LeafStore<S>, status: &NftStatus) -> Result<()> {
    store.put(nft_status_key(status.id), status.to_bytes()?);
    store.put(
        nft_hash_key(&status.content_hash),
        status.id.to_be_bytes().to_vec(),
    );
    Ok(())
}

/// Remaining (unburned) supply of an instance.
pub fn outstanding(status: &NftStatus) -> Amount {
    status.mint_amount.saturating_sub(status.burned_amount)
}

// ============================================================================
// Unit Tests
// ============================================================================
