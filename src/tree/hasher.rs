//! Leaf and node hashing for the authenticated state trees.
//!
//! All hashing is SHA-256 over explicitly packed, big-endian fields.
//! The packed widths (account id u32, token id u32, amount u64) are part
//! of the witness contract with the external circuit and must not change.

use sha2::{Digest, Sha256};

use crate::types::{AccountLeaf, Amount, Hash, TokenId};

/// Hash of two child nodes.
#[inline]
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Hash of a token leaf: `token_id (u32 BE) || balance (u64 BE)`.
pub fn hash_token_leaf(token_id: TokenId, balance: Amount) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(token_id.to_be_bytes());
    hasher.update(balance.to_be_bytes());
    hasher.finalize().into()
}

/// Hash of an account leaf.
///
/// The proxy key list is folded into a single digest so the leaf hash
/// stays fixed-width regardless of how many keys are registered.
pub fn hash_account_leaf(leaf: &AccountLeaf) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(leaf.account_id.to_be_bytes());
    hasher.update(leaf.eth_address);
    hasher.update(leaf.l2_address);
    hasher.update(leaf.public_key);
    hasher.update(proxy_key_digest(&leaf.proxy_public_keys));
    hasher.update(leaf.token_tree_root);
    hasher.finalize().into()
}

/// Digest over the ordered proxy key list; all-zero when empty.
pub fn proxy_key_digest(keys: &[[u8; 32]]) -> Hash {
    if keys.is_empty() {
        return [0u8; 32];
    }
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key);
    }
    hasher.finalize().into()
}

/// Per-level default hashes for empty subtrees.
///
/// `defaults[0]` is the empty-leaf hash; `defaults[l]` is the hash of an
/// empty subtree of height `l`. The returned vector has `depth + 1`
/// entries so `defaults[depth]` is the empty-tree root.
pub fn default_hashes(depth: usize) -> Vec<Hash> {
    let mut defaults = Vec::with_capacity(depth + 1);
    let empty_leaf: Hash = Sha256::digest([]).into();
    defaults.push(empty_leaf);
    for level in 1..=depth {
        let below = defaults[level - 1];
        defaults.push(hash_pair(&below, &below));
    }
    defaults
}
