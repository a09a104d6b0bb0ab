//! L2 operation authentication.
//!
//! User-originated operations carry an ed25519 signature over a packed
//! message of the operation's identifying fields. Verification accepts
//! the account's primary key or any registered proxy key. Bridge-
//! originated operations are authorized by operator role instead and
//! carry a zeroed signature.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{KernelError, Result};
use crate::types::{AccountId, AccountLeaf, Amount, PublicKey, SignatureBytes, TokenId, TxType};

/// Packed signing message for an operation.
///
/// Layout: `tx_type (u8) | account_id (u32 BE) | token_id (u32 BE) |
/// amount (u64 BE) | fee (u64 BE) | aux`. The `aux` bytes carry the
/// operation-specific fields (recipient addresses, order parameters).
pub fn encode_message(
    tx_type: TxType,
    account_id: AccountId,
    token_id: TokenId,
    amount: Amount,
    fee: Amount,
    aux: &[u8],
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(25 + aux.len());
    msg.push(tx_type.as_u8());
    msg.extend_from_slice(&account_id.to_be_bytes());
    msg.extend_from_slice(&token_id.to_be_bytes());
    msg.extend_from_slice(&amount.to_be_bytes());
    msg.extend_from_slice(&fee.to_be_bytes());
    msg.extend_from_slice(aux);
    msg
}

/// Verify a signature against every key the account accepts.
pub fn verify(leaf: &AccountLeaf, message: &[u8], signature: &SignatureBytes) -> Result<()> {
    let sig = Signature::from_bytes(signature);
    if verifies(&leaf.public_key, message, &sig) {
        return Ok(());
    }
    for key in &leaf.proxy_public_keys {
        if verifies(key, message, &sig) {
            return Ok(());
        }
    }
    Err(KernelError::AuthenticationFailed(leaf.account_id))
}

fn verifies(key: &PublicKey, message: &[u8], sig: &Signature) -> bool {
    match VerifyingKey::from_bytes(key) {
        Ok(vk) => vk.verify(message, sig).is_ok(),
        Err(_) => false,
    }
}

/// Sign a packed message. Used by the demo binary and tests; the
/// production signer lives client-side.
pub fn sign(key: &SigningKey, message: &[u8]) -> SignatureBytes {
    key.sign(message).to_bytes()
}

/// The 32-byte verifying key for a signing key.
pub fn public_key(key: &SigningKey) -> PublicKey {
    key.verifying_key().to_bytes()
}

// ============================================================================
// Unit Tests
// ============================================================================
