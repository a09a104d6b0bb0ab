//! Error taxonomy for the ledger kernel.
//!
//! Every fallible operation returns `Result<_, KernelError>`. The first
//! error encountered aborts the operation; the pending update overlay and
//! tree journals are discarded in full, so a failed operation leaves state
//! untouched. Nothing here is fatal to the process.

use thiserror::Error;

/// Result alias used throughout the kernel.
pub type Result<T> = std::result::Result<T, KernelError>;

/// All errors the state-transition core can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    // --- validation ---
    /// Zero, malformed, or out-of-range amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Fixed-point arithmetic overflowed.
    #[error("amount overflow in {0}")]
    AmountOverflow(&'static str),

    /// The operation kind is not handled by this kernel.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Fungible-token operation aimed at the NFT id range.
    #[error("invalid token id {0} for fungible operation")]
    InvalidTokenId(u32),

    // --- not found ---
    #[error("account {0} not found")]
    AccountNotFound(u32),

    /// Token leaf absent where a debit requires it.
    #[error("token {token_id} not found for account {account_id}")]
    TokenNotFound { account_id: u32, token_id: u32 },

    #[error("order {0} not found")]
    OrderNotFound(u64),

    #[error("NFT {0} not found")]
    NftNotFound(u64),

    // --- insufficient funds ---
    #[error("insufficient balance: account {account_id} token {token_id} has {available}, needs {required}")]
    InsufficientBalance {
        account_id: u32,
        token_id: u32,
        available: u64,
        required: u64,
    },

    /// Frozen commitment smaller than the requested release.
    #[error("insufficient frozen balance: account {account_id} token {token_id} has {frozen}, needs {required}")]
    InsufficientFrozen {
        account_id: u32,
        token_id: u32,
        frozen: u64,
        required: u64,
    },

    // --- authentication ---
    /// Signature does not verify against the stored leaf key.
    #[error("authentication failed for account {0}")]
    AuthenticationFailed(u32),

    /// Caller lacks the role a bridge or admin operation requires.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    // --- ordering ---
    /// Priority queue id gap: bridge events must arrive gapless.
    #[error("priority queue out of order on chain {chain_id}: expected {expected}, claimed {claimed}")]
    OutOfOrder {
        chain_id: u32,
        expected: i64,
        claimed: i64,
    },

    // --- uniqueness ---
    /// The content hash is already bound to an NFT id.
    #[error("duplicate NFT content hash {0}")]
    DuplicateContentHash(String),

    // --- order lifecycle ---
    /// Mutation attempted on a Completed or Revoked order.
    #[error("order {0} is closed")]
    OrderClosed(u64),

    /// ERC-721 mints must carry amount == 1.
    #[error("invalid NFT amount {amount} for protocol {protocol}")]
    InvalidNftAmount { protocol: u16, amount: u64 },

    // --- storage ---
    /// A persisted record failed to decode.
    #[error("corrupt store record under prefix {0:#04x}")]
    Corrupt(u8),
}
