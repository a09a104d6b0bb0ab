//! # zkledger
//!
//! Deterministic state-transition core for a ZK-rollup exchange ledger.
//!
//! ## Architecture
//!
//! The kernel consists of:
//! - **Types**: Fixed-point amounts, account/token leaves, orders,
//!   witness records
//! - **Store**: Byte-key/value persistence with a pending-update overlay
//! - **Tree**: Two-level authenticated state tree (accounts over token
//!   sub-trees), one root committing to every balance
//! - **Book**: Per-market CLOB with slab-based storage and a pure
//!   price-time-priority match planner
//! - **Settle**: Canonical transfer expansion for matched fills
//! - **Exec**: The operation dispatcher gluing everything together
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical inputs produce identical roots and
//!    witness streams on any machine
//! 2. **No Floating Point**: all math uses fixed-point arithmetic
//!    (10^8 scaling) with widened intermediates
//! 3. **All-or-Nothing**: one journal bracket per operation; the first
//!    error discards every pending change
//! 4. **Uniform Witnesses**: every leaf mutation is bracketed by an
//!    inclusion proof before and after, so one circuit family proves
//!    every operation kind

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: amounts, leaves, orders, witness records
pub mod types;

/// Error taxonomy shared by every module
pub mod error;

/// Immutable chain configuration and tree dimensions
pub mod config;

/// Key/value persistence with the pending-update overlay
pub mod store;

/// Two-level authenticated state tree
pub mod tree;

/// L2 operation authentication (ed25519)
pub mod auth;

/// Bridge priority queue synchronization
pub mod queue;

/// Flat fee schedule and trading rates
pub mod fees;

/// Content-hash addressed NFT registry
pub mod nft;

/// Per-market order books and the match planner
pub mod book;

/// Trade settlement: fills to canonical transfers
pub mod settle;

/// The state machine dispatching operations
pub mod exec;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use book::{plan_match, MatchPlan, Markets, OrderBook};
pub use config::ChainConfig;
pub use error::{KernelError, Result};
pub use exec::{Operation, StateMachine};
pub use store::{KvStore, LeafStore, MemoryKv};
pub use tree::StateTree;
pub use types::{
    AccountLeaf, Amount, AssetPair, OperationInfo, Side, SpotOrder, TokenLeaf, TxType,
};
