//! Authenticated state: hashing, sparse Merkle trees, and the two-level
//! account/token ledger tree.

pub mod hasher;
mod ledger;
mod smt;

pub use ledger::{BalanceOp, StateTree};
pub use smt::Smt;
