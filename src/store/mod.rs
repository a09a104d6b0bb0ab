//! Leaf store: key/value persistence with a pending-update overlay.
//!
//! ## Design
//!
//! The durable store is a plain byte-key/byte-value map behind the
//! [`KvStore`] trait; there is no schema beyond a one-byte prefix per
//! record type. All mutations produced within one state transition are
//! batched in the overlay and flushed only after the entire operation
//! succeeds; on any error the overlay is discarded in full. That is the
//! whole transactional story: all-or-nothing per operation, no locks,
//! no concurrent access.

use std::collections::BTreeMap;

use crate::types::{AccountId, ChainId, EthAddress, Hash, L2Address, NftId, OrderId, TokenId};

/// One-byte key prefixes, one per record type.
pub mod prefix {
    pub const ACCOUNT_LEAF: u8 = 0x01;
    pub const TOKEN_LEAF: u8 = 0x02;
    /// Frozen-commitment marker column (derived view, not in the tree).
    pub const FROZEN: u8 = 0x03;
    pub const ORDER: u8 = 0x04;
    pub const MARKET_DEPTH: u8 = 0x05;
    pub const NFT_STATUS: u8 = 0x06;
    /// Secondary index enforcing content_hash -> nft_id uniqueness.
    pub const NFT_HASH_INDEX: u8 = 0x07;
    /// Per-chain priority queue counter.
    pub const PRIORITY: u8 = 0x08;
    /// (eth, l2) address pair -> account id.
    pub const ADDRESS_INDEX: u8 = 0x09;
    pub const FEE_SCHEDULE: u8 = 0x0A;
    /// Kernel counters (next account id, next order id).
    pub const META: u8 = 0x0B;
}

// ============================================================================
// Key builders
// ============================================================================

pub fn account_key(id: AccountId) -> Vec<u8> {
    let mut k = Vec::with_capacity(5);
    k.push(prefix::ACCOUNT_LEAF);
    k.extend_from_slice(&id.to_be_bytes());
    k
}

pub fn token_key(account: AccountId, token: TokenId) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(prefix::TOKEN_LEAF);
    k.extend_from_slice(&account.to_be_bytes());
    k.extend_from_slice(&token.to_be_bytes());
    k
}

pub fn frozen_key(account: AccountId, token: TokenId) -> Vec<u8> {
    let mut k = token_key(account, token);
    k[0] = prefix::FROZEN;
    k
}

pub fn order_key(id: OrderId) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(prefix::ORDER);
    k.extend_from_slice(&id.to_be_bytes());
    k
}

pub fn depth_key(left: TokenId, right: TokenId, side: u8, price: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(18);
    k.push(prefix::MARKET_DEPTH);
    k.extend_from_slice(&left.to_be_bytes());
    k.extend_from_slice(&right.to_be_bytes());
    k.push(side);
    k.extend_from_slice(&price.to_be_bytes());
    k
}

pub fn nft_status_key(id: NftId) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(prefix::NFT_STATUS);
    k.extend_from_slice(&id.to_be_bytes());
    k
}

pub fn nft_hash_key(content_hash: &Hash) -> Vec<u8> {
    let mut k = Vec::with_capacity(33);
    k.push(prefix::NFT_HASH_INDEX);
    k.extend_from_slice(content_hash);
    k
}

pub fn priority_key(chain: ChainId) -> Vec<u8> {
    let mut k = Vec::with_capacity(5);
    k.push(prefix::PRIORITY);
    k.extend_from_slice(&chain.to_be_bytes());
    k
}

pub fn address_key(eth: &EthAddress, l2: &L2Address) -> Vec<u8> {
    let mut k = Vec::with_capacity(53);
    k.push(prefix::ADDRESS_INDEX);
    k.extend_from_slice(eth);
    k.extend_from_slice(l2);
    k
}

pub fn fee_key(action: u8, token: TokenId) -> Vec<u8> {
    let mut k = Vec::with_capacity(6);
    k.push(prefix::FEE_SCHEDULE);
    k.push(action);
    k.extend_from_slice(&token.to_be_bytes());
    k
}

pub fn meta_key(name: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + name.len());
    k.push(prefix::META);
    k.extend_from_slice(name.as_bytes());
    k
}

// ============================================================================
// KvStore
// ============================================================================

/// Durable byte-key/byte-value storage.
///
/// The kernel only needs point reads and writes; iteration order and
/// range scans belong to the surrounding framework.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: &[u8]);
}

/// In-memory store. BTreeMap keeps iteration deterministic for debug
/// dumps and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }
}

// ============================================================================
// LeafStore (overlay)
// ============================================================================

/// Durable store plus the pending update set for the operation in
/// progress.
///
/// Reads see pending writes first. `commit` flushes the overlay to the
/// durable store; `discard` drops it. `None` in the overlay marks a
/// pending deletion.
#[derive(Debug)]
pub struct LeafStore<S: KvStore> {
    kv: S,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<S: KvStore> LeafStore<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            pending: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(Some(value)) => Some(value.clone()),
            Some(None) => None,
            None => self.kv.get(key),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Number of pending writes (including deletions).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush the overlay into the durable store.
    pub fn commit(&mut self) {
        for (key, value) in std::mem::take(&mut self.pending) {
            match value {
                Some(v) => self.kv.put(key, v),
                None => self.kv.delete(&key),
            }
        }
    }

    /// Drop the overlay, leaving the durable store untouched.
    pub fn discard(&mut self) {
        self.pending.clear();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
