//! Bridge priority queue synchronization.
//!
//! Bridge-originated events (deposits, full exits) carry a per-chain
//! priority id assigned by the L1 contract. The kernel admits them
//! strictly gaplessly: event `n + 1` is accepted only after event `n`.
//! A rejected claim leaves the counter untouched, so the same event can
//! be retried after the gap is filled.

use tracing::debug;

use crate::error::{KernelError, Result};
use crate::store::{priority_key, KvStore, LeafStore};
use crate::types::ChainId;

/// Counter value before any event has been admitted.
pub const UNINITIALIZED: i64 = -1;

/// Last admitted priority id for a chain, [`UNINITIALIZED`] if none.
pub fn last_admitted<S: KvStore>(store: &LeafStore<S>, chain: ChainId) -> Result<i64> {
    match store.get(&priority_key(chain)) {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .try_into()
                .map_err(|_| KernelError::Corrupt(crate::store::prefix::PRIORITY))?;
            Ok(i64::from_be_bytes(raw))
        }
        None => Ok(UNINITIALIZED),
    }
}

/// Admit a claimed priority id, advancing the per-chain counter.
///
/// The claim must be exactly `last + 1`; anything else is `OutOfOrder`
/// and the counter is not advanced.
pub fn admit<S: KvStore>(store: &mut LeafStore<S>, chain: ChainId, claimed: i64) -> Result<()> {
    let last = last_admitted(store, chain)?;
    let expected = last + 1;
    if claimed != expected {
        return Err(KernelError::OutOfOrder {
            chain_id: chain,
            expected,
            claimed,
        });
    }
    store.put(priority_key(chain), claimed.to_be_bytes().to_vec());
    debug!(chain, claimed, "priority event admitted");
    Ok(())
}
