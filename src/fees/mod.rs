//! Flat fee schedule.
//!
//! Flat fees are keyed by (operation kind, fee token). Each entry keeps
//! the previous value alongside the current one: an update shifts the
//! current value into the previous slot, so operations signed against
//! the pre-update schedule can still be validated during the handover
//! window. Role enforcement (manager-only updates) happens in the state
//! machine, not here.

use tracing::info;

use crate::error::{KernelError, Result};
use crate::store::{fee_key, KvStore, LeafStore};
use crate::types::{Amount, TokenId, TxType};

/// Schedule slots for trading rates, outside the `TxType` byte range.
/// Rates are keyed by the pair's right asset and snapshotted onto each
/// order at creation; the snapshot stays authoritative for the order's
/// whole lifetime.
const MAKER_RATE_ACTION: u8 = 0xF0;
const TAKER_RATE_ACTION: u8 = 0xF1;

/// One fee schedule slot: the in-force value and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeEntry {
    pub previous: Amount,
    pub current: Amount,
}

impl FeeEntry {
    /// True if `charged` matches either the current or previous value.
    pub fn accepts(&self, charged: Amount) -> bool {
        charged == self.current || charged == self.previous
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.previous.to_be_bytes());
        out.extend_from_slice(&self.current.to_be_bytes());
        out
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 16 {
            return Err(KernelError::Corrupt(crate::store::prefix::FEE_SCHEDULE));
        }
        Ok(Self {
            previous: u64::from_be_bytes(data[0..8].try_into().unwrap()),
            current: u64::from_be_bytes(data[8..16].try_into().unwrap()),
        })
    }
}

/// Fetch the schedule entry for an operation kind; zero if never set.
pub fn get<S: KvStore>(store: &LeafStore<S>, action: TxType, token: TokenId) -> Result<FeeEntry> {
    get_raw(store, action.as_u8(), token)
}

/// Update the schedule, rotating the old current value into `previous`.
pub fn set<S: KvStore>(
    store: &mut LeafStore<S>,
    action: TxType,
    token: TokenId,
    value: Amount,
) -> Result<FeeEntry> {
    let entry = set_raw(store, action.as_u8(), token, value)?;
    info!(
        action = action.as_u8(),
        token,
        previous = entry.previous,
        current = entry.current,
        "fee schedule updated"
    );
    Ok(entry)
}

fn get_raw<S: KvStore>(store: &LeafStore<S>, action: u8, token: TokenId) -> Result<FeeEntry> {
    match store.get(&fee_key(action, token)) {
        Some(bytes) => FeeEntry::from_bytes(&bytes),
        None => Ok(FeeEntry::default()),
    }
}

fn set_raw<S: KvStore>(
    store: &mut LeafStore<S>,
    action: u8,
    token: TokenId,
    value: Amount,
) -> Result<FeeEntry> {
    let old = get_raw(store, action, token)?;
    let entry = FeeEntry {
        previous: old.current,
        current: value,
    };
    store.put(fee_key(action, token), entry.to_bytes());
    Ok(entry)
}

/// Current (maker_rate, taker_rate) for a market, keyed by its right
/// asset. Zero until set.
pub fn trade_rates<S: KvStore>(
    store: &LeafStore<S>,
    right_token: TokenId,
) -> Result<(Amount, Amount)> {
    let maker = get_raw(store, MAKER_RATE_ACTION, right_token)?.current;
    let taker = get_raw(store, TAKER_RATE_ACTION, right_token)?.current;
    Ok((maker, taker))
}

/// Update the trading rates for a market.
pub fn set_trade_rates<S: KvStore>(
    store: &mut LeafStore<S>,
    right_token: TokenId,
    maker_rate: Amount,
    taker_rate: Amount,
) -> Result<()> {
    set_raw(store, MAKER_RATE_ACTION, right_token, maker_rate)?;
    set_raw(store, TAKER_RATE_ACTION, right_token, taker_rate)?;
    info!(right_token, maker_rate, taker_rate, "trade rates updated");
    Ok(())
}
