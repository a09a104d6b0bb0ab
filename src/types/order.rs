//! Spot order types for the matching engine.
//!
//! ## Lifecycle
//!
//! Orders are created `Ordered` and move one-way to `Completed` (fully
//! filled) or `Revoked` (cancelled). Terminal states are immutable and
//! `balance` never increases.
//!
//! ## Persistence
//!
//! Orders are persisted through a fixed-shape SSZ record so the store
//! encoding is deterministic.

use ssz_rs::prelude::*;

// The crate-level `Result` alias must stay out of scope here: the
// `SimpleSerialize` derive expands an unqualified two-parameter
// `Result` and would pick up the alias.
use crate::error::KernelError;
use crate::store::prefix;
use crate::types::amount::{self, Amount};
use crate::types::{AccountId, L2Address, OrderId, TokenId};

// ============================================================================
// Side
// ============================================================================

/// Order side: Buy or Sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    /// Buy order (bid) - pays the right asset for the left asset.
    #[default]
    Buy,
    /// Sell order (ask) - pays the left asset for the right asset.
    Sell,
}

impl Side {
    pub fn to_u8(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }

    /// Returns the side an incoming order matches against.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// ============================================================================
// OrderStatus
// ============================================================================

/// One-way order state machine: Ordered -> Completed | Revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderStatus {
    #[default]
    Ordered,
    Completed,
    Revoked,
}

impl OrderStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            OrderStatus::Ordered => 0,
            OrderStatus::Completed => 1,
            OrderStatus::Revoked => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OrderStatus::Ordered),
            1 => Some(OrderStatus::Completed),
            2 => Some(OrderStatus::Revoked),
            _ => None,
        }
    }

    /// Terminal states accept no further mutation.
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Ordered)
    }
}

// ============================================================================
// AssetPair
// ============================================================================

/// Trading pair: quantities are in the left asset, prices and fees in the
/// right asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AssetPair {
    pub left: TokenId,
    pub right: TokenId,
}

impl AssetPair {
    pub fn new(left: TokenId, right: TokenId) -> Self {
        Self { left, right }
    }
}

// ============================================================================
// SpotOrder
// ============================================================================

/// A limit order, resting or incoming.
///
/// `balance` is the remaining quantity in left-asset units; `frozen` is
/// the remaining frozen commitment backing it (right asset for buys, left
/// asset for sells).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotOrder {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub owner_address: L2Address,
    pub pair: AssetPair,
    pub side: Side,
    /// Limit price (right per left, fixed-point).
    pub price: Amount,
    pub original_amount: Amount,
    /// Remaining quantity. Non-increasing over the order's lifetime.
    pub balance: Amount,
    /// Cumulative filled quantity (left asset).
    pub executed: Amount,
    /// Cumulative filled volume (right asset), for the average price.
    pub quote_executed: Amount,
    pub status: OrderStatus,
    /// Fee-rate snapshots taken at order creation. Authoritative for the
    /// order's whole lifetime regardless of later schedule changes.
    pub maker_rate: Amount,
    pub taker_rate: Amount,
    /// Fees paid by this order so far, in the asset it receives.
    pub accumulated_fee: Amount,
    /// Remaining frozen commitment.
    pub frozen: Amount,
}

impl SpotOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        account_id: AccountId,
        owner_address: L2Address,
        pair: AssetPair,
        side: Side,
        price: Amount,
        quantity: Amount,
        maker_rate: Amount,
        taker_rate: Amount,
    ) -> Self {
        Self {
            order_id,
            account_id,
            owner_address,
            pair,
            side,
            price,
            original_amount: quantity,
            balance: quantity,
            executed: 0,
            quote_executed: 0,
            status: OrderStatus::Ordered,
            maker_rate,
            taker_rate,
            accumulated_fee: 0,
            frozen: 0,
        }
    }

    /// Token this order's commitment is frozen in.
    pub fn commit_token(&self) -> TokenId {
        match self.side {
            Side::Buy => self.pair.right,
            Side::Sell => self.pair.left,
        }
    }

    /// Commitment required to back `quantity` of this order.
    ///
    /// Buy commitments include fee headroom at the larger of the two
    /// rate snapshots, so settlement fees are payable from the frozen
    /// funds whether the order fills as maker or as taker. Sell fees
    /// come out of the right-asset proceeds and need no headroom.
    pub fn commitment_for(&self, quantity: Amount) -> crate::error::Result<Amount> {
        match self.side {
            Side::Buy => {
                let principal = amount::mul_by_price(quantity, self.price)?;
                let rate = self.maker_rate.max(self.taker_rate);
                let headroom = amount::apply_rate(principal, rate)?;
                amount::checked_add(principal, headroom)
            }
            Side::Sell => Ok(quantity),
        }
    }

    /// Volume-weighted average execution price, zero before any fill.
    pub fn average_price(&self) -> Amount {
        if self.executed == 0 {
            return 0;
        }
        ((self.quote_executed as u128) * (amount::SCALE as u128) / (self.executed as u128)) as u64
    }

    /// Whether the order can still match or be revoked.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Record a fill. Rejected on terminal orders or overfills; flips the
    /// status to Completed when the balance reaches zero.
    pub fn fill(&mut self, quantity: Amount, quote: Amount, fee: Amount) -> crate::error::Result<()> {
        if self.status.is_terminal() {
            return Err(KernelError::OrderClosed(self.order_id));
        }
        if quantity > self.balance {
            return Err(KernelError::InvalidAmount(format!(
                "fill {} exceeds order balance {}",
                quantity, self.balance
            )));
        }
        self.balance -= quantity;
        self.executed = amount::checked_add(self.executed, quantity)?;
        self.quote_executed = amount::checked_add(self.quote_executed, quote)?;
        self.accumulated_fee = amount::checked_add(self.accumulated_fee, fee)?;
        if self.balance == 0 {
            self.status = OrderStatus::Completed;
        }
        Ok(())
    }

    /// Revoke a resting order. Terminal orders stay untouched.
    pub fn revoke(&mut self) -> crate::error::Result<()> {
        if self.status.is_terminal() {
            return Err(KernelError::OrderClosed(self.order_id));
        }
        self.status = OrderStatus::Revoked;
        Ok(())
    }

    /// Deterministic store encoding.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        let record = SpotOrderRecord {
            order_id: self.order_id,
            account_id: self.account_id as u64,
            owner_address: self.owner_address,
            left: self.pair.left as u64,
            right: self.pair.right as u64,
            side_raw: self.side.to_u8(),
            price: self.price,
            original_amount: self.original_amount,
            balance: self.balance,
            executed: self.executed,
            quote_executed: self.quote_executed,
            status_raw: self.status.to_u8(),
            maker_rate: self.maker_rate,
            taker_rate: self.taker_rate,
            accumulated_fee: self.accumulated_fee,
            frozen: self.frozen,
        };
        ssz_rs::serialize(&record).map_err(|_| KernelError::Corrupt(prefix::ORDER))
    }

    pub fn from_bytes(data: &[u8]) -> crate::error::Result<Self> {
        let record: SpotOrderRecord =
            ssz_rs::deserialize(data).map_err(|_| KernelError::Corrupt(prefix::ORDER))?;
        Ok(Self {
            order_id: record.order_id,
            account_id: record.account_id as AccountId,
            owner_address: record.owner_address,
            pair: AssetPair::new(record.left as TokenId, record.right as TokenId),
            side: Side::from_u8(record.side_raw).ok_or(KernelError::Corrupt(prefix::ORDER))?,
            price: record.price,
            original_amount: record.original_amount,
            balance: record.balance,
            executed: record.executed,
            quote_executed: record.quote_executed,
            status: OrderStatus::from_u8(record.status_raw)
                .ok_or(KernelError::Corrupt(prefix::ORDER))?,
            maker_rate: record.maker_rate,
            taker_rate: record.taker_rate,
            accumulated_fee: record.accumulated_fee,
            frozen: record.frozen,
        })
    }
}

/// Fixed-shape SSZ record backing [`SpotOrder`] persistence.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct SpotOrderRecord {
    order_id: u64,
    account_id: u64,
    owner_address: [u8; 32],
    left: u64,
    right: u64,
    side_raw: u8,
    price: u64,
    original_amount: u64,
    balance: u64,
    executed: u64,
    quote_executed: u64,
    status_raw: u8,
    maker_rate: u64,
    taker_rate: u64,
    accumulated_fee: u64,
    frozen: u64,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::amount::to_fixed;

    fn sample_order(side: Side, price: &str, qty: &str) -> SpotOrder {
        SpotOrder::new(
            1,
            10,
            [7u8; 32],
            AssetPair::new(1, 2),
            side,
            to_fixed(price).unwrap(),
            to_fixed(qty).unwrap(),
            to_fixed("0.001").unwrap(),
            to_fixed("0.002").unwrap(),
        )
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_status_transitions() {
        assert!(!OrderStatus::Ordered.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Revoked.is_terminal());
    }

    #[test]
    fn test_commit_token() {
        assert_eq!(sample_order(Side::Buy, "100", "50").commit_token(), 2);
        assert_eq!(sample_order(Side::Sell, "100", "50").commit_token(), 1);
    }

    #[test]
    fn test_commitment_for() {
        // Buy: 50 * 100 = 5000 principal + 0.2% taker headroom = 5010
        let buy = sample_order(Side::Buy, "100", "50");
        assert_eq!(
            buy.commitment_for(to_fixed("50").unwrap()).unwrap(),
            to_fixed("5010").unwrap()
        );
        let sell = sample_order(Side::Sell, "100", "50");
        assert_eq!(
            sell.commitment_for(to_fixed("50").unwrap()).unwrap(),
            to_fixed("50").unwrap()
        );
    }

    #[test]
    fn test_commitment_headroom_covers_maker_rate() {
        // Headroom follows whichever rate snapshot is larger, so a
        // maker-heavy schedule cannot starve the frozen fee funds
        let mut buy = sample_order(Side::Buy, "100", "50");
        buy.maker_rate = to_fixed("0.004").unwrap();
        assert_eq!(
            buy.commitment_for(to_fixed("50").unwrap()).unwrap(),
            to_fixed("5020").unwrap()
        );
    }

    #[test]
    fn test_fill_and_complete() {
        let mut order = sample_order(Side::Sell, "100", "50");
        order
            .fill(
                to_fixed("30").unwrap(),
                to_fixed("3000").unwrap(),
                to_fixed("3").unwrap(),
            )
            .unwrap();
        assert_eq!(order.balance, to_fixed("20").unwrap());
        assert_eq!(order.status, OrderStatus::Ordered);
        assert_eq!(order.average_price(), to_fixed("100").unwrap());

        order
            .fill(
                to_fixed("20").unwrap(),
                to_fixed("2000").unwrap(),
                to_fixed("2").unwrap(),
            )
            .unwrap();
        assert_eq!(order.balance, 0);
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.accumulated_fee, to_fixed("5").unwrap());

        // Terminal: no further fills
        assert!(matches!(
            order.fill(1, 1, 0),
            Err(KernelError::OrderClosed(1))
        ));
    }

    #[test]
    fn test_fill_overfill_rejected() {
        let mut order = sample_order(Side::Sell, "100", "50");
        assert!(order.fill(to_fixed("60").unwrap(), 0, 0).is_err());
        // Balance unchanged on failure
        assert_eq!(order.balance, to_fixed("50").unwrap());
    }

    #[test]
    fn test_revoke() {
        let mut order = sample_order(Side::Buy, "100", "50");
        order.revoke().unwrap();
        assert_eq!(order.status, OrderStatus::Revoked);
        assert!(order.revoke().is_err());
    }

    #[test]
    fn test_order_roundtrip() {
        let mut order = sample_order(Side::Buy, "100", "50");
        order.frozen = to_fixed("5000").unwrap();
        order
            .fill(to_fixed("10").unwrap(), to_fixed("1000").unwrap(), 5)
            .unwrap();
        let decoded = SpotOrder::from_bytes(&order.to_bytes().unwrap()).unwrap();
        assert_eq!(order, decoded);
    }
}
