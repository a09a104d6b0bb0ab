//! Trade settlement: turning a matched fill into canonical transfers.
//!
//! ## Model
//!
//! Every fill settles at the maker's limit price; the right-asset
//! volume is `quantity * price / SCALE`, and both fees are charged on
//! that volume in the right asset, each side at its own per-order rate
//! snapshot.
//!
//! A cross-account fill expands into four canonical transfers: the
//! seller delivers the left asset, the buyer delivers the right asset,
//! and each side pays its fee to the fee account. Principal transfers
//! release the payer's frozen commitment and debit the spend from the
//! freed balance; a buy commitment carries fee headroom, so the fee
//! transfer that follows draws on the released surplus.
//!
//! A self-trade (taker and maker on one account) degenerates: no asset
//! moves, so the principal transfers collapse into pure commitment
//! releases and the two fee transfers merge into one combined fee leg.
//!
//! The final fill of an order releases its entire remaining commitment,
//! so rounding dust never stays frozen.
//!
//! Each transfer is afterwards executed through the account tree with
//! the same prove-mutate-prove bracket as a manual transfer, which is
//! what keeps the witness shape uniform across operation kinds.

use crate::error::{KernelError, Result};
use crate::types::amount::{self, Amount};
use crate::types::{AccountId, Side, SpotOrder, TokenId};

/// One canonical transfer of a settlement.
///
/// `release` is taken out of the payer's frozen commitment before the
/// debit; the debit then draws on the freed balance. A transfer with
/// `from == to` moves no value and exists only for its release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementTransfer {
    pub from: AccountId,
    pub to: AccountId,
    pub token: TokenId,
    pub amount: Amount,
    pub release: Amount,
}

/// The canonical transfers and derived quantities of one settled fill.
#[derive(Debug, Clone)]
pub struct TradeSettlement {
    /// Canonical order: seller principal, buyer principal, taker fee,
    /// maker fee. Zero-amount fee transfers are omitted; a self-trade
    /// carries the combined fee as a single transfer.
    pub transfers: Vec<SettlementTransfer>,
    /// Right-asset volume at the execution price.
    pub right_amount: Amount,
    pub taker_fee: Amount,
    pub maker_fee: Amount,
    /// Commitment released from the taker's frozen balance.
    pub taker_release: Amount,
    /// Commitment released from the maker's frozen balance.
    pub maker_release: Amount,
    pub self_trade: bool,
}

/// Compute the settlement for a fill of `quantity` between an incoming
/// taker and a resting maker.
///
/// `taker_completed` marks the taker's final fill, which releases its
/// whole remaining commitment; the maker side is derived from the fill
/// exhausting `maker.balance`.
pub fn settle_trade(
    taker: &SpotOrder,
    maker: &SpotOrder,
    quantity: Amount,
    taker_completed: bool,
    fee_account: AccountId,
) -> Result<TradeSettlement> {
    if quantity == 0 || quantity > maker.balance || quantity > taker.balance {
        return Err(KernelError::InvalidAmount(format!(
            "fill quantity {} outside order balances",
            quantity
        )));
    }
    debug_assert_eq!(taker.pair, maker.pair);
    debug_assert_eq!(taker.side, maker.side.opposite());

    let pair = taker.pair;
    let price = maker.price;
    let right_amount = amount::mul_by_price(quantity, price)?;
    let taker_fee = amount::apply_rate(right_amount, taker.taker_rate)?;
    let maker_fee = amount::apply_rate(right_amount, maker.maker_rate)?;

    let maker_completed = quantity == maker.balance;
    let taker_release = release_for(taker, quantity, taker_completed)?;
    let maker_release = release_for(maker, quantity, maker_completed)?;

    let (buyer, seller) = match taker.side {
        Side::Buy => (taker, maker),
        Side::Sell => (maker, taker),
    };
    let (buyer_release, seller_release) = if buyer.order_id == taker.order_id {
        (taker_release, maker_release)
    } else {
        (maker_release, taker_release)
    };

    let self_trade = taker.account_id == maker.account_id;
    let mut transfers = Vec::with_capacity(4);
    if self_trade {
        // No asset movement: the principal transfers collapse to their
        // releases, and one combined fee transfer covers both sides.
        transfers.push(SettlementTransfer {
            from: seller.account_id,
            to: seller.account_id,
            token: pair.left,
            amount: 0,
            release: seller_release,
        });
        transfers.push(SettlementTransfer {
            from: buyer.account_id,
            to: buyer.account_id,
            token: pair.right,
            amount: 0,
            release: buyer_release,
        });
        let combined_fee = amount::checked_add(taker_fee, maker_fee)?;
        if combined_fee > 0 {
            transfers.push(SettlementTransfer {
                from: taker.account_id,
                to: fee_account,
                token: pair.right,
                amount: combined_fee,
                release: 0,
            });
        }
    } else {
        transfers.push(SettlementTransfer {
            from: seller.account_id,
            to: buyer.account_id,
            token: pair.left,
            amount: quantity,
            release: seller_release,
        });
        transfers.push(SettlementTransfer {
            from: buyer.account_id,
            to: seller.account_id,
            token: pair.right,
            amount: right_amount,
            release: buyer_release,
        });
        if taker_fee > 0 {
            transfers.push(SettlementTransfer {
                from: taker.account_id,
                to: fee_account,
                token: pair.right,
                amount: taker_fee,
                release: 0,
            });
        }
        if maker_fee > 0 {
            transfers.push(SettlementTransfer {
                from: maker.account_id,
                to: fee_account,
                token: pair.right,
                amount: maker_fee,
                release: 0,
            });
        }
    }

    Ok(TradeSettlement {
        transfers,
        right_amount,
        taker_fee,
        maker_fee,
        taker_release,
        maker_release,
        self_trade,
    })
}

/// Commitment released by this fill: the pro-rata commitment at the
/// order's own limit price (fee headroom included on the buy side), or
/// the whole remainder on the final fill.
fn release_for(order: &SpotOrder, quantity: Amount, is_final: bool) -> Result<Amount> {
    if is_final {
        return Ok(order.frozen);
    }
    Ok(order.commitment_for(quantity)?.min(order.frozen))
}

// ============================================================================
// Unit Tests
// ============================================================================
