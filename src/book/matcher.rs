//! Price-time-priority matching.
//!
//! ## Algorithm
//!
//! An incoming order walks the opposite side of the book from the best
//! price inward, consuming resting orders in FIFO order within each
//! level, for as long as the limit prices cross. Every fill executes at
//! the resting (maker) price.
//!
//! The walk stops when the incoming order is exhausted, prices stop
//! crossing, or the per-transaction match cap is hit. The cap is the
//! kernel's only admission-control device: it bounds the number of
//! settlement legs a single transaction can expand into.
//!
//! The planner never mutates the book. The state machine settles each
//! planned fill against the balance tree first and applies the fills to
//! the book only once the whole transaction has succeeded.

use crate::book::book::OrderBook;
use crate::types::{AccountId, Amount, OrderId, Side, SpotOrder};

/// One planned fill against a resting maker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFill {
    pub maker_order_id: OrderId,
    pub maker_account_id: AccountId,
    /// Execution price: always the maker's limit price.
    pub price: Amount,
    /// Fill quantity in left-asset units.
    pub quantity: Amount,
    /// True if this fill exhausts the maker.
    pub maker_completed: bool,
}

/// Outcome of one matching pass.
#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<PlannedFill>,
    /// Taker quantity left unmatched after the pass.
    pub taker_remaining: Amount,
    /// True if the pass stopped at the match cap rather than at the
    /// price boundary.
    pub capped: bool,
}

impl MatchPlan {
    pub fn filled_quantity(&self) -> Amount {
        self.fills.iter().map(|f| f.quantity).sum()
    }
}

/// Plan the fills for `taker` against the book.
///
/// `max_match_count` bounds `plan.fills.len()`; the remainder of a
/// capped or uncrossed taker is reported in `taker_remaining` and rests
/// on the book afterwards.
pub fn plan_match(book: &OrderBook, taker: &SpotOrder, max_match_count: usize) -> MatchPlan {
    let mut plan = MatchPlan {
        taker_remaining: taker.balance,
        ..MatchPlan::default()
    };
    if max_match_count == 0 || taker.balance == 0 {
        return plan;
    }

    match taker.side {
        Side::Buy => {
            for level in book.asks().values() {
                if level.price > taker.price {
                    break;
                }
                if !walk_level(book, level.peek_head(), max_match_count, &mut plan) {
                    return plan;
                }
            }
        }
        Side::Sell => {
            for level in book.bids().values() {
                if level.price < taker.price {
                    break;
                }
                if !walk_level(book, level.peek_head(), max_match_count, &mut plan) {
                    return plan;
                }
            }
        }
    }
    plan
}

/// Consume one level head-to-tail. Returns false when the pass is done
/// (taker exhausted or cap hit).
fn walk_level(
    book: &OrderBook,
    head: Option<usize>,
    max_match_count: usize,
    plan: &mut MatchPlan,
) -> bool {
    let slab = book.orders();
    let mut cursor = head;
    while let Some(key) = cursor {
        let node = match slab.get(key) {
            Some(node) => node,
            None => break,
        };
        let quantity = plan.taker_remaining.min(node.remaining());
        if quantity > 0 {
            plan.fills.push(PlannedFill {
                maker_order_id: node.order_id(),
                maker_account_id: node.order.account_id,
                price: node.price(),
                quantity,
                maker_completed: quantity == node.remaining(),
            });
            plan.taker_remaining -= quantity;
        }
        if plan.taker_remaining == 0 {
            return false;
        }
        if plan.fills.len() >= max_match_count {
            plan.capped = true;
            return false;
        }
        cursor = node.next;
    }
    true
}

// ============================================================================
// Unit Tests
// ============================================================================
