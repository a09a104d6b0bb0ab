//! Per-market limit order book.
//!
//! ## Architecture
//!
//! - **Slab**: pre-allocated storage for O(1) order insert/remove
//! - **BTreeMap**: sorted price levels; bids keyed by `Reverse(price)`
//!   so the first entry on either side is the best price
//! - **HashMap**: order id to slab key, for O(1) revoke and fill
//!
//! The book holds only open resting orders. Order state transitions
//! (fills, completion, revocation) flow through [`SpotOrder`] so the
//! book copy and the persisted record never disagree.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use slab::Slab;

use crate::book::level::PriceLevel;
use crate::book::node::OrderNode;
use crate::error::{KernelError, Result};
use crate::types::{Amount, AssetPair, OrderId, Side, SpotOrder};

/// One (price, total quantity) row of the derived depth view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthEntry {
    pub price: Amount,
    pub quantity: Amount,
}

/// Limit order book for a single asset pair.
#[derive(Debug)]
pub struct OrderBook {
    pair: AssetPair,
    orders: Slab<OrderNode>,
    bids: BTreeMap<Reverse<Amount>, PriceLevel>,
    asks: BTreeMap<Amount, PriceLevel>,
    order_index: HashMap<OrderId, usize>,
}

impl OrderBook {
    pub fn new(pair: AssetPair) -> Self {
        Self {
            pair,
            orders: Slab::new(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::new(),
        }
    }

    #[inline]
    pub fn pair(&self) -> AssetPair {
        self.pair
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    #[inline]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.order_index.contains_key(&order_id)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&SpotOrder> {
        let key = *self.order_index.get(&order_id)?;
        self.orders.get(key).map(|node| &node.order)
    }

    /// Mutable access to a resting order's book copy. Used to keep the
    /// frozen-commitment field in step with settlement releases; price,
    /// side, and balance must not be changed through this.
    pub fn get_mut(&mut self, order_id: OrderId) -> Option<&mut SpotOrder> {
        let key = *self.order_index.get(&order_id)?;
        self.orders.get_mut(key).map(|node| &mut node.order)
    }

    // ------------------------------------------------------------------
    // Resting orders
    // ------------------------------------------------------------------

    /// Rest an open order on its side of the book.
    pub fn insert(&mut self, order: SpotOrder) -> Result<()> {
        if !order.is_open() {
            return Err(KernelError::OrderClosed(order.order_id));
        }
        let order_id = order.order_id;
        let price = order.price;
        let side = order.side;

        let key = self.orders.insert(OrderNode::new(order));
        self.order_index.insert(order_id, key);
        match side {
            Side::Buy => {
                self.bids
                    .entry(Reverse(price))
                    .or_insert_with(|| PriceLevel::new(price))
                    .push_back(key, &mut self.orders);
            }
            Side::Sell => {
                self.asks
                    .entry(price)
                    .or_insert_with(|| PriceLevel::new(price))
                    .push_back(key, &mut self.orders);
            }
        }
        Ok(())
    }

    /// Remove a resting order, returning its book copy.
    pub fn remove(&mut self, order_id: OrderId) -> Option<SpotOrder> {
        let key = self.order_index.remove(&order_id)?;
        let (price, side) = {
            let node = self.orders.get(key)?;
            (node.price(), node.order.side)
        };
        match side {
            Side::Buy => {
                if let Some(level) = self.bids.get_mut(&Reverse(price)) {
                    level.remove(key, &mut self.orders);
                    if level.is_empty() {
                        self.bids.remove(&Reverse(price));
                    }
                }
            }
            Side::Sell => {
                if let Some(level) = self.asks.get_mut(&price) {
                    level.remove(key, &mut self.orders);
                    if level.is_empty() {
                        self.asks.remove(&price);
                    }
                }
            }
        }
        Some(self.orders.remove(key).order)
    }

    /// Apply a fill to a resting maker and return the updated order.
    ///
    /// Completed makers are unlinked and dropped from the book.
    pub fn apply_fill(
        &mut self,
        order_id: OrderId,
        quantity: Amount,
        quote: Amount,
        fee: Amount,
    ) -> Result<SpotOrder> {
        let key = *self
            .order_index
            .get(&order_id)
            .ok_or(KernelError::OrderNotFound(order_id))?;
        let (completed, price, side) = {
            let node = self
                .orders
                .get_mut(key)
                .ok_or(KernelError::OrderNotFound(order_id))?;
            node.order.fill(quantity, quote, fee)?;
            (!node.order.is_open(), node.price(), node.order.side)
        };
        if completed {
            // remove() reads the already-zero remaining quantity, so the
            // level total must be reduced by the fill first
            self.reduce_level(side, price, quantity);
            Ok(self
                .remove(order_id)
                .ok_or(KernelError::OrderNotFound(order_id))?)
        } else {
            self.reduce_level(side, price, quantity);
            let node = self
                .orders
                .get(key)
                .ok_or(KernelError::OrderNotFound(order_id))?;
            Ok(node.order.clone())
        }
    }

    fn reduce_level(&mut self, side: Side, price: Amount, filled: Amount) {
        match side {
            Side::Buy => {
                if let Some(level) = self.bids.get_mut(&Reverse(price)) {
                    level.reduce_quantity(filled);
                }
            }
            Side::Sell => {
                if let Some(level) = self.asks.get_mut(&price) {
                    level.reduce_quantity(filled);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Top of book and depth
    // ------------------------------------------------------------------

    #[inline]
    pub fn best_bid(&self) -> Option<Amount> {
        self.bids.keys().next().map(|r| r.0)
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Amount> {
        self.asks.keys().next().copied()
    }

    pub fn spread(&self) -> Option<Amount> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask >= bid => Some(ask - bid),
            _ => None,
        }
    }

    /// Total resting quantity at one price, zero if the level is gone.
    pub fn level_total(&self, side: Side, price: Amount) -> Amount {
        match side {
            Side::Buy => self
                .bids
                .get(&Reverse(price))
                .map_or(0, |l| l.total_quantity),
            Side::Sell => self.asks.get(&price).map_or(0, |l| l.total_quantity),
        }
    }

    /// Aggregated depth, best price first, at most `max_levels` rows.
    pub fn depth(&self, side: Side, max_levels: usize) -> Vec<DepthEntry> {
        match side {
            Side::Buy => self
                .bids
                .values()
                .take(max_levels)
                .map(|l| DepthEntry {
                    price: l.price,
                    quantity: l.total_quantity,
                })
                .collect(),
            Side::Sell => self
                .asks
                .values()
                .take(max_levels)
                .map(|l| DepthEntry {
                    price: l.price,
                    quantity: l.total_quantity,
                })
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Matching access
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn orders(&self) -> &Slab<OrderNode> {
        &self.orders
    }

    #[inline]
    pub(crate) fn bids(&self) -> &BTreeMap<Reverse<Amount>, PriceLevel> {
        &self.bids
    }

    #[inline]
    pub(crate) fn asks(&self) -> &BTreeMap<Amount, PriceLevel> {
        &self.asks
    }
}

/// All open books, one per traded pair, created on first use.
#[derive(Debug, Default)]
pub struct Markets {
    books: HashMap<(u32, u32), OrderBook>,
}

impl Markets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(&self, pair: AssetPair) -> Option<&OrderBook> {
        self.books.get(&(pair.left, pair.right))
    }

    pub fn book_mut(&mut self, pair: AssetPair) -> &mut OrderBook {
        self.books
            .entry((pair.left, pair.right))
            .or_insert_with(|| OrderBook::new(pair))
    }

    /// Locate the book holding an order id.
    pub fn book_with_order_mut(&mut self, order_id: OrderId) -> Option<&mut OrderBook> {
        self.books.values_mut().find(|b| b.contains(order_id))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
