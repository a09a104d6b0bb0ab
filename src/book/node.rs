//! Slab node wrapping a resting order.
//!
//! Orders at one price level form a doubly-linked FIFO queue; the links
//! are slab keys, so removal from anywhere in the queue is O(1) once the
//! key is known.

use crate::types::{Amount, OrderId, SpotOrder};

/// A resting order plus its queue links.
#[derive(Debug, Clone)]
pub struct OrderNode {
    pub order: SpotOrder,

    /// Next (newer) order at the same price, slab key.
    pub next: Option<usize>,

    /// Previous (older) order at the same price, slab key.
    pub prev: Option<usize>,
}

impl OrderNode {
    #[inline]
    pub fn new(order: SpotOrder) -> Self {
        Self {
            order,
            next: None,
            prev: None,
        }
    }

    #[inline]
    pub fn order_id(&self) -> OrderId {
        self.order.order_id
    }

    #[inline]
    pub fn price(&self) -> Amount {
        self.order.price
    }

    /// Remaining quantity in left-asset units.
    #[inline]
    pub fn remaining(&self) -> Amount {
        self.order.balance
    }

    #[inline]
    pub fn is_unlinked(&self) -> bool {
        self.next.is_none() && self.prev.is_none()
    }
}
