//! Price level: the FIFO queue of orders resting at one price.
//!
//! The queue is a doubly-linked list threaded through the order slab.
//! New orders append at the tail; matching consumes from the head, which
//! is what gives time priority within a price.

use slab::Slab;

use crate::book::node::OrderNode;
use crate::types::Amount;

/// Queue metadata for one price point. The order data itself lives in
/// the slab.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Amount,

    /// Sum of remaining quantities at this price.
    pub total_quantity: Amount,

    /// Oldest order (matched first), slab key.
    pub head: Option<usize>,

    /// Newest order, slab key.
    pub tail: Option<usize>,

    pub order_count: usize,
}

impl PriceLevel {
    pub fn new(price: Amount) -> Self {
        Self {
            price,
            total_quantity: 0,
            head: None,
            tail: None,
            order_count: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order_count == 0
    }

    #[inline]
    pub fn peek_head(&self) -> Option<usize> {
        self.head
    }

    /// Append an order at the tail of the queue.
    ///
    /// Panics if `key` is not in the slab; keys are produced by the
    /// owning book immediately before linking.
    pub fn push_back(&mut self, key: usize, slab: &mut Slab<OrderNode>) {
        let node = slab.get_mut(key).expect("invalid slab key");
        let quantity = node.remaining();
        node.prev = self.tail;
        node.next = None;

        if let Some(tail_key) = self.tail {
            slab.get_mut(tail_key).expect("invalid tail key").next = Some(key);
        } else {
            self.head = Some(key);
        }

        self.tail = Some(key);
        self.order_count += 1;
        self.total_quantity = self.total_quantity.saturating_add(quantity);
    }

    /// Unlink an order from anywhere in the queue.
    ///
    /// Returns the remaining quantity that was still resting.
    pub fn remove(&mut self, key: usize, slab: &mut Slab<OrderNode>) -> Amount {
        let node = slab.get(key).expect("invalid slab key");
        let quantity = node.remaining();
        let prev_key = node.prev;
        let next_key = node.next;

        match prev_key {
            Some(prev) => slab.get_mut(prev).expect("invalid prev key").next = next_key,
            None => self.head = next_key,
        }
        match next_key {
            Some(next) => slab.get_mut(next).expect("invalid next key").prev = prev_key,
            None => self.tail = prev_key,
        }

        let node = slab.get_mut(key).expect("invalid slab key");
        node.prev = None;
        node.next = None;

        self.order_count -= 1;
        self.total_quantity = self.total_quantity.saturating_sub(quantity);
        quantity
    }

    /// Shrink the level total after a partial fill.
    pub fn reduce_quantity(&mut self, filled: Amount) {
        self.total_quantity = self.total_quantity.saturating_sub(filled);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::amount::to_fixed;
    use crate::types::{AssetPair, Side, SpotOrder};

    fn insert_order(slab: &mut Slab<OrderNode>, id: u64, qty: &str) -> usize {
        let order = SpotOrder::new(
            id,
            3,
            [0u8; 32],
            AssetPair::new(1, 2),
            Side::Buy,
            to_fixed("100").unwrap(),
            to_fixed(qty).unwrap(),
            0,
            0,
        );
        slab.insert(OrderNode::new(order))
    }

    #[test]
    fn test_fifo_order_maintained() {
        let mut slab = Slab::new();
        let mut level = PriceLevel::new(to_fixed("100").unwrap());

        let k1 = insert_order(&mut slab, 1, "1");
        let k2 = insert_order(&mut slab, 2, "2");
        let k3 = insert_order(&mut slab, 3, "3");
        level.push_back(k1, &mut slab);
        level.push_back(k2, &mut slab);
        level.push_back(k3, &mut slab);

        assert_eq!(level.order_count, 3);
        assert_eq!(level.total_quantity, to_fixed("6").unwrap());
        assert_eq!(level.peek_head(), Some(k1));
        assert_eq!(slab[k1].next, Some(k2));
        assert_eq!(slab[k3].prev, Some(k2));
    }

    #[test]
    fn test_remove_middle_relinks() {
        let mut slab = Slab::new();
        let mut level = PriceLevel::new(to_fixed("100").unwrap());

        let k1 = insert_order(&mut slab, 1, "1");
        let k2 = insert_order(&mut slab, 2, "2");
        let k3 = insert_order(&mut slab, 3, "3");
        level.push_back(k1, &mut slab);
        level.push_back(k2, &mut slab);
        level.push_back(k3, &mut slab);

        let removed = level.remove(k2, &mut slab);
        assert_eq!(removed, to_fixed("2").unwrap());
        assert_eq!(level.order_count, 2);
        assert_eq!(slab[k1].next, Some(k3));
        assert_eq!(slab[k3].prev, Some(k1));
        assert!(slab[k2].is_unlinked());
    }

    #[test]
    fn test_remove_only_order_empties_level() {
        let mut slab = Slab::new();
        let mut level = PriceLevel::new(to_fixed("100").unwrap());

        let k = insert_order(&mut slab, 1, "5");
        level.push_back(k, &mut slab);
        level.remove(k, &mut slab);

        assert!(level.is_empty());
        assert!(level.head.is_none());
        assert!(level.tail.is_none());
        assert_eq!(level.total_quantity, 0);
    }

    #[test]
    fn test_reduce_quantity_saturates() {
        let mut level = PriceLevel::new(100);
        level.total_quantity = 50;
        level.reduce_quantity(30);
        assert_eq!(level.total_quantity, 20);
        level.reduce_quantity(100);
        assert_eq!(level.total_quantity, 0);
    }
}
