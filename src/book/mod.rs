//! Limit order books: slab-backed price levels, per-market books, and
//! the price-time-priority match planner.

#[allow(clippy::module_inception)]
mod book;
mod level;
mod matcher;
mod node;

pub use book::{DepthEntry, Markets, OrderBook};
pub use level::PriceLevel;
pub use matcher::{plan_match, MatchPlan, PlannedFill};
pub use node::OrderNode;
