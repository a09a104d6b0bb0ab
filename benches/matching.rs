//! Benchmarks for the matching layer.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark
//! cargo bench -- plan_single_level
//! ```
//!
//! Results are saved to `target/criterion/` with HTML reports.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use zkledger::types::{AssetPair, SpotOrder};
use zkledger::{plan_match, OrderBook, Side};

const PAIR_LEFT: u32 = 1;
const PAIR_RIGHT: u32 = 2;
const SCALE: u64 = 100_000_000;

// ============================================================================
// HELPER FUNCTIONS - Deterministic order generation
// ============================================================================

fn make_order(id: u64, account: u32, side: Side, price: u64, quantity: u64) -> SpotOrder {
    SpotOrder::new(
        id,
        account,
        [0u8; 32],
        AssetPair::new(PAIR_LEFT, PAIR_RIGHT),
        side,
        price,
        quantity,
        0,
        0,
    )
}

/// Pre-populate a book with asks at ascending price levels.
fn populate_asks(book: &mut OrderBook, count: usize, base_price: u64, price_step: u64) {
    for i in 0..count {
        let price = base_price + (i as u64 % 10) * price_step;
        let order = make_order(i as u64 + 1, 10 + i as u32, Side::Sell, price, SCALE);
        book.insert(order).unwrap();
    }
}

/// Deterministic mixed order flow for throughput benchmarks.
fn generate_order_batch(count: usize, seed: u64) -> Vec<SpotOrder> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut orders = Vec::with_capacity(count);
    for i in 0..count {
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let price = (95 + rng.gen_range(0..10)) * SCALE;
        let quantity = rng.gen_range(1..5) * SCALE;
        orders.push(make_order(i as u64 + 1, 10 + i as u32, side, price, quantity));
    }
    orders
}

// ============================================================================
// BENCHMARKS
// ============================================================================

/// Planning one fill against a deep single level.
fn bench_plan_single_level(c: &mut Criterion) {
    let mut book = OrderBook::new(AssetPair::new(PAIR_LEFT, PAIR_RIGHT));
    populate_asks(&mut book, 1_000, 100 * SCALE, 0);
    let taker = make_order(0, 9, Side::Buy, 100 * SCALE, SCALE);

    c.bench_function("plan_single_level", |b| {
        b.iter(|| black_box(plan_match(black_box(&book), black_box(&taker), 32)))
    });
}

/// Planning across price levels with varying match caps.
fn bench_plan_with_match_cap(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_with_match_cap");
    let mut book = OrderBook::new(AssetPair::new(PAIR_LEFT, PAIR_RIGHT));
    populate_asks(&mut book, 1_000, 100 * SCALE, SCALE);
    let taker = make_order(0, 9, Side::Buy, 120 * SCALE, 500 * SCALE);

    for cap in [1usize, 8, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(cap), &cap, |b, &cap| {
            b.iter(|| black_box(plan_match(black_box(&book), black_box(&taker), cap)))
        });
    }
    group.finish();
}

/// Book maintenance throughput: insert a batch, then drain via fills.
fn bench_book_insert_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("book_insert");
    for count in [100usize, 1_000, 10_000] {
        let orders = generate_order_batch(count, 42);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &orders, |b, orders| {
            b.iter_batched(
                || orders.clone(),
                |orders| {
                    let mut book = OrderBook::new(AssetPair::new(PAIR_LEFT, PAIR_RIGHT));
                    for order in orders {
                        book.insert(order).unwrap();
                    }
                    black_box(book.order_count())
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Fill application including level bookkeeping and completed-maker
/// removal.
fn bench_apply_fill(c: &mut Criterion) {
    c.bench_function("apply_fill_partial", |b| {
        b.iter_batched(
            || {
                let mut book = OrderBook::new(AssetPair::new(PAIR_LEFT, PAIR_RIGHT));
                populate_asks(&mut book, 100, 100 * SCALE, 0);
                book
            },
            |mut book| {
                book.apply_fill(1, SCALE / 2, 50 * SCALE, 0).unwrap();
                black_box(book.order_count())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_plan_single_level,
    bench_plan_with_match_cap,
    bench_book_insert_throughput,
    bench_apply_fill
);
criterion_main!(benches);
