use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use fabline_catalog::{ItemQuantity, PieceKind, PrintJob, ProductNode, ProductType};
use fabline_core::{BatchId, OrderId, ProductId};
use fabline_orders::Order;
use fabline_production::{ConsolidationPlan, consolidate, explode};

fn pid(s: &str) -> ProductId {
    ProductId::new(s).expect("static product id")
}

fn piece(id: &str, quantity: u32, cap: Option<u32>) -> ProductNode {
    ProductNode {
        product_id: pid(id),
        product_type: ProductType::Piece,
        name: id.to_string(),
        quantity,
        piece_kind: Some(PieceKind::Simple),
        print_jobs: vec![PrintJob {
            parts: vec![ItemQuantity::new(pid(&format!("{id}-body")), "Body", 1)],
            filaments: vec![ItemQuantity::new(pid("pla"), "PLA", 12)],
            supplies: vec![],
            print_minutes: 40,
            max_batch_size: cap,
        }],
        components: vec![],
    }
}

/// A kit of `models` models, each holding three distinct pieces.
fn kit_order(number: u64, models: u32) -> Order {
    let model = ProductNode {
        product_id: pid("model-a"),
        product_type: ProductType::Model,
        name: "Model A".into(),
        quantity: models,
        piece_kind: None,
        print_jobs: vec![],
        components: vec![piece("p1", 1, Some(8)), piece("p2", 2, Some(8)), piece("p3", 1, None)],
    };
    let kit = ProductNode {
        product_id: pid("kit-a"),
        product_type: ProductType::Kit,
        name: "Kit A".into(),
        quantity: 1,
        piece_kind: None,
        print_jobs: vec![],
        components: vec![model],
    };
    Order::new(OrderId::new(), number, vec![kit], Utc::now())
}

fn bench_explosion(c: &mut Criterion) {
    let mut group = c.benchmark_group("explosion");
    for models in [1u32, 10, 100].iter() {
        let order = kit_order(1, *models);
        group.throughput(Throughput::Elements(u64::from(*models)));
        group.bench_with_input(BenchmarkId::new("kit_models", models), &order, |b, order| {
            b.iter(|| black_box(explode(order, Utc::now()).expect("valid order")));
        });
    }
    group.finish();
}

fn bench_consolidation_into_open_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("consolidation");
    for orders in [1usize, 10, 50].iter() {
        // Open batches left behind by earlier orders.
        let mut open = Vec::new();
        for number in 0..*orders {
            let explosion = explode(&kit_order(number as u64, 3), Utc::now()).expect("valid order");
            let plan: ConsolidationPlan = consolidate(&open, explosion.demands, BatchId::new, Utc::now());
            plan.apply(&mut open);
        }
        let incoming = explode(&kit_order(999, 3), Utc::now()).expect("valid order");

        group.bench_with_input(BenchmarkId::new("merge_after_orders", orders), &open, |b, open| {
            b.iter(|| {
                black_box(consolidate(
                    open,
                    incoming.demands.clone(),
                    BatchId::new,
                    Utc::now(),
                ))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_explosion, bench_consolidation_into_open_batches);
criterion_main!(benches);
