//! Context and store benchmarks
//!
//! Measures path fan-out through repeated undecidable branches and the cost of
//! allocating into persistent heap snapshots.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use symtensor::config::Session;
use symtensor::interp::ir::{TEBopType, ThExpr, ThStmt};
use symtensor::interp::symbolic::ExpNum;
use symtensor::interp::value::{IntValue, Value};
use symtensor::interp::{Context, ContextSet, Heap, Interpreter};

/// `depth` nested branches on an unknown integer: 2^depth paths
fn branching_program(depth: usize) -> ThStmt {
    let mut body = ThStmt::ret(ThExpr::name("acc"));
    for i in 0..depth {
        let step = ThStmt::assign(
            ThExpr::name("acc"),
            ThExpr::binop(TEBopType::Add, ThExpr::name("acc"), ThExpr::int(i as i64)),
        );
        body = ThStmt::seq(vec![
            ThStmt::if_else(
                ThExpr::binop(TEBopType::Lt, ThExpr::name("n"), ThExpr::int(i as i64)),
                step,
                ThStmt::pass(),
            ),
            body,
        ]);
    }
    ThStmt::seq(vec![ThStmt::assign(ThExpr::name("acc"), ThExpr::int(0)), body])
}

fn symbolic_root() -> Context<()> {
    let ctx = Context::new(Session::with_defaults().unwrap());
    let n: ExpNum = ctx.gen_int_gte("n", 0);
    let (addr, heap) = ctx.heap().alloc(Value::Int(IntValue::Sym(n)), None);
    let env = ctx.env().set("n", addr);
    ctx.set_heap(heap).set_env(env)
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let interp = Interpreter::new();
    for depth in [4usize, 8, 10] {
        let program = branching_program(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &program, |b, program| {
            b.iter(|| {
                let set: ContextSet<Value> = interp.run(symbolic_root(), black_box(program));
                assert_eq!(set.live().len(), 1 << depth);
                set
            })
        });
    }
    group.finish();
}

fn bench_heap_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_alloc");
    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut heap = Heap::new();
                for i in 0..count {
                    let (_, next) = heap.alloc(Value::int(i as i64), None);
                    heap = next;
                }
                black_box(heap)
            })
        });
    }
    group.finish();
}

fn bench_snapshot_shift(c: &mut Criterion) {
    let mut heap = Heap::new();
    for i in 0..1_000 {
        let (_, next) = heap.alloc(Value::int(i), None);
        heap = next;
    }
    c.bench_function("heap_shift_1000", |b| {
        b.iter(|| black_box(heap.add_offset(black_box(-1_000))))
    });
}

criterion_group!(benches, bench_fan_out, bench_heap_alloc, bench_snapshot_shift);
criterion_main!(benches);
