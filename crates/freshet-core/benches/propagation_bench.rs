use criterion::{black_box, criterion_group, criterion_main, Criterion};
use freshet_core::{Behavior, Runtime};

fn bench_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_chain");
    for depth in [8usize, 64] {
        group.bench_function(format!("depth_{depth}"), |bench| {
            let rt = Runtime::new();
            let (cell, set) = rt.make_cell(0i64);
            let mut chain = Vec::with_capacity(depth);
            let mut tip = cell.map(|x| x + 1);
            for _ in 1..depth {
                let next = tip.map(|x| x + 1);
                chain.push(tip);
                tip = next;
            }
            let mut value = 0i64;
            bench.iter(|| {
                value += 1;
                set.set(black_box(value));
                black_box(tip.get())
            });
        });
    }
    group.finish();
}

fn bench_diamond(c: &mut Criterion) {
    c.bench_function("diamond", |bench| {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0i64);
        let b = a.map(|x| x + 1);
        let cc = a.map(|x| x * 2);
        let d = Behavior::lift2(&b, &cc, |x, y| x + y);
        let mut value = 0i64;
        bench.iter(|| {
            value += 1;
            set.set(black_box(value));
            black_box(d.get())
        });
    });
}

fn bench_event_fanout(c: &mut Criterion) {
    c.bench_function("event_fanout_32", |bench| {
        let rt = Runtime::new();
        let (e, s) = rt.make_event::<i64>();
        let held: Vec<_> = (0..32).map(|k| e.map(move |v| v + k).hold(0)).collect();
        let mut value = 0i64;
        bench.iter(|| {
            value += 1;
            s.send(black_box(value));
            black_box(held.last().map(|b| b.get()))
        });
    });
}

criterion_group!(benches, bench_map_chain, bench_diamond, bench_event_fanout);
criterion_main!(benches);
