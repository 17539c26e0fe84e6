use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ficsgate::timeseal::{encode_at, strip_heartbeats};

fn make_stream(repeats: usize, beats: usize) -> Vec<u8> {
    let chunk = b"<12> rnbqkbnr pppppppp -------- -------- -------- -------- PPPPPPPP RNBQKBNR W -1 1 1 1 1 0 7 Newton Einstein 1 2 12 39 39 120 120 1 none (0:00) none 0\n";
    let mut out = Vec::with_capacity(chunk.len() * repeats);
    for i in 0..repeats {
        out.extend_from_slice(chunk);
        if beats > 0 && i % (repeats / beats.max(1)).max(1) == 0 {
            out.extend_from_slice(b"[G]\x00");
        }
    }
    out
}

fn bench_timeseal(c: &mut Criterion) {
    let short = b"tell 53 hello everyone";
    let long = vec![b'm'; 900]; // near the inbound frame limit

    let mut g = c.benchmark_group("timeseal");

    g.bench_function("encode_short", |b| {
        b.iter(|| encode_at(black_box(short), black_box(1_700_000_000_000)))
    });
    g.bench_function("encode_long", |b| {
        b.iter(|| encode_at(black_box(&long), black_box(1_700_000_000_000)))
    });

    let clean = make_stream(100, 0);
    let beating = make_stream(100, 10);
    g.bench_function("strip_heartbeats_clean", |b| {
        b.iter(|| strip_heartbeats(black_box(&clean)))
    });
    g.bench_function("strip_heartbeats_10", |b| {
        b.iter(|| strip_heartbeats(black_box(&beating)))
    });

    g.finish();
}

criterion_group!(benches, bench_timeseal);
criterion_main!(benches);
