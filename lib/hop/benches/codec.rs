use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hop::{AtomicOp, Msg};

fn bench_pack(c: &mut Criterion) {
    let val = vec![0xab; 512];
    c.bench_function("pack_tset_512", |b| {
        b.iter(|| Msg::tset(black_box(b"benchkey"), black_box(&val)).unwrap())
    });

    let one = 1u32.to_le_bytes();
    c.bench_function("pack_tatomic_add", |b| {
        b.iter(|| Msg::tatomic(black_box(b"counter"), AtomicOp::Add, &[&one]).unwrap())
    });
}

fn bench_unpack(c: &mut Criterion) {
    let frame = Msg::tset(b"benchkey", &vec![0xab; 512])
        .unwrap()
        .pkt()
        .to_vec();
    c.bench_function("unpack_tset_512", |b| {
        b.iter(|| Msg::unpack(black_box(frame.clone())).unwrap())
    });
}

criterion_group!(benches, bench_pack, bench_unpack);
criterion_main!(benches);
