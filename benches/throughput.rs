use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use netmap_vif::fallback::FallbackPort;
use netmap_vif::prelude::*;
use std::io::IoSlice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn send(c: &mut Criterion) {
    let port = FallbackPort::builder()
        .slots(1024)
        .build()
        .expect("Failed to build fallback port");
    let mut bridge = Bridge::with_port(
        port,
        BridgeConfig::new("bench0"),
        NoopScheduler,
        |_: &Frame<'_>| {},
    )
    .expect("Failed to start bridge");

    let mut group = c.benchmark_group("send");
    group.measurement_time(Duration::from_secs(5));

    for size in [64, 128, 256, 512, 1024, 1500].iter() {
        group.throughput(Throughput::Bytes(*size as u64));

        let header = vec![0u8; 14];
        let payload = vec![0u8; *size - 14];

        group.bench_function(format!("{}_bytes", size), |b| {
            b.iter(|| {
                let segments = [IoSlice::new(&header), IoSlice::new(&payload)];
                black_box(bridge.send(black_box(&segments)))
            });
        });
    }

    group.finish();
    bridge.destroy();
}

fn receive(c: &mut Criterion) {
    let seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&seen);
    let bridge = Bridge::with_port(
        FallbackPort::builder()
            .slots(1024)
            .build()
            .expect("Failed to build fallback port"),
        BridgeConfig::new("bench0"),
        NoopScheduler,
        move |f: &Frame<'_>| {
            counter.fetch_add(f.len() as u64, Ordering::Relaxed);
        },
    )
    .expect("Failed to start bridge");

    let batch_size = 64;
    let payload = vec![0u8; 1500];

    let mut group = c.benchmark_group("receive");
    group.throughput(Throughput::Bytes((batch_size * payload.len()) as u64));
    group.bench_function("1500_bytes_x64", |b| {
        b.iter(|| {
            let target = seen.load(Ordering::Relaxed) + (batch_size * payload.len()) as u64;
            for _ in 0..batch_size {
                bridge.port().inject(0, &payload);
            }
            while seen.load(Ordering::Relaxed) < target {
                std::hint::spin_loop();
            }
        });
    });
    group.finish();

    bridge.dying();
    bridge.destroy();
}

criterion_group! {
    name = benches;
    config = Criterion::default().warm_up_time(Duration::from_secs(1));
    targets = send, receive
}

criterion_main!(benches);
