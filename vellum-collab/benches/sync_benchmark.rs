use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::sync::mpsc;

use vellum_collab::{BroadcastPayload, RoomKey, SyncMode, TransportPortal};
use vellum_scene::{ElementType, SceneElement};

fn elements(n: usize) -> Vec<SceneElement> {
    (0..n)
        .map(|i| {
            let mut el = SceneElement::new(format!("el-{i}"), ElementType::Rectangle);
            el.version = 1;
            el
        })
        .collect()
}

fn bench_seal_open(c: &mut Criterion) {
    let key = RoomKey::generate();
    let payload = BroadcastPayload::Update {
        elements: elements(100),
    };
    let plaintext = payload.encode().unwrap();

    c.bench_function("seal_100_element_payload", |b| {
        b.iter(|| key.seal(black_box(&plaintext)).unwrap())
    });

    let sealed = key.seal(&plaintext).unwrap();
    c.bench_function("open_100_element_payload", |b| {
        b.iter(|| key.open(black_box(&sealed.iv), black_box(&sealed.ciphertext)).unwrap())
    });
}

fn bench_payload_encode(c: &mut Criterion) {
    let payload = BroadcastPayload::Update {
        elements: elements(100),
    };
    c.bench_function("encode_100_element_payload", |b| {
        b.iter(|| black_box(&payload).encode().unwrap())
    });
}

fn bench_watermark_filter(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    // 1000 elements already sent, 50 bumped: the filter does the work.
    c.bench_function("broadcast_1k_elements_50_changed", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let (tx, mut rx) = mpsc::channel(16);
                let mut portal = TransportPortal::new(RoomKey::generate(), "bench-room", tx);

                let mut els = elements(1000);
                portal.broadcast_scene(&els, SyncMode::Incremental).await.unwrap();
                let _ = rx.recv().await;

                for el in els.iter_mut().take(50) {
                    el.version += 1;
                }
                let sent = portal.broadcast_scene(&els, SyncMode::Incremental).await.unwrap();
                let _ = rx.recv().await;
                black_box(sent)
            })
        })
    });
}

criterion_group!(
    benches,
    bench_seal_open,
    bench_payload_encode,
    bench_watermark_filter
);
criterion_main!(benches);
