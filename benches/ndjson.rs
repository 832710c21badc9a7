use bevy_ollama::{CancelHandle, compose, decode_stream};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::io::Cursor;

fn stream_body(lines: usize) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..lines {
        body.push_str(&format!(
            "{{\"model\":\"llama3.2\",\"created_at\":\"2024-09-25T10:00:00Z\",\"response\":\"token{i} \",\"done\":false}}\n"
        ));
    }
    body.push_str("{\"model\":\"llama3.2\",\"response\":\"\",\"done\":true,\"eval_count\":4096}\n");
    body.into_bytes()
}

fn bench_decode(c: &mut Criterion) {
    let body = stream_body(4096);
    let mut group = c.benchmark_group("decode_stream");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("4096_lines", |b| {
        b.iter(|| {
            let mut text = String::new();
            let stats = decode_stream(Cursor::new(black_box(&body)), &CancelHandle::new(), |chunk| {
                text.push_str(&chunk)
            })
            .unwrap();
            black_box((stats, text))
        })
    });
    group.finish();
}

fn bench_compose(c: &mut Criterion) {
    c.bench_function("compose_all_fragments", |b| {
        b.iter(|| {
            compose(
                black_box(Some("You are a helpful, respectful and honest assistant.")),
                black_box(Some("Explain this in simple terms.")),
                black_box(Some("  what is ndjson?  ")),
            )
        })
    });
}

criterion_group!(benches, bench_decode, bench_compose);
criterion_main!(benches);
