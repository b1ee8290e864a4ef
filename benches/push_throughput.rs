//! Push-mode throughput benchmarks.

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use padline::buffer::Buffer;
use padline::element::{Element, Pipeline, State};
use padline::elements::{FakeSink, Identity};
use padline::flow::FlowSuccess;
use padline::pad::{Pad, PadDirection};

fn bench_buffer_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_clone");

    for size in [64usize, 4096, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let buffer = Buffer::new(size);
            b.iter(|| black_box(buffer.clone()))
        });
    }
    group.finish();
}

fn bench_pad_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("pad_push");
    group.throughput(Throughput::Elements(1));

    let src = Pad::new("src", PadDirection::Src);
    let sink = Pad::new("sink", PadDirection::Sink);
    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();
    sink.set_chain_function(move |_, buffer| {
        counter.fetch_add(buffer.size() as u64, Ordering::Relaxed);
        Ok(FlowSuccess::Ok)
    });
    src.link(&sink).unwrap();
    sink.set_active(true);
    src.set_active(true);

    group.bench_function("direct", |b| {
        b.iter(|| src.push(black_box(Buffer::new(64))).unwrap())
    });
    group.finish();
}

fn bench_element_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("element_chain");

    for depth in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let pipeline = Pipeline::new("bench").unwrap();
            let mut chain = Vec::with_capacity(depth + 1);
            for i in 0..depth {
                chain.push(Element::new(format!("id{i}"), Identity::new()).unwrap());
            }
            chain.push(Element::new("sink", FakeSink::default()).unwrap());
            for element in &chain {
                pipeline.add(element).unwrap();
            }
            let refs: Vec<&Element> = chain.iter().map(|e| &**e).collect();
            Element::link_many(&refs).unwrap();

            let upstream = Pad::new("upstream", PadDirection::Src);
            upstream.link(&chain[0].static_pad("sink").unwrap()).unwrap();
            upstream.set_active(true);
            pipeline.set_state(State::Playing);

            b.iter(|| upstream.push(black_box(Buffer::new(256))).unwrap());
            pipeline.set_state(State::Null);
        });
    }
    group.finish();
}

criterion_group!(benches, bench_buffer_clone, bench_pad_push, bench_element_chain);
criterion_main!(benches);
