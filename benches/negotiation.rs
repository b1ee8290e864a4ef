//! Caps algebra and launch parsing benchmarks.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use padline::caps::Caps;
use padline::launch::parse_description;

const AUDIO: &str = "audio/x-raw, format=(string){ S16LE, S24LE, F32LE }, rate=(int)[ 8000, 192000 ], channels=(int)[ 1, 8 ]";
const VIDEO: &str = "video/x-raw, format=(string){ I420, NV12 }, width=(int)[ 16, 4096 ], height=(int)[ 16, 2160 ], framerate=(fraction)30/1; audio/x-raw, rate=(int){ 44100, 48000 }, channels=(int)2";

fn bench_caps_parse(c: &mut Criterion) {
    c.bench_function("caps_parse", |b| {
        b.iter(|| black_box(AUDIO).parse::<Caps>().unwrap())
    });
}

fn bench_caps_intersect(c: &mut Criterion) {
    let audio: Caps = AUDIO.parse().unwrap();
    let multi: Caps = VIDEO.parse().unwrap();
    let mut group = c.benchmark_group("caps");
    group.bench_function("intersect", |b| {
        b.iter(|| black_box(audio.intersect(black_box(&multi))))
    });
    group.bench_function("is_subset", |b| {
        let fixed = audio.intersect(&multi).fixate().unwrap();
        b.iter(|| black_box(fixed.is_subset(black_box(&audio))))
    });
    group.bench_function("fixate", |b| b.iter(|| black_box(audio.fixate())));
    group.finish();
}

fn bench_launch_parse(c: &mut Criterion) {
    let description = "fakesrc num-buffers=100 ! tee name=t ! queue max-size-buffers=10 ! identity ! fakesink  t. ! queue leaky=downstream ! fakesink sync=true";
    c.bench_function("launch_parse", |b| {
        b.iter(|| parse_description(black_box(description)).unwrap())
    });
}

criterion_group!(benches, bench_caps_parse, bench_caps_intersect, bench_launch_parse);
criterion_main!(benches);
