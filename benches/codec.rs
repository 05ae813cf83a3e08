//! Record codec microbenchmarks
//!
//! Run with: cargo bench --bench codec

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

extern crate oplogkit;

use oplogkit::oplog::{decode_entry, encode_entry};
use oplogkit::{Document, LogEntry, OpKind, OpTime};

fn entry_with_payload(fields: usize) -> LogEntry {
  let mut payload = Document::new();
  payload.insert("_id".to_string(), json!(42));
  for index in 0..fields {
    payload.insert(format!("field_{index}"), Value::String("x".repeat(16)));
  }
  LogEntry::new(OpTime::new(1_700_000_000, 1), OpKind::Insert, "bench.items", payload)
    .with_extra("v", json!(2))
}

fn bench_encode(c: &mut Criterion) {
  let mut group = c.benchmark_group("encode_entry");
  for fields in [1usize, 16, 256] {
    let entry = entry_with_payload(fields);
    let size = encode_entry(&entry).expect("encode").len() as u64;
    group.throughput(Throughput::Bytes(size));
    group.bench_with_input(BenchmarkId::from_parameter(fields), &entry, |b, entry| {
      b.iter(|| encode_entry(black_box(entry)).expect("encode"));
    });
  }
  group.finish();
}

fn bench_decode(c: &mut Criterion) {
  let mut group = c.benchmark_group("decode_entry");
  for fields in [1usize, 16, 256] {
    let bytes = encode_entry(&entry_with_payload(fields)).expect("encode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_with_input(BenchmarkId::from_parameter(fields), &bytes, |b, bytes| {
      b.iter(|| decode_entry(black_box(bytes), 0).expect("decode"));
    });
  }
  group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
