//! Performance benchmarks for the stream client.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gdds_client::{
    AuthToken, ClientConfig, EpochMillis, FileStore, IdentityProvider, KeyValueStore, MemoryStore,
    ScriptedChannel, StreamClient, StreamRecord, StreamScript, TransitMode,
};
use std::sync::Arc;
use tempfile::TempDir;

fn record(n: u64) -> StreamRecord {
    StreamRecord {
        vehicle: format!("veh-{}", n % 64),
        source_ip: Some("192.0.2.10".to_string()),
        timestamp: EpochMillis(1_700_000_000_000 + n as i64),
        latitude: 37.77,
        longitude: -122.41,
        heading: 90.0,
        speed: 12.0,
        transit_mode: TransitMode::Car,
        message: None,
        server_timestamp: EpochMillis(1_700_000_000_100 + n as i64),
    }
}

/// Benchmark token file writes and cached reads
fn bench_file_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store");

    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path().join("identity.bin")).unwrap();
    let value = uuid::Uuid::new_v4().to_string();

    group.bench_function("set", |b| {
        b.iter(|| store.set("connection_token", black_box(&value)).unwrap());
    });

    group.bench_function("get", |b| {
        b.iter(|| black_box(store.get("connection_token").unwrap()));
    });

    group.bench_function("reopen", |b| {
        let path = dir.path().join("reopen.bin");
        FileStore::open(&path)
            .unwrap()
            .set("connection_token", &value)
            .unwrap();
        b.iter(|| black_box(FileStore::open(&path).unwrap()));
    });

    group.finish();
}

/// Benchmark identity minting and rotation
fn bench_identity(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");

    group.bench_function("rotate_memory", |b| {
        let provider = IdentityProvider::new(Arc::new(MemoryStore::new()));
        provider.obtain_identity().unwrap();
        b.iter(|| black_box(provider.rotate_identity().unwrap()));
    });

    group.bench_function("rotate_file", |b| {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("identity.bin")).unwrap();
        let provider = IdentityProvider::new(Arc::new(store));
        provider.obtain_identity().unwrap();
        b.iter(|| black_box(provider.rotate_identity().unwrap()));
    });

    group.finish();
}

/// Benchmark record delivery through a session
fn bench_stream_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_delivery");

    for count in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("records", count), &count, |b, &count| {
            b.iter(|| {
                let channel = ScriptedChannel::new();
                channel.push_stream(StreamScript::records((0..count).map(record).collect()));
                let client =
                    StreamClient::new(channel, AuthToken::new("bench"), ClientConfig::default())
                        .unwrap();

                let mut session = client.session();
                let delivered = session.records().filter(|r| r.is_ok()).count();
                assert_eq!(delivered as u64, count);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_file_store, bench_identity, bench_stream_delivery);
criterion_main!(benches);
