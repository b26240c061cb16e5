//! Benchmark for snapshot listing
//!
//! Every page is cut from a freshly filtered and sorted listing, so the
//! cost of a page grows with the size of the whole listing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sds_csi_controller::controlplane::listing::{page_snapshots, SnapshotFilter};
use sds_csi_controller::controlplane::protocol::ListSnapshotsRequest;
use sds_csi_controller::{ControllerConfig, ControllerService, InMemoryOrchestrator, SnapshotRecord};
use std::sync::Arc;

fn snapshots(count: usize) -> Vec<SnapshotRecord> {
    // reversed so the sort has work to do
    (0..count)
        .rev()
        .map(|i| SnapshotRecord {
            id: format!("snap-{:06}", i),
            name: format!("snapshot-{}", i),
            size: 1,
            volume_id: format!("vol-{:04}", i % 100),
            status: "available".to_string(),
            created_at: "2024-01-01T00:00:00".to_string(),
            ..Default::default()
        })
        .collect()
}

fn bench_first_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_listing");

    for count in [100, 1_000, 10_000] {
        let all = snapshots(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("first_page", count), &all, |b, all| {
            b.iter(|| {
                let _ = page_snapshots(black_box(all.clone()), SnapshotFilter::default(), "", 50);
            });
        });
    }

    group.finish();
}

fn bench_filtered_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_listing");
    let all = snapshots(10_000);

    group.bench_function("by_source_volume", |b| {
        b.iter(|| {
            let filter = SnapshotFilter {
                snapshot_id: "",
                source_volume_id: black_box("vol-0042"),
            };
            let _ = page_snapshots(all.clone(), filter, "", 0);
        });
    });

    group.finish();
}

fn bench_walk_all_pages(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_listing");
    group.throughput(Throughput::Elements(1_000));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let backend = Arc::new(InMemoryOrchestrator::default());
    rt.block_on(async {
        for snapshot in snapshots(1_000) {
            backend.insert_snapshot(snapshot).await;
        }
    });
    let service = ControllerService::new(backend, ControllerConfig::default()).unwrap();

    group.bench_function("service_walk_1000_by_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut token = String::new();
                loop {
                    let page = service
                        .list_snapshots(ListSnapshotsRequest {
                            max_entries: 100,
                            starting_token: token,
                            ..Default::default()
                        })
                        .await
                        .unwrap();
                    if page.next_token.is_empty() {
                        break;
                    }
                    token = page.next_token;
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_first_page, bench_filtered_page, bench_walk_all_pages);
criterion_main!(benches);
