use std::hint::black_box;

use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use omm_directory::DirectoryAggregator;
use omm_types::ChannelId;
use omm_types::ServiceEntry;
use omm_types::ServiceInfo;
use omm_types::ServiceStatus;
use omm_types::ServiceUpdate;

fn directory(services: u16) -> Vec<ServiceEntry> {
    (0..services).map(|id| ServiceEntry::new(id + 1, ServiceInfo::new(format!("FEED_{id}")))).collect()
}

fn bench_refresh_four_channels(c: &mut Criterion) {
    let entries = directory(200);

    c.bench_function("refresh_4x200", |b| {
        b.iter(|| {
            let mut aggregator = DirectoryAggregator::new();
            for channel in 0..4 {
                black_box(aggregator.on_directory_refresh(ChannelId(channel), entries.clone()));
            }
            black_box(aggregator)
        })
    });
}

fn bench_refresh_replay(c: &mut Criterion) {
    let entries = directory(200);
    let mut aggregator = DirectoryAggregator::new();
    aggregator.on_directory_refresh(ChannelId(0), entries.clone());
    aggregator.on_directory_refresh(ChannelId(1), entries.clone());

    c.bench_function("refresh_replay_200", |b| {
        b.iter(|| {
            black_box(aggregator.on_directory_refresh(ChannelId(0), black_box(entries.clone())));
        });
    });
}

fn bench_status_flap(c: &mut Criterion) {
    let mut aggregator = DirectoryAggregator::new();
    aggregator.on_directory_refresh(ChannelId(0), directory(200));
    aggregator.on_directory_refresh(ChannelId(1), directory(200));

    c.bench_function("status_flap", |b| {
        b.iter(|| {
            for id in 1..=200 {
                aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::status(id, ServiceStatus::down())]);
                aggregator.on_directory_update(ChannelId(0), vec![ServiceUpdate::status(id, ServiceStatus::up())]);
            }
        });
    });
}

criterion_group!(benches, bench_refresh_four_channels, bench_refresh_replay, bench_status_flap);
criterion_main!(benches);
