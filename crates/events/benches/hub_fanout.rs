use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use cadence_core::{JobId, JobStatus};
use cadence_events::{HubConfig, JobEvent, NotificationHub};

const EVENTS_PER_ITER: u8 = 8;

/// Publish a burst of progress events to one job and drain every subscriber.
fn bench_fanout_per_subscriber_count(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("hub_fanout");

    for subscribers in [1usize, 8, 64].iter() {
        group.throughput(Throughput::Elements(*subscribers as u64 * EVENTS_PER_ITER as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            subscribers,
            |b, &subscribers| {
                let hub = rt.block_on(async { NotificationHub::spawn(HubConfig::default()) });
                let job_id = JobId::new();
                let mut subs: Vec<_> = (0..subscribers)
                    .map(|_| hub.attach(job_id).unwrap())
                    .collect();

                b.iter(|| {
                    rt.block_on(async {
                        for p in 0..EVENTS_PER_ITER {
                            hub.publish(JobEvent::progress(job_id, p, JobStatus::Running, "bench"))
                                .unwrap();
                        }
                        for sub in subs.iter_mut() {
                            for _ in 0..EVENTS_PER_ITER {
                                black_box(sub.recv().await);
                            }
                        }
                    })
                });
            },
        );
    }

    group.finish();
}

/// Publishing to a job nobody watches should stay close to a channel send.
fn bench_publish_without_subscribers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let hub = rt.block_on(async { NotificationHub::spawn(HubConfig::default()) });
    let job_id = JobId::new();

    c.bench_function("publish_unwatched_job", |b| {
        b.iter(|| {
            hub.publish(black_box(JobEvent::progress(job_id, 50, JobStatus::Running, "bench")))
                .unwrap()
        })
    });

    rt.block_on(async { hub.stats().await.unwrap() });
}

criterion_group!(
    benches,
    bench_fanout_per_subscriber_count,
    bench_publish_without_subscribers
);
criterion_main!(benches);
