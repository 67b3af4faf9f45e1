use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use cuemark_sync::annotation::{Annotation, Author, NewAnnotation};
use cuemark_sync::feed::Feed;
use cuemark_sync::protocol::{FeedMessage, JoinAccepted, JoinParams, Reply};
use cuemark_sync::scheduler::PlaybackScheduler;
use std::hint::black_box;

fn annotations(n: u64) -> Vec<Annotation> {
    (1..=n)
        .map(|id| Annotation::new(id, (id * 7_919) % 600_000, format!("note {id}"), Author::new("ana")))
        .collect()
}

fn bench_annotation_encode(c: &mut Criterion) {
    let annotation = Annotation::new(42, 61_500, "a typical short comment", Author::new("ana"));

    c.bench_function("new_annotation_encode", |b| {
        b.iter(|| {
            let msg = FeedMessage::new_annotation(black_box("videos:42"), black_box(&annotation)).unwrap();
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_annotation_decode(c: &mut Criterion) {
    let annotation = Annotation::new(42, 61_500, "a typical short comment", Author::new("ana"));
    let encoded = FeedMessage::new_annotation("videos:42", &annotation)
        .unwrap()
        .encode()
        .unwrap();

    c.bench_function("new_annotation_decode", |b| {
        b.iter(|| {
            let msg = FeedMessage::decode(black_box(&encoded)).unwrap();
            black_box(msg.annotation().unwrap());
        })
    });
}

fn bench_join_reply_200(c: &mut Criterion) {
    let reply = Reply::Ok(JoinAccepted {
        annotations: annotations(200),
    });

    c.bench_function("join_reply_encode_200", |b| {
        b.iter(|| {
            let msg = FeedMessage::join_reply(1, "videos:42", black_box(&reply)).unwrap();
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_scheduler_tick(c: &mut Criterion) {
    let batch = annotations(1_000);

    c.bench_function("scheduler_tick_1k_pending", |b| {
        b.iter_batched(
            || {
                let mut scheduler = PlaybackScheduler::new();
                scheduler.enqueue_all(batch.clone());
                scheduler
            },
            |mut scheduler| {
                let mut revealed = 0usize;
                scheduler.tick(black_box(300_000), &mut |_: &Annotation| revealed += 1);
                black_box(revealed)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_feed_backlog(c: &mut Criterion) {
    let mut feed = Feed::new();
    for i in 0..5_000u64 {
        feed.append(Author::new("ana"), NewAnnotation::new(format!("n{i}"), (i * 7_919) % 600_000))
            .unwrap();
    }

    c.bench_function("feed_backlog_5k_limit_200", |b| {
        b.iter(|| {
            black_box(feed.backlog(
                black_box(JoinParams {
                    last_seen_id: Some(2_500),
                }),
                200,
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_annotation_encode,
    bench_annotation_decode,
    bench_join_reply_200,
    bench_scheduler_tick,
    bench_feed_backlog,
);
criterion_main!(benches);
