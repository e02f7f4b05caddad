use std::sync::Arc;
use zircon::core::policies::timestamp::{MonotonicTimestampGenerator, TimestampGenerator};

#[test]
fn test_timestamps_are_strictly_increasing() {
    let generator = MonotonicTimestampGenerator::new();
    let mut last = generator.next();
    for _ in 0..100_000 {
        let next = generator.next();
        assert!(next > last, "{next} is not after {last}");
        last = next;
    }
}

#[test]
fn test_timestamps_are_microseconds_since_epoch() {
    let generator = MonotonicTimestampGenerator::new();
    let now_micros = chrono::Utc::now().timestamp_micros();
    let generated = generator.next();
    // Within a minute of the wall clock.
    assert!((generated - now_micros).abs() < 60_000_000);
}

#[tokio::test]
async fn test_concurrent_generators_never_collide() {
    let generator = Arc::new(MonotonicTimestampGenerator::new());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let generator = generator.clone();
        tasks.push(tokio::spawn(async move {
            (0..10_000).map(|_| generator.next()).collect::<Vec<_>>()
        }));
    }
    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    let len = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), len, "duplicate timestamps were handed out");
}
