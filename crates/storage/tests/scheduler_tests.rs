//! Tests for the batch write scheduler against the in-memory store.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use hydro_common::HydroError;
use storage::{BatchWriteScheduler, Store};
use test_utils::MemoryStore;

fn batch(rows: &[&str]) -> Bytes {
    let mut text = String::new();
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    Bytes::from(text)
}

#[tokio::test]
async fn test_await_all_sums_rows_and_batches() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = BatchWriteScheduler::new(store.clone() as Arc<dyn Store>, 4);

    let handles = vec![
        scheduler.submit("wres.observation", batch(&["1|a", "2|b"]), 2),
        scheduler.submit("wres.observation", batch(&["3|c"]), 1),
    ];

    let summary = BatchWriteScheduler::await_all(handles).await.unwrap();
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(scheduler.submitted(), 2);
    assert_eq!(store.copied_rows(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_await_all_reports_first_failure_in_submission_order() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(5)));
    store.fail_copy_containing("lead_2");
    store.fail_copy_containing("lead_4");
    let scheduler = BatchWriteScheduler::new(store.clone() as Arc<dyn Store>, 2);

    let handles: Vec<_> = (0..6)
        .map(|k| {
            scheduler.submit(
                format!("partitions.forecastvalue_lead_{}", k),
                batch(&[&format!("1|{}|0.5", k * 80)]),
                1,
            )
        })
        .collect();

    let err = BatchWriteScheduler::await_all(handles).await.unwrap_err();
    match err {
        HydroError::CopyError { destination, .. } => {
            assert_eq!(destination, "partitions.forecastvalue_lead_2")
        }
        other => panic!("unexpected error: {other}"),
    }

    // Every task ran to completion; the successful ones were written.
    assert_eq!(store.copied_rows(), 4);
}

#[tokio::test]
async fn test_failing_task_is_identified_by_handle() {
    let store = Arc::new(MemoryStore::new());
    store.fail_copy_containing("partitions.forecastvalue_lead_1");
    let scheduler = BatchWriteScheduler::new(store.clone() as Arc<dyn Store>, 1);

    let ok = scheduler.submit("partitions.forecastvalue_lead_0", batch(&["1|0|1.0"]), 1);
    let bad = scheduler.submit("partitions.forecastvalue_lead_1", batch(&["1|80|1.0"]), 1);

    assert_eq!(ok.task_id(), 0);
    assert_eq!(bad.task_id(), 1);
    assert_eq!(bad.rows(), 1);
    assert!(ok.wait().await.is_ok());

    let err = bad.wait().await.unwrap_err();
    assert!(err.to_string().contains("partitions.forecastvalue_lead_1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permits_bound_concurrency_and_are_returned() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(10)));
    let scheduler = BatchWriteScheduler::new(store.clone() as Arc<dyn Store>, 3);

    let handles: Vec<_> = (0..12)
        .map(|i| scheduler.submit("wres.observation", batch(&[&format!("{}|x", i)]), 1))
        .collect();

    assert!(scheduler.available_permits() <= 3);

    let summary = BatchWriteScheduler::await_all(handles).await.unwrap();
    assert_eq!(summary.batches, 12);
    assert_eq!(scheduler.available_permits(), 3);
}
