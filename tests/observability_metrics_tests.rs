use biorecord::observability::RecorderMetrics;
use std::sync::Arc;

#[test]
fn test_metrics_creation() {
    let metrics = RecorderMetrics::new();
    assert_eq!(metrics.frames_received(), 0);
    assert_eq!(metrics.records_emitted(), 0);
    assert_eq!(metrics.errors_count(), 0);
}

#[test]
fn test_gap_accounting() {
    let metrics = Arc::new(RecorderMetrics::new());
    metrics.record_frame();
    metrics.record_gap(3);
    metrics.record_gap(1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.frames_received, 1);
    assert_eq!(snapshot.gaps, 2);
    assert_eq!(snapshot.duplicates_inserted, 4);
}

#[tokio::test]
async fn test_metrics_latency_tracking() {
    let metrics = RecorderMetrics::new();

    let start = metrics.start_processing();
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    metrics.finish_processing(start);

    assert!(metrics.avg_frame_latency_us() >= 10_000);
}

#[test]
fn test_snapshot_serializes() {
    let metrics = RecorderMetrics::new();
    metrics.record_emitted();
    let json = serde_json::to_value(metrics.snapshot()).unwrap();
    assert_eq!(json["records_emitted"], 1);
}
