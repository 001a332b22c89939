use biorecord::core::{ChannelSpec, FileFormat, MemorySink, RecordHeader, RecordSink};
use biorecord::stages::RecordJoinStage;
use biorecord::{Error, Result};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn header() -> RecordHeader {
    RecordHeader::new(FileFormat::Bdf, 1.0)
        .with_channel(ChannelSpec::new("a", 2))
        .with_channel(ChannelSpec::new("b", 1))
}

fn record(k: i32) -> Vec<i32> {
    vec![10 * k, 10 * k + 1, 100 + k]
}

/// Fails every write
struct BrokenDisk;

impl RecordSink for BrokenDisk {
    fn set_header(&mut self, _header: &RecordHeader) -> Result<()> {
        Ok(())
    }

    fn write_record(&mut self, _record: &[i32]) -> Result<()> {
        Err(Error::IoFailure(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fails its first write and counts every write it is asked for
struct FirstWriteFails {
    writes: Arc<Mutex<usize>>,
}

impl RecordSink for FirstWriteFails {
    fn set_header(&mut self, _header: &RecordHeader) -> Result<()> {
        Ok(())
    }

    fn write_record(&mut self, _record: &[i32]) -> Result<()> {
        let mut writes = self.writes.lock().unwrap();
        *writes += 1;
        if *writes == 1 {
            return Err(Error::IoFailure(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Repeat `call` until it fails; the worker reports asynchronously
fn until_error(mut call: impl FnMut() -> Result<()>) -> Error {
    for _ in 0..500 {
        if let Err(e) = call() {
            return e;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("background failure never surfaced");
}

#[test]
fn test_join_three_records_in_order() {
    let sink = MemorySink::new();
    let mut stage = RecordJoinStage::new(3).unwrap();
    stage.add_sink(sink.clone()).unwrap();

    stage.set_header(&header()).unwrap();
    for k in 0..6 {
        stage.write_record(&record(k)).unwrap();
    }
    stage.close().unwrap();

    assert_eq!(
        sink.records(),
        vec![
            vec![0, 1, 10, 11, 20, 21, 100, 101, 102],
            vec![30, 31, 40, 41, 50, 51, 103, 104, 105],
        ]
    );
    assert!(sink.is_closed());
}

#[test]
fn test_join_output_header() {
    let sink = MemorySink::new();
    let mut stage = RecordJoinStage::new(3).unwrap();
    stage.add_sink(sink.clone()).unwrap();
    stage.set_header(&header()).unwrap();

    let out = sink.header().unwrap();
    assert_eq!(out.channels[0].samples_per_record, 6);
    assert_eq!(out.channels[1].samples_per_record, 3);
    assert_eq!(out.duration_of_record, 3.0);
    stage.close().unwrap();
}

#[test]
fn test_partial_output_record_dropped_on_close() {
    let sink = MemorySink::new();
    let mut stage = RecordJoinStage::new(2).unwrap();
    stage.add_sink(sink.clone()).unwrap();
    stage.set_header(&header()).unwrap();
    for k in 0..3 {
        stage.write_record(&record(k)).unwrap();
    }
    stage.close().unwrap();
    assert_eq!(sink.record_count(), 1);
}

#[test]
fn test_header_update_queued_behind_records() {
    let sink = MemorySink::new();
    let mut stage = RecordJoinStage::new(2).unwrap();
    stage.add_sink(sink.clone()).unwrap();
    stage.set_header(&header()).unwrap();
    stage.write_record(&record(0)).unwrap();
    stage.write_record(&record(1)).unwrap();

    let mut updated = header();
    updated.duration_of_record = 1.5;
    stage.set_header(&updated).unwrap();
    stage.close().unwrap();

    let durations: Vec<f64> = sink.headers().iter().map(|h| h.duration_of_record).collect();
    assert_eq!(durations, vec![2.0, 3.0]);
    assert_eq!(sink.record_count(), 1);
}

#[test]
fn test_background_failure_reported_on_close() {
    let mut stage = RecordJoinStage::new(3).unwrap();
    stage.add_sink(BrokenDisk).unwrap();
    stage.set_header(&header()).unwrap();
    for k in 0..3 {
        stage.write_record(&record(k)).unwrap();
    }
    assert!(matches!(stage.close(), Err(Error::IoFailure(_))));
}

#[test]
fn test_sinks_fixed_after_configuration() {
    let mut stage = RecordJoinStage::new(2).unwrap();
    stage.set_header(&header()).unwrap();
    assert!(matches!(stage.add_sink(MemorySink::new()), Err(Error::InvalidState(_))));
}

#[test]
fn test_zero_factor_rejected() {
    assert!(matches!(RecordJoinStage::new(0), Err(Error::InvalidConfiguration(_))));
}

#[test]
fn test_without_sinks_records_are_accepted() {
    let mut stage = RecordJoinStage::new(2).unwrap();
    stage.set_header(&header()).unwrap();
    for k in 0..4 {
        stage.write_record(&record(k)).unwrap();
    }
    stage.close().unwrap();
}

#[test]
fn test_rescale_after_records_rejected() {
    let mut stage = RecordJoinStage::new(2).unwrap();
    stage.add_sink(MemorySink::new()).unwrap();
    stage.set_header(&header()).unwrap();
    stage.write_record(&record(0)).unwrap();

    let mut rescaled = header();
    rescaled.channels[1].physical_min = -1.0;
    assert!(matches!(stage.set_header(&rescaled), Err(Error::IncompatibleHeader(_))));
    stage.close().unwrap();
}

#[test]
fn test_background_failure_reported_on_next_write() {
    let writes = Arc::new(Mutex::new(0));
    let mut stage = RecordJoinStage::new(1).unwrap();
    stage.add_sink(FirstWriteFails { writes: writes.clone() }).unwrap();
    stage.set_header(&header()).unwrap();
    stage.write_record(&record(0)).unwrap();

    let mut k = 1;
    let error = until_error(|| {
        k += 1;
        stage.write_record(&record(k))
    });
    assert!(matches!(error, Error::IoFailure(_)));
    stage.close().unwrap();

    // nothing is forwarded after the failed record
    assert_eq!(*writes.lock().unwrap(), 1);
}

#[test]
fn test_background_failure_reported_on_next_header() {
    let writes = Arc::new(Mutex::new(0));
    let mut stage = RecordJoinStage::new(1).unwrap();
    stage.add_sink(FirstWriteFails { writes: writes.clone() }).unwrap();
    stage.set_header(&header()).unwrap();
    stage.write_record(&record(0)).unwrap();

    let error = until_error(|| stage.set_header(&header()));
    assert!(matches!(error, Error::IoFailure(_)));
    stage.close().unwrap();
    assert_eq!(*writes.lock().unwrap(), 1);
}
