use anyhow::Result;
use biorecord::config::RecorderConfig;
use biorecord::core::{FileFormat, MemorySink};
use biorecord::edf::EdfReader;
use biorecord::engine::{FilterRegistry, PipelineBuilder};
use biorecord::stages::SampleFilter;
use biorecord::Error;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::tempdir;

struct Double;

impl SampleFilter for Double {
    fn name(&self) -> &str {
        "double"
    }

    fn filter(&mut self, value: i32) -> i32 {
        value * 2
    }
}

fn registry() -> FilterRegistry {
    let mut registry = FilterRegistry::new();
    registry.register("double", || Box::new(Double));
    registry
}

fn channel(name: &str) -> Value {
    json!({
        "name": name,
        "physical_min": -32768.0,
        "physical_max": 32767.0,
        "digital_min": -32768,
        "digital_max": 32767
    })
}

fn config(dir: &Path) -> Result<RecorderConfig> {
    Ok(RecorderConfig::from_json(json!({
        "device": {
            "record_duration_s": 0.5,
            "max_samples_per_record": 4,
            "lead_off_enabled": true,
            "battery_enabled": true,
            "channels": [channel("a"), channel("b")]
        },
        "adapter": {"duration_adjustable": false},
        "pipeline": {
            "filters": {"0": ["double"]},
            "dividers": {"1": 2},
            "join_records": 2,
            "outputs": [
                {"path": dir.join("out.edf"), "format": "edf"},
                {"path": dir.join("out.bdf"), "format": "bdf"}
            ]
        },
        "recording": {"patient_id": "P-3", "recording_id": "bench"}
    }))?)
}

/// a = [n; 4], b = [n, n + 2, n + 4, n + 6], lead-off, battery
fn frame(n: i32) -> Vec<i32> {
    vec![n, n, n, n, n, n + 2, n + 4, n + 6, 0, 100]
}

#[test]
fn test_full_chain_to_both_formats() -> Result<()> {
    let dir = tempdir()?;
    let config = config(dir.path())?;
    let chart = MemorySink::new();
    let (mut adapter, writers) = PipelineBuilder::new()
        .add_monitor(chart.clone())
        .build_adapter(&config, &registry())?;
    assert_eq!(writers.len(), 2);

    adapter.start()?;
    for n in 0..4 {
        adapter.on_frame(&frame(n), n as u64)?;
    }
    adapter.stop()?;

    // the chart sees raw adapter output, helpers included
    assert_eq!(chart.record_count(), 4);
    assert_eq!(chart.header().map(|h| h.channel_count()), Some(4));

    for (writer, format) in writers.iter().zip([FileFormat::Edf, FileFormat::Bdf]) {
        assert!(writer.is_closed());
        let mut reader = EdfReader::open(writer.path())?;
        let header = reader.header().clone();
        assert_eq!(header.format, format);
        assert_eq!(header.patient_id, "P-3");
        assert_eq!(header.channel_count(), 2);
        assert_eq!(header.channels[0].samples_per_record, 8);
        assert_eq!(header.channels[1].samples_per_record, 4);
        assert_eq!(header.channels[0].prefiltering, "double");
        assert_eq!(header.duration_of_record, 1.0);
        assert_eq!(reader.record_count(), 2);

        assert_eq!(
            reader.read_record(0)?,
            vec![0, 0, 0, 0, 2, 2, 2, 2, 1, 5, 2, 6]
        );
        assert_eq!(
            reader.read_record(1)?,
            vec![4, 4, 4, 4, 6, 6, 6, 6, 3, 7, 4, 8]
        );
    }
    Ok(())
}

#[test]
fn test_helper_channels_kept_on_request() -> Result<()> {
    let dir = tempdir()?;
    let mut config = config(dir.path())?;
    config.pipeline.remove_helper_channels = false;
    config.pipeline.join_records = 1;
    config.pipeline.dividers.clear();
    // the lead-off channel needs the 24-bit range
    config.pipeline.outputs.remove(0);
    let pipeline = PipelineBuilder::new().build(&config, &registry())?;
    assert_eq!(pipeline.layout.helper_channels, vec![2, 3]);

    let (mut adapter, writers) = PipelineBuilder::new().build_adapter(&config, &registry())?;
    adapter.start()?;
    adapter.on_frame(&frame(1), 0)?;
    adapter.stop()?;

    let mut reader = EdfReader::open(writers[0].path())?;
    assert_eq!(reader.header().channel_count(), 4);
    assert_eq!(reader.read_record(0)?, vec![2, 2, 2, 2, 1, 3, 5, 7, 0, 100]);
    Ok(())
}

#[test]
fn test_unknown_filter_is_invalid_configuration() -> Result<()> {
    let dir = tempdir()?;
    let mut config = config(dir.path())?;
    config.pipeline.filters.insert(1, vec!["notch".to_string()]);
    let result = PipelineBuilder::new().build(&config, &registry());
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    Ok(())
}

#[test]
fn test_filter_on_missing_channel_is_invalid_configuration() -> Result<()> {
    let dir = tempdir()?;
    let mut config = config(dir.path())?;
    config.pipeline.filters.insert(9, vec!["double".to_string()]);
    let result = PipelineBuilder::new().build(&config, &registry());
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    Ok(())
}

#[test]
fn test_config_file_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let config = config(dir.path())?;
    let path = dir.path().join("recorder.json");
    config.save(&path)?;
    assert_eq!(RecorderConfig::load(&path)?, config);
    Ok(())
}

#[test]
fn test_output_closed_early_does_not_strand_the_others() -> Result<()> {
    let dir = tempdir()?;
    let mut config = config(dir.path())?;
    config.pipeline.join_records = 1;
    let (mut adapter, writers) = PipelineBuilder::new().build_adapter(&config, &registry())?;

    adapter.start()?;
    for n in 0..4 {
        adapter.on_frame(&frame(n), n as u64)?;
    }
    // the first output is finalized early, as a UI thread may do
    writers[0].finish()?;
    assert!(matches!(adapter.stop(), Err(Error::InvalidState(_))));

    for writer in &writers {
        assert!(writer.is_closed());
        let reader = EdfReader::open(writer.path())?;
        assert_eq!(reader.record_count(), 4);
        assert_eq!(reader.header().patient_id, "P-3");
    }
    Ok(())
}
