use anyhow::Result;
use biorecord::config::RecorderConfig;
use biorecord::core::MemorySink;
use biorecord::edf::EdfReader;
use biorecord::engine::{FilterRegistry, PipelineBuilder, RecorderRuntime};
use biorecord::hal::SimulatedDevice;
use biorecord::stages::SampleFilter;
use std::time::Duration;

/// Subtracts a running mean, removing baseline drift
struct BaselineFilter {
    mean: i64,
}

impl SampleFilter for BaselineFilter {
    fn name(&self) -> &str {
        "baseline"
    }

    fn filter(&mut self, value: i32) -> i32 {
        self.mean += (value as i64 - self.mean) / 16;
        (value as i64 - self.mean) as i32
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let output = std::env::temp_dir().join("biorecord_demo.bdf");
    let config = RecorderConfig::from_json(serde_json::json!({
        "device": {
            "record_duration_s": 0.05,
            "max_samples_per_record": 25,
            "lead_off_enabled": true,
            "battery_enabled": true,
            "channels": [
                {"name": "Fp1"},
                {"name": "Fp2", "divider": 5},
                {"name": "O1", "enabled": false}
            ]
        },
        "adapter": {"records_per_notification": 20},
        "pipeline": {
            "filters": {"0": ["baseline"]},
            "join_records": 2,
            "outputs": [{"path": output, "format": "bdf"}]
        },
        "recording": {"patient_id": "DEMO", "recording_id": "simulated session"}
    }))?;

    let mut registry = FilterRegistry::new();
    registry.register("baseline", || Box::new(BaselineFilter { mean: 0 }));

    let chart = MemorySink::new();
    let (mut adapter, writers) = PipelineBuilder::new()
        .add_monitor(chart.clone())
        .build_adapter(&config, &registry)?;
    adapter.set_battery_observer(|level| println!("Battery: {}%", level));
    adapter.set_lead_off_observer(|states| println!("Lead-off: {:?}", states));

    let device = SimulatedDevice::new()
        .with_interval(Duration::from_millis(5))
        .with_frame_limit(200)
        .with_dropped_frames([17, 18, 90])
        .with_battery_level(83);
    let mut runtime = RecorderRuntime::new(device, adapter);

    runtime.start().await?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    runtime.stop().await?;

    let metrics = runtime.metrics().snapshot();
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    println!("Chart received {} records", chart.record_count());

    for writer in &writers {
        let reader = EdfReader::open(writer.path())?;
        println!(
            "{:?}: {} records of {}s, {} signals",
            writer.path(),
            reader.record_count(),
            reader.header().duration_of_record,
            reader.header().channel_count()
        );
    }
    Ok(())
}
