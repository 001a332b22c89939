use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use crate::core::FileFormat;
use crate::error::Result;
use crate::hal::DeviceConfig;

/// When lead-off and battery observers are polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCadence {
    /// Every K-th frame received from the device
    ReceivedFrames,
    /// Every K-th record emitted, duplicates included
    EmittedRecords,
}

impl Default for NotificationCadence {
    fn default() -> Self {
        NotificationCadence::ReceivedFrames
    }
}

fn default_records_per_notification() -> u64 {
    10
}

fn default_max_repaired_gap() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// K: frames (or records) between side-channel notifications
    #[serde(default = "default_records_per_notification")]
    pub records_per_notification: u64,
    #[serde(default = "default_true")]
    pub lead_off_notifications: bool,
    #[serde(default = "default_true")]
    pub battery_notifications: bool,
    /// Replace the nominal record duration with the measured one on stop
    #[serde(default = "default_true")]
    pub duration_adjustable: bool,
    #[serde(default)]
    pub notification_cadence: NotificationCadence,
    /// Record auxiliary channels only, on a carrier channel
    #[serde(default)]
    pub aux_only: bool,
    /// Longest run of missing frames filled with duplicates; longer jumps
    /// are treated as a resynchronisation and not filled
    #[serde(default = "default_max_repaired_gap")]
    pub max_repaired_gap: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            records_per_notification: default_records_per_notification(),
            lead_off_notifications: true,
            battery_notifications: true,
            duration_adjustable: true,
            notification_cadence: NotificationCadence::default(),
            aux_only: false,
            max_repaired_gap: default_max_repaired_gap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: FileFormat,
}

fn default_join_records() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Filter names per channel index, applied in order
    #[serde(default)]
    pub filters: BTreeMap<usize, Vec<String>>,
    /// Frequency dividers per channel index
    #[serde(default)]
    pub dividers: BTreeMap<usize, usize>,
    /// Records joined into one stored record; 1 disables joining
    #[serde(default = "default_join_records")]
    pub join_records: usize,
    /// Strip carrier, lead-off and battery channels before storage
    #[serde(default = "default_true")]
    pub remove_helper_channels: bool,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filters: BTreeMap::new(),
            dividers: BTreeMap::new(),
            join_records: default_join_records(),
            remove_helper_channels: true,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub recording_id: String,
}

/// Complete recorder setup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl RecorderConfig {
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&json)?;
        log::debug!("Loaded recorder config from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = RecorderConfig::from_json(json!({})).unwrap();
        assert_eq!(config.adapter.records_per_notification, 10);
        assert_eq!(config.adapter.notification_cadence, NotificationCadence::ReceivedFrames);
        assert_eq!(config.adapter.max_repaired_gap, 10_000);
        assert_eq!(config.pipeline.join_records, 1);
        assert!(config.pipeline.remove_helper_channels);
    }

    #[test]
    fn test_channel_keyed_maps() {
        let config = RecorderConfig::from_json(json!({
            "pipeline": {
                "filters": {"0": ["hp", "notch"]},
                "dividers": {"1": 2},
                "outputs": [{"path": "/tmp/x.edf", "format": "edf"}]
            },
            "adapter": {"notification_cadence": "emitted_records"}
        }))
        .unwrap();
        assert_eq!(config.pipeline.filters[&0], vec!["hp", "notch"]);
        assert_eq!(config.pipeline.dividers[&1], 2);
        assert_eq!(config.pipeline.outputs[0].format, FileFormat::Edf);
        assert_eq!(config.adapter.notification_cadence, NotificationCadence::EmittedRecords);
    }

    #[test]
    fn test_malformed_document_is_config_error() {
        let result = RecorderConfig::from_json(json!({"pipeline": {"join_records": "three"}}));
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
