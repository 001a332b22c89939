use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

fn default_enabled() -> bool {
    true
}

fn default_divider() -> usize {
    1
}

fn default_gain() -> u32 {
    1
}

fn default_physical_min() -> f64 {
    -187_500.0
}

fn default_physical_max() -> f64 {
    187_500.0
}

fn default_digital_min() -> i32 {
    -8_388_608
}

fn default_digital_max() -> i32 {
    8_388_607
}

fn default_dimension() -> String {
    "uV".to_string()
}

/// One acquisition channel as reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceChannel {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sample-rate divider relative to the device maximum rate
    #[serde(default = "default_divider")]
    pub divider: usize,
    /// Opaque amplifier setting, only written into the transducer text
    #[serde(default = "default_gain")]
    pub gain: u32,
    #[serde(default = "default_enabled")]
    pub lead_off_enabled: bool,
    #[serde(default = "default_dimension")]
    pub physical_dimension: String,
    #[serde(default = "default_physical_min")]
    pub physical_min: f64,
    #[serde(default = "default_physical_max")]
    pub physical_max: f64,
    #[serde(default = "default_digital_min")]
    pub digital_min: i32,
    #[serde(default = "default_digital_max")]
    pub digital_max: i32,
}

impl DeviceChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            divider: 1,
            gain: 1,
            lead_off_enabled: true,
            physical_dimension: default_dimension(),
            physical_min: default_physical_min(),
            physical_max: default_physical_max(),
            digital_min: default_digital_min(),
            digital_max: default_digital_max(),
        }
    }

    pub fn with_divider(mut self, divider: usize) -> Self {
        self.divider = divider;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn without_lead_off(mut self) -> Self {
        self.lead_off_enabled = false;
        self
    }
}

fn default_record_duration() -> f64 {
    1.0
}

fn default_max_samples() -> usize {
    500
}

/// Device-reported acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_record_duration")]
    pub record_duration_s: f64,
    /// Samples per record for a channel at divider 1
    #[serde(default = "default_max_samples")]
    pub max_samples_per_record: usize,
    #[serde(default)]
    pub lead_off_enabled: bool,
    #[serde(default)]
    pub battery_enabled: bool,
    #[serde(default)]
    pub channels: Vec<DeviceChannel>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            record_duration_s: default_record_duration(),
            max_samples_per_record: default_max_samples(),
            lead_off_enabled: false,
            battery_enabled: false,
            channels: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn with_channel(mut self, channel: DeviceChannel) -> Self {
        self.channels.push(channel);
        self
    }

    /// True when lead-off or battery samples travel with each frame
    pub fn has_aux_channels(&self) -> bool {
        self.lead_off_enabled || self.battery_enabled
    }

    pub fn enabled_channels(&self) -> impl Iterator<Item = (usize, &DeviceChannel)> {
        self.channels.iter().enumerate().filter(|(_, c)| c.enabled)
    }

    /// Samples one frame carries for `channel`
    pub fn samples_per_record(&self, channel: &DeviceChannel) -> Result<usize> {
        if channel.divider == 0 || self.max_samples_per_record % channel.divider != 0 {
            return Err(Error::config(format!(
                "channel {}: divider {} does not divide {} samples per record",
                channel.name, channel.divider, self.max_samples_per_record
            )));
        }
        Ok(self.max_samples_per_record / channel.divider)
    }

    /// Total samples in one device frame
    pub fn frame_size(&self) -> Result<usize> {
        let mut size = 0;
        for (_, channel) in self.enabled_channels() {
            size += self.samples_per_record(channel)?;
        }
        if self.lead_off_enabled {
            size += 1;
        }
        if self.battery_enabled {
            size += 1;
        }
        Ok(size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.record_duration_s.is_nan() || self.record_duration_s <= 0.0 {
            return Err(Error::config(format!(
                "record duration must be positive, got {}",
                self.record_duration_s
            )));
        }
        if self.max_samples_per_record == 0 {
            return Err(Error::config("max_samples_per_record must be positive"));
        }
        self.frame_size().map(|_| ())
    }
}

/// One numbered frame as delivered by the device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFrame {
    pub samples: Vec<i32>,
    pub frame_number: u64,
}

impl DeviceFrame {
    pub fn new(samples: Vec<i32>, frame_number: u64) -> Self {
        Self { samples, frame_number }
    }
}
