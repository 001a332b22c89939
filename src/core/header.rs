use serde::{Deserialize, Serialize};
use std::ops::Range;
use crate::error::{Error, Result};

/// Record count value meaning "not known yet"
pub const UNKNOWN_RECORD_COUNT: i64 = -1;

/// On-disk sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// 16-bit little-endian samples
    Edf,
    /// 24-bit little-endian samples
    Bdf,
}

impl FileFormat {
    /// Bytes per encoded sample
    pub fn sample_width(&self) -> usize {
        match self {
            FileFormat::Edf => 2,
            FileFormat::Bdf => 3,
        }
    }

    /// Widest digital range the encoding can hold
    pub fn digital_limits(&self) -> (i32, i32) {
        match self {
            FileFormat::Edf => (i16::MIN as i32, i16::MAX as i32),
            FileFormat::Bdf => (-8_388_608, 8_388_607),
        }
    }
}

impl Default for FileFormat {
    fn default() -> Self {
        FileFormat::Bdf
    }
}

/// Per-channel descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub label: String,
    pub transducer: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub prefiltering: String,
    pub samples_per_record: usize,
}

impl ChannelSpec {
    pub fn new(label: impl Into<String>, samples_per_record: usize) -> Self {
        Self {
            label: label.into(),
            transducer: String::new(),
            physical_dimension: String::new(),
            physical_min: i16::MIN as f64,
            physical_max: i16::MAX as f64,
            digital_min: i16::MIN as i32,
            digital_max: i16::MAX as i32,
            prefiltering: String::new(),
            samples_per_record,
        }
    }

    pub fn with_physical_range(mut self, min: f64, max: f64) -> Self {
        self.physical_min = min;
        self.physical_max = max;
        self
    }

    pub fn with_digital_range(mut self, min: i32, max: i32) -> Self {
        self.digital_min = min;
        self.digital_max = max;
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.physical_dimension = dimension.into();
        self
    }

    pub fn with_transducer(mut self, transducer: impl Into<String>) -> Self {
        self.transducer = transducer.into();
        self
    }

    pub fn with_prefiltering(mut self, prefiltering: impl Into<String>) -> Self {
        self.prefiltering = prefiltering.into();
        self
    }

    /// Physical units per digital step
    pub fn gain(&self) -> f64 {
        (self.physical_max - self.physical_min) / (self.digital_max - self.digital_min) as f64
    }

    /// Digital offset such that `physical = gain * (digital + offset)`
    pub fn offset(&self) -> f64 {
        self.physical_max / self.gain() - self.digital_max as f64
    }

    pub fn physical_to_digital(&self, physical: f64) -> i32 {
        let span = self.physical_max - self.physical_min;
        let digital_span = (self.digital_max - self.digital_min) as f64;
        let digital = (physical - self.physical_min) / span * digital_span + self.digital_min as f64;
        // `as` saturates at the i32 bounds
        digital.round() as i32
    }

    pub fn digital_to_physical(&self, digital: i32) -> f64 {
        self.gain() * (digital as f64 + self.offset())
    }

    /// Saturate into `[digital_min, digital_max]`
    pub fn clamp(&self, digital: i32) -> i32 {
        digital.clamp(self.digital_min, self.digital_max)
    }

    fn validate(&self, index: usize, format: FileFormat) -> Result<()> {
        if self.digital_min >= self.digital_max {
            return Err(Error::config(format!(
                "channel {} ({}): digital_min {} must be below digital_max {}",
                index, self.label, self.digital_min, self.digital_max
            )));
        }
        if self.physical_min == self.physical_max {
            return Err(Error::config(format!(
                "channel {} ({}): physical range is empty",
                index, self.label
            )));
        }
        let (lo, hi) = format.digital_limits();
        if self.digital_min < lo || self.digital_max > hi {
            return Err(Error::config(format!(
                "channel {} ({}): digital range {}..{} exceeds {:?} limits {}..{}",
                index, self.label, self.digital_min, self.digital_max, format, lo, hi
            )));
        }
        Ok(())
    }
}

/// Layout and metadata of a record stream.
///
/// Stages receive their own copy on `set_header` and never share one by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub format: FileFormat,
    pub patient_id: String,
    pub recording_id: String,
    /// Milliseconds since the Unix epoch; filled in by the writer when absent
    pub recording_start_ms: Option<i64>,
    pub duration_of_record: f64,
    pub number_of_records: i64,
    pub channels: Vec<ChannelSpec>,
}

impl RecordHeader {
    pub fn new(format: FileFormat, duration_of_record: f64) -> Self {
        Self {
            format,
            patient_id: String::new(),
            recording_id: String::new(),
            recording_start_ms: None,
            duration_of_record,
            number_of_records: UNKNOWN_RECORD_COUNT,
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: ChannelSpec) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total samples in one record
    pub fn record_size(&self) -> usize {
        self.channels.iter().map(|c| c.samples_per_record).sum()
    }

    /// Sample range of `channel` inside a flat record
    pub fn channel_range(&self, channel: usize) -> Range<usize> {
        let start: usize = self.channels[..channel]
            .iter()
            .map(|c| c.samples_per_record)
            .sum();
        start..start + self.channels[channel].samples_per_record
    }

    /// Start offset of every channel block, in channel order
    pub fn channel_offsets(&self) -> Vec<usize> {
        let mut offset = 0;
        self.channels
            .iter()
            .map(|c| {
                let start = offset;
                offset += c.samples_per_record;
                start
            })
            .collect()
    }

    pub fn sample_frequency(&self, channel: usize) -> f64 {
        self.channels[channel].samples_per_record as f64 / self.duration_of_record
    }

    /// True when both headers frame records identically
    pub fn same_layout(&self, other: &RecordHeader) -> bool {
        self.channels.len() == other.channels.len()
            && self
                .channels
                .iter()
                .zip(&other.channels)
                .all(|(a, b)| a.samples_per_record == b.samples_per_record)
    }

    /// True when every channel keeps its digital and physical range
    pub fn same_scaling(&self, other: &RecordHeader) -> bool {
        self.channels.len() == other.channels.len()
            && self.channels.iter().zip(&other.channels).all(|(a, b)| {
                a.digital_min == b.digital_min
                    && a.digital_max == b.digital_max
                    && a.physical_min == b.physical_min
                    && a.physical_max == b.physical_max
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.duration_of_record.is_nan() || self.duration_of_record <= 0.0 {
            return Err(Error::config(format!(
                "record duration must be positive, got {}",
                self.duration_of_record
            )));
        }
        for (i, channel) in self.channels.iter().enumerate() {
            channel.validate(i, self.format)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> RecordHeader {
        RecordHeader::new(FileFormat::Edf, 1.0)
            .with_channel(ChannelSpec::new("a", 4))
            .with_channel(ChannelSpec::new("b", 2))
            .with_channel(ChannelSpec::new("c", 3))
    }

    #[test]
    fn test_record_size_and_ranges() {
        let h = header();
        assert_eq!(h.record_size(), 9);
        assert_eq!(h.channel_range(1), 4..6);
        assert_eq!(h.channel_offsets(), vec![0, 4, 6]);
    }

    #[test]
    fn test_physical_digital_scaling() {
        let ch = ChannelSpec::new("x", 1)
            .with_physical_range(-100.0, 100.0)
            .with_digital_range(-1000, 1000);
        assert_eq!(ch.physical_to_digital(0.0), 0);
        assert_eq!(ch.physical_to_digital(100.0), 1000);
        assert_eq!(ch.physical_to_digital(-50.0), -500);
        assert!((ch.digital_to_physical(500) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_inverted_digital_range() {
        let h = RecordHeader::new(FileFormat::Edf, 1.0)
            .with_channel(ChannelSpec::new("x", 1).with_digital_range(5, 5));
        assert!(matches!(h.validate(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_validate_rejects_range_beyond_format() {
        let h = RecordHeader::new(FileFormat::Edf, 1.0)
            .with_channel(ChannelSpec::new("x", 1).with_digital_range(-100_000, 100_000));
        assert!(h.validate().is_err());
        let mut bdf = h.clone();
        bdf.format = FileFormat::Bdf;
        assert!(bdf.validate().is_ok());
    }
}
