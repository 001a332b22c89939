use std::sync::Arc;
use crate::config::{AdapterConfig, NotificationCadence};
use crate::core::{ChannelSpec, FileFormat, RecordHeader, RecordSink};
use crate::engine::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::hal::DeviceConfig;
use crate::observability::RecorderMetrics;

/// Receives the per-channel lead-off state: `Some(true)` disconnected,
/// `Some(false)` connected, `None` when the channel is not monitored
pub type LeadOffObserver = Box<dyn FnMut(&[Option<bool>]) + Send>;

/// Receives the battery level, in percent, rounded to a multiple of 10
pub type BatteryObserver = Box<dyn FnMut(u8) + Send>;

pub const LEAD_OFF_LABEL: &str = "Lead-off";
pub const BATTERY_LABEL: &str = "Battery";

/// Record layout derived from the device settings
#[derive(Debug, Clone)]
pub struct FrameLayout {
    /// Settings the device must be started with (carrier channel applied)
    pub device: DeviceConfig,
    pub header: RecordHeader,
    /// Header indices of the carrier, lead-off and battery channels
    pub helper_channels: Vec<usize>,
    pub frame_size: usize,
    lead_off_sample: Option<usize>,
    battery_sample: Option<usize>,
}

impl FrameLayout {
    pub fn plan(device: &DeviceConfig, config: &AdapterConfig) -> Result<Self> {
        let mut effective = device.clone();
        if config.aux_only {
            for channel in &mut effective.channels {
                channel.enabled = false;
            }
        }
        effective.validate()?;

        let mut helper_channels = Vec::new();
        if effective.enabled_channels().next().is_none() {
            if !effective.has_aux_channels() {
                return Err(Error::config(
                    "every channel is disabled and no auxiliary channel is enabled",
                ));
            }
            let slowest = effective.max_samples_per_record;
            let carrier = effective.channels.first_mut().ok_or_else(|| {
                Error::config("no device channel available to carry auxiliary data")
            })?;
            carrier.enabled = true;
            carrier.divider = slowest;
            log::info!("Auxiliary-only recording on carrier channel {}", carrier.name);
            helper_channels.push(0);
        }

        let mut header = RecordHeader::new(FileFormat::Bdf, effective.record_duration_s);
        for (_, channel) in effective.enabled_channels() {
            header.channels.push(
                ChannelSpec::new(channel.name.clone(), effective.samples_per_record(channel)?)
                    .with_physical_range(channel.physical_min, channel.physical_max)
                    .with_digital_range(channel.digital_min, channel.digital_max)
                    .with_dimension(channel.physical_dimension.clone())
                    .with_transducer(format!("gain {}", channel.gain)),
            );
        }

        let mut next_sample = header.record_size();
        let mut lead_off_sample = None;
        if effective.lead_off_enabled {
            let (_, hi) = header.format.digital_limits();
            helper_channels.push(header.channel_count());
            header.channels.push(
                ChannelSpec::new(LEAD_OFF_LABEL, 1)
                    .with_physical_range(0.0, hi as f64)
                    .with_digital_range(0, hi),
            );
            lead_off_sample = Some(next_sample);
            next_sample += 1;
        }
        let mut battery_sample = None;
        if effective.battery_enabled {
            helper_channels.push(header.channel_count());
            header.channels.push(
                ChannelSpec::new(BATTERY_LABEL, 1)
                    .with_physical_range(0.0, 100.0)
                    .with_digital_range(0, 100)
                    .with_dimension("%"),
            );
            battery_sample = Some(next_sample);
        }
        header.validate()?;

        Ok(Self {
            frame_size: header.record_size(),
            device: effective,
            header,
            helper_channels,
            lead_off_sample,
            battery_sample,
        })
    }
}

/// Per device channel: `None` unless the channel is enabled and monitored
fn lead_off_states(device: &DeviceConfig, mask: i32) -> Vec<Option<bool>> {
    device
        .channels
        .iter()
        .enumerate()
        .map(|(i, channel)| {
            if channel.enabled && channel.lead_off_enabled && i < 32 {
                Some(mask & (1 << i) != 0)
            } else {
                None
            }
        })
        .collect()
}

/// Raw percentage rounded to the nearest multiple of 10
fn round_battery(raw: i32) -> u8 {
    let clamped = raw.clamp(0, 100);
    ((clamped + 5) / 10 * 10) as u8
}

/// Turns numbered device frames into a contiguous record stream.
///
/// A frame that arrives after a gap is emitted once and then repeated once
/// per missing frame, so downstream sinks always see one record per frame
/// period. Lead-off and battery samples are polled every K frames and
/// reported to the registered observers.
pub struct FrameAdapter {
    device: DeviceConfig,
    config: AdapterConfig,
    sink: Box<dyn RecordSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RecorderMetrics>,
    patient_id: String,
    recording_id: String,
    layout: Option<FrameLayout>,
    active: bool,
    disconnected: bool,
    last_frame_number: i64,
    frames_received: u64,
    records_count: u64,
    first_record_time: Option<i64>,
    last_record_time: i64,
    battery_level: Option<u8>,
    lead_off_observer: Option<LeadOffObserver>,
    battery_observer: Option<BatteryObserver>,
}

impl FrameAdapter {
    pub fn new(device: DeviceConfig, config: AdapterConfig, sink: impl RecordSink + 'static) -> Self {
        Self::with_boxed_sink(device, config, Box::new(sink))
    }

    pub fn with_boxed_sink(device: DeviceConfig, config: AdapterConfig, sink: Box<dyn RecordSink>) -> Self {
        Self {
            device,
            config,
            sink,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(RecorderMetrics::new()),
            patient_id: String::new(),
            recording_id: String::new(),
            layout: None,
            active: false,
            disconnected: false,
            last_frame_number: -1,
            frames_received: 0,
            records_count: 0,
            first_record_time: None,
            last_record_time: 0,
            battery_level: None,
            lead_off_observer: None,
            battery_observer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RecorderMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_identity(mut self, patient_id: impl Into<String>, recording_id: impl Into<String>) -> Self {
        self.patient_id = patient_id.into();
        self.recording_id = recording_id.into();
        self
    }

    pub fn metrics(&self) -> Arc<RecorderMetrics> {
        self.metrics.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Records emitted this session, duplicates included
    pub fn records_count(&self) -> u64 {
        self.records_count
    }

    /// Last reported battery level
    pub fn battery_level(&self) -> Option<u8> {
        self.battery_level
    }

    /// Header sent downstream for the current session
    pub fn header(&self) -> Option<&RecordHeader> {
        self.layout.as_ref().map(|layout| &layout.header)
    }

    /// Replaces any previous lead-off observer
    pub fn set_lead_off_observer(&mut self, observer: impl FnMut(&[Option<bool>]) + Send + 'static) {
        self.lead_off_observer = Some(Box::new(observer));
    }

    pub fn clear_lead_off_observer(&mut self) {
        self.lead_off_observer = None;
    }

    /// Replaces any previous battery observer
    pub fn set_battery_observer(&mut self, observer: impl FnMut(u8) + Send + 'static) {
        self.battery_observer = Some(Box::new(observer));
    }

    pub fn clear_battery_observer(&mut self) {
        self.battery_observer = None;
    }

    /// The device is gone; later `start` calls fail
    pub fn mark_disconnected(&mut self) {
        self.disconnected = true;
    }

    /// Begin a session: derive the layout and configure the sink.
    ///
    /// Returns the settings the device must be started with.
    pub fn start(&mut self) -> Result<DeviceConfig> {
        if self.disconnected {
            return Err(Error::state("device was disconnected"));
        }
        if self.active {
            return Err(Error::state("adapter is already active"));
        }
        if self.config.records_per_notification == 0 {
            return Err(Error::config("records_per_notification must be positive"));
        }

        let mut layout = FrameLayout::plan(&self.device, &self.config)?;
        layout.header.patient_id = self.patient_id.clone();
        layout.header.recording_id = self.recording_id.clone();
        self.sink.set_header(&layout.header)?;

        self.last_frame_number = -1;
        self.frames_received = 0;
        self.records_count = 0;
        self.first_record_time = None;
        self.last_record_time = 0;
        self.battery_level = None;
        self.active = true;
        log::info!(
            "Adapter started: {} channels, {} samples per frame",
            layout.header.channel_count(),
            layout.frame_size
        );

        let device = layout.device.clone();
        self.layout = Some(layout);
        Ok(device)
    }

    /// Feed one device frame
    pub fn on_frame(&mut self, samples: &[i32], frame_number: u64) -> Result<()> {
        if !self.active {
            return Err(Error::state("frame received while the adapter is not active"));
        }
        let frame_size = self.layout.as_ref().map_or(0, |layout| layout.frame_size);
        if samples.len() != frame_size {
            return Err(Error::config(format!(
                "frame {} has {} samples, expected {}",
                frame_number,
                samples.len(),
                frame_size
            )));
        }
        let number = i64::try_from(frame_number)
            .map_err(|_| Error::config(format!("frame number {} out of range", frame_number)))?;
        if number <= self.last_frame_number {
            log::warn!(
                "Discarding frame {} received after frame {}",
                frame_number,
                self.last_frame_number
            );
            return Ok(());
        }

        let now = self.clock.now_ms();
        if self.first_record_time.is_none() {
            // back-date to where frame 0 would have been
            let offset = (self.device.record_duration_s * 1000.0 * number as f64).round() as i64;
            self.first_record_time = Some(now - offset);
        }
        self.frames_received += 1;
        self.metrics.record_frame();

        let missing = (number - self.last_frame_number - 1) as u64;
        self.emit(samples)?;
        if missing > self.config.max_repaired_gap {
            log::warn!(
                "Frame {} follows frame {}: {} missing frames exceed the repair limit of {}, not filled",
                frame_number,
                self.last_frame_number,
                missing,
                self.config.max_repaired_gap
            );
            self.metrics.record_gap(0);
        } else if missing > 0 {
            for _ in 0..missing {
                self.emit(samples)?;
            }
            self.metrics.record_gap(missing);
            log::debug!("Repaired {} missing frames before frame {}", missing, frame_number);
        }
        self.last_frame_number = number;
        self.last_record_time = now;

        if self.config.notification_cadence == NotificationCadence::ReceivedFrames
            && self.frames_received % self.config.records_per_notification == 0
        {
            self.notify(samples);
        }
        Ok(())
    }

    fn emit(&mut self, samples: &[i32]) -> Result<()> {
        self.sink.write_record(samples)?;
        self.records_count += 1;
        self.metrics.record_emitted();
        if self.config.notification_cadence == NotificationCadence::EmittedRecords
            && self.records_count % self.config.records_per_notification == 0
        {
            self.notify(samples);
        }
        Ok(())
    }

    fn notify(&mut self, samples: &[i32]) {
        let (lead_off_sample, battery_sample) = match &self.layout {
            Some(layout) => (layout.lead_off_sample, layout.battery_sample),
            None => return,
        };

        if self.config.lead_off_notifications {
            if let Some(index) = lead_off_sample {
                let states = lead_off_states(&self.device, samples[index]);
                if let Some(observer) = self.lead_off_observer.as_mut() {
                    observer(&states);
                }
            }
        }

        if self.config.battery_notifications {
            if let Some(index) = battery_sample {
                let level = round_battery(samples[index]);
                // only ever moves down within a session
                let lower = self.battery_level.map_or(true, |previous| level < previous);
                if lower {
                    self.battery_level = Some(level);
                    if let Some(observer) = self.battery_observer.as_mut() {
                        observer(level);
                    }
                }
            }
        }
    }

    /// End the session: push the corrected header and close the sink
    pub fn stop(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::state("adapter is not active"));
        }
        self.active = false;

        let mut header_result = Ok(());
        if let (Some(first), Some(layout)) = (self.first_record_time, &self.layout) {
            let mut header = layout.header.clone();
            header.recording_start_ms = Some(first);
            if self.config.duration_adjustable && self.records_count > 1 {
                let measured = (self.last_record_time - first) as f64
                    / (self.records_count - 1) as f64
                    / 1000.0;
                if measured > 0.0 {
                    log::info!(
                        "Record duration adjusted from {}s to {}s",
                        header.duration_of_record,
                        measured
                    );
                    header.duration_of_record = measured;
                }
            }
            header_result = self.sink.set_header(&header);
            if let Err(e) = &header_result {
                log::warn!("Corrected header not accepted downstream: {}", e);
            }
        }
        log::info!(
            "Adapter stopped after {} frames, {} records",
            self.frames_received,
            self.records_count
        );
        // the sink is closed even when the header push failed
        let close_result = self.sink.close();
        header_result.and(close_result)
    }
}
