use anyhow::{anyhow, Result};
use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::hal::{AcquisitionDevice, DeviceConfig, DeviceFrame};

const FRAME_QUEUE_DEPTH: usize = 64;

/// Frame generator standing in for a real amplifier.
///
/// Channel samples follow a per-channel sawtooth; the lead-off and battery
/// samples carry fixed values that tests can set.
pub struct SimulatedDevice {
    frame_tx: Sender<DeviceFrame>,
    frame_rx: Receiver<DeviceFrame>,
    interval: Duration,
    frame_limit: Option<u64>,
    dropped: HashSet<u64>,
    lead_off_mask: i32,
    battery_level: i32,
    running: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        let (frame_tx, frame_rx) = bounded(FRAME_QUEUE_DEPTH);
        Self {
            frame_tx,
            frame_rx,
            interval: Duration::from_millis(1),
            frame_limit: None,
            dropped: HashSet::new(),
            lead_off_mask: 0,
            battery_level: 100,
            running: Arc::new(AtomicBool::new(false)),
            disconnected: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Pause between generated frames
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Generate frames `0..limit` and then go quiet
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Frame numbers lost "in transport"
    pub fn with_dropped_frames(mut self, frames: impl IntoIterator<Item = u64>) -> Self {
        self.dropped.extend(frames);
        self
    }

    pub fn with_lead_off_mask(mut self, mask: i32) -> Self {
        self.lead_off_mask = mask;
        self
    }

    pub fn with_battery_level(mut self, level: i32) -> Self {
        self.battery_level = level;
        self
    }

    /// Simulate the device being unplugged
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn frame(config: &DeviceConfig, number: u64, lead_off: i32, battery: i32) -> Vec<i32> {
        let mut samples = Vec::new();
        for (index, channel) in config.enabled_channels() {
            let spr = config.max_samples_per_record / channel.divider.max(1);
            let base = number as usize * spr;
            samples.extend((0..spr).map(|j| ((base + j) % 256) as i32 * (index as i32 + 1)));
        }
        if config.lead_off_enabled {
            samples.push(lead_off);
        }
        if config.battery_enabled {
            samples.push(battery);
        }
        samples
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcquisitionDevice for SimulatedDevice {
    async fn start(&mut self, config: &DeviceConfig) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated device is disconnected"));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("Simulated device is already streaming"));
        }

        let config = config.clone();
        let tx = self.frame_tx.clone();
        let running = self.running.clone();
        let interval = self.interval;
        let limit = self.frame_limit;
        let dropped = self.dropped.clone();
        let (lead_off, battery) = (self.lead_off_mask, self.battery_level);

        let handle = thread::Builder::new()
            .name("simulated-device".to_string())
            .spawn(move || {
                let mut number = 0u64;
                while running.load(Ordering::SeqCst) && limit.map_or(true, |l| number < l) {
                    if !dropped.contains(&number) {
                        let frame = DeviceFrame::new(
                            SimulatedDevice::frame(&config, number, lead_off, battery),
                            number,
                        );
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    number += 1;
                    thread::sleep(interval);
                }
            })?;
        self.worker = Some(handle);
        log::debug!("Simulated device started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            handle
                .join()
                .map_err(|_| anyhow!("Simulated device thread panicked"))?;
        }
        Ok(())
    }

    fn frames(&self) -> Receiver<DeviceFrame> {
        self.frame_rx.clone()
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::DeviceChannel;

    #[test]
    fn test_frame_layout() {
        let mut config = DeviceConfig {
            max_samples_per_record: 4,
            ..Default::default()
        }
        .with_channel(DeviceChannel::new("a"))
        .with_channel(DeviceChannel::new("b").with_divider(2));
        config.battery_enabled = true;

        let samples = SimulatedDevice::frame(&config, 1, 0, 80);
        assert_eq!(samples, vec![4, 5, 6, 7, 4, 6, 80]);
    }

    #[tokio::test]
    async fn test_dropped_frames_never_arrive() {
        let config = DeviceConfig {
            max_samples_per_record: 2,
            ..Default::default()
        }
        .with_channel(DeviceChannel::new("a"));
        let mut device = SimulatedDevice::new()
            .with_frame_limit(4)
            .with_dropped_frames([1, 2]);
        device.start(&config).await.unwrap();
        let rx = device.frames();
        let numbers: Vec<u64> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap().frame_number)
            .collect();
        device.stop().await.unwrap();
        assert_eq!(numbers, vec![0, 3]);
    }
}
