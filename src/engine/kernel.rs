use anyhow::anyhow;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::engine::adapter::FrameAdapter;
use crate::error::{Error, Result};
use crate::hal::{AcquisitionDevice, DeviceFrame};
use crate::observability::RecorderMetrics;

/// Recorder status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderStatus {
    Stopped,
    Running,
    /// The device is gone; the recorder cannot start again
    Disconnected,
}

fn lock(adapter: &Mutex<FrameAdapter>) -> MutexGuard<'_, FrameAdapter> {
    adapter.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RecorderRuntime connects an acquisition device to the frame adapter
pub struct RecorderRuntime {
    device: Box<dyn AcquisitionDevice>,
    adapter: Arc<Mutex<FrameAdapter>>,
    metrics: Arc<RecorderMetrics>,
    status: RecorderStatus,
    shutdown_tx: Option<Sender<()>>,
    reader: Option<JoinHandle<Result<()>>>,
}

impl RecorderRuntime {
    pub fn new(device: impl AcquisitionDevice + 'static, adapter: FrameAdapter) -> Self {
        Self::with_boxed_device(Box::new(device), adapter)
    }

    pub fn with_boxed_device(device: Box<dyn AcquisitionDevice>, adapter: FrameAdapter) -> Self {
        let metrics = adapter.metrics();
        Self {
            device,
            adapter: Arc::new(Mutex::new(adapter)),
            metrics,
            status: RecorderStatus::Stopped,
            shutdown_tx: None,
            reader: None,
        }
    }

    pub fn status(&self) -> RecorderStatus {
        self.status
    }

    pub fn metrics(&self) -> Arc<RecorderMetrics> {
        self.metrics.clone()
    }

    /// Shared adapter handle, for observer registration while running
    pub fn adapter(&self) -> Arc<Mutex<FrameAdapter>> {
        self.adapter.clone()
    }

    /// Start the session: configure the pipeline, start the device, spawn the reader
    pub async fn start(&mut self) -> Result<()> {
        match self.status {
            RecorderStatus::Running => return Err(Error::state("recorder is already running")),
            RecorderStatus::Disconnected => return Err(Error::state("device was disconnected")),
            RecorderStatus::Stopped => {}
        }
        if self.device.is_disconnected() {
            self.status = RecorderStatus::Disconnected;
            lock(&self.adapter).mark_disconnected();
            return Err(Error::state("device was disconnected"));
        }

        let device_config = lock(&self.adapter).start()?;
        if let Err(e) = self.device.start(&device_config).await {
            log::warn!("Device failed to start: {}", e);
            if let Err(stop_error) = lock(&self.adapter).stop() {
                log::warn!("Adapter failed to stop after device error: {}", stop_error);
            }
            return Err(e.into());
        }

        let (shutdown_tx, shutdown_rx) = bounded(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.spawn_reader_task(self.device.frames(), shutdown_rx);
        self.status = RecorderStatus::Running;
        log::info!("Recorder started");
        Ok(())
    }

    /// Stop the device, drain queued frames, then finalize the pipeline.
    ///
    /// Stopping a recorder that is not running is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != RecorderStatus::Running {
            return Ok(());
        }

        let device_result = self.device.stop().await;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let reader_result = match self.reader.take() {
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| Err(Error::Device(anyhow!("Frame reader task failed: {}", e)))),
            None => Ok(()),
        };
        let adapter_result = lock(&self.adapter).stop();

        self.status = if self.device.is_disconnected() {
            lock(&self.adapter).mark_disconnected();
            RecorderStatus::Disconnected
        } else {
            RecorderStatus::Stopped
        };
        log::info!("Recorder stopped ({:?})", self.status);

        device_result?;
        reader_result?;
        adapter_result
    }

    fn spawn_reader_task(&mut self, frames: Receiver<DeviceFrame>, shutdown_rx: Receiver<()>) {
        let adapter = self.adapter.clone();
        let metrics = self.metrics.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let process = |frame: DeviceFrame| -> Result<()> {
                let start = metrics.start_processing();
                let result = lock(&adapter).on_frame(&frame.samples, frame.frame_number);
                metrics.finish_processing(start);
                if let Err(e) = &result {
                    metrics.record_error();
                    log::warn!("Frame {} rejected: {}", frame.frame_number, e);
                }
                result
            };

            loop {
                select! {
                    recv(frames) -> msg => match msg {
                        Ok(frame) => process(frame)?,
                        Err(_) => {
                            log::warn!("Device frame stream ended");
                            return Ok(());
                        }
                    },
                    recv(shutdown_rx) -> _ => break,
                }
            }

            // frames queued before the device stopped still belong to the session
            while let Ok(frame) = frames.try_recv() {
                process(frame)?;
            }
            Ok(())
        });

        self.reader = Some(handle);
    }
}

/// Note: stop the runtime with `stop()` before dropping it. Drop can only
/// signal the reader; it cannot await it or finalize the output files.
impl Drop for RecorderRuntime {
    fn drop(&mut self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::core::NullSink;
    use crate::hal::{DeviceChannel, DeviceConfig, SimulatedDevice};

    fn runtime(device: SimulatedDevice) -> RecorderRuntime {
        let config = DeviceConfig::default().with_channel(DeviceChannel::new("a"));
        RecorderRuntime::new(device, FrameAdapter::new(config, AdapterConfig::default(), NullSink))
    }

    #[test]
    fn test_runtime_status_default() {
        let runtime = runtime(SimulatedDevice::new());
        assert_eq!(runtime.status(), RecorderStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let mut runtime = runtime(SimulatedDevice::new());
        assert!(runtime.stop().await.is_ok());
        assert_eq!(runtime.status(), RecorderStatus::Stopped);
    }
}
